//! Remote code execution.
//!
//! Runs the shared buffer on an external compile-and-run HTTP service. The
//! call is independent of the room: nothing here touches session state and
//! results are shown only to the member who asked.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), coderoom_client::execution::ExecutionError> {
//! use coderoom_client::execution::{
//!     ExecutionClient, ExecutionConfig, ExecutionRequest, IoPane, Language,
//! };
//!
//! let client = ExecutionClient::new(ExecutionConfig::default().with_api_key("secret"));
//! let mut pane = IoPane::default();
//!
//! let request = ExecutionRequest::new(Language::Python, "print(input())", "hi");
//! let result = client.run(&request).await;
//! pane.apply_result(&result);
//! println!("{}", pane.text());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

/// Default compile-and-run endpoint.
const DEFAULT_ENDPOINT: &str = "https://code-compiler.p.rapidapi.com/v2";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Text shown in the output pane when a run fails.
pub const FAILURE_TEXT: &str = "Something went wrong, Please check your code and input.";

// ── Language ────────────────────────────────────────────────────────

/// Languages the execution service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    C,
    #[default]
    Cpp,
    Java,
    Python,
    JavaScript,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::C,
        Language::Cpp,
        Language::Java,
        Language::Python,
        Language::JavaScript,
    ];

    /// Numeric selector sent as `LanguageChoice`.
    pub fn code(self) -> u8 {
        match self {
            Self::C => 6,
            Self::Cpp => 7,
            Self::Java => 4,
            Self::Python => 5,
            Self::JavaScript => 17,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::C => "C",
            Self::Cpp => "C++",
            Self::Java => "Java",
            Self::Python => "Python",
            Self::JavaScript => "JavaScript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a language name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" => Ok(Self::C),
            "c++" | "cpp" => Ok(Self::Cpp),
            "java" => Ok(Self::Java),
            "python" | "py" => Ok(Self::Python),
            "javascript" | "js" => Ok(Self::JavaScript),
            _ => Err(UnknownLanguage(s.to_owned())),
        }
    }
}

// ── Request / outcome ───────────────────────────────────────────────

/// One run of a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub language: Language,
    pub source: String,
    /// Passed to the program's standard input.
    pub stdin: String,
}

impl ExecutionRequest {
    pub fn new(language: Language, source: impl Into<String>, stdin: impl Into<String>) -> Self {
        Self {
            language,
            source: source.into(),
            stdin: stdin.into(),
        }
    }

    fn form(&self) -> [(&'static str, String); 3] {
        [
            ("LanguageChoice", self.language.code().to_string()),
            ("Program", self.source.clone()),
            ("Input", self.stdin.clone()),
        ]
    }
}

/// What the service reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The program ran; this is its output.
    Output(String),
    /// No result was produced; these are the service's diagnostics.
    CompileErrors(String),
}

impl ExecutionOutcome {
    /// Text to put in the output pane.
    pub fn text(&self) -> &str {
        match self {
            Self::Output(text) | Self::CompileErrors(text) => text,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServiceResponse {
    #[serde(rename = "Result", default)]
    result: Option<String>,
    #[serde(rename = "Errors", default)]
    errors: Option<String>,
}

impl From<ServiceResponse> for ExecutionOutcome {
    fn from(resp: ServiceResponse) -> Self {
        match resp.result {
            Some(output) => Self::Output(output),
            None => Self::CompileErrors(resp.errors.unwrap_or_default()),
        }
    }
}

/// Errors from the execution service.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The request could not be sent or timed out.
    #[error("execution request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("execution service returned HTTP {status}")]
    Status { status: u16, body: String },

    /// The response body was not the expected JSON.
    #[error("could not decode execution response: {0}")]
    Decode(#[from] serde_json::Error),
}

// ── Client ──────────────────────────────────────────────────────────

/// Where and how to reach the execution service.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub endpoint: String,
    /// Sent as `X-RapidAPI-Key` when set.
    pub api_key: Option<String>,
    /// Sent as `X-RapidAPI-Host` when set.
    pub api_host: Option<String>,
    pub connect_timeout: Duration,
    /// Whole-request timeout. Defaults to **10 seconds**.
    pub request_timeout: Duration,
}

impl ExecutionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            api_host: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = Some(host.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT).with_api_host("code-compiler.p.rapidapi.com")
    }
}

/// HTTP client for the execution service. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ExecutionClient {
    config: ExecutionConfig,
    http: reqwest::Client,
}

impl ExecutionClient {
    pub fn new(config: ExecutionConfig) -> Self {
        // Falls back to a default client if the builder fails.
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Run `request` once. No retries.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError`] if the service is unreachable, answers with
    /// an error status, or sends an unreadable body.
    pub async fn run(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        debug!(language = %request.language, "submitting program for execution");

        let mut builder = self.http.post(&self.config.endpoint).form(&request.form());
        if let Some(key) = &self.config.api_key {
            builder = builder.header("X-RapidAPI-Key", key);
        }
        if let Some(host) = &self.config.api_host {
            builder = builder.header("X-RapidAPI-Host", host);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "execution service rejected request");
            return Err(ExecutionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ServiceResponse = serde_json::from_str(&body)?;
        Ok(parsed.into())
    }
}

// ── Input / output pane ─────────────────────────────────────────────

/// Which half of the shared input/output pane is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivePane {
    #[default]
    Input,
    Output,
}

/// The single text area that doubles as program input and program output.
///
/// Editable only while the input side is active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoPane {
    active: ActivePane,
    text: String,
}

impl IoPane {
    pub fn active(&self) -> ActivePane {
        self.active
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_editable(&self) -> bool {
        self.active == ActivePane::Input
    }

    /// Replace the input text. Ignored while showing output.
    pub fn set_input(&mut self, text: impl Into<String>) {
        if self.is_editable() {
            self.text = text.into();
        }
    }

    /// Switch to an empty, editable input.
    pub fn show_input(&mut self) {
        self.active = ActivePane::Input;
        self.text.clear();
    }

    /// Switch to read-only output showing `text`.
    pub fn show_output(&mut self, text: impl Into<String>) {
        self.active = ActivePane::Output;
        self.text = text.into();
    }

    /// Show the result of a run.
    pub fn apply_result(&mut self, result: &Result<ExecutionOutcome, ExecutionError>) {
        match result {
            Ok(outcome) => self.show_output(outcome.text()),
            Err(e) => {
                debug!("execution failed: {e}");
                self.show_output(FAILURE_TEXT);
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one HTTP request with a canned response. Returns the endpoint
    /// URL and a handle yielding the raw request text.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&chunk[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).into_owned()
        });

        (format!("http://{addr}/v2"), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..split]
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        raw.len() >= split + 4 + length
    }

    #[test]
    fn selector_codes() {
        assert_eq!(Language::C.code(), 6);
        assert_eq!(Language::Cpp.code(), 7);
        assert_eq!(Language::Java.code(), 4);
        assert_eq!(Language::Python.code(), 5);
        assert_eq!(Language::JavaScript.code(), 17);
        assert_eq!(Language::default(), Language::Cpp);
        assert_eq!(Language::from_code(17), Some(Language::JavaScript));
        assert_eq!(Language::from_code(99), None);
    }

    #[test]
    fn language_names_parse() {
        assert_eq!("c++".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!(" Python ".parse::<Language>().unwrap(), Language::Python);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn result_wins_over_errors() {
        let resp: ServiceResponse =
            serde_json::from_str(r#"{"Result":"3\n","Errors":null,"Stats":"ok"}"#).unwrap();
        assert_eq!(ExecutionOutcome::from(resp), ExecutionOutcome::Output("3\n".into()));

        let resp: ServiceResponse =
            serde_json::from_str(r#"{"Result":null,"Errors":"line 1: syntax error"}"#).unwrap();
        assert_eq!(
            ExecutionOutcome::from(resp),
            ExecutionOutcome::CompileErrors("line 1: syntax error".into())
        );
    }

    #[test]
    fn pane_switches_between_input_and_output() {
        let mut pane = IoPane::default();
        assert!(pane.is_editable());
        pane.set_input("42");
        assert_eq!(pane.text(), "42");

        pane.show_output("done");
        assert_eq!(pane.active(), ActivePane::Output);
        pane.set_input("ignored");
        assert_eq!(pane.text(), "done");

        pane.show_input();
        assert!(pane.is_editable());
        assert_eq!(pane.text(), "");
    }

    #[tokio::test]
    async fn run_posts_form_and_reads_output() {
        let (url, server) = serve_once("200 OK", r#"{"Result":"hi\n","Errors":null}"#).await;
        let client = ExecutionClient::new(ExecutionConfig::new(url).with_api_key("k1"));

        let outcome = client
            .run(&ExecutionRequest::new(Language::Python, "print(input())", "hi"))
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Output("hi\n".into()));

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /v2"));
        assert!(raw.to_ascii_lowercase().contains("x-rapidapi-key: k1"));
        assert!(raw.contains("application/x-www-form-urlencoded"));
        assert!(raw.contains("LanguageChoice=5"));
        assert!(raw.contains("Program=print%28input%28%29%29"));
        assert!(raw.contains("Input=hi"));
    }

    #[tokio::test]
    async fn error_status_is_reported_and_shown_as_failure() {
        let (url, _server) = serve_once("500 Internal Server Error", "{}").await;
        let client = ExecutionClient::new(ExecutionConfig::new(url));

        let result = client
            .run(&ExecutionRequest::new(Language::C, "int main(){}", ""))
            .await;
        assert!(matches!(result, Err(ExecutionError::Status { status: 500, .. })));

        let mut pane = IoPane::default();
        pane.apply_result(&result);
        assert_eq!(pane.text(), FAILURE_TEXT);
        assert_eq!(pane.active(), ActivePane::Output);
    }

    #[tokio::test]
    async fn garbage_body_is_a_decode_error() {
        let (url, _server) = serve_once("200 OK", "not json").await;
        let client = ExecutionClient::new(ExecutionConfig::new(url));
        let result = client.run(&ExecutionRequest::new(Language::Java, "", "")).await;
        assert!(matches!(result, Err(ExecutionError::Decode(_))));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_request_error() {
        let client = ExecutionClient::new(
            ExecutionConfig::new("http://127.0.0.1:1/v2")
                .with_request_timeout(Duration::from_millis(500)),
        );
        let result = client.run(&ExecutionRequest::new(Language::Cpp, "", "")).await;
        assert!(matches!(result, Err(ExecutionError::Request(_))));
    }
}
