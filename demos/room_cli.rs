//! # Room CLI
//!
//! Joins a coding room over WebSocket and bridges it to the terminal:
//!
//! 1. Connect to the relay and join a room (a fresh one unless given)
//! 2. Print roster changes, notices, chat and remote buffers
//! 3. Read stdin: plain lines are chat, `/code <text>` replaces the buffer
//! 4. Leave on Ctrl+C, EOF or disconnect
//!
//! ## Running
//!
//! ```sh
//! CODEROOM_USER=alice cargo run --example room_cli
//!
//! # Join an existing room on another relay:
//! CODEROOM_URL=ws://relay:5000/relay CODEROOM_ROOM=R1 CODEROOM_USER=bob \
//!     cargo run --example room_cli
//! ```

use coderoom_client::{
    generate_room_id, JoinParams, RoomSession, SessionConfig, SessionError, SessionEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Default relay URL when `CODEROOM_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:5000/relay";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("CODEROOM_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let room = std::env::var("CODEROOM_ROOM").unwrap_or_else(|_| generate_room_id());
    let user = std::env::var("CODEROOM_USER").unwrap_or_default();

    // ── Join ────────────────────────────────────────────────────────
    tracing::info!("Joining room {room} on {url}");
    let (mut session, mut events) =
        match RoomSession::connect(&url, JoinParams::new(room, user), SessionConfig::new()).await
        {
            Ok(joined) => joined,
            Err(SessionError::InvalidJoin(why)) => {
                eprintln!("{why} (set CODEROOM_USER)");
                return Ok(());
            }
            Err(e) => {
                eprintln!("Socket connection failed, try again later. ({e})");
                return Ok(());
            }
        };
    println!("room id: {}", session.room_id());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                match event {
                    SessionEvent::RosterUpdated { participants } => {
                        let names: Vec<_> =
                            participants.iter().map(|p| p.username.as_str()).collect();
                        println!("participants: {}", names.join(", "));
                    }
                    SessionEvent::Notice(notice) => println!("* {notice}"),
                    SessionEvent::MessageReceived { message, from_self } => {
                        let who = if from_self { "you" } else { message.username.as_str() };
                        println!("[{who}] {}", message.text);
                    }
                    SessionEvent::RemoteBuffer { code, origin } => {
                        println!("--- buffer ({origin:?}) ---\n{code}\n---");
                    }
                    SessionEvent::Disconnected { reason } => {
                        tracing::warn!("Disconnected: {reason:?}");
                        break;
                    }
                    other => tracing::debug!("Event: {other:?}"),
                }
            }

            line = stdin.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };
                let sent = match line.strip_prefix("/code ") {
                    Some(code) => session.edit_buffer(code.replace("\\n", "\n")),
                    None => session.send_message(line),
                };
                match sent {
                    Ok(()) | Err(SessionError::EmptyMessage) => {}
                    Err(e) => {
                        tracing::error!("{e}");
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, leaving…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    session.leave().await;
    tracing::info!("Left the room. Goodbye!");
    Ok(())
}
