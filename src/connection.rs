//! Per-connection lifecycle.
//!
//! Each TCP connection gets one task that registers with the hub, sends the
//! welcome sequence and history replay, then loops reading lines into the
//! command router. A dedicated writer task drains the session's channel so a
//! slow socket never blocks the reader. Every exit path funnels into
//! `Hub::disconnect`, which is idempotent.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::banner;
use crate::commands::{self, Outcome};
use crate::history::REPLAY_COUNT;
use crate::identity::Identity;
use crate::ratelimit::FloodControl;
use crate::server::ServerState;

/// Writer-channel depth per connection.
const WRITE_QUEUE: usize = 64;

/// State owned by one connection's task. The identity and flood window are
/// never shared; only the hub's published name snapshot crosses tasks.
pub struct Session {
    pub id: u64,
    pub identity: Identity,
    pub flood: FloodControl,
    tx: mpsc::Sender<String>,
}

impl Session {
    pub fn new(id: u64, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            identity: Identity::new(id),
            flood: FloodControl::new(),
            tx,
        }
    }

    /// Best-effort reply to this session only. A full or closed channel is a
    /// transport failure and will surface through the disconnect path.
    pub fn reply(&self, line: impl Into<String>) {
        let _ = self.tx.try_send(line.into());
    }
}

pub async fn handle(stream: TcpStream, state: Arc<ServerState>) -> Result<()> {
    let peer = stream.peer_addr()?;
    let (read_half, mut write_half) = tokio::io::split(stream);

    let (tx, mut rx) = mpsc::channel::<String>(WRITE_QUEUE);
    let closing = Arc::new(Notify::new());

    // Capacity is enforced before any identity exists.
    let id = match state.hub.register(tx.clone(), Arc::clone(&closing)) {
        Ok(id) => id,
        Err(_) => {
            tracing::warn!(%peer, "Refused connection: server full");
            let _ = write_half.write_all(b"Server full, try again.\r\n").await;
            let _ = write_half.shutdown().await;
            return Ok(());
        }
    };
    tracing::info!(%peer, id, "New connection");

    // Writer task: every queued line goes out CRLF-terminated.
    let write_handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\r\n").await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut sess = Session::new(id, tx);

    // Welcome banner, usage hints and history replay go out before the join
    // announcement, so the replay never contains the user's own join line.
    sess.reply(banner::render());
    sess.reply("Register with /register <user> <pass> or /login <user> <pass>");
    sess.reply("Set a temporary nick with /nick <name> (or login/register to use account name)");
    let replayed = state.hub.replay(REPLAY_COUNT);
    if !replayed.is_empty() {
        sess.reply(format!("--- LAST MESSAGES (last {REPLAY_COUNT}) ---"));
        for entry in replayed {
            sess.reply(format!("{} {}", entry.at.format("%H:%M:%S"), entry.line));
        }
        sess.reply("--- END HISTORY ---");
    }
    state
        .hub
        .broadcast(&format!("* {} joined", sess.identity.display_name()), None);

    let mut reader = BufReader::new(read_half);
    let mut line_buf = String::new();
    let mut reason = "connection-closed";
    loop {
        line_buf.clear();
        tokio::select! {
            // Another trigger (flood elsewhere, write failure) already ran
            // our teardown; the trailing disconnect below is a no-op.
            _ = closing.notified() => break,
            read = reader.read_line(&mut line_buf) => match read {
                Ok(0) => break,
                Err(e) => {
                    tracing::debug!(id, "Read error: {e}");
                    reason = "read-error";
                    break;
                }
                Ok(_) => {
                    let text = line_buf.trim_end_matches(['\r', '\n']);
                    match commands::dispatch(text, &mut sess, &state) {
                        Outcome::Continue => {}
                        Outcome::Quit => {
                            reason = "user-quit";
                            break;
                        }
                        Outcome::Eject => {
                            reason = "flood";
                            break;
                        }
                    }
                }
            }
        }
    }

    state.hub.disconnect(id, reason);

    // Dropping the session releases the last writer handle; the writer task
    // drains the farewell and closes the socket.
    drop(sess);
    let _ = write_handle.await;
    Ok(())
}
