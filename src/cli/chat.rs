//! `pairchat chat` — connect to a relay server and chat with a peer.
//!
//! Loads recent history over the REST surface, then keeps a live session
//! through the session manager, printing incoming messages and sending
//! stdin lines to the peer.

use anyhow::{Context, Result};
use chrono::DateTime;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::{ChatSession, SessionConfig, SessionEvent};
use crate::config::ClientConfig;
use crate::models::StoredMessage;

/// Main entry point for `pairchat chat`.
pub async fn chat_command(
    server: String,
    user_id: i64,
    peer_id: i64,
    client_config: &ClientConfig,
) -> Result<()> {
    let base = server.trim_end_matches('/').to_string();

    // Load recent history before going live
    let history_url = format!("{}/api/messages/{}/{}", http_base(&base), user_id, peer_id);
    match fetch_history(&history_url).await {
        Ok(messages) => {
            for msg in &messages {
                print_message(msg, user_id);
            }
        }
        Err(err) => {
            eprintln!("[pairchat: could not load history: {err}]");
        }
    }

    let (session, mut events) = ChatSession::connect(SessionConfig {
        server_url: format!("{}/ws", base),
        user_id,
        reconnect_delay: client_config.reconnect_delay,
    });

    eprintln!("Connecting to {} as user {}...", base, user_id);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let content = line.trim();
                        if content.is_empty() {
                            continue;
                        }
                        if let Err(err) = session.send(content.to_string(), peer_id).await {
                            eprintln!("[pairchat: {err}]");
                        }
                    }
                    // Stdin closed
                    None => break,
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::Connected { user_id } => {
                        eprintln!("[pairchat: connected as user {}]", user_id);
                    }
                    SessionEvent::Disconnected => {
                        eprintln!("[pairchat: connection lost, reconnecting...]");
                    }
                    SessionEvent::MessageSent(msg) => {
                        print_message(&msg, user_id);
                    }
                    SessionEvent::MessageReceived(msg) => {
                        print_message(&msg, user_id);
                    }
                    SessionEvent::SessionError { message } => {
                        eprintln!("[pairchat: error: {}]", message);
                    }
                }
            }
        }
    }

    session.shutdown().await;
    eprintln!("[pairchat: disconnected]");

    Ok(())
}

async fn fetch_history(url: &str) -> Result<Vec<StoredMessage>> {
    reqwest::Client::new()
        .get(url)
        .send()
        .await
        .context("history request failed")?
        .error_for_status()
        .context("history request rejected")?
        .json::<Vec<StoredMessage>>()
        .await
        .context("invalid history response")
}

fn print_message(msg: &StoredMessage, own_user_id: i64) {
    let time = DateTime::from_timestamp(msg.created_at, 0)
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    let who = if msg.sender_id == own_user_id {
        "you".to_string()
    } else {
        format!("user {}", msg.sender_id)
    };
    println!("[{}] {}: {}", time, who, msg.content);
}

/// Map a ws:// or wss:// base URL to its http(s) counterpart for REST calls.
fn http_base(server: &str) -> String {
    if let Some(rest) = server.strip_prefix("ws://") {
        format!("http://{rest}")
    } else if let Some(rest) = server.strip_prefix("wss://") {
        format!("https://{rest}")
    } else {
        server.to_string()
    }
}
