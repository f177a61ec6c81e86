use crate::config::TelegramConfig;
use crate::models::signal::Command;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Telegram control channel: drains the notify queue out to the chat and
/// long-polls `getUpdates` for operator commands.
///
/// When unconfigured, notifications are drained into the log so the
/// pipeline never blocks on a full channel.
pub struct TelegramBot {
    token: String,
    chat_id: i64,
    http: reqwest::Client,
}

const HELP_TEXT: &str = "/pause - pause trading\n\
    /resume - resume trading\n\
    /balance - portfolio status\n\
    /positions - strategy performance\n\
    /shutdown - stop the bot";

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// Map an operator message onto a trader command.
fn parse_command(text: &str) -> Option<Command> {
    match text.trim() {
        "/pause" => Some(Command::Pause),
        "/resume" => Some(Command::Resume),
        "/balance" => Some(Command::PortfolioStatus),
        "/positions" => Some(Command::StrategyPerformance),
        "/shutdown" => Some(Command::Shutdown),
        _ => None,
    }
}

impl TelegramBot {
    /// Spawns the notification and command-polling tasks. Returns false
    /// when Telegram is not configured (a log-drain task runs instead).
    pub fn start(
        config: &TelegramConfig,
        command_tx: mpsc::Sender<Command>,
        mut notify_rx: mpsc::Receiver<String>,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> bool {
        let (Some(token), Some(chat_id)) = (config.token.clone(), config.chat_id) else {
            info!("Telegram disabled: token or chat id not set");
            let mut shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        msg = notify_rx.recv() => match msg {
                            Some(msg) => info!("NOTIFY: {msg}"),
                            None => break,
                        },
                        _ = shutdown.recv() => break,
                    }
                }
            });
            return false;
        };

        let bot = Arc::new(TelegramBot {
            token,
            chat_id,
            http: reqwest::Client::new(),
        });

        // Notification egress.
        {
            let bot = bot.clone();
            let mut shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        msg = notify_rx.recv() => match msg {
                            Some(msg) => bot.send_message(&msg).await,
                            None => break,
                        },
                        _ = shutdown.recv() => break,
                    }
                }
            });
        }

        // Command ingress via long polling.
        {
            let bot = bot.clone();
            let mut shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                info!("Telegram command polling started");
                let mut offset: i64 = 0;
                loop {
                    let commands = tokio::select! {
                        polled = bot.poll_updates(&mut offset) => polled,
                        _ = shutdown.recv() => break,
                    };
                    for command in commands {
                        if command_tx.send(command).await.is_err() {
                            return;
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            });
        }

        true
    }

    async fn send_message(&self, text: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let body = serde_json::json!({ "chat_id": self.chat_id, "text": text });
        if let Err(e) = self.http.post(&url).json(&body).send().await {
            warn!("Telegram send failed: {e}");
        }
    }

    /// One long-poll cycle; advances the update offset and returns the
    /// parsed commands.
    async fn poll_updates(&self, offset: &mut i64) -> Vec<Command> {
        let url = format!(
            "https://api.telegram.org/bot{}/getUpdates?offset={offset}&timeout=10",
            self.token
        );
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("Telegram poll failed: {e}");
                return Vec::new();
            }
        };
        let updates: UpdatesResponse = match response.json().await {
            Ok(u) => u,
            Err(e) => {
                debug!("Telegram poll decode failed: {e}");
                return Vec::new();
            }
        };

        let mut commands = Vec::new();
        for update in updates.result {
            *offset = (*offset).max(update.update_id + 1);
            let Some(message) = update.message else { continue };
            if message.chat.id != self.chat_id {
                continue;
            }
            let Some(text) = message.text else { continue };

            if text.trim() == "/help" {
                self.send_message(HELP_TEXT).await;
                continue;
            }
            match parse_command(&text) {
                Some(command) => {
                    info!("Telegram command: {command:?}");
                    commands.push(command);
                }
                None => debug!("Unrecognized Telegram message: {text}"),
            }
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_commands_parse() {
        assert_eq!(parse_command("/pause"), Some(Command::Pause));
        assert_eq!(parse_command("/resume"), Some(Command::Resume));
        assert_eq!(parse_command("/balance"), Some(Command::PortfolioStatus));
        assert_eq!(parse_command("/positions"), Some(Command::StrategyPerformance));
        assert_eq!(parse_command("/shutdown"), Some(Command::Shutdown));
        assert_eq!(parse_command("  /pause  "), Some(Command::Pause));
    }

    #[test]
    fn unknown_messages_do_not_parse() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/moon"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn updates_response_decodes() {
        let raw = r#"{
            "ok": true,
            "result": [
                {"update_id": 7, "message": {"chat": {"id": 42}, "text": "/pause"}},
                {"update_id": 8, "message": {"chat": {"id": 42}}}
            ]
        }"#;
        let updates: UpdatesResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(updates.result.len(), 2);
        assert_eq!(updates.result[0].update_id, 7);
        assert_eq!(
            updates.result[0].message.as_ref().unwrap().text.as_deref(),
            Some("/pause")
        );
    }
}
