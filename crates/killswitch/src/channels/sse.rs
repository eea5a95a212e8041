//! Server-push channel: SSE-style event stream.
//!
//! The wire format is lines of `data: <JSON>` separated by blank lines;
//! `event: heartbeat` frames carry no command but prove the connection is
//! alive. Going 2× the heartbeat interval without any traffic forces a
//! disconnect so the supervisor reconnects.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{ChannelError, CommandChannel};
use crate::command::KillSwitchCommand;

/// One parsed SSE block.
#[derive(Debug, PartialEq)]
pub enum SseFrame {
    Heartbeat,
    Command(Box<KillSwitchCommand>),
    Ignored,
}

/// Parse one event block (the lines between blank-line separators).
pub fn parse_event_block(block: &str) -> SseFrame {
    let mut event_name: Option<&str> = None;
    let mut data = String::new();
    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event_name = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.trim());
        }
    }

    if event_name == Some("heartbeat") {
        return SseFrame::Heartbeat;
    }
    if data.is_empty() {
        return SseFrame::Ignored;
    }
    match serde_json::from_str::<KillSwitchCommand>(&data) {
        Ok(command) => SseFrame::Command(Box::new(command)),
        Err(e) => {
            tracing::warn!(error = %e, "Discarding undecodable SSE command frame");
            SseFrame::Ignored
        }
    }
}

/// SSE subscription to a kill-switch endpoint.
pub struct SseChannel {
    url: String,
    client: reqwest::Client,
    heartbeat_timeout: Duration,
}

impl SseChannel {
    pub fn new(url: impl Into<String>, heartbeat_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            heartbeat_timeout,
        }
    }
}

#[async_trait]
impl CommandChannel for SseChannel {
    fn name(&self) -> &'static str {
        "sse"
    }

    async fn run_once(
        &self,
        tx: &mpsc::Sender<KillSwitchCommand>,
    ) -> Result<(), ChannelError> {
        let response = self
            .client
            .get(&self.url)
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChannelError::Transport(format!(
                "stream endpoint answered {}",
                response.status()
            )));
        }

        let watchdog = self.heartbeat_timeout * 2;
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        loop {
            let chunk = match tokio::time::timeout(watchdog, stream.next()).await {
                // Watchdog tripped: neither data nor heartbeat arrived.
                Err(_) => {
                    return Err(ChannelError::Transport(
                        "heartbeat missed; forcing reconnect".to_string(),
                    ))
                }
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(ChannelError::Transport(e.to_string())),
                Ok(Some(Ok(bytes))) => bytes,
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(split) = buffer.find("\n\n") {
                let block = buffer[..split].to_string();
                buffer.drain(..split + 2);
                match parse_event_block(&block) {
                    SseFrame::Heartbeat | SseFrame::Ignored => {}
                    SseFrame::Command(command) => {
                        if tx.send(*command).await.is_err() {
                            // Receiver went away; shut the channel down.
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
