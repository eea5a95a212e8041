//! Pull channel: periodic poll of a pending-command endpoint.
//!
//! The endpoint answers with a JSON array of pending commands; an empty
//! array is a valid heartbeat. Request deadlines come from the client
//! timeout so a wedged upstream cannot stall the receiver.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChannelError, CommandChannel};
use crate::command::KillSwitchCommand;

pub struct PollChannel {
    url: String,
    client: reqwest::Client,
    interval: Duration,
}

impl PollChannel {
    pub fn new(url: impl Into<String>, interval: Duration, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .expect("reqwest client"),
            interval,
        }
    }
}

#[async_trait]
impl CommandChannel for PollChannel {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn run_once(
        &self,
        tx: &mpsc::Sender<KillSwitchCommand>,
    ) -> Result<(), ChannelError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChannelError::Transport(format!(
                "poll endpoint answered {}",
                response.status()
            )));
        }
        let commands: Vec<KillSwitchCommand> = response
            .json()
            .await
            .map_err(|e| ChannelError::Decode(e.to_string()))?;

        for command in commands {
            if tx.send(command).await.is_err() {
                return Ok(());
            }
        }
        tokio::time::sleep(self.interval).await;
        Ok(())
    }
}
