//! File channel: watched local command drop.
//!
//! The file holds a JSON array of commands; operators (or a sidecar)
//! append objects to it. Each cycle reads the file and delivers only the
//! entries past the high-water mark, so appends trigger exactly one
//! delivery each. An absent file is simply an empty drop.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ChannelError, CommandChannel};
use crate::command::KillSwitchCommand;

pub struct FileChannel {
    path: PathBuf,
    interval: Duration,
    delivered: Mutex<usize>,
}

impl FileChannel {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            delivered: Mutex::new(0),
        }
    }
}

#[async_trait]
impl CommandChannel for FileChannel {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn run_once(
        &self,
        tx: &mpsc::Sender<KillSwitchCommand>,
    ) -> Result<(), ChannelError> {
        if self.path.exists() {
            let raw = tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| ChannelError::Transport(e.to_string()))?;
            let commands: Vec<KillSwitchCommand> = if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| ChannelError::Decode(e.to_string()))?
            };

            let already = *self.delivered.lock();
            // A truncated/rewritten file restarts the mark.
            let start = if commands.len() < already { 0 } else { already };
            for command in commands.iter().skip(start) {
                if tx.send(command.clone()).await.is_err() {
                    return Ok(());
                }
            }
            *self.delivered.lock() = commands.len();
        }
        tokio::time::sleep(self.interval).await;
        Ok(())
    }
}
