//! Command delivery channels.
//!
//! Three transports produce the same [`KillSwitchCommand`] payload, and
//! the receiver treats the channel as opaque:
//! - [`sse::SseChannel`]: server-pushed `data:` frames with heartbeats
//! - [`poll::PollChannel`]: periodic pull of a pending-command array
//! - [`file::FileChannel`]: a watched local JSON drop
//!
//! A channel's `run_once` performs one connection or poll cycle; the
//! supervisor in [`crate::receiver::run_channel`] wraps it with
//! exponential backoff, jitter and bounded reconnect attempts.

pub mod file;
pub mod poll;
pub mod sse;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::command::KillSwitchCommand;

/// Channel failures, all retriable by the supervisor.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("payload decode failure: {0}")]
    Decode(String),
}

/// One delivery transport.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one cycle, delivering received commands into `tx`. An `Ok`
    /// return means the cycle ended in order (poll complete, stream
    /// closed); `Err` triggers backoff-and-reconnect.
    async fn run_once(
        &self,
        tx: &mpsc::Sender<KillSwitchCommand>,
    ) -> Result<(), ChannelError>;
}
