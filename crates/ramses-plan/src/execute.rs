//! Handoff to the Execute stage.

use tokio::sync::mpsc;
use tracing::debug;

/// Signals the Execute stage to apply the committed options.
pub trait ExecuteClient: Send + Sync {
    fn start(&self) -> anyhow::Result<()>;
}

/// Execute handoff over a bounded channel. A signal that is already
/// pending is not duplicated.
#[derive(Debug, Clone)]
pub struct ChannelExecute {
    tx: mpsc::Sender<()>,
}

impl ChannelExecute {
    pub fn new(tx: mpsc::Sender<()>) -> Self {
        Self { tx }
    }

    /// A handle plus the receiving end for the Execute stage.
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self::new(tx), rx)
    }
}

impl ExecuteClient for ChannelExecute {
    fn start(&self) -> anyhow::Result<()> {
        match self.tx.try_send(()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("execute signal already pending");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                anyhow::bail!("execute stage is not listening")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signals_are_coalesced() {
        let (execute, mut rx) = ChannelExecute::channel();
        execute.start().unwrap();
        execute.start().unwrap();
        assert_eq!(rx.recv().await, Some(()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receiver_is_an_error() {
        let (execute, rx) = ChannelExecute::channel();
        drop(rx);
        assert!(execute.start().is_err());
    }
}
