//! Output collaborator contract.
//!
//! Receives the aggregate status whenever it changes. Calls are made with
//! the synchronizer's state lock held, so implementations must not block.

use tokio::sync::mpsc;
use tracing::{info, warn};

/// Consumer of aggregate status changes
pub trait OutputSink: Send + Sync {
    fn output_changed(&self, status: &str);
}

/// Logs every change; used when no output driver is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOutput;

impl OutputSink for LogOutput {
    fn output_changed(&self, status: &str) {
        info!(status = %status, "Output status changed");
    }
}

/// Forwards every change to an output-driver task
#[derive(Debug, Clone)]
pub struct ChannelOutput {
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelOutput {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl OutputSink for ChannelOutput {
    fn output_changed(&self, status: &str) {
        if self.sender.send(status.to_string()).is_err() {
            warn!(status = %status, "Output driver is gone, dropping status change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_output_forwards_in_order() {
        let (output, mut changes) = ChannelOutput::new();
        output.output_changed("high");
        output.output_changed("low");

        assert_eq!(changes.try_recv().unwrap(), "high");
        assert_eq!(changes.try_recv().unwrap(), "low");
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn test_channel_output_survives_closed_receiver() {
        let (output, changes) = ChannelOutput::new();
        drop(changes);
        output.output_changed("high");
    }
}
