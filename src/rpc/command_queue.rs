//! Per-connection FIFO pipeline between the framer and the dispatcher.
//!
//! A TCP connection is serialized: records are dispatched one at a time in
//! arrival order, while different connections run in parallel. The queue
//! decouples the socket read loop from dispatch so slow handlers never
//! stall fragment reassembly.

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::rpc::context::Context;

/// Outcome of dispatching one record: encoded reply bytes, or `None` when
/// no reply is owed (retransmission, silent drop).
pub type CommandResult = anyhow::Result<Option<Vec<u8>>>;

/// Async processor invoked for each queued record.
pub type AsyncCommandProcessor =
    fn(data: Vec<u8>, context: Context) -> futures::future::BoxFuture<'static, CommandResult>;

struct RpcCommand {
    data: Vec<u8>,
    context: Context,
}

/// FIFO queue of complete records awaiting dispatch.
#[derive(Clone)]
pub struct CommandQueue {
    command_sender: mpsc::UnboundedSender<RpcCommand>,
}

impl CommandQueue {
    /// Creates the queue and spawns its worker task. Results are delivered
    /// to `result_sender` in submission order.
    pub fn new(
        processor: AsyncCommandProcessor,
        result_sender: mpsc::UnboundedSender<CommandResult>,
    ) -> Self {
        let (command_sender, mut command_receiver) = mpsc::unbounded_channel::<RpcCommand>();

        tokio::spawn(async move {
            while let Some(command) = command_receiver.recv().await {
                trace!("processing record from queue");
                let result = processor(command.data, command.context).await;
                if result_sender.send(result).is_err() {
                    error!("connection result channel closed, stopping queue worker");
                    break;
                }
            }
            debug!("command queue worker finished");
        });

        Self { command_sender }
    }

    /// Submits a complete record for ordered processing.
    pub fn submit(&self, data: Vec<u8>, context: Context) -> Result<(), anyhow::Error> {
        self.command_sender
            .send(RpcCommand { data, context })
            .map_err(|e| anyhow!("failed to queue record: {e}"))
    }
}
