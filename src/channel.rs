//! Inbound message queue between the engine connection and the dispatch
//! loop.
//!
//! Ordering contract: `push` is non-blocking and FIFO; `pop` suspends
//! until a message is available and returns items in push order. The
//! end-of-stream sentinel is observed after every previously pushed
//! message, and once observed the channel keeps yielding it.

use flume::{Receiver, Sender};
use miette::Diagnostic;
use thiserror::Error;

use crate::messages::{CorrelationId, MessagePayload, Reply};

/// Collector for handler replies, paired with the correlation id of the
/// message that produced them.
pub type ReplySink = Sender<(Reply, Option<CorrelationId>)>;

/// One inbound engine message as queued for dispatch.
#[derive(Clone, Debug)]
pub struct WorkflowMessage {
    pub payload: MessagePayload,
    pub correlation_id: Option<CorrelationId>,
    /// Present when the engine expects a synchronous-style response.
    pub reply_to: Option<ReplySink>,
}

impl WorkflowMessage {
    pub fn new(payload: MessagePayload) -> Self {
        Self {
            payload,
            correlation_id: None,
            reply_to: None,
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, reply_to: ReplySink) -> Self {
        self.reply_to = Some(reply_to);
        self
    }
}

/// An item pulled off the channel: a message, or the stream sentinel.
#[derive(Clone, Debug)]
pub enum ChannelItem {
    Message(Box<WorkflowMessage>),
    /// End of stream; the producer will send nothing further.
    EndOfStream,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ChannelError {
    #[error("message channel closed: consumer dropped")]
    #[diagnostic(code(gphl_workflow::channel::closed))]
    Closed,
}

/// Producer handle for the message channel. Cheap to clone.
#[derive(Clone, Debug)]
pub struct MessageSender {
    tx: Sender<ChannelItem>,
}

impl MessageSender {
    /// Queue a message. Non-blocking; preserves push order.
    pub fn push(&self, message: WorkflowMessage) -> Result<(), ChannelError> {
        self.tx
            .send(ChannelItem::Message(Box::new(message)))
            .map_err(|_| ChannelError::Closed)
    }

    /// Queue the end-of-stream sentinel. Guaranteed to be observed after
    /// every previously pushed message.
    pub fn close(&self) -> Result<(), ChannelError> {
        self.tx
            .send(ChannelItem::EndOfStream)
            .map_err(|_| ChannelError::Closed)
    }
}

/// Unbounded FIFO of inbound protocol events, single consumer.
#[derive(Debug)]
pub struct MessageChannel {
    tx: Sender<ChannelItem>,
    rx: Receiver<ChannelItem>,
    finished: bool,
}

impl MessageChannel {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            finished: false,
        }
    }

    /// Producer handle for the engine connection.
    pub fn sender(&self) -> MessageSender {
        MessageSender {
            tx: self.tx.clone(),
        }
    }

    /// Wait for the next item, in push order.
    ///
    /// After the sentinel has been observed once, every further call
    /// yields [`ChannelItem::EndOfStream`] without touching the queue.
    pub async fn pop(&mut self) -> ChannelItem {
        if self.finished {
            return ChannelItem::EndOfStream;
        }
        match self.rx.recv_async().await {
            Ok(ChannelItem::EndOfStream) | Err(_) => {
                self.finished = true;
                ChannelItem::EndOfStream
            }
            Ok(item) => item,
        }
    }
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new()
    }
}
