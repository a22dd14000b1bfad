use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

/// Events that can be counted per kind in stream statistics
pub trait EventKind {
    fn kind(&self) -> &'static str;
}

/// Generic event stream with a bounded replay buffer
pub struct EventStream<T: EventKind + Clone + Send + 'static> {
    sender: broadcast::Sender<T>,
    buffer: Arc<RwLock<VecDeque<T>>>,
    buffer_size: usize,
    stats: Arc<RwLock<EventStreamStats>>,
}

/// Statistics for monitoring stream activity
#[derive(Debug, Clone, Default)]
pub struct EventStreamStats {
    pub events_published: u64,
    pub events_dropped: u64,
    pub type_counts: HashMap<String, u64>,
}

impl<T: EventKind + Clone + Send + 'static> EventStream<T> {
    /// Create a new event stream with specified capacity
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        debug!(capacity, buffer_size, "Creating new event stream");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(buffer_size))),
            buffer_size,
            stats: Arc::new(RwLock::new(EventStreamStats::default())),
        }
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> Subscriber<T> {
        trace!("New subscriber registered to event stream");
        Subscriber {
            receiver: self.sender.subscribe(),
            buffer: Arc::clone(&self.buffer),
        }
    }

    /// Publish an event to all subscribers, returning the receiver count.
    ///
    /// Having no receivers is not an error: the event is still buffered for replay.
    pub async fn publish(&self, event: T) -> usize {
        let kind = event.kind();
        let receivers = match self.sender.send(event.clone()) {
            Ok(count) => count,
            Err(_) => 0,
        };

        self.buffer_event(event).await;

        let mut stats = self.stats.write().await;
        if receivers > 0 {
            stats.events_published += 1;
        } else {
            stats.events_dropped += 1;
        }
        *stats.type_counts.entry(kind.to_string()).or_insert(0) += 1;

        trace!(kind, receivers, "Event published");
        receivers
    }

    /// Store an event in the buffer for replay
    async fn buffer_event(&self, event: T) {
        let mut buffer = self.buffer.write().await;
        buffer.push_back(event);

        while buffer.len() > self.buffer_size {
            buffer.pop_front();
        }
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> EventStreamStats {
        self.stats.read().await.clone()
    }

    /// Reset statistics counters
    pub async fn reset_stats(&self) {
        *self.stats.write().await = EventStreamStats::default();
        debug!("Event stream statistics reset to defaults");
    }

    /// Current number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Subscriber for receiving events from a stream
pub struct Subscriber<T: Clone + Send + 'static> {
    receiver: broadcast::Receiver<T>,
    buffer: Arc<RwLock<VecDeque<T>>>,
}

impl<T: Clone + Send + 'static> Subscriber<T> {
    /// Receive the next event
    pub async fn recv(&mut self) -> Result<T, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Receive an event if one is already queued
    pub fn try_recv(&mut self) -> Result<T, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Replay events from the buffer
    pub async fn replay_buffer(&self) -> Vec<T> {
        let buffer = self.buffer.read().await;
        buffer.iter().cloned().collect()
    }
}

impl<T: EventKind + Clone + Send + 'static> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            buffer: Arc::clone(&self.buffer),
            buffer_size: self.buffer_size,
            stats: Arc::clone(&self.stats),
        }
    }
}
