//! Broadcast bus for domain events.
//!
//! Events are published after the state change they describe has committed.
//! Publishing never blocks and never fails the operation: with no subscribers
//! the event is simply dropped, and slow subscribers observe a lag instead of
//! slowing writers down.

use delivery_types::DomainEvent;
use tokio::sync::broadcast;

/// Default number of events buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Cloneable handle to the event channel.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Publishes an event to every current subscriber.
	///
	/// Returns an error only when nobody is listening; callers discard it.
	pub fn publish(
		&self,
		event: DomainEvent,
	) -> Result<usize, broadcast::error::SendError<DomainEvent>> {
		self.sender.send(event)
	}

	pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
		self.sender.subscribe()
	}

	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}
