use sp_cloud_api::ObjectChange;
use tokio::sync::broadcast;
use tracing::warn;

/// Broadcasts object changes, every subscriber sees every change
#[derive(Debug, Clone)]
pub struct EventBus {
	sender: broadcast::Sender<ObjectChange>,
}

impl EventBus {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn emit(&self, change: ObjectChange) {
		// No subscribers is fine
		let _ = self.sender.send(change);
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<ObjectChange> {
		self.sender.subscribe()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1024)
	}
}

/// Next change for `subscriber`, skipping over lag; `None` once every sender is gone.
pub async fn next_change(
	rx: &mut broadcast::Receiver<ObjectChange>,
	subscriber: &'static str,
) -> Option<ObjectChange> {
	loop {
		match rx.recv().await {
			Ok(change) => return Some(change),
			Err(broadcast::error::RecvError::Lagged(skipped)) => {
				warn!(%subscriber, %skipped, "Change subscriber lagged behind, changes dropped;");
			}
			Err(broadcast::error::RecvError::Closed) => return None,
		}
	}
}
