use async_channel as chan;

/// Broadcast stop request shared by every stage of a pipeline.
///
/// Nothing is ever sent on the inner channel: closing it wakes every waiter at once and
/// can be done any number of times.
#[derive(Debug, Clone)]
pub struct StopSignal {
	tx: chan::Sender<()>,
	rx: chan::Receiver<()>,
}

impl StopSignal {
	#[must_use]
	pub fn new() -> Self {
		let (tx, rx) = chan::bounded(1);
		Self { tx, rx }
	}

	/// Non-blocking, returns `true` only for the call that actually stopped
	pub fn stop(&self) -> bool {
		self.tx.close()
	}

	#[must_use]
	pub fn is_stopped(&self) -> bool {
		self.rx.is_closed()
	}

	pub async fn wait(&self) {
		// Only resolves once the channel is closed
		let _ = self.rx.recv().await;
	}
}

impl Default for StopSignal {
	fn default() -> Self {
		Self::new()
	}
}
