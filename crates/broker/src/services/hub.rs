//! Fan-out Hub (component E): delivers notifications to every subscribed
//! client connection concurrently, so one slow subscriber never delays
//! delivery to any other.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;

use cellbroker_proto::frame::Notification;

const BROADCAST_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity of one connected client, assigned by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

/// The sink a connection's write loop consumes to learn what to send.
/// Bounded to one outstanding item: a full channel means the previous
/// send is still in flight, which is exactly the backpressure signal
/// `broadcast`'s per-subscriber timeout is built to tolerate.
pub type ConnectionSink = mpsc::Sender<Notification>;

enum HubCmd {
	Register {
		id: ConnectionId,
		sink: ConnectionSink,
	},
	Unregister {
		id: ConnectionId,
	},
	Broadcast {
		notification: Notification,
	},
}

/// Cloneable handle to the fan-out hub actor.
#[derive(Clone)]
pub struct HubHandle {
	tx: mpsc::Sender<HubCmd>,
}

impl HubHandle {
	/// Registers a new subscriber connection.
	pub async fn register(&self, id: ConnectionId, sink: ConnectionSink) {
		let _ = self.tx.send(HubCmd::Register { id, sink }).await;
	}

	/// Unregisters a connection, typically on disconnect.
	pub async fn unregister(&self, id: ConnectionId) {
		let _ = self.tx.send(HubCmd::Unregister { id }).await;
	}

	/// Broadcasts a notification to every current subscriber. Returns as
	/// soon as the hub actor has accepted the broadcast; delivery to each
	/// subscriber happens on independently spawned tasks.
	pub async fn broadcast(&self, notification: Notification) {
		let _ = self.tx.send(HubCmd::Broadcast { notification }).await;
	}
}

/// Actor owning the set of subscriber sinks.
pub struct HubService {
	rx: mpsc::Receiver<HubCmd>,
	self_tx: mpsc::Sender<HubCmd>,
	subscribers: HashMap<ConnectionId, ConnectionSink>,
}

impl HubService {
	/// Spawns the hub actor task.
	pub fn start() -> HubHandle {
		let (tx, rx) = mpsc::channel(256);
		let service = Self {
			rx,
			self_tx: tx.clone(),
			subscribers: HashMap::new(),
		};
		tokio::spawn(service.run());
		HubHandle { tx }
	}

	async fn run(mut self) {
		while let Some(cmd) = self.rx.recv().await {
			match cmd {
				HubCmd::Register { id, sink } => {
					self.subscribers.insert(id, sink);
				}
				HubCmd::Unregister { id } => {
					self.subscribers.remove(&id);
				}
				HubCmd::Broadcast { notification } => {
					// Snapshot-then-spawn: take an immutable view of the
					// current subscriber set, then let each delivery run
					// as its own task with its own deadline. This is the
					// one place this service's shape must diverge from a
					// sequential per-subscriber loop, since the spec
					// requires that no subscriber's latency affects
					// another's.
					for (id, sink) in self.subscribers.clone() {
						let notification = notification.clone();
						let self_tx = self.self_tx.clone();
						tokio::spawn(async move {
							let outcome = tokio::time::timeout(BROADCAST_TIMEOUT, sink.send(notification)).await;
							if !matches!(outcome, Ok(Ok(()))) {
								tracing::debug!(connection = id.0, "broadcast send failed or timed out, unregistering");
								let _ = self_tx.send(HubCmd::Unregister { id }).await;
							}
						});
					}
				}
			}
		}
	}
}
