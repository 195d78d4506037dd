//! One subscriber whose connection never drains its sink must not delay
//! delivery to any other subscriber.

mod helpers;

use std::time::Duration;

use cellbroker::services::hub::{ConnectionId, HubService};
use cellbroker_proto::frame::Notification;
use cellbroker_proto::types::{ExecutionStatus, TaskId};

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn a_stalled_subscriber_never_blocks_a_healthy_one() {
	let hub = HubService::start();

	// The slow subscriber's sink has capacity 1 and its receiver is
	// never polled, so its second delivery will sit blocked until the
	// hub's broadcast timeout evicts it.
	let (slow_tx, _slow_rx) = tokio::sync::mpsc::channel(1);
	hub.register(ConnectionId(1), slow_tx).await;

	let (fast_tx, mut fast_rx) = tokio::sync::mpsc::channel(8);
	hub.register(ConnectionId(2), fast_tx).await;

	for i in 0..3 {
		hub.broadcast(Notification::Status {
			task_id: TaskId(format!("t{i}")),
			status: ExecutionStatus::Running,
		})
		.await;
	}

	// The fast subscriber must receive all three promptly, without
	// waiting anywhere near the broadcast timeout.
	for i in 0..3 {
		let notification = tokio::time::timeout(Duration::from_millis(200), fast_rx.recv())
			.await
			.unwrap_or_else(|_| panic!("fast subscriber stalled on notification {i}"))
			.expect("hub channel open");
		match notification {
			Notification::Status { task_id, .. } => assert_eq!(task_id, TaskId(format!("t{i}"))),
			other => panic!("unexpected notification: {other:?}"),
		}
	}
}
