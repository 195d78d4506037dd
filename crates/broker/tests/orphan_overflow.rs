//! Output that arrives before its parent execution is bound is retained
//! in a bounded, newest-first-capped ring, never dropped silently up to
//! capacity and never unbounded past it.

mod helpers;

use std::time::Duration;

use cellbroker::kernel_protocol::{KernelFrameBody, KernelOutputFrame};
use cellbroker::services::hub::{ConnectionId, HubService};
use cellbroker::services::multiplexer::MultiplexerService;
use cellbroker_proto::frame::Notification;
use cellbroker_proto::types::{OutputKind, TaskId};

use helpers::notebook;

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn orphaned_output_ring_is_capped_and_drains_in_order() {
	let hub = HubService::start();
	let multiplexer = MultiplexerService::start(hub.clone(), 3);

	let (sink_tx, mut sink_rx) = tokio::sync::mpsc::channel(64);
	hub.register(ConnectionId(1), sink_tx).await;

	let nb = notebook("/tmp/orphan.ipynb");
	let kernel_msg_id = "m1".to_string();

	// Five frames arrive before anything ever binds "m1"; capacity is 3,
	// so only the last three should survive to be drained on bind.
	for i in 0..5 {
		multiplexer
			.route_frame(
				nb.clone(),
				KernelOutputFrame {
					parent_id: kernel_msg_id.clone(),
					body: KernelFrameBody::Output {
						kind: OutputKind::Stream,
						payload: serde_json::json!({ "seq": i }),
					},
				},
			)
			.await;
	}

	let (completion_tx, completion_rx) = tokio::sync::oneshot::channel();
	multiplexer
		.bind(kernel_msg_id.clone(), TaskId("t1".to_string()), nb, completion_tx)
		.await;

	let mut seqs = Vec::new();
	for _ in 0..3 {
		let notification = tokio::time::timeout(Duration::from_secs(1), sink_rx.recv())
			.await
			.expect("drained orphan notification")
			.expect("hub channel open");
		if let Notification::Output { payload, .. } = notification {
			seqs.push(payload["seq"].as_u64().unwrap());
		} else {
			panic!("expected an Output notification, got {notification:?}");
		}
	}
	assert_eq!(seqs, vec![2, 3, 4], "the ring should have dropped the two oldest frames");

	// No fourth orphan notification should ever arrive.
	let extra = tokio::time::timeout(Duration::from_millis(50), sink_rx.recv()).await;
	assert!(extra.is_err(), "unexpected extra notification: {extra:?}");

	multiplexer
		.route_frame(
			notebook("/tmp/orphan.ipynb"),
			KernelOutputFrame {
				parent_id: kernel_msg_id,
				body: KernelFrameBody::Idle { error: None },
			},
		)
		.await;
	let outcome = tokio::time::timeout(Duration::from_secs(1), completion_rx)
		.await
		.expect("completion fired")
		.expect("completion sender not dropped");
	assert!(outcome.error.is_none());
}
