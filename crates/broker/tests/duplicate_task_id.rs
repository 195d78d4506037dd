//! A client-supplied `task_id` that collides with an existing record is
//! rejected as a protocol violation, never silently overwritten.

mod helpers;

use cellbroker::BrokerError;
use cellbroker_proto::types::TaskId;

use helpers::{notebook, TestBroker};

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn resubmitting_the_same_task_id_is_rejected() {
	let tb = TestBroker::new();
	let nb = notebook("/tmp/one.ipynb");
	let task_id = TaskId("fixed-id".to_string());

	let first = tb
		.broker
		.submit_execution(nb.clone(), 0, "1 + 1".to_string(), Some(task_id.clone()))
		.await
		.expect("first submission succeeds");
	assert_eq!(first, task_id);

	let second = tb
		.broker
		.submit_execution(nb, 1, "2 + 2".to_string(), Some(task_id.clone()))
		.await;

	assert!(
		matches!(second, Err(BrokerError::ProtocolViolation(_))),
		"expected a protocol violation, got {second:?}"
	);
}
