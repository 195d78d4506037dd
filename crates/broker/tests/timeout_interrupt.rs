//! An execution that never goes idle is timed out and the kernel is
//! sent an interrupt, rather than the dispatch loop waiting forever.

mod helpers;

use std::time::Duration;

use cellbroker_proto::types::ExecutionStatus;

use helpers::{notebook, TestBroker};

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn a_stuck_execution_times_out_and_is_interrupted() {
	let tb = TestBroker::with_config(|cfg| cfg.default_timeout = Duration::from_millis(200));
	let nb = notebook("/tmp/timeout.ipynb");

	let task_id = tb
		.broker
		.submit_execution(nb.clone(), 0, "while True: pass".to_string(), None)
		.await
		.expect("submit succeeds");

	let kernel = tb.fake_kernel(&nb).await;

	// The fake kernel never emits an Idle frame for this execution, so
	// the dispatch loop's wait must itself time out.
	tokio::time::sleep(Duration::from_millis(300)).await;

	let record = tb.broker.execution_status(task_id).await.expect("record exists");
	assert_eq!(record.status, ExecutionStatus::Timeout, "record: {record:?}");

	let received = kernel.received.lock().await;
	assert!(
		received
			.iter()
			.any(|frame| matches!(frame, cellbroker::kernel_protocol::KernelStdinFrame::Interrupt)),
		"kernel should have received an interrupt after timing out"
	);
}
