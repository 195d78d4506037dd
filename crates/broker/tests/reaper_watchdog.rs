//! A kernel that stops sending liveness heartbeats is reaped by the
//! watchdog after the configured grace period, failing over any
//! in-flight execution; a kernel that keeps heartbeating is left alone.

mod helpers;

use std::time::Duration;

use cellbroker_proto::types::ExecutionStatus;

use helpers::{notebook, TestBroker};

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn an_unresponsive_kernel_is_reaped_and_fails_its_execution() {
	let tb = TestBroker::with_config(|cfg| cfg.kernel_liveness_grace = Duration::from_millis(100));
	let nb = notebook("/tmp/reaper.ipynb");

	let task_id = tb
		.broker
		.submit_execution(nb.clone(), 0, "sleep forever".to_string(), None)
		.await
		.expect("submit succeeds");

	// Kernel launches but never heartbeats and never goes idle.
	let _kernel = tb.fake_kernel(&nb).await;

	tokio::time::sleep(Duration::from_millis(400)).await;

	let active = tb.broker.list_active_sessions().await;
	assert!(
		!active.iter().any(|s| s.notebook_key == nb),
		"reaped kernel should no longer be listed active: {active:?}"
	);

	let record = tb.broker.execution_status(task_id).await.expect("record exists");
	assert_eq!(record.status, ExecutionStatus::Failed, "record: {record:?}");
	assert_eq!(record.error_message.as_deref(), Some("kernel died"));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn a_kernel_that_keeps_heartbeating_is_never_reaped() {
	let tb = TestBroker::with_config(|cfg| cfg.kernel_liveness_grace = Duration::from_millis(100));
	let nb = notebook("/tmp/reaper_alive.ipynb");

	tb.broker
		.submit_execution(nb.clone(), 0, "sleep forever".to_string(), None)
		.await
		.expect("submit succeeds");

	let kernel = tb.fake_kernel(&nb).await;

	for _ in 0..6 {
		tokio::time::sleep(Duration::from_millis(50)).await;
		kernel.heartbeat().await;
	}

	let active = tb.broker.list_active_sessions().await;
	assert!(
		active.iter().any(|s| s.notebook_key == nb),
		"a heartbeating kernel must not be reaped: {active:?}"
	);
}
