//! A record left `running` by a prior process (as if the broker crashed
//! mid-dispatch) is re-dispatched by `Broker::restore`, not stuck forever
//! nor rejected as an illegal transition.

mod helpers;

use cellbroker_proto::types::{ExecutionRecord, ExecutionStatus, TaskId};

use helpers::{notebook, TestBroker};

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn running_record_is_redispatched_on_restore() {
	let tb = TestBroker::new();
	let nb = notebook("/tmp/crash.ipynb");
	let task_id = TaskId::generate();

	// Seed a row the way a prior process would have left it: durably
	// recorded and already marked `running`, but never actually sent to
	// a kernel in this process's lifetime.
	tb.broker
		.store
		.enqueue(ExecutionRecord {
			task_id: task_id.clone(),
			notebook_key: nb.clone(),
			cell_index: 0,
			source: "40 + 2".to_string(),
			status: ExecutionStatus::Pending,
			created_at: 0,
			started_at: None,
			completed_at: None,
			error_message: None,
			retries: 0,
		})
		.await
		.expect("seed enqueue");
	tb.broker
		.store
		.mark_started(task_id.clone(), 0)
		.await
		.expect("seed mark_started");

	tb.broker.restore().await;

	let kernel = tb.fake_kernel(&nb).await;
	let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
	loop {
		let received = kernel.received.lock().await;
		if received.iter().any(|frame| matches!(
			frame,
			cellbroker::kernel_protocol::KernelStdinFrame::Execute(req) if req.source == "40 + 2"
		)) {
			break;
		}
		drop(received);
		assert!(tokio::time::Instant::now() < deadline, "restored record was never dispatched");
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
	}

	let msg_id = {
		let received = kernel.received.lock().await;
		received
			.iter()
			.find_map(|frame| match frame {
				cellbroker::kernel_protocol::KernelStdinFrame::Execute(req) if req.source == "40 + 2" => Some(req.msg_id.clone()),
				_ => None,
			})
			.expect("execute frame present")
	};
	kernel.finish(msg_id, None).await;

	let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
	loop {
		let record = tb.broker.execution_status(task_id.clone()).await.expect("record exists");
		if record.status == ExecutionStatus::Completed {
			break;
		}
		assert!(tokio::time::Instant::now() < deadline, "record never completed: {record:?}");
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
	}
}
