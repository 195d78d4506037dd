//! Execution Scheduler (component D): accepts submissions, assigns
//! identifiers, serializes per-kernel dispatch, applies timeouts, and
//! waits for completion via events — never by polling.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

use cellbroker_proto::frame::Notification;
use cellbroker_proto::types::{ExecutionRecord, ExecutionStatus, NotebookKey, TaskId};

use crate::error::{BrokerError, StoreError};
use crate::launcher::KernelSpec;
use crate::services::hub::HubHandle;
use crate::services::multiplexer::MultiplexerHandle;
use crate::services::supervisor::SupervisorHandle;
use crate::store::StoreHandle;

/// Fixed parameters the scheduler needs from [`Config`](crate::config::Config).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	/// How long a dispatch loop waits for an execution to complete.
	pub default_timeout: Duration,
	/// Soft cap on a per-notebook submission channel.
	pub submission_queue_cap: usize,
	/// Command used to launch a kernel subprocess for any notebook.
	pub kernel_command: String,
	/// Arguments passed to `kernel_command`.
	pub kernel_args: Vec<String>,
}

enum SchedulerCmd {
	Submit {
		notebook_key: NotebookKey,
		cell_index: i64,
		source: String,
		task_id: Option<TaskId>,
		reply: oneshot::Sender<Result<TaskId, BrokerError>>,
	},
	Cancel {
		notebook_key: NotebookKey,
		task_id: TaskId,
		reply: oneshot::Sender<()>,
	},
	SubmitInput {
		notebook_key: NotebookKey,
		value: String,
	},
	Restore {
		reply: oneshot::Sender<()>,
	},
	KernelDied {
		notebook_key: NotebookKey,
	},
}

/// Cloneable handle to the execution scheduler actor.
#[derive(Clone)]
pub struct SchedulerHandle {
	tx: mpsc::Sender<SchedulerCmd>,
}

impl SchedulerHandle {
	/// Accepts a new execution for dispatch. Persists the record before
	/// returning; the record is durable the instant this call succeeds.
	pub async fn submit(
		&self,
		notebook_key: NotebookKey,
		cell_index: i64,
		source: String,
		task_id: Option<TaskId>,
	) -> Result<TaskId, BrokerError> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(SchedulerCmd::Submit {
				notebook_key,
				cell_index,
				source,
				task_id,
				reply,
			})
			.await
			.map_err(|_| BrokerError::NotFound("scheduler is shut down".into()))?;
		rx.await.map_err(|_| BrokerError::NotFound("scheduler is shut down".into()))?
	}

	/// Best-effort cancellation: interrupts the kernel if the target is
	/// currently running, otherwise transitions it directly to `cancelled`.
	pub async fn cancel(&self, notebook_key: NotebookKey, task_id: TaskId) {
		let (reply, rx) = oneshot::channel();
		if self
			.tx
			.send(SchedulerCmd::Cancel {
				notebook_key,
				task_id,
				reply,
			})
			.await
			.is_ok()
		{
			let _ = rx.await;
		}
	}

	/// Delivers a value for an outstanding kernel input request, without
	/// blocking the notebook's submission channel.
	pub async fn submit_input(&self, notebook_key: NotebookKey, value: String) {
		let _ = self.tx.send(SchedulerCmd::SubmitInput { notebook_key, value }).await;
	}

	/// Re-dispatches every non-terminal record found in the Store. Called
	/// once at startup.
	pub async fn restore(&self) {
		let (reply, rx) = oneshot::channel();
		if self.tx.send(SchedulerCmd::Restore { reply }).await.is_ok() {
			let _ = rx.await;
		}
	}

	/// Reported by the Kernel Supervisor when a notebook's kernel process
	/// has died, so in-flight work can be failed out promptly.
	pub async fn kernel_died(&self, notebook_key: NotebookKey) {
		let _ = self.tx.send(SchedulerCmd::KernelDied { notebook_key }).await;
	}
}

struct DispatchItem {
	task_id: TaskId,
	source: String,
}

struct NotebookState {
	current: Option<TaskId>,
	cancelled: HashSet<String>,
}

struct NotebookHandle {
	tx: mpsc::Sender<DispatchItem>,
	kernel_died_tx: mpsc::Sender<()>,
	state: Arc<AsyncMutex<NotebookState>>,
}

/// Actor owning every per-notebook dispatch loop.
pub struct SchedulerService {
	rx: mpsc::Receiver<SchedulerCmd>,
	store: StoreHandle,
	supervisor: SupervisorHandle,
	multiplexer: MultiplexerHandle,
	hub: HubHandle,
	cfg: SchedulerConfig,
	notebooks: HashMap<NotebookKey, NotebookHandle>,
}

impl SchedulerService {
	/// Spawns the scheduler actor task.
	pub fn start(
		store: StoreHandle,
		supervisor: SupervisorHandle,
		multiplexer: MultiplexerHandle,
		hub: HubHandle,
		cfg: SchedulerConfig,
	) -> SchedulerHandle {
		let (tx, rx) = mpsc::channel(256);
		let service = Self {
			rx,
			store,
			supervisor,
			multiplexer,
			hub,
			cfg,
			notebooks: HashMap::new(),
		};
		tokio::spawn(service.run());
		SchedulerHandle { tx }
	}

	async fn run(mut self) {
		while let Some(cmd) = self.rx.recv().await {
			match cmd {
				SchedulerCmd::Submit {
					notebook_key,
					cell_index,
					source,
					task_id,
					reply,
				} => {
					let result = self.submit(notebook_key, cell_index, source, task_id).await;
					let _ = reply.send(result);
				}
				SchedulerCmd::Cancel {
					notebook_key,
					task_id,
					reply,
				} => {
					self.cancel(notebook_key, task_id).await;
					let _ = reply.send(());
				}
				SchedulerCmd::SubmitInput { notebook_key, value } => {
					self.supervisor.submit_input(notebook_key, value).await;
				}
				SchedulerCmd::Restore { reply } => {
					self.restore().await;
					let _ = reply.send(());
				}
				SchedulerCmd::KernelDied { notebook_key } => {
					self.kernel_died(notebook_key).await;
				}
			}
		}
	}

	async fn submit(
		&mut self,
		notebook_key: NotebookKey,
		cell_index: i64,
		source: String,
		task_id: Option<TaskId>,
	) -> Result<TaskId, BrokerError> {
		let task_id = task_id.unwrap_or_else(TaskId::generate);

		let notebook = self.get_or_create_notebook(notebook_key.clone());
		let permit = notebook
			.tx
			.try_reserve()
			.map_err(|_| BrokerError::ResourceExhausted(format!("submission queue full for {notebook_key}")))?;

		let record = ExecutionRecord {
			task_id: task_id.clone(),
			notebook_key,
			cell_index,
			source: source.clone(),
			status: ExecutionStatus::Pending,
			created_at: now_millis(),
			started_at: None,
			completed_at: None,
			error_message: None,
			retries: 0,
		};
		match self.store.enqueue(record).await {
			Ok(()) => {}
			Err(StoreError::DuplicateId) => {
				return Err(BrokerError::ProtocolViolation(format!("duplicate task id {task_id}")));
			}
			Err(e) => return Err(BrokerError::Storage(e)),
		}

		permit.send(DispatchItem {
			task_id: task_id.clone(),
			source,
		});
		Ok(task_id)
	}

	async fn cancel(&mut self, notebook_key: NotebookKey, task_id: TaskId) {
		let Some(notebook) = self.notebooks.get(&notebook_key) else {
			return;
		};
		{
			let mut state = notebook.state.lock().await;
			state.cancelled.insert(task_id.0.clone());
			if state.current.as_ref() == Some(&task_id) {
				self.supervisor.interrupt(notebook_key.clone()).await;
			}
		}
		let _ = self
			.store
			.mark_terminal(task_id.clone(), ExecutionStatus::Cancelled, now_millis(), None)
			.await;
		self.hub
			.broadcast(Notification::Status {
				task_id,
				status: ExecutionStatus::Cancelled,
			})
			.await;
	}

	async fn restore(&mut self) {
		let records = self.store.load_nonterminal().await;
		for record in records {
			let notebook_key = record.notebook_key.clone();
			let notebook = self.get_or_create_notebook(notebook_key.clone());
			match notebook.tx.try_reserve() {
				Ok(permit) => permit.send(DispatchItem {
					task_id: record.task_id,
					source: record.source,
				}),
				Err(_) => {
					tracing::error!(notebook = %notebook_key, task_id = %record.task_id, "could not re-enqueue on restore: queue full");
				}
			}
		}
	}

	async fn kernel_died(&mut self, notebook_key: NotebookKey) {
		let Some(notebook) = self.notebooks.get(&notebook_key) else {
			return;
		};
		let current = {
			let mut state = notebook.state.lock().await;
			state.current.take()
		};
		let _ = notebook.kernel_died_tx.try_send(());
		if let Some(task_id) = current {
			let _ = self
				.store
				.mark_terminal(
					task_id.clone(),
					ExecutionStatus::Failed,
					now_millis(),
					Some("kernel died".to_string()),
				)
				.await;
			self.hub
				.broadcast(Notification::Status {
					task_id,
					status: ExecutionStatus::Failed,
				})
				.await;
		}
	}

	fn get_or_create_notebook(&mut self, notebook_key: NotebookKey) -> &NotebookHandle {
		self.notebooks.entry(notebook_key.clone()).or_insert_with(|| {
			let (tx, rx) = mpsc::channel(self.cfg.submission_queue_cap);
			let (kernel_died_tx, kernel_died_rx) = mpsc::channel(1);
			let state = Arc::new(AsyncMutex::new(NotebookState {
				current: None,
				cancelled: HashSet::new(),
			}));
			let spec = KernelSpec {
				command: self.cfg.kernel_command.clone(),
				args: self.cfg.kernel_args.clone(),
			};
			tokio::spawn(dispatch_loop(
				notebook_key,
				rx,
				kernel_died_rx,
				state.clone(),
				self.store.clone(),
				self.supervisor.clone(),
				self.multiplexer.clone(),
				self.hub.clone(),
				spec,
				self.cfg.default_timeout,
			));
			NotebookHandle {
				tx,
				kernel_died_tx,
				state,
			}
		})
	}
}

/// One per-notebook worker: consumes the submission channel strictly in
/// FIFO order, dispatching one execution at a time to the kernel.
#[allow(clippy::too_many_arguments)]
async fn dispatch_loop(
	notebook_key: NotebookKey,
	mut rx: mpsc::Receiver<DispatchItem>,
	mut kernel_died_rx: mpsc::Receiver<()>,
	state: Arc<AsyncMutex<NotebookState>>,
	store: StoreHandle,
	supervisor: SupervisorHandle,
	multiplexer: MultiplexerHandle,
	hub: HubHandle,
	spec: KernelSpec,
	default_timeout: Duration,
) {
	while let Some(item) = rx.recv().await {
		let DispatchItem { task_id, source } = item;

		// Drop any kernel-died signal left over from before this item was
		// dispatched; only a death during *this* item's own wait counts.
		while kernel_died_rx.try_recv().is_ok() {}

		{
			let mut st = state.lock().await;
			if st.cancelled.remove(&task_id.0) {
				continue;
			}
		}

		if let Some(existing) = store.get(task_id.clone()).await
			&& existing.status.is_terminal()
		{
			continue;
		}

		if store.mark_started(task_id.clone(), now_millis()).await.is_err() {
			continue;
		}

		if let Err(e) = supervisor.ensure_kernel(notebook_key.clone(), spec.clone()).await {
			tracing::warn!(notebook = %notebook_key, task_id = %task_id, error = %e, "kernel unavailable");
			let _ = store
				.mark_terminal(
					task_id.clone(),
					ExecutionStatus::Failed,
					now_millis(),
					Some(format!("kernel unavailable: {e}")),
				)
				.await;
			hub.broadcast(Notification::Status {
				task_id,
				status: ExecutionStatus::Failed,
			})
			.await;
			continue;
		}

		{
			let mut st = state.lock().await;
			st.current = Some(task_id.clone());
		}

		let kernel_msg_id = match supervisor.send(notebook_key.clone(), source).await {
			Ok(id) => id,
			Err(e) => {
				tracing::warn!(notebook = %notebook_key, task_id = %task_id, error = %e, "send to kernel failed");
				let _ = store
					.mark_terminal(
						task_id.clone(),
						ExecutionStatus::Failed,
						now_millis(),
						Some(format!("kernel unavailable: {e}")),
					)
					.await;
				hub.broadcast(Notification::Status {
					task_id: task_id.clone(),
					status: ExecutionStatus::Failed,
				})
				.await;
				let mut st = state.lock().await;
				st.current = None;
				continue;
			}
		};

		hub.broadcast(Notification::ExecutionStarted {
			task_id: task_id.clone(),
			kernel_msg_id: kernel_msg_id.clone(),
		})
		.await;

		let (completion_tx, completion_rx) = oneshot::channel();
		multiplexer
			.bind(kernel_msg_id, task_id.clone(), notebook_key.clone(), completion_tx)
			.await;

		let outcome = tokio::select! {
			result = tokio::time::timeout(default_timeout, completion_rx) => Outcome::from_wait(result),
			Some(()) = kernel_died_rx.recv() => Outcome::KernelDied,
		};

		let was_cancelled = {
			let mut st = state.lock().await;
			st.current = None;
			st.cancelled.remove(&task_id.0)
		};

		let (status, error_message) = if was_cancelled {
			(ExecutionStatus::Cancelled, None)
		} else {
			match outcome {
				Outcome::Completed { error: None } => (ExecutionStatus::Completed, None),
				Outcome::Completed { error: Some(e) } => (ExecutionStatus::Failed, Some(e)),
				Outcome::TimedOut => {
					// The kernel protocol exposes one cooperative-abandon
					// frame (`Interrupt`); it stands in for both "stop the
					// current task" and "cancel the kernel-side task" since
					// there is no second frame to send.
					supervisor.interrupt(notebook_key.clone()).await;
					(ExecutionStatus::Timeout, Some("execution timed out".to_string()))
				}
				Outcome::ChannelClosed => (
					ExecutionStatus::Failed,
					Some("multiplexer completion channel closed unexpectedly".to_string()),
				),
				Outcome::KernelDied => (ExecutionStatus::Failed, Some("kernel died".to_string())),
			}
		};

		let _ = store
			.mark_terminal(task_id.clone(), status, now_millis(), error_message)
			.await;
		hub.broadcast(Notification::Status { task_id, status }).await;
	}
}

enum Outcome {
	Completed { error: Option<String> },
	TimedOut,
	ChannelClosed,
	KernelDied,
}

impl Outcome {
	fn from_wait(
		result: Result<Result<crate::services::multiplexer::CompletionOutcome, oneshot::error::RecvError>, tokio::time::error::Elapsed>,
	) -> Self {
		match result {
			Ok(Ok(outcome)) => Outcome::Completed { error: outcome.error },
			Ok(Err(_)) => Outcome::ChannelClosed,
			Err(_) => Outcome::TimedOut,
		}
	}
}

fn now_millis() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
