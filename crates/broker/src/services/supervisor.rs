//! Kernel Supervisor (component B): owns the lifecycle of one interpreter
//! subprocess per notebook, presenting a uniform send/receive interface
//! regardless of interpreter details, and reaping kernels that die or
//! merely stop responding.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use cellbroker_proto::types::{NotebookKey, SessionSummary};

use crate::error::KernelError;
use crate::kernel_protocol::{KernelRequest, KernelStdinFrame};
use crate::launcher::{KernelInstance, KernelLauncher, KernelSpec};
use crate::services::multiplexer::MultiplexerHandle;
use crate::services::scheduler::SchedulerHandle;

enum SupervisorCmd {
	EnsureKernel {
		notebook_key: NotebookKey,
		spec: KernelSpec,
		reply: oneshot::Sender<Result<(), KernelError>>,
	},
	Send {
		notebook_key: NotebookKey,
		source: String,
		reply: oneshot::Sender<Result<String, KernelError>>,
	},
	Interrupt {
		notebook_key: NotebookKey,
	},
	SubmitInput {
		notebook_key: NotebookKey,
		value: String,
	},
	Shutdown {
		notebook_key: NotebookKey,
		reply: oneshot::Sender<()>,
	},
	IsAlive {
		notebook_key: NotebookKey,
		reply: oneshot::Sender<bool>,
	},
	ListActive {
		reply: oneshot::Sender<Vec<SessionSummary>>,
	},
	KernelExited {
		notebook_key: NotebookKey,
	},
	Heartbeat {
		notebook_key: NotebookKey,
	},
	/// Reaper watchdog tick: compare every live kernel's last heartbeat
	/// against `liveness_grace` and declare the unresponsive ones dead.
	CheckLiveness,
}

/// Cloneable handle to the kernel supervisor actor.
#[derive(Clone)]
pub struct SupervisorHandle {
	tx: mpsc::Sender<SupervisorCmd>,
}

impl SupervisorHandle {
	/// Starts the kernel for `notebook_key` if one is not already
	/// running. Idempotent.
	pub async fn ensure_kernel(&self, notebook_key: NotebookKey, spec: KernelSpec) -> Result<(), KernelError> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(SupervisorCmd::EnsureKernel { notebook_key, spec, reply })
			.await
			.map_err(|_| KernelError::ShutDown)?;
		rx.await.map_err(|_| KernelError::ShutDown)?
	}

	/// Writes a request frame to the kernel's stdin, returning the
	/// freshly minted message id the broker treats as opaque.
	pub async fn send(&self, notebook_key: NotebookKey, source: String) -> Result<String, KernelError> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(SupervisorCmd::Send {
				notebook_key,
				source,
				reply,
			})
			.await
			.map_err(|_| KernelError::ShutDown)?;
		rx.await.map_err(|_| KernelError::ShutDown)?
	}

	/// Cooperatively asks the kernel to abandon its current execution.
	pub async fn interrupt(&self, notebook_key: NotebookKey) {
		let _ = self.tx.send(SupervisorCmd::Interrupt { notebook_key }).await;
	}

	/// Delivers a value for an outstanding kernel input request.
	pub async fn submit_input(&self, notebook_key: NotebookKey, value: String) {
		let _ = self.tx.send(SupervisorCmd::SubmitInput { notebook_key, value }).await;
	}

	/// Gracefully, then forcefully, tears the kernel down.
	pub async fn shutdown(&self, notebook_key: NotebookKey) {
		let (reply, rx) = oneshot::channel();
		if self
			.tx
			.send(SupervisorCmd::Shutdown { notebook_key, reply })
			.await
			.is_ok()
		{
			let _ = rx.await;
		}
	}

	/// Whether the supervisor currently believes this notebook's kernel is alive.
	pub async fn is_alive(&self, notebook_key: NotebookKey) -> bool {
		let (reply, rx) = oneshot::channel();
		if self
			.tx
			.send(SupervisorCmd::IsAlive { notebook_key, reply })
			.await
			.is_err()
		{
			return false;
		}
		rx.await.unwrap_or(false)
	}

	/// Lists every currently active kernel session.
	pub async fn list_active(&self) -> Vec<SessionSummary> {
		let (reply, rx) = oneshot::channel();
		if self.tx.send(SupervisorCmd::ListActive { reply }).await.is_err() {
			return Vec::new();
		}
		rx.await.unwrap_or_default()
	}
}

/// Actor owning every live kernel subprocess handle.
pub struct SupervisorService {
	rx: mpsc::Receiver<SupervisorCmd>,
	self_tx: mpsc::Sender<SupervisorCmd>,
	launcher: Arc<dyn KernelLauncher>,
	multiplexer: MultiplexerHandle,
	scheduler: Option<SchedulerHandle>,
	kernels: HashMap<NotebookKey, Arc<KernelInstance>>,
	started_at: HashMap<NotebookKey, i64>,
	last_heartbeat: HashMap<NotebookKey, Instant>,
	liveness_grace: Duration,
}

impl SupervisorService {
	/// Spawns the supervisor actor task and its reaper watchdog.
	///
	/// Returns the public handle and a "handshake" channel for injecting
	/// the scheduler handle once it exists, resolving the circular
	/// dependency between supervisor (reports kernel death) and
	/// scheduler (drives kernel dispatch).
	pub fn start(
		launcher: Arc<dyn KernelLauncher>,
		multiplexer: MultiplexerHandle,
		liveness_grace: Duration,
	) -> (SupervisorHandle, mpsc::Sender<SchedulerHandle>) {
		let (tx, rx) = mpsc::channel(256);
		let (scheduler_tx, scheduler_rx) = mpsc::channel(1);

		let service = Self {
			rx,
			self_tx: tx.clone(),
			launcher,
			multiplexer,
			scheduler: None,
			kernels: HashMap::new(),
			started_at: HashMap::new(),
			last_heartbeat: HashMap::new(),
			liveness_grace,
		};
		tokio::spawn(service.run(scheduler_rx));

		let watchdog_tx = tx.clone();
		let tick = (liveness_grace / 3).max(Duration::from_millis(50));
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(tick);
			loop {
				interval.tick().await;
				if watchdog_tx.send(SupervisorCmd::CheckLiveness).await.is_err() {
					return;
				}
			}
		});

		(SupervisorHandle { tx }, scheduler_tx)
	}

	async fn run(mut self, mut scheduler_rx: mpsc::Receiver<SchedulerHandle>) {
		if let Some(h) = scheduler_rx.recv().await {
			self.scheduler = Some(h);
		}

		while let Some(cmd) = self.rx.recv().await {
			match cmd {
				SupervisorCmd::EnsureKernel { notebook_key, spec, reply } => {
					let result = self.ensure_kernel(notebook_key, spec).await;
					let _ = reply.send(result);
				}
				SupervisorCmd::Send {
					notebook_key,
					source,
					reply,
				} => {
					let result = self.do_send(&notebook_key, source).await;
					let _ = reply.send(result);
				}
				SupervisorCmd::Interrupt { notebook_key } => {
					if let Some(instance) = self.kernels.get(&notebook_key) {
						let _ = instance.stdin_tx.send(KernelStdinFrame::Interrupt).await;
					}
				}
				SupervisorCmd::SubmitInput { notebook_key, value } => {
					if let Some(instance) = self.kernels.get(&notebook_key) {
						let _ = instance.stdin_tx.send(KernelStdinFrame::InputReply { value }).await;
					}
				}
				SupervisorCmd::Shutdown { notebook_key, reply } => {
					if let Some(instance) = self.kernels.remove(&notebook_key) {
						self.started_at.remove(&notebook_key);
						self.last_heartbeat.remove(&notebook_key);
						instance.terminate().await;
					}
					let _ = reply.send(());
				}
				SupervisorCmd::IsAlive { notebook_key, reply } => {
					let _ = reply.send(self.kernels.contains_key(&notebook_key));
				}
				SupervisorCmd::ListActive { reply } => {
					let sessions = self
						.kernels
						.iter()
						.map(|(key, instance)| SessionSummary {
							notebook_key: key.clone(),
							started_at: self.started_at.get(key).copied().unwrap_or(0),
							kernel_pid: instance.pid,
							alive: true,
						})
						.collect();
					let _ = reply.send(sessions);
				}
				SupervisorCmd::KernelExited { notebook_key } => {
					self.declare_dead(notebook_key, None).await;
				}
				SupervisorCmd::Heartbeat { notebook_key } => {
					self.last_heartbeat.insert(notebook_key, Instant::now());
				}
				SupervisorCmd::CheckLiveness => {
					let now = Instant::now();
					let unresponsive: Vec<NotebookKey> = self
						.kernels
						.keys()
						.filter(|key| {
							self.last_heartbeat
								.get(*key)
								.is_some_and(|last| now.duration_since(*last) > self.liveness_grace)
						})
						.cloned()
						.collect();
					for notebook_key in unresponsive {
						tracing::warn!(notebook = %notebook_key, "kernel missed liveness heartbeat, reaping");
						let instance = self.kernels.get(&notebook_key).cloned();
						self.declare_dead(notebook_key, instance).await;
					}
				}
			}
		}
	}

	/// Declares a kernel dead: removes its bookkeeping and notifies the
	/// scheduler so in-flight executions fail over. `instance`, if given
	/// (the reaper watchdog path), is forcefully terminated first since
	/// the process is still alive, merely unresponsive; the EOF-exit path
	/// passes `None` since the process has already gone away on its own.
	async fn declare_dead(&mut self, notebook_key: NotebookKey, instance: Option<Arc<KernelInstance>>) {
		if self.kernels.remove(&notebook_key).is_none() {
			return;
		}
		self.started_at.remove(&notebook_key);
		self.last_heartbeat.remove(&notebook_key);
		if let Some(instance) = instance {
			instance.terminate().await;
		}
		if let Some(scheduler) = self.scheduler.clone() {
			let nb = notebook_key.clone();
			tokio::spawn(async move {
				scheduler.kernel_died(nb).await;
			});
		}
	}

	async fn ensure_kernel(&mut self, notebook_key: NotebookKey, spec: KernelSpec) -> Result<(), KernelError> {
		if self.kernels.contains_key(&notebook_key) {
			return Ok(());
		}
		let (exit_tx, mut exit_rx) = mpsc::channel(1);
		let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel(16);
		let instance = self
			.launcher
			.launch(notebook_key.clone(), spec, self.multiplexer.clone(), exit_tx, heartbeat_tx)
			.await?;

		let self_tx = self.self_tx.clone();
		let nb = notebook_key.clone();
		tokio::spawn(async move {
			if exit_rx.recv().await.is_some() {
				let _ = self_tx.send(SupervisorCmd::KernelExited { notebook_key: nb }).await;
			}
		});

		let self_tx = self.self_tx.clone();
		let nb = notebook_key.clone();
		tokio::spawn(async move {
			while heartbeat_rx.recv().await.is_some() {
				if self_tx
					.send(SupervisorCmd::Heartbeat {
						notebook_key: nb.clone(),
					})
					.await
					.is_err()
				{
					return;
				}
			}
		});

		self.kernels.insert(notebook_key.clone(), Arc::new(instance));
		self.started_at.insert(notebook_key.clone(), now_millis());
		self.last_heartbeat.insert(notebook_key, Instant::now());
		Ok(())
	}

	async fn do_send(&self, notebook_key: &NotebookKey, source: String) -> Result<String, KernelError> {
		let instance = self.kernels.get(notebook_key).ok_or(KernelError::Dead)?;
		let msg_id = uuid::Uuid::new_v4().to_string();
		instance
			.stdin_tx
			.send(KernelStdinFrame::Execute(KernelRequest {
				msg_id: msg_id.clone(),
				source,
			}))
			.await
			.map_err(|_| KernelError::Dead)?;
		Ok(msg_id)
	}
}

fn now_millis() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
