//! Broker runtime orchestration.

use std::sync::Arc;

use cellbroker_proto::types::{AssetPath, ExecutionRecord, NotebookKey, PruneReport, SessionSummary, TaskId};

use crate::config::Config;
use crate::error::BrokerError;
use crate::launcher::{KernelLauncher, ProcessLauncher};
use crate::services::gc::GcHandle;
use crate::services::hub::HubHandle;
use crate::services::multiplexer::MultiplexerHandle;
use crate::services::scheduler::{SchedulerConfig, SchedulerHandle};
use crate::services::supervisor::SupervisorHandle;
use crate::store::StoreHandle;

/// Orchestrates the lifecycle and wiring of every broker service.
///
/// Holds a handle to each active service; services operate as
/// independent actors communicating via channels, so this struct is
/// cheap to clone-share (each field is itself a `Clone`-able handle).
pub struct Broker {
	/// Handle to the durable journal of executions and asset leases.
	pub store: StoreHandle,
	/// Handle to kernel subprocess lifecycle management.
	pub supervisor: SupervisorHandle,
	/// Handle to kernel output demultiplexing.
	pub multiplexer: MultiplexerHandle,
	/// Handle to per-kernel FIFO dispatch and timeout enforcement.
	pub scheduler: SchedulerHandle,
	/// Handle to concurrent client fan-out.
	pub hub: HubHandle,
	/// Handle to lease-based asset garbage collection.
	pub gc: GcHandle,
	cfg: Config,
}

impl Broker {
	/// Initializes every service and wires cross-service handle
	/// dependencies, using a tiered startup sequence to resolve the
	/// circular dependency between the supervisor (reports kernel death)
	/// and the scheduler (drives kernel dispatch).
	pub fn new(cfg: Config) -> Result<Arc<Self>, rusqlite::Error> {
		Self::with_launcher(cfg, Arc::new(ProcessLauncher::new()))
	}

	/// Like [`Broker::new`], but with an injectable kernel launcher. Used
	/// by tests to substitute an in-process fake kernel.
	pub fn with_launcher(cfg: Config, launcher: Arc<dyn KernelLauncher>) -> Result<Arc<Self>, rusqlite::Error> {
		let _ = std::fs::create_dir_all(cfg.assets_dir());

		let store = crate::store::StoreService::start(&cfg.journal_path())?;
		let hub = crate::services::hub::HubService::start();
		let gc = crate::services::gc::GcService::start(store.clone(), cfg.assets_dir());
		let multiplexer = crate::services::multiplexer::MultiplexerService::start(hub.clone(), cfg.orphan_ring);
		let (supervisor, scheduler_tx) =
			crate::services::supervisor::SupervisorService::start(launcher, multiplexer.clone(), cfg.kernel_liveness_grace);

		let scheduler_cfg = SchedulerConfig {
			default_timeout: cfg.default_timeout,
			submission_queue_cap: cfg.submission_queue_cap,
			kernel_command: cfg.kernel_command.clone(),
			kernel_args: cfg.kernel_args.clone(),
		};
		let scheduler = crate::services::scheduler::SchedulerService::start(
			store.clone(),
			supervisor.clone(),
			multiplexer.clone(),
			hub.clone(),
			scheduler_cfg,
		);

		let _ = scheduler_tx.try_send(scheduler.clone());

		Ok(Arc::new(Self {
			store,
			supervisor,
			multiplexer,
			scheduler,
			hub,
			gc,
			cfg,
		}))
	}

	/// Re-dispatches every non-terminal record left in the store by a
	/// prior process. Call once after construction, before serving any
	/// client connections.
	pub async fn restore(&self) {
		self.scheduler.restore().await;
	}

	/// Accepts a new execution for dispatch; durable the instant this
	/// call returns `Ok`.
	pub async fn submit_execution(
		&self,
		notebook_key: NotebookKey,
		cell_index: i64,
		source: String,
		task_id: Option<TaskId>,
	) -> Result<TaskId, BrokerError> {
		self.scheduler.submit(notebook_key, cell_index, source, task_id).await
	}

	/// Best-effort cancellation of a pending or running execution.
	pub async fn cancel_execution(&self, notebook_key: NotebookKey, task_id: TaskId) {
		self.scheduler.cancel(notebook_key, task_id).await;
	}

	/// Fetches a point-in-time snapshot of one execution.
	pub async fn execution_status(&self, task_id: TaskId) -> Option<ExecutionRecord> {
		self.store.get(task_id).await
	}

	/// Lists every currently active kernel session.
	pub async fn list_active_sessions(&self) -> Vec<SessionSummary> {
		self.supervisor.list_active().await
	}

	/// Cooperatively interrupts a notebook's currently running execution.
	pub async fn interrupt_kernel(&self, notebook_key: NotebookKey) {
		self.supervisor.interrupt(notebook_key).await;
	}

	/// Tears a notebook's kernel down entirely.
	pub async fn shutdown_kernel(&self, notebook_key: NotebookKey) {
		self.supervisor.shutdown(notebook_key).await;
	}

	/// Delivers a value for an outstanding kernel input request.
	pub async fn submit_input(&self, notebook_key: NotebookKey, value: String) {
		self.scheduler.submit_input(notebook_key, value).await;
	}

	/// Renews leases for `referenced` and reclaims everything else
	/// expired and unreferenced, for one notebook.
	pub async fn prune_unused_assets(&self, notebook_key: NotebookKey, referenced: Vec<AssetPath>, dry_run: bool) -> PruneReport {
		self.gc.prune(notebook_key, referenced, dry_run).await
	}

	/// Reads an asset's bytes and recorded mime type.
	pub async fn fetch_asset(&self, asset_path: AssetPath) -> std::io::Result<(String, Vec<u8>)> {
		self.gc.fetch_asset(asset_path).await
	}

	/// The configuration this broker was constructed with.
	#[must_use]
	pub fn config(&self) -> &Config {
		&self.cfg
	}

	/// Cooperative teardown: the transport layer is expected to stop
	/// accepting new connections before calling this. Cancels every
	/// remaining pending or running execution, tears down every active
	/// kernel session, then returns (the Store's actor task stops when
	/// its handle is dropped with the rest of the broker).
	pub async fn shutdown(&self) {
		for record in self.store.load_nonterminal().await {
			self.scheduler.cancel(record.notebook_key, record.task_id).await;
		}
		for session in self.supervisor.list_active().await {
			self.supervisor.shutdown(session.notebook_key).await;
		}
	}
}
