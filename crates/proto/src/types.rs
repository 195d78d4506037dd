//! Core data types for the execution broker's wire protocol and data model.

use serde::{Deserialize, Serialize};

/// Opaque client-chosen identifier for an execution. Globally unique.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl std::fmt::Display for TaskId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl TaskId {
	/// Generates a fresh, random task id.
	#[must_use]
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}
}

/// Canonical absolute path identifying the owning kernel session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NotebookKey(pub String);

impl std::fmt::Display for NotebookKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// Canonical relative path of an asset blob offloaded to disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetPath(pub String);

impl std::fmt::Display for AssetPath {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// Lifecycle status of an execution record.
///
/// Transitions are monotone: `Pending -> Running -> {Completed, Failed,
/// Cancelled, Timeout}`. No status ever re-opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
	/// Persisted but not yet dispatched to a kernel.
	Pending,
	/// Dispatched; no terminal message observed yet.
	Running,
	/// Finished successfully.
	Completed,
	/// Finished with an interpreter-raised error.
	Failed,
	/// Cancelled by client request.
	Cancelled,
	/// Exceeded its deadline.
	Timeout,
}

impl ExecutionStatus {
	/// True for any status from which no further transition is legal.
	#[must_use]
	pub fn is_terminal(self) -> bool {
		matches!(
			self,
			Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
		)
	}
}

/// A snapshot of an execution's full state, as stored durably and
/// returned to clients via `execution_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
	/// Globally unique client- or broker-assigned identifier.
	pub task_id: TaskId,
	/// The notebook (kernel session) this execution belongs to.
	pub notebook_key: NotebookKey,
	/// Cell index in the originating notebook; -1 for internal executions.
	///
	/// Purely informational: no broker logic branches on this value.
	pub cell_index: i64,
	/// The code fragment to interpret. Opaque to the broker.
	pub source: String,
	/// Current lifecycle status.
	pub status: ExecutionStatus,
	/// Unix millis at which the record was created.
	pub created_at: i64,
	/// Unix millis at which dispatch began, if it has.
	pub started_at: Option<i64>,
	/// Unix millis at which a terminal status was reached, if it has.
	pub completed_at: Option<i64>,
	/// Populated iff the terminal state is non-success.
	pub error_message: Option<String>,
	/// Count of scheduler-initiated retries (always 0; reserved for
	/// operator-triggered re-submission bookkeeping).
	pub retries: u32,
}

/// Summary of one active kernel session, as returned by `list_active_sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
	/// The notebook this session serves.
	pub notebook_key: NotebookKey,
	/// Unix millis at which the kernel was started.
	pub started_at: i64,
	/// OS process id of the kernel subprocess, if known.
	pub kernel_pid: Option<u32>,
	/// Whether the supervisor currently believes the kernel is alive.
	pub alive: bool,
}

/// One output frame emitted by a kernel during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFrame {
	/// The kernel-issued message id this output belongs to.
	pub parent_id: String,
	/// Classification of the output payload.
	pub kind: OutputKind,
	/// Opaque payload, interpreted by the client.
	pub payload: serde_json::Value,
}

/// Classification of an output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
	/// Raw stdout/stderr-style stream text.
	Stream,
	/// A rich display payload (e.g. image, table).
	Display,
	/// The final expression result of a cell.
	Result,
	/// An interpreter-raised error.
	Error,
}

/// The outcome of a `prune_unused_assets` invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneReport {
	/// Asset paths deleted (or that would be deleted, under `dry_run`).
	pub deleted: Vec<AssetPath>,
	/// Asset paths whose lease was renewed because they are referenced.
	pub renewed: Vec<AssetPath>,
	/// Whether this report reflects a dry run (nothing was actually deleted).
	pub dry_run: bool,
}
