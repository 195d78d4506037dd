//! Broker-wide error taxonomy.

use cellbroker_proto::ErrorCode;

/// Errors surfaced by broker operations.
///
/// Variants that affect a single execution are normally captured in that
/// execution's record and delivered via notifications rather than
/// propagated here; this enum is for errors that escape synchronously to
/// a caller (submission-time failures) or that name a fatal condition.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
	/// The durable store could not complete a write.
	#[error("storage failure: {0}")]
	Storage(#[from] StoreError),
	/// The target kernel could not be started or has died.
	#[error("kernel unavailable: {0}")]
	Kernel(#[from] KernelError),
	/// A resource limit was exceeded; retryable.
	#[error("resource exhausted: {0}")]
	ResourceExhausted(String),
	/// The requested entity does not exist.
	#[error("not found: {0}")]
	NotFound(String),
	/// A frame could not be decoded or referenced an unknown entity.
	#[error("protocol violation: {0}")]
	ProtocolViolation(String),
}

impl BrokerError {
	/// Maps this error onto the stable wire-level error taxonomy.
	#[must_use]
	pub fn code(&self) -> ErrorCode {
		match self {
			Self::Storage(_) => ErrorCode::StorageFailure,
			Self::Kernel(_) => ErrorCode::KernelUnavailable,
			Self::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
			Self::NotFound(_) => ErrorCode::NotFound,
			Self::ProtocolViolation(_) => ErrorCode::ProtocolViolation,
		}
	}
}

/// Errors from the durable store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	/// The underlying SQLite connection returned an error.
	#[error("sqlite error: {0}")]
	Sqlite(#[from] rusqlite::Error),
	/// `enqueue` was called with a `task_id` already present in the store.
	#[error("duplicate task id")]
	DuplicateId,
	/// A status transition was attempted from an illegal source state.
	#[error("illegal status transition")]
	IllegalTransition,
	/// The store's actor task has shut down.
	#[error("store is shut down")]
	ShutDown,
}

/// Errors from the kernel supervisor.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
	/// The subprocess could not be spawned.
	#[error("failed to spawn kernel: {0}")]
	SpawnFailed(#[from] std::io::Error),
	/// The kernel process has exited or is otherwise unreachable.
	#[error("kernel process is not alive")]
	Dead,
	/// The supervisor's actor task has shut down.
	#[error("supervisor is shut down")]
	ShutDown,
}
