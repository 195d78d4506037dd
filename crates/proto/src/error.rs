//! Wire-level error taxonomy, sent back to clients in place of a payload.

use serde::{Deserialize, Serialize};

/// A stable, serializable classification of what went wrong.
///
/// This mirrors the broker-internal error taxonomy but carries no
/// backtrace or source chain, since it crosses the IPC boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
	/// The durable store could not complete a write.
	StorageFailure,
	/// The target kernel could not be started or has died.
	KernelUnavailable,
	/// The execution exceeded its configured deadline.
	Timeout,
	/// The execution was cancelled by client request.
	Cancelled,
	/// The interpreted program raised an error.
	ExecutionError,
	/// A frame could not be decoded or referenced an unknown entity.
	ProtocolViolation,
	/// A resource limit (queue depth, storage) was exceeded.
	ResourceExhausted,
	/// The requested entity does not exist.
	NotFound,
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		std::fmt::Debug::fmt(self, f)
	}
}
