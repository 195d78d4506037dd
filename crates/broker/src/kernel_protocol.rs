//! Internal framing between the broker and a kernel subprocess's stdio.
//!
//! This is distinct from `cellbroker-proto`, which is the client-facing
//! wire protocol. Kernel subprocesses speak a much smaller request/reply
//! vocabulary, framed identically (`u32` little-endian length prefix,
//! `serde_json` body) over stdin/stdout.

use serde::{Deserialize, Serialize};

use cellbroker_proto::types::OutputKind;

/// A request written to a kernel's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelRequest {
	/// Id the broker assigns to this request; echoed back on every
	/// output frame the kernel emits in response.
	pub msg_id: String,
	/// The code fragment to interpret.
	pub source: String,
}

/// Everything the broker may write to a kernel's stdin. Framed as one
/// enum (rather than separately-typed frames) so the reader side can
/// always deserialize to a single known type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KernelStdinFrame {
	/// Run a new code fragment.
	Execute(KernelRequest),
	/// Abandon the current execution, if any.
	Interrupt,
	/// Deliver a value for an outstanding input request.
	InputReply {
		/// The value the user supplied.
		value: String,
	},
}

/// One frame read from a kernel's stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelOutputFrame {
	/// The `msg_id` of the [`KernelRequest`] this output belongs to.
	pub parent_id: String,
	/// Body of this frame.
	pub body: KernelFrameBody,
}

/// The payload of a single kernel output frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KernelFrameBody {
	/// Ordinary output (stream, display data, or a cell's result value).
	Output {
		/// Classification of this output.
		kind: OutputKind,
		/// Opaque payload, passed through to the client untouched.
		payload: serde_json::Value,
	},
	/// The kernel is requesting interactive input before it can proceed.
	InputRequest {
		/// Prompt text to show the user.
		prompt: String,
		/// Whether the input should be masked.
		is_password: bool,
	},
	/// The kernel has gone idle: the execution identified by `parent_id`
	/// is finished. `error` is set iff it finished unsuccessfully.
	Idle {
		/// Present iff the execution raised.
		error: Option<String>,
	},
	/// Liveness pulse emitted independently of any execution; `parent_id`
	/// is unused (empty) for this variant. Consumed by the Supervisor's
	/// reaper watchdog, never routed to an execution record.
	Heartbeat,
}
