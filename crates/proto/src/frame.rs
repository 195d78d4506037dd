//! Frames exchanged over the broker's IPC transport.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::types::{AssetPath, ExecutionRecord, NotebookKey, OutputKind, PruneReport, SessionSummary, TaskId};

/// Top-level classification of frames transmitted over the IPC socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IpcFrame {
	/// A request from a client to the broker.
	Request(Request),
	/// A response from the broker to a client.
	Response(Response),
	/// An asynchronous, broker-initiated notification.
	Event(Event),
}

/// A request from a client to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Client-chosen correlation id for the matching response.
	pub id: u64,
	/// The request payload.
	pub payload: RequestPayload,
}

/// Request payload variants; one per external operation in the broker's contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestPayload {
	/// Simple connectivity check.
	Ping,
	/// Submit a new execution.
	SubmitExecution {
		/// Owning notebook.
		notebook_key: NotebookKey,
		/// Originating cell index; -1 for internal, informational only.
		cell_index: i64,
		/// Code fragment to interpret.
		source: String,
		/// Client-supplied id; generated by the broker if omitted.
		task_id: Option<TaskId>,
	},
	/// Cancel a pending or running execution.
	CancelExecution {
		/// Owning notebook.
		notebook_key: NotebookKey,
		/// Target execution.
		task_id: TaskId,
	},
	/// Fetch a point-in-time snapshot of an execution's state.
	ExecutionStatus {
		/// Target execution.
		task_id: TaskId,
	},
	/// List all currently active kernel sessions.
	ListActiveSessions,
	/// Cooperatively interrupt a kernel's current execution.
	InterruptKernel {
		/// Target notebook.
		notebook_key: NotebookKey,
	},
	/// Tear down a kernel session entirely.
	ShutdownKernel {
		/// Target notebook.
		notebook_key: NotebookKey,
	},
	/// Reclaim disk space for assets no longer referenced by a notebook.
	PruneUnusedAssets {
		/// Target notebook.
		notebook_key: NotebookKey,
		/// Asset paths the client's current buffer still references.
		referenced: Vec<AssetPath>,
		/// If true, report what would be deleted without deleting anything.
		dry_run: bool,
	},
	/// Read an asset's bytes and mime type.
	FetchAsset {
		/// Target asset.
		asset_path: AssetPath,
	},
	/// Deliver a value for an outstanding `input_request`.
	SubmitInput {
		/// Target notebook.
		notebook_key: NotebookKey,
		/// The value the user supplied.
		value: String,
	},
	/// Subscribe this connection to broker-initiated notifications.
	Subscribe,
}

/// A response from the broker to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	/// The request this responds to.
	pub request_id: u64,
	/// The response payload when successful.
	pub payload: Option<ResponsePayload>,
	/// The error code when the request failed.
	pub error: Option<ErrorCode>,
}

/// Response payload variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
	/// Reply to `Ping`.
	Pong,
	/// Reply to `SubmitExecution`.
	Submitted {
		/// The assigned or echoed task id.
		task_id: TaskId,
	},
	/// Reply to an operation with no payload beyond success.
	Ack,
	/// Reply to `ExecutionStatus`.
	Status(Box<ExecutionRecord>),
	/// Reply to `ListActiveSessions`.
	Sessions(Vec<SessionSummary>),
	/// Reply to `PruneUnusedAssets`.
	Pruned(PruneReport),
	/// Reply to `FetchAsset`.
	Asset {
		/// Content type recorded at creation time.
		mime: String,
		/// Base64-encoded asset bytes.
		base64_bytes: String,
	},
	/// Reply to `Subscribe`.
	Subscribed,
}

/// An asynchronous, broker-initiated notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
	/// Carries one broker-initiated notification to a subscribed client.
	Notification(Notification),
	/// Idle keep-alive, emitted periodically on subscribed connections.
	Heartbeat,
}

/// Broker-initiated notifications, delivered via the Fan-out Hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Notification {
	/// An execution has begun dispatch to its kernel.
	ExecutionStarted {
		/// The execution that started.
		task_id: TaskId,
		/// The kernel-issued message id it was assigned.
		kernel_msg_id: String,
	},
	/// One unit of output belonging to an execution.
	Output {
		/// The owning execution.
		task_id: TaskId,
		/// Classification of this output.
		kind: OutputKind,
		/// Opaque payload.
		payload: serde_json::Value,
	},
	/// An execution's status changed.
	Status {
		/// The execution whose status changed.
		task_id: TaskId,
		/// New status, serialized as its wire name.
		status: crate::types::ExecutionStatus,
	},
	/// The kernel is requesting interactive input.
	InputRequest {
		/// The notebook whose kernel is asking.
		notebook_key: NotebookKey,
		/// Prompt text to show the user.
		prompt: String,
		/// Whether the input should be masked.
		is_password: bool,
		/// Opaque correlation key for the matching `SubmitInput`.
		secret_key: Option<String>,
	},
}
