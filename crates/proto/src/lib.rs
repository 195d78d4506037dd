//! Wire types shared between the cellbroker daemon and its clients.

pub mod error;
pub mod frame;
pub mod paths;
pub mod types;

pub use error::ErrorCode;
pub use frame::{Event, IpcFrame, Notification, Request, RequestPayload, Response, ResponsePayload};
pub use types::{AssetPath, ExecutionRecord, ExecutionStatus, NotebookKey, TaskId};
