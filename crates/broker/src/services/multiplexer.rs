//! I/O Multiplexer (component C): demultiplexes a kernel's output stream
//! into per-execution records, buffers orphaned output in a bounded
//! ring until its parent execution is registered, and signals execution
//! completion exactly once — never by polling.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::{mpsc, oneshot};

use cellbroker_proto::types::{NotebookKey, TaskId};
use cellbroker_proto::frame::Notification;

use crate::kernel_protocol::{KernelFrameBody, KernelOutputFrame};
use crate::services::hub::HubHandle;

/// Outcome signalled to the scheduler when an execution reaches a
/// terminal kernel-side state.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
	/// Present iff the execution raised an error.
	pub error: Option<String>,
}

enum MultiplexerCmd {
	Bind {
		kernel_msg_id: String,
		task_id: TaskId,
		notebook_key: NotebookKey,
		completion: oneshot::Sender<CompletionOutcome>,
	},
	RouteFrame {
		notebook_key: NotebookKey,
		frame: KernelOutputFrame,
	},
}

/// Cloneable handle to the I/O multiplexer actor.
#[derive(Clone)]
pub struct MultiplexerHandle {
	tx: mpsc::Sender<MultiplexerCmd>,
}

impl MultiplexerHandle {
	/// Registers the mapping from a kernel-issued message id to the
	/// execution it belongs to, draining any orphaned output that
	/// arrived first, in arrival order. `completion` fires exactly once,
	/// when the kernel reports this execution idle.
	pub async fn bind(
		&self,
		kernel_msg_id: String,
		task_id: TaskId,
		notebook_key: NotebookKey,
		completion: oneshot::Sender<CompletionOutcome>,
	) {
		let _ = self
			.tx
			.send(MultiplexerCmd::Bind {
				kernel_msg_id,
				task_id,
				notebook_key,
				completion,
			})
			.await;
	}

	/// Routes one frame read from a kernel's stdout. Called by the
	/// kernel launcher's reader task.
	pub async fn route_frame(&self, notebook_key: NotebookKey, frame: KernelOutputFrame) {
		let _ = self.tx.send(MultiplexerCmd::RouteFrame { notebook_key, frame }).await;
	}
}

struct Orphans {
	ring: VecDeque<KernelOutputFrame>,
	capacity: usize,
}

impl Orphans {
	fn push(&mut self, frame: KernelOutputFrame) {
		if self.ring.len() >= self.capacity {
			self.ring.pop_front();
		}
		self.ring.push_back(frame);
	}
}

struct Binding {
	task_id: TaskId,
	notebook_key: NotebookKey,
	completion: Option<oneshot::Sender<CompletionOutcome>>,
}

/// Actor owning the orphan ring and the kernel-message-id to execution
/// bindings for every live kernel.
pub struct MultiplexerService {
	rx: mpsc::Receiver<MultiplexerCmd>,
	hub: HubHandle,
	orphan_capacity: usize,
	bindings: HashMap<String, Binding>,
	orphans: HashMap<String, Orphans>,
	completed: HashSet<String>,
}

impl MultiplexerService {
	/// Spawns the multiplexer actor task.
	pub fn start(hub: HubHandle, orphan_capacity: usize) -> MultiplexerHandle {
		let (tx, rx) = mpsc::channel(1024);
		let service = Self {
			rx,
			hub,
			orphan_capacity,
			bindings: HashMap::new(),
			orphans: HashMap::new(),
			completed: HashSet::new(),
		};
		tokio::spawn(service.run());
		MultiplexerHandle { tx }
	}

	async fn run(mut self) {
		while let Some(cmd) = self.rx.recv().await {
			match cmd {
				MultiplexerCmd::Bind {
					kernel_msg_id,
					task_id,
					notebook_key,
					completion,
				} => {
					self.bindings.insert(
						kernel_msg_id.clone(),
						Binding {
							task_id: task_id.clone(),
							notebook_key,
							completion: Some(completion),
						},
					);
					if let Some(orphaned) = self.orphans.remove(&kernel_msg_id) {
						for frame in orphaned.ring {
							self.dispatch(&kernel_msg_id, frame).await;
						}
					}
				}
				MultiplexerCmd::RouteFrame { notebook_key: _, frame } => {
					let kernel_msg_id = frame.parent_id.clone();
					if self.bindings.contains_key(&kernel_msg_id) {
						self.dispatch(&kernel_msg_id, frame).await;
					} else {
						self.orphans
							.entry(kernel_msg_id)
							.or_insert_with(|| Orphans {
								ring: VecDeque::new(),
								capacity: self.orphan_capacity,
							})
							.push(frame);
					}
				}
			}
		}
	}

	/// Handles one frame known to be bound: forwards it to the hub in
	/// arrival order and, on a terminal frame, fires the completion
	/// signal exactly once.
	async fn dispatch(&mut self, kernel_msg_id: &str, frame: KernelOutputFrame) {
		let Some(binding) = self.bindings.get_mut(kernel_msg_id) else {
			return;
		};
		let task_id = binding.task_id.clone();
		let notebook_key = binding.notebook_key.clone();

		match frame.body {
			KernelFrameBody::Output { kind, payload } => {
				self.hub
					.broadcast(Notification::Output {
						task_id,
						kind,
						payload,
					})
					.await;
			}
			KernelFrameBody::InputRequest { prompt, is_password } => {
				self.hub
					.broadcast(Notification::InputRequest {
						notebook_key,
						prompt,
						is_password,
						secret_key: Some(kernel_msg_id.to_string()),
					})
					.await;
			}
			KernelFrameBody::Idle { error } => {
				// Late frames for an already-completed execution are
				// recorded (the output forwarding above already ran for
				// any Output/InputRequest variant) but must not re-fire
				// completion.
				if self.completed.insert(kernel_msg_id.to_string())
					&& let Some(binding) = self.bindings.get_mut(kernel_msg_id)
					&& let Some(completion) = binding.completion.take()
				{
					let _ = completion.send(CompletionOutcome { error });
				}
			}
		}
	}
}
