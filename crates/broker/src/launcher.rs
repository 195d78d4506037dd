//! Kernel subprocess launcher abstraction for production and testing.

use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use cellbroker_proto::types::NotebookKey;

use crate::error::KernelError;
use crate::framing::{read_frame, write_frame};
use crate::kernel_protocol::{KernelFrameBody, KernelOutputFrame, KernelStdinFrame};
use crate::services::multiplexer::MultiplexerHandle;

/// A fully resolved command to execute as a kernel subprocess.
#[derive(Debug, Clone)]
pub struct KernelSpec {
	/// Executable to run.
	pub command: String,
	/// Arguments for the executable.
	pub args: Vec<String>,
}

/// Control channels for graceful-then-forceful kernel termination.
#[derive(Debug)]
pub struct KernelControl {
	/// Channel to request graceful shutdown.
	pub term_tx: oneshot::Sender<()>,
	/// Channel to await completion of shutdown.
	pub done_rx: oneshot::Receiver<()>,
}

/// A running kernel instance and its associated handles.
pub struct KernelInstance {
	/// Sink for everything written to the kernel's stdin (execute
	/// requests, interrupts, input replies), consumed by the writer task.
	pub stdin_tx: mpsc::Sender<KernelStdinFrame>,
	/// OS process id, when backed by a real subprocess.
	pub pid: Option<u32>,
	control: Mutex<Option<KernelControl>>,
}

impl KernelInstance {
	/// Best-effort graceful shutdown, then forceful kill if needed.
	pub async fn terminate(&self) {
		let control = self.control.lock().unwrap().take();
		let Some(control) = control else {
			return;
		};
		let _ = control.term_tx.send(());
		let _ = tokio::time::timeout(Duration::from_secs(2), control.done_rx).await;
	}
}

/// Trait for launching kernel subprocess instances.
///
/// This abstraction lets the broker use real subprocesses in production
/// and in-process fake kernels for testing.
pub trait KernelLauncher: Send + Sync + 'static {
	/// Launches a new kernel instance for `notebook_key`.
	///
	/// Output frames are forwarded to `multiplexer` as they arrive;
	/// `notify_exit` is signalled exactly once, when the kernel's output
	/// stream ends for any reason (clean exit, crash, or protocol error).
	/// `notify_heartbeat` is signalled once per `Heartbeat` frame, bypassing
	/// the multiplexer since a heartbeat belongs to no execution.
	fn launch(
		&self,
		notebook_key: NotebookKey,
		spec: KernelSpec,
		multiplexer: MultiplexerHandle,
		notify_exit: mpsc::Sender<NotebookKey>,
		notify_heartbeat: mpsc::Sender<NotebookKey>,
	) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<KernelInstance, KernelError>> + Send>>;
}

/// Production launcher that spawns real kernel subprocesses.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
	/// Creates a new process launcher.
	#[must_use]
	pub fn new() -> Self {
		Self
	}
}

impl KernelLauncher for ProcessLauncher {
	fn launch(
		&self,
		notebook_key: NotebookKey,
		spec: KernelSpec,
		multiplexer: MultiplexerHandle,
		notify_exit: mpsc::Sender<NotebookKey>,
		notify_heartbeat: mpsc::Sender<NotebookKey>,
	) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<KernelInstance, KernelError>> + Send>> {
		Box::pin(async move {
			let mut child = tokio::process::Command::new(&spec.command)
				.args(&spec.args)
				.stdin(Stdio::piped())
				.stdout(Stdio::piped())
				.stderr(Stdio::inherit())
				.kill_on_drop(true)
				.spawn()?;

			let pid = child.id();
			let stdin = child.stdin.take().ok_or(KernelError::Dead)?;
			let stdout = child.stdout.take().ok_or(KernelError::Dead)?;

			let (stdin_tx, control) = spawn_writer(stdin, child);

			spawn_reader(stdout, notebook_key, multiplexer, notify_exit, notify_heartbeat);

			Ok(KernelInstance {
				stdin_tx,
				pid,
				control: Mutex::new(Some(control)),
			})
		})
	}
}

/// Spawns the stdin writer task and the child-lifecycle monitor task,
/// returning the stdin sink and the control handle used by
/// [`KernelInstance::terminate`].
fn spawn_writer(
	mut stdin: tokio::process::ChildStdin,
	mut child: tokio::process::Child,
) -> (mpsc::Sender<KernelStdinFrame>, KernelControl) {
	let (stdin_tx, mut stdin_rx) = mpsc::channel::<KernelStdinFrame>(64);
	let (term_tx, mut term_rx) = oneshot::channel::<()>();
	let (done_tx, done_rx) = oneshot::channel::<()>();

	tokio::spawn(async move {
		loop {
			tokio::select! {
				Some(frame) = stdin_rx.recv() => {
					if write_frame(&mut stdin, &frame).await.is_err() {
						break;
					}
				}
				_ = &mut term_rx => {
					let _ = stdin.shutdown().await;
					let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
					if child.try_wait().ok().flatten().is_none() {
						let _ = child.kill().await;
					}
					let _ = done_tx.send(());
					return;
				}
				else => break,
			}
		}
		let _ = child.kill().await;
		let _ = done_tx.send(());
	});

	(stdin_tx, KernelControl { term_tx, done_rx })
}

/// Spawns the stdout reader task, forwarding every output frame to the
/// multiplexer (or, for a `Heartbeat` frame, to `notify_heartbeat` instead,
/// since it belongs to no execution) and signalling `notify_exit` exactly
/// once when the stream ends.
fn spawn_reader(
	stdout: tokio::process::ChildStdout,
	notebook_key: NotebookKey,
	multiplexer: MultiplexerHandle,
	notify_exit: mpsc::Sender<NotebookKey>,
	notify_heartbeat: mpsc::Sender<NotebookKey>,
) {
	tokio::spawn(async move {
		let mut reader = BufReader::new(stdout);
		loop {
			match read_frame::<_, KernelOutputFrame>(&mut reader).await {
				Ok(Some(frame)) if matches!(frame.body, KernelFrameBody::Heartbeat) => {
					let _ = notify_heartbeat.send(notebook_key.clone()).await;
				}
				Ok(Some(frame)) => {
					multiplexer.route_frame(notebook_key.clone(), frame).await;
				}
				Ok(None) => break,
				Err(e) => {
					tracing::warn!(notebook = %notebook_key, error = %e, "kernel stdout decode error");
					break;
				}
			}
		}
		let _ = notify_exit.send(notebook_key).await;
	});
}

/// Test helpers for in-process fake kernels, standing in for a real
/// interpreter subprocess so tests do not depend on one being installed.
#[doc(hidden)]
pub mod test_helpers {
	use std::collections::HashMap;
	use std::sync::Arc;

	use tokio::io::AsyncWriteExt;
	use tokio::sync::Mutex as AsyncMutex;

	use super::*;
	use crate::kernel_protocol::KernelFrameBody as Body;

	/// A handle the test holds to drive a fake kernel's behavior and
	/// inspect what it received.
	#[derive(Clone)]
	pub struct FakeKernelHandle {
		/// Stdin frames received so far, in arrival order.
		pub received: Arc<AsyncMutex<Vec<KernelStdinFrame>>>,
		to_kernel: Arc<AsyncMutex<tokio::io::WriteHalf<tokio::io::DuplexStream>>>,
	}

	impl FakeKernelHandle {
		/// Pushes one output frame to the broker as if the fake kernel emitted it.
		pub async fn emit(&self, parent_id: impl Into<String>, body: KernelFrameBody) {
			let frame = KernelOutputFrame {
				parent_id: parent_id.into(),
				body,
			};
			let mut w = self.to_kernel.lock().await;
			let _ = write_frame(&mut *w, &frame).await;
		}

		/// Convenience: emits an `Idle` frame completing `parent_id`.
		pub async fn finish(&self, parent_id: impl Into<String>, error: Option<String>) {
			self.emit(parent_id, Body::Idle { error }).await;
		}

		/// Convenience: emits a liveness heartbeat.
		pub async fn heartbeat(&self) {
			self.emit(String::new(), Body::Heartbeat).await;
		}
	}

	/// Test launcher that creates in-process fake kernels wired over
	/// `tokio::io::duplex` pipes instead of real subprocesses.
	#[derive(Clone, Default)]
	pub struct TestLauncher {
		/// Handles for every launched fake kernel, keyed by notebook.
		pub kernels: Arc<std::sync::Mutex<HashMap<NotebookKey, FakeKernelHandle>>>,
	}

	impl TestLauncher {
		/// Creates a new test launcher.
		#[must_use]
		pub fn new() -> Self {
			Self::default()
		}

		/// Retrieves the fake kernel handle for a launched notebook, if any.
		pub fn get(&self, notebook_key: &NotebookKey) -> Option<FakeKernelHandle> {
			self.kernels.lock().unwrap().get(notebook_key).cloned()
		}
	}

	impl KernelLauncher for TestLauncher {
		fn launch(
			&self,
			notebook_key: NotebookKey,
			_spec: KernelSpec,
			multiplexer: MultiplexerHandle,
			notify_exit: mpsc::Sender<NotebookKey>,
			notify_heartbeat: mpsc::Sender<NotebookKey>,
		) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<KernelInstance, KernelError>> + Send>>
		{
			let kernels = self.kernels.clone();
			Box::pin(async move {
				let (broker_side, kernel_side) = tokio::io::duplex(64 * 1024);
				let (mut broker_r, broker_w) = tokio::io::split(broker_side);
				let (mut kernel_r, kernel_w) = tokio::io::split(kernel_side);

				let handle = FakeKernelHandle {
					received: Arc::new(AsyncMutex::new(Vec::new())),
					to_kernel: Arc::new(AsyncMutex::new(kernel_w)),
				};
				kernels
					.lock()
					.unwrap()
					.insert(notebook_key.clone(), handle.clone());

				// Fake kernel side: record every stdin frame it receives.
				let received = handle.received.clone();
				tokio::spawn(async move {
					loop {
						match read_frame::<_, KernelStdinFrame>(&mut kernel_r).await {
							Ok(Some(frame)) => received.lock().await.push(frame),
							_ => break,
						}
					}
				});

				let (stdin_tx, mut stdin_rx) = mpsc::channel::<KernelStdinFrame>(64);
				let (term_tx, mut term_rx) = oneshot::channel::<()>();
				let (done_tx, done_rx) = oneshot::channel::<()>();

				tokio::spawn(async move {
					let mut broker_w = broker_w;
					loop {
						tokio::select! {
							Some(frame) = stdin_rx.recv() => {
								if write_frame(&mut broker_w, &frame).await.is_err() {
									break;
								}
							}
							_ = &mut term_rx => {
								let _ = broker_w.shutdown().await;
								let _ = done_tx.send(());
								return;
							}
							else => break,
						}
					}
					let _ = done_tx.send(());
				});

				let nb = notebook_key.clone();
				let mux = multiplexer;
				tokio::spawn(async move {
					loop {
						match read_frame::<_, KernelOutputFrame>(&mut broker_r).await {
							Ok(Some(frame)) if matches!(frame.body, KernelFrameBody::Heartbeat) => {
								let _ = notify_heartbeat.send(nb.clone()).await;
							}
							Ok(Some(frame)) => mux.route_frame(nb.clone(), frame).await,
							_ => break,
						}
					}
					let _ = notify_exit.send(nb).await;
				});

				Ok(KernelInstance {
					stdin_tx,
					pid: None,
					control: Mutex::new(Some(KernelControl { term_tx, done_rx })),
				})
			})
		}
	}
}
