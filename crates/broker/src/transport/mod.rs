//! Client-facing IPC transport: a length-prefixed JSON codec served over
//! a Unix domain socket, decoding requests from `cellbroker-proto` and
//! dispatching them into a [`Broker`].

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cellbroker_proto::frame::{Event, IpcFrame, Request, RequestPayload, Response, ResponsePayload};
use cellbroker_proto::ErrorCode;

use crate::framing::{read_frame, write_frame};
use crate::runtime::Broker;
use crate::services::hub::ConnectionId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const OUTBOUND_CAP: usize = 256;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Accepts client connections on `socket_path` until `shutdown` is
/// cancelled. Removes any stale socket file left by a prior process.
pub async fn serve(socket_path: impl AsRef<Path>, broker: Arc<Broker>, shutdown: CancellationToken) -> std::io::Result<()> {
	let path = socket_path.as_ref();
	if path.exists() {
		tokio::fs::remove_file(path).await?;
	}
	let listener = UnixListener::bind(path)?;
	tracing::info!(path = %path.display(), "cellbroker listening");

	loop {
		tokio::select! {
			() = shutdown.cancelled() => {
				tracing::info!("transport shutting down, no longer accepting connections");
				return Ok(());
			}
			accepted = listener.accept() => {
				match accepted {
					Ok((stream, _addr)) => {
						let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
						let broker = broker.clone();
						let shutdown = shutdown.clone();
						tokio::spawn(async move {
							handle_connection(id, stream, broker, shutdown).await;
						});
					}
					Err(e) => {
						tracing::error!(error = %e, "failed to accept connection");
					}
				}
			}
		}
	}
}

/// Drives one client connection until it disconnects or the broker shuts down.
async fn handle_connection(id: ConnectionId, stream: UnixStream, broker: Arc<Broker>, shutdown: CancellationToken) {
	tracing::debug!(connection = id.0, "connection opened");
	let (mut reader, mut writer) = stream.into_split();
	let (outbound_tx, mut outbound_rx) = mpsc::channel::<IpcFrame>(OUTBOUND_CAP);

	let writer_task = tokio::spawn(async move {
		while let Some(frame) = outbound_rx.recv().await {
			if write_frame(&mut writer, &frame).await.is_err() {
				break;
			}
		}
	});

	let mut subscribed = false;
	loop {
		tokio::select! {
			() = shutdown.cancelled() => break,
			frame = read_frame::<_, IpcFrame>(&mut reader) => {
				match frame {
					Ok(Some(IpcFrame::Request(request))) => {
						let payload = request.payload;
						if matches!(payload, RequestPayload::Subscribe) && !subscribed {
							subscribed = true;
							spawn_subscription(id, broker.clone(), outbound_tx.clone());
						}
						let response = dispatch(&broker, payload).await;
						if outbound_tx
							.send(IpcFrame::Response(Response {
								request_id: request.id,
								payload: response.0,
								error: response.1,
							}))
							.await
							.is_err()
						{
							break;
						}
					}
					Ok(Some(_)) => {
						tracing::warn!(connection = id.0, "client sent a non-request frame");
					}
					Ok(None) => break,
					Err(e) => {
						tracing::warn!(connection = id.0, error = %e, "connection read error");
						break;
					}
				}
			}
		}
	}

	if subscribed {
		broker.hub.unregister(id).await;
	}
	drop(outbound_tx);
	let _ = writer_task.await;
	tracing::debug!(connection = id.0, "connection closed");
}

/// Registers this connection with the Hub and forwards every broadcast
/// notification, plus a periodic heartbeat, onto its outbound queue.
fn spawn_subscription(id: ConnectionId, broker: Arc<Broker>, outbound_tx: mpsc::Sender<IpcFrame>) {
	let (sink_tx, mut sink_rx) = mpsc::channel(64);
	tokio::spawn(async move {
		broker.hub.register(id, sink_tx).await;
	});

	tokio::spawn(async move {
		let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
		heartbeat.tick().await;
		loop {
			tokio::select! {
				notification = sink_rx.recv() => {
					match notification {
						Some(notification) => {
							if outbound_tx.send(IpcFrame::Event(Event::Notification(notification))).await.is_err() {
								return;
							}
						}
						None => return,
					}
				}
				_ = heartbeat.tick() => {
					if outbound_tx.send(IpcFrame::Event(Event::Heartbeat)).await.is_err() {
						return;
					}
				}
			}
		}
	});
}

/// Executes one decoded request against the broker, returning the
/// response payload (or an error code) to send back.
async fn dispatch(broker: &Broker, payload: RequestPayload) -> (Option<ResponsePayload>, Option<ErrorCode>) {
	match payload {
		RequestPayload::Ping => (Some(ResponsePayload::Pong), None),
		RequestPayload::SubmitExecution {
			notebook_key,
			cell_index,
			source,
			task_id,
		} => match broker.submit_execution(notebook_key, cell_index, source, task_id).await {
			Ok(task_id) => (Some(ResponsePayload::Submitted { task_id }), None),
			Err(e) => (None, Some(e.code())),
		},
		RequestPayload::CancelExecution { notebook_key, task_id } => {
			broker.cancel_execution(notebook_key, task_id).await;
			(Some(ResponsePayload::Ack), None)
		}
		RequestPayload::ExecutionStatus { task_id } => match broker.execution_status(task_id).await {
			Some(record) => (Some(ResponsePayload::Status(Box::new(record))), None),
			None => (None, Some(ErrorCode::NotFound)),
		},
		RequestPayload::ListActiveSessions => {
			let sessions = broker.list_active_sessions().await;
			(Some(ResponsePayload::Sessions(sessions)), None)
		}
		RequestPayload::InterruptKernel { notebook_key } => {
			broker.interrupt_kernel(notebook_key).await;
			(Some(ResponsePayload::Ack), None)
		}
		RequestPayload::ShutdownKernel { notebook_key } => {
			broker.shutdown_kernel(notebook_key).await;
			(Some(ResponsePayload::Ack), None)
		}
		RequestPayload::PruneUnusedAssets {
			notebook_key,
			referenced,
			dry_run,
		} => {
			let report = broker.prune_unused_assets(notebook_key, referenced, dry_run).await;
			(Some(ResponsePayload::Pruned(report)), None)
		}
		RequestPayload::FetchAsset { asset_path } => match broker.fetch_asset(asset_path).await {
			Ok((mime, bytes)) => (
				Some(ResponsePayload::Asset {
					mime,
					base64_bytes: BASE64.encode(bytes),
				}),
				None,
			),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => (None, Some(ErrorCode::NotFound)),
			Err(_) => (None, Some(ErrorCode::StorageFailure)),
		},
		RequestPayload::SubmitInput { notebook_key, value } => {
			broker.submit_input(notebook_key, value).await;
			(Some(ResponsePayload::Ack), None)
		}
		RequestPayload::Subscribe => (Some(ResponsePayload::Subscribed), None),
	}
}
