//! Durable Store (component A): an append-only, crash-safe journal of
//! executions and asset leases, backed by a single SQLite file in WAL
//! mode. This is the recovery source of truth after a process restart.

mod schema;

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::{mpsc, oneshot};

use cellbroker_proto::types::{AssetPath, ExecutionRecord, ExecutionStatus, NotebookKey, TaskId};

use crate::error::StoreError;

/// Commands accepted by the store actor. Every variant that can fail
/// carries a `oneshot::Sender` for its result.
enum StoreCmd {
	Enqueue {
		record: ExecutionRecord,
		reply: oneshot::Sender<Result<(), StoreError>>,
	},
	MarkStarted {
		task_id: TaskId,
		when: i64,
		reply: oneshot::Sender<Result<(), StoreError>>,
	},
	MarkTerminal {
		task_id: TaskId,
		status: ExecutionStatus,
		when: i64,
		error_message: Option<String>,
		reply: oneshot::Sender<Result<(), StoreError>>,
	},
	Get {
		task_id: TaskId,
		reply: oneshot::Sender<Option<ExecutionRecord>>,
	},
	LoadNonterminal {
		reply: oneshot::Sender<Vec<ExecutionRecord>>,
	},
	RenewAssetLease {
		asset_path: AssetPath,
		notebook_key: NotebookKey,
		ttl: Duration,
		mime: String,
		reply: oneshot::Sender<Result<(), StoreError>>,
	},
	ExpiredAssets {
		notebook_key: NotebookKey,
		reply: oneshot::Sender<Vec<AssetPath>>,
	},
	HasUnexpiredLease {
		asset_path: AssetPath,
		reply: oneshot::Sender<bool>,
	},
	AssetMime {
		asset_path: AssetPath,
		reply: oneshot::Sender<Option<String>>,
	},
	DropAsset {
		asset_path: AssetPath,
		reply: oneshot::Sender<Result<(), StoreError>>,
	},
	CleanupCompleted {
		older_than: Duration,
		reply: oneshot::Sender<Result<usize, StoreError>>,
	},
}

/// Cloneable handle to the durable store actor.
#[derive(Clone)]
pub struct StoreHandle {
	tx: mpsc::Sender<StoreCmd>,
}

impl StoreHandle {
	/// Durably records a new execution in `Pending` status. On successful
	/// return the caller may acknowledge the submitting client.
	pub async fn enqueue(&self, record: ExecutionRecord) -> Result<(), StoreError> {
		self.call(|reply| StoreCmd::Enqueue { record, reply }).await
	}

	/// Transitions a record to `Running`.
	pub async fn mark_started(&self, task_id: TaskId, when: i64) -> Result<(), StoreError> {
		self.call(|reply| StoreCmd::MarkStarted { task_id, when, reply }).await
	}

	/// Transitions a record to a terminal status. Idempotent: re-applying
	/// the same terminal status is a no-op.
	pub async fn mark_terminal(
		&self,
		task_id: TaskId,
		status: ExecutionStatus,
		when: i64,
		error_message: Option<String>,
	) -> Result<(), StoreError> {
		self.call(|reply| StoreCmd::MarkTerminal {
			task_id,
			status,
			when,
			error_message,
			reply,
		})
		.await
	}

	/// Fetches a point-in-time snapshot of one execution.
	pub async fn get(&self, task_id: TaskId) -> Option<ExecutionRecord> {
		let (reply, rx) = oneshot::channel();
		if self.tx.send(StoreCmd::Get { task_id, reply }).await.is_err() {
			return None;
		}
		rx.await.unwrap_or(None)
	}

	/// Returns every `Pending`/`Running` row, ordered by creation time.
	/// Called once at startup to drive recovery.
	pub async fn load_nonterminal(&self) -> Vec<ExecutionRecord> {
		let (reply, rx) = oneshot::channel();
		if self.tx.send(StoreCmd::LoadNonterminal { reply }).await.is_err() {
			return Vec::new();
		}
		rx.await.unwrap_or_default()
	}

	/// Renews (or creates) an asset's lease.
	pub async fn renew_asset_lease(
		&self,
		asset_path: AssetPath,
		notebook_key: NotebookKey,
		ttl: Duration,
		mime: String,
	) -> Result<(), StoreError> {
		self.call(|reply| StoreCmd::RenewAssetLease {
			asset_path,
			notebook_key,
			ttl,
			mime,
			reply,
		})
		.await
	}

	/// Lists assets owned by `notebook_key` whose lease has expired.
	pub async fn expired_assets(&self, notebook_key: NotebookKey) -> Vec<AssetPath> {
		let (reply, rx) = oneshot::channel();
		if self
			.tx
			.send(StoreCmd::ExpiredAssets { notebook_key, reply })
			.await
			.is_err()
		{
			return Vec::new();
		}
		rx.await.unwrap_or_default()
	}

	/// True iff `asset_path` has any unexpired lease (invariant I3 check).
	pub async fn has_unexpired_lease(&self, asset_path: AssetPath) -> bool {
		let (reply, rx) = oneshot::channel();
		if self
			.tx
			.send(StoreCmd::HasUnexpiredLease { asset_path, reply })
			.await
			.is_err()
		{
			return false;
		}
		rx.await.unwrap_or(false)
	}

	/// Fetches the mime type recorded when the asset's lease was created,
	/// without touching lease state.
	pub async fn asset_mime(&self, asset_path: AssetPath) -> Option<String> {
		let (reply, rx) = oneshot::channel();
		if self
			.tx
			.send(StoreCmd::AssetMime { asset_path, reply })
			.await
			.is_err()
		{
			return None;
		}
		rx.await.unwrap_or(None)
	}

	/// Drops a lease row (the file itself is removed by the caller).
	pub async fn drop_asset(&self, asset_path: AssetPath) -> Result<(), StoreError> {
		self.call(|reply| StoreCmd::DropAsset { asset_path, reply }).await
	}

	/// Purges terminal-state rows older than `older_than`. Not run on any
	/// autonomous schedule by this crate; an operator-invoked maintenance
	/// operation only.
	pub async fn cleanup_completed(&self, older_than: Duration) -> Result<usize, StoreError> {
		let (reply, rx) = oneshot::channel();
		if self
			.tx
			.send(StoreCmd::CleanupCompleted { older_than, reply })
			.await
			.is_err()
		{
			return Err(StoreError::ShutDown);
		}
		rx.await.map_err(|_| StoreError::ShutDown)?
	}

	async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<Result<T, StoreError>>) -> StoreCmd) -> Result<T, StoreError> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(build(reply))
			.await
			.map_err(|_| StoreError::ShutDown)?;
		rx.await.map_err(|_| StoreError::ShutDown)?
	}
}

/// Actor owning the SQLite connection. Runs on a dedicated OS thread
/// since `rusqlite` is a synchronous API; the public handle above is
/// `async fn` throughout so callers never need to know that.
pub struct StoreService;

impl StoreService {
	/// Opens (creating if absent) the journal at `path`, runs pending
	/// migrations, and spawns the actor thread.
	pub fn start(path: &Path) -> rusqlite::Result<StoreHandle> {
		if let Some(parent) = path.parent() {
			let _ = std::fs::create_dir_all(parent);
		}
		let mut conn = Connection::open(path)?;
		schema::migrate(&mut conn)?;

		let (tx, rx) = mpsc::channel(256);
		std::thread::Builder::new()
			.name("cellbroker-store".into())
			.spawn(move || Self::run(conn, rx))
			.expect("failed to spawn store thread");

		Ok(StoreHandle { tx })
	}

	fn run(conn: Connection, mut rx: mpsc::Receiver<StoreCmd>) {
		while let Some(cmd) = rx.blocking_recv() {
			if let Err(e) = Self::handle(&conn, cmd) {
				tracing::error!(error = %e, "store command failed");
			}
		}
		tracing::info!("store actor shutting down");
	}

	fn handle(conn: &Connection, cmd: StoreCmd) -> rusqlite::Result<()> {
		match cmd {
			StoreCmd::Enqueue { record, reply } => {
				let result = enqueue(conn, &record);
				let _ = reply.send(result);
			}
			StoreCmd::MarkStarted { task_id, when, reply } => {
				let result = mark_started(conn, &task_id, when);
				let _ = reply.send(result);
			}
			StoreCmd::MarkTerminal {
				task_id,
				status,
				when,
				error_message,
				reply,
			} => {
				let result = mark_terminal(conn, &task_id, status, when, error_message);
				let _ = reply.send(result);
			}
			StoreCmd::Get { task_id, reply } => {
				let _ = reply.send(get(conn, &task_id).ok().flatten());
			}
			StoreCmd::LoadNonterminal { reply } => {
				let _ = reply.send(load_nonterminal(conn).unwrap_or_default());
			}
			StoreCmd::RenewAssetLease {
				asset_path,
				notebook_key,
				ttl,
				mime,
				reply,
			} => {
				let result = renew_lease(conn, &asset_path, &notebook_key, ttl, &mime);
				let _ = reply.send(result);
			}
			StoreCmd::ExpiredAssets { notebook_key, reply } => {
				let _ = reply.send(expired_assets(conn, &notebook_key).unwrap_or_default());
			}
			StoreCmd::HasUnexpiredLease { asset_path, reply } => {
				let _ = reply.send(has_unexpired_lease(conn, &asset_path).unwrap_or(false));
			}
			StoreCmd::AssetMime { asset_path, reply } => {
				let _ = reply.send(asset_mime(conn, &asset_path).unwrap_or(None));
			}
			StoreCmd::DropAsset { asset_path, reply } => {
				let result = drop_asset(conn, &asset_path);
				let _ = reply.send(result);
			}
			StoreCmd::CleanupCompleted { older_than, reply } => {
				let result = cleanup_completed(conn, older_than);
				let _ = reply.send(result);
			}
		}
		Ok(())
	}
}

fn now_millis() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

fn status_str(status: ExecutionStatus) -> &'static str {
	match status {
		ExecutionStatus::Pending => "pending",
		ExecutionStatus::Running => "running",
		ExecutionStatus::Completed => "completed",
		ExecutionStatus::Failed => "failed",
		ExecutionStatus::Cancelled => "cancelled",
		ExecutionStatus::Timeout => "timeout",
	}
}

fn status_from_str(s: &str) -> ExecutionStatus {
	match s {
		"pending" => ExecutionStatus::Pending,
		"running" => ExecutionStatus::Running,
		"completed" => ExecutionStatus::Completed,
		"failed" => ExecutionStatus::Failed,
		"cancelled" => ExecutionStatus::Cancelled,
		"timeout" => ExecutionStatus::Timeout,
		other => unreachable!("unknown status in journal: {other}"),
	}
}

fn enqueue(conn: &Connection, record: &ExecutionRecord) -> Result<(), StoreError> {
	let existing: Option<i64> = conn
		.query_row("SELECT 1 FROM executions WHERE task_id = ?1", [&record.task_id.0], |r| r.get(0))
		.optional()?;
	if existing.is_some() {
		return Err(StoreError::DuplicateId);
	}
	conn.execute(
		"INSERT INTO executions (task_id, notebook_key, cell_index, source, status, created_at, retries)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
		params![
			record.task_id.0,
			record.notebook_key.0,
			record.cell_index,
			record.source,
			status_str(record.status),
			record.created_at,
		],
	)?;
	Ok(())
}

fn mark_started(conn: &Connection, task_id: &TaskId, when: i64) -> Result<(), StoreError> {
	// Accepts 'running' as a source state too, so that restoring a record
	// left 'running' by a prior process crash can be safely re-dispatched
	// without first forcing it back through 'pending'.
	let rows = conn.execute(
		"UPDATE executions SET status = 'running', started_at = ?2
		 WHERE task_id = ?1 AND status IN ('pending', 'running')",
		params![task_id.0, when],
	)?;
	if rows == 0 {
		return match get(conn, task_id)? {
			Some(existing) if existing.status.is_terminal() => Err(StoreError::IllegalTransition),
			Some(_) => Ok(()),
			None => Err(StoreError::IllegalTransition),
		};
	}
	Ok(())
}

fn mark_terminal(
	conn: &Connection,
	task_id: &TaskId,
	status: ExecutionStatus,
	when: i64,
	error_message: Option<String>,
) -> Result<(), StoreError> {
	if let Some(existing) = get(conn, task_id)? {
		if existing.status.is_terminal() {
			// Idempotent: repeated terminal transitions are a no-op.
			return Ok(());
		}
	}
	conn.execute(
		"UPDATE executions SET status = ?2, completed_at = ?3, error_message = ?4
		 WHERE task_id = ?1",
		params![task_id.0, status_str(status), when, error_message],
	)?;
	Ok(())
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ExecutionRecord> {
	Ok(ExecutionRecord {
		task_id: TaskId(row.get(0)?),
		notebook_key: NotebookKey(row.get(1)?),
		cell_index: row.get(2)?,
		source: row.get(3)?,
		status: status_from_str(&row.get::<_, String>(4)?),
		created_at: row.get(5)?,
		started_at: row.get(6)?,
		completed_at: row.get(7)?,
		error_message: row.get(8)?,
		retries: row.get::<_, i64>(9)? as u32,
	})
}

const RECORD_COLUMNS: &str =
	"task_id, notebook_key, cell_index, source, status, created_at, started_at, completed_at, error_message, retries";

fn get(conn: &Connection, task_id: &TaskId) -> rusqlite::Result<Option<ExecutionRecord>> {
	conn.query_row(
		&format!("SELECT {RECORD_COLUMNS} FROM executions WHERE task_id = ?1"),
		[&task_id.0],
		row_to_record,
	)
	.optional()
}

fn load_nonterminal(conn: &Connection) -> rusqlite::Result<Vec<ExecutionRecord>> {
	let mut stmt = conn.prepare(&format!(
		"SELECT {RECORD_COLUMNS} FROM executions WHERE status IN ('pending', 'running') ORDER BY created_at ASC"
	))?;
	let rows = stmt.query_map([], row_to_record)?;
	rows.collect()
}

fn renew_lease(
	conn: &Connection,
	asset_path: &AssetPath,
	notebook_key: &NotebookKey,
	ttl: Duration,
	mime: &str,
) -> Result<(), StoreError> {
	let now = now_millis();
	let expires = now + ttl.as_millis() as i64;
	conn.execute(
		"INSERT INTO asset_leases (asset_path, notebook_key, mime, created_at, last_seen, lease_expires)
		 VALUES (?1, ?2, ?3, ?4, ?4, ?5)
		 ON CONFLICT(asset_path) DO UPDATE SET last_seen = ?4, lease_expires = ?5",
		params![asset_path.0, notebook_key.0, mime, now, expires],
	)?;
	Ok(())
}

fn expired_assets(conn: &Connection, notebook_key: &NotebookKey) -> rusqlite::Result<Vec<AssetPath>> {
	let now = now_millis();
	let mut stmt = conn.prepare(
		"SELECT asset_path FROM asset_leases WHERE notebook_key = ?1 AND lease_expires < ?2",
	)?;
	let rows = stmt.query_map(params![notebook_key.0, now], |r| r.get::<_, String>(0).map(AssetPath))?;
	rows.collect()
}

fn has_unexpired_lease(conn: &Connection, asset_path: &AssetPath) -> rusqlite::Result<bool> {
	let now = now_millis();
	let expires: Option<i64> = conn
		.query_row(
			"SELECT lease_expires FROM asset_leases WHERE asset_path = ?1",
			[&asset_path.0],
			|r| r.get(0),
		)
		.optional()?;
	Ok(expires.is_some_and(|e| e >= now))
}

fn asset_mime(conn: &Connection, asset_path: &AssetPath) -> rusqlite::Result<Option<String>> {
	conn.query_row(
		"SELECT mime FROM asset_leases WHERE asset_path = ?1",
		[&asset_path.0],
		|r| r.get(0),
	)
	.optional()
}

fn drop_asset(conn: &Connection, asset_path: &AssetPath) -> Result<(), StoreError> {
	conn.execute("DELETE FROM asset_leases WHERE asset_path = ?1", [&asset_path.0])?;
	Ok(())
}

fn cleanup_completed(conn: &Connection, older_than: Duration) -> Result<usize, StoreError> {
	let cutoff = now_millis() - older_than.as_millis() as i64;
	let rows = conn.execute(
		"DELETE FROM executions WHERE status NOT IN ('pending', 'running') AND completed_at < ?1",
		params![cutoff],
	)?;
	Ok(rows)
}
