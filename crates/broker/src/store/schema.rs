//! Forward-only schema migrations, applied once at startup inside a
//! single transaction gated by a `schema_version` table.

use rusqlite::Connection;

const MIGRATIONS: &[&str] = &[
	r#"
	CREATE TABLE executions (
		task_id        TEXT PRIMARY KEY,
		notebook_key   TEXT NOT NULL,
		cell_index     INTEGER NOT NULL,
		source         TEXT NOT NULL,
		status         TEXT NOT NULL,
		created_at     INTEGER NOT NULL,
		started_at     INTEGER,
		completed_at   INTEGER,
		error_message  TEXT,
		retries        INTEGER NOT NULL DEFAULT 0
	);
	CREATE INDEX idx_executions_notebook ON executions(notebook_key);
	CREATE INDEX idx_executions_status ON executions(status);

	CREATE TABLE asset_leases (
		asset_path     TEXT PRIMARY KEY,
		notebook_key   TEXT NOT NULL,
		mime           TEXT NOT NULL,
		created_at     INTEGER NOT NULL,
		last_seen      INTEGER NOT NULL,
		lease_expires  INTEGER NOT NULL
	);
	CREATE INDEX idx_leases_notebook ON asset_leases(notebook_key);
	"#,
];

/// Applies every migration not yet recorded in `schema_version`, inside a
/// single exclusive transaction.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<()> {
	conn.pragma_update(None, "journal_mode", "WAL")?;
	conn.pragma_update(None, "synchronous", "FULL")?;
	conn.execute(
		"CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
		[],
	)?;

	let current: i64 = conn
		.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))
		.unwrap_or(0);

	let tx = conn.transaction()?;
	for (i, migration) in MIGRATIONS.iter().enumerate() {
		let version = i as i64 + 1;
		if version <= current {
			continue;
		}
		tx.execute_batch(migration)?;
		tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
	}
	tx.commit()
}
