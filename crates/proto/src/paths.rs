//! Utilities for broker file paths and socket resolution.

use std::path::PathBuf;

/// Returns the default Unix socket path for the cellbroker daemon.
///
/// Prioritizes writable directories so the broker can bind its IPC socket
/// even in restricted or "homeless" environments (e.g. containers).
///
/// # Resolution order
///
/// 1. `CELLBROKER_SOCKET` environment variable.
/// 2. System runtime directory (e.g. `$XDG_RUNTIME_DIR`).
/// 3. System temp directory (e.g. `/tmp`).
///
/// The default file name is `cellbroker.sock`.
#[must_use]
pub fn default_socket_path() -> PathBuf {
	if let Ok(p) = std::env::var("CELLBROKER_SOCKET") {
		return PathBuf::from(p);
	}

	dirs::runtime_dir()
		.filter(|p| std::fs::create_dir_all(p).is_ok())
		.unwrap_or_else(std::env::temp_dir)
		.join("cellbroker.sock")
}

/// Returns the default data directory for the journal and offloaded assets.
///
/// # Resolution order
///
/// 1. `DATA_DIR` environment variable.
/// 2. The platform data directory (e.g. `$XDG_DATA_HOME/cellbroker`).
/// 3. System temp directory, suffixed `cellbroker`.
#[must_use]
pub fn default_data_dir() -> PathBuf {
	if let Ok(p) = std::env::var("DATA_DIR") {
		return PathBuf::from(p);
	}

	dirs::data_dir()
		.map(|p| p.join("cellbroker"))
		.filter(|p| std::fs::create_dir_all(p).is_ok())
		.unwrap_or_else(|| std::env::temp_dir().join("cellbroker"))
}
