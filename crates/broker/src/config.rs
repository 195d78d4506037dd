//! Configuration surface: compiled-in defaults, overridable by environment.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for a [`Broker`](crate::runtime::Broker).
///
/// Constructed from (in increasing precedence) compiled-in defaults and
/// environment variables. The binary crate layers CLI flags on top via
/// its own `Args` struct.
#[derive(Debug, Clone)]
pub struct Config {
	/// Parent directory of the journal file and `assets/`.
	pub data_dir: PathBuf,
	/// Soft cap on concurrently live kernels.
	pub max_kernels: usize,
	/// Advisory per-kernel memory limit, in bytes.
	pub memory_limit_bytes_per_kernel: u64,
	/// Default per-execution wait timeout.
	pub default_timeout: Duration,
	/// Grace period the reaper watchdog allows a kernel to go without a
	/// liveness heartbeat before declaring it unresponsive.
	pub kernel_liveness_grace: Duration,
	/// Default asset lease TTL.
	pub asset_max_age: Duration,
	/// Capacity of the per-kernel-message orphan ring.
	pub orphan_ring: usize,
	/// Soft cap on a per-notebook submission channel; submissions above
	/// this are rejected synchronously with `ResourceExhausted`.
	pub submission_queue_cap: usize,
	/// Bearer token clients must present; auto-generated if absent.
	pub session_token: String,
	/// Executable used to start a kernel subprocess for a notebook.
	pub kernel_command: String,
	/// Arguments passed to `kernel_command`.
	pub kernel_args: Vec<String>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			data_dir: cellbroker_proto::paths::default_data_dir(),
			max_kernels: 10,
			memory_limit_bytes_per_kernel: 0,
			default_timeout: Duration::from_secs(300),
			kernel_liveness_grace: Duration::from_secs(30),
			asset_max_age: Duration::from_secs(24 * 3600),
			orphan_ring: 1000,
			submission_queue_cap: 256,
			session_token: uuid::Uuid::new_v4().to_string(),
			kernel_command: std::env::var("CELLBROKER_KERNEL_CMD").unwrap_or_else(|_| "cellkernel".to_string()),
			kernel_args: Vec::new(),
		}
	}
}

impl Config {
	/// Builds configuration from compiled-in defaults overridden by
	/// environment variables, matching the names in the broker's
	/// external configuration surface.
	#[must_use]
	pub fn from_env() -> Self {
		let mut cfg = Self::default();

		if let Ok(v) = std::env::var("DATA_DIR") {
			cfg.data_dir = PathBuf::from(v);
		}
		if let Some(v) = env_usize("MAX_KERNELS") {
			cfg.max_kernels = v;
		}
		if let Some(v) = env_u64("MEMORY_LIMIT_BYTES_PER_KERNEL") {
			cfg.memory_limit_bytes_per_kernel = v;
		}
		if let Some(v) = env_u64("DEFAULT_TIMEOUT") {
			cfg.default_timeout = Duration::from_secs(v);
		}
		if let Some(v) = env_u64("KERNEL_LIVENESS_GRACE") {
			cfg.kernel_liveness_grace = Duration::from_secs(v);
		}
		if let Some(v) = env_u64("ASSET_MAX_AGE_HOURS") {
			cfg.asset_max_age = Duration::from_secs(v * 3600);
		}
		if let Some(v) = env_usize("ORPHAN_RING") {
			cfg.orphan_ring = v;
		}
		if let Some(v) = env_usize("SUBMISSION_QUEUE_CAP") {
			cfg.submission_queue_cap = v;
		}
		if let Ok(v) = std::env::var("SESSION_TOKEN") {
			cfg.session_token = v;
		}
		if let Ok(v) = std::env::var("CELLBROKER_KERNEL_CMD") {
			cfg.kernel_command = v;
		}

		cfg
	}

	/// Path to the SQLite journal file under `data_dir`.
	#[must_use]
	pub fn journal_path(&self) -> PathBuf {
		self.data_dir.join("cellbroker.sqlite3")
	}

	/// Path to the directory holding offloaded asset blobs.
	#[must_use]
	pub fn assets_dir(&self) -> PathBuf {
		self.data_dir.join("assets")
	}
}

fn env_usize(key: &str) -> Option<usize> {
	std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
	std::env::var(key).ok().and_then(|v| v.parse().ok())
}
