//! Common test utilities shared by every scenario test file.

use std::sync::Arc;
use std::time::Duration;

use cellbroker::launcher::test_helpers::{FakeKernelHandle, TestLauncher};
use cellbroker::{Broker, Config};
use cellbroker_proto::types::NotebookKey;

/// A broker wired with an in-process [`TestLauncher`] instead of a real
/// kernel subprocess, backed by a fresh temporary data directory.
pub struct TestBroker {
	pub broker: Arc<Broker>,
	pub launcher: TestLauncher,
	_data_dir: tempfile::TempDir,
}

impl TestBroker {
	/// Builds a broker with short timeouts suitable for `start_paused`
	/// tests driven by `tokio::time::advance`.
	pub fn new() -> Self {
		Self::with_config(|_| {})
	}

	/// Like [`TestBroker::new`], but lets the caller tweak the config
	/// before the broker is constructed.
	pub fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
		let data_dir = tempfile::tempdir().expect("tempdir");
		let mut cfg = Config {
			data_dir: data_dir.path().to_path_buf(),
			submission_queue_cap: 8,
			default_timeout: Duration::from_secs(30),
			asset_max_age: Duration::from_secs(3600),
			orphan_ring: 16,
			..Config::default()
		};
		tweak(&mut cfg);

		let launcher = TestLauncher::new();
		let broker = Broker::with_launcher(cfg, Arc::new(launcher.clone())).expect("broker construction");

		Self {
			broker,
			launcher,
			_data_dir: data_dir,
		}
	}

	/// Retrieves the fake kernel for `notebook_key`, waiting briefly for
	/// the supervisor to have finished launching it.
	pub async fn fake_kernel(&self, notebook_key: &NotebookKey) -> FakeKernelHandle {
		for _ in 0..200 {
			if let Some(handle) = self.launcher.get(notebook_key) {
				return handle;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		panic!("kernel for {notebook_key} was never launched");
	}
}

pub fn notebook(name: &str) -> NotebookKey {
	NotebookKey(name.to_string())
}
