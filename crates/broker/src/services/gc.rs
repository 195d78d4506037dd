//! Asset Garbage Collector (component F): lease-based reclamation of
//! large outputs offloaded to disk. Deletion only ever happens on an
//! explicit client-triggered `prune`, never on an autonomous sweep.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use cellbroker_proto::types::{AssetPath, NotebookKey, PruneReport};

use crate::error::StoreError;
use crate::store::StoreHandle;

enum GcCmd {
	NoteCreated {
		asset_path: AssetPath,
		notebook_key: NotebookKey,
		ttl: Duration,
		mime: String,
		reply: oneshot::Sender<Result<(), StoreError>>,
	},
	Prune {
		notebook_key: NotebookKey,
		referenced: Vec<AssetPath>,
		dry_run: bool,
		reply: oneshot::Sender<PruneReport>,
	},
	FetchAsset {
		asset_path: AssetPath,
		reply: oneshot::Sender<std::io::Result<(String, Vec<u8>)>>,
	},
}

/// Cloneable handle to the asset garbage collector actor.
#[derive(Clone)]
pub struct GcHandle {
	tx: mpsc::Sender<GcCmd>,
}

impl GcHandle {
	/// Renews (or creates) a lease for a newly written asset.
	pub async fn note_created(
		&self,
		asset_path: AssetPath,
		notebook_key: NotebookKey,
		ttl: Duration,
		mime: String,
	) -> Result<(), StoreError> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(GcCmd::NoteCreated {
				asset_path,
				notebook_key,
				ttl,
				mime,
				reply,
			})
			.await
			.map_err(|_| StoreError::ShutDown)?;
		rx.await.map_err(|_| StoreError::ShutDown)?
	}

	/// Renews leases for every asset in `referenced`; deletes (or, under
	/// `dry_run`, only reports) every other asset owned by `notebook_key`
	/// whose lease has expired.
	pub async fn prune(&self, notebook_key: NotebookKey, referenced: Vec<AssetPath>, dry_run: bool) -> PruneReport {
		let (reply, rx) = oneshot::channel();
		if self
			.tx
			.send(GcCmd::Prune {
				notebook_key,
				referenced,
				dry_run,
				reply,
			})
			.await
			.is_err()
		{
			return PruneReport::default();
		}
		rx.await.unwrap_or_default()
	}

	/// Reads an asset's bytes and recorded mime type. Does not touch lease state.
	pub async fn fetch_asset(&self, asset_path: AssetPath) -> std::io::Result<(String, Vec<u8>)> {
		let (reply, rx) = oneshot::channel();
		self.tx
			.send(GcCmd::FetchAsset { asset_path, reply })
			.await
			.map_err(|_| std::io::Error::other("gc actor is shut down"))?;
		rx.await.map_err(|_| std::io::Error::other("gc actor is shut down"))?
	}
}

/// Actor fronting the durable lease table and the on-disk `assets/` directory.
pub struct GcService {
	rx: mpsc::Receiver<GcCmd>,
	store: StoreHandle,
	assets_dir: PathBuf,
}

impl GcService {
	/// Spawns the asset GC actor task.
	pub fn start(store: StoreHandle, assets_dir: PathBuf) -> GcHandle {
		let (tx, rx) = mpsc::channel(128);
		let service = Self { rx, store, assets_dir };
		tokio::spawn(service.run());
		GcHandle { tx }
	}

	async fn run(mut self) {
		while let Some(cmd) = self.rx.recv().await {
			match cmd {
				GcCmd::NoteCreated {
					asset_path,
					notebook_key,
					ttl,
					mime,
					reply,
				} => {
					let result = self.store.renew_asset_lease(asset_path, notebook_key, ttl, mime).await;
					let _ = reply.send(result);
				}
				GcCmd::Prune {
					notebook_key,
					referenced,
					dry_run,
					reply,
				} => {
					let report = self.prune(notebook_key, referenced, dry_run).await;
					let _ = reply.send(report);
				}
				GcCmd::FetchAsset { asset_path, reply } => {
					let result = self.fetch_asset(&asset_path).await;
					let _ = reply.send(result);
				}
			}
		}
	}

	async fn prune(&self, notebook_key: NotebookKey, referenced: Vec<AssetPath>, dry_run: bool) -> PruneReport {
		let mut report = PruneReport {
			dry_run,
			..Default::default()
		};

		for asset_path in &referenced {
			// Renews with a generous default window so a referenced asset
			// never goes stale between prunes. `mime` is only honored on
			// first insert (see `store::renew_lease`'s ON CONFLICT clause),
			// so an empty string here is inert for an existing lease row.
			if let Err(e) = self
				.store
				.renew_asset_lease(
					asset_path.clone(),
					notebook_key.clone(),
					DEFAULT_RENEWAL,
					String::new(),
				)
				.await
			{
				tracing::warn!(asset = %asset_path, error = %e, "failed to renew asset lease");
				continue;
			}
			report.renewed.push(asset_path.clone());
		}

		let expired = self.store.expired_assets(notebook_key.clone()).await;
		for asset_path in expired {
			if referenced.contains(&asset_path) {
				// Already renewed above; an expired row can still appear
				// here if renewal raced with this read.
				continue;
			}
			if self.store.has_unexpired_lease(asset_path.clone()).await {
				continue;
			}
			if dry_run {
				report.deleted.push(asset_path);
				continue;
			}
			let path = self.assets_dir.join(&asset_path.0);
			match std::fs::remove_file(&path) {
				Ok(()) => {
					if let Err(e) = self.store.drop_asset(asset_path.clone()).await {
						tracing::warn!(asset = %asset_path, error = %e, "failed to drop asset lease row after deleting file");
					}
					report.deleted.push(asset_path);
				}
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
					if let Err(e) = self.store.drop_asset(asset_path.clone()).await {
						tracing::warn!(asset = %asset_path, error = %e, "failed to drop asset lease row for already-missing file");
					}
					report.deleted.push(asset_path);
				}
				Err(e) => {
					tracing::warn!(asset = %asset_path, error = %e, "failed to delete asset file; lease retained for next prune");
				}
			}
		}

		report
	}

	async fn fetch_asset(&self, asset_path: &AssetPath) -> std::io::Result<(String, Vec<u8>)> {
		let path = self.assets_dir.join(&asset_path.0);
		let bytes = std::fs::read(&path)?;
		let mime = self
			.store
			.asset_mime(asset_path.clone())
			.await
			.unwrap_or_else(|| "application/octet-stream".to_string());
		Ok((mime, bytes))
	}
}

const DEFAULT_RENEWAL: Duration = Duration::from_secs(24 * 3600);
