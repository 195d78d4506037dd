//! An asset with an unexpired lease, or present in the caller's
//! referenced set, is never deleted by `prune` — even when it races
//! against the lease boundary. Lease expiry is wall-clock-based (the
//! store stamps real timestamps), so this test runs on real time rather
//! than a paused clock.

mod helpers;

use std::time::Duration;

use cellbroker::services::gc::GcService;
use cellbroker_proto::types::AssetPath;

use helpers::notebook;

#[tokio::test]
async fn referenced_or_unexpired_assets_survive_prune() {
	let data_dir = tempfile::tempdir().expect("tempdir");
	let assets_dir = data_dir.path().join("assets");
	std::fs::create_dir_all(&assets_dir).expect("assets dir");

	let journal_path = data_dir.path().join("journal.sqlite3");
	let store = cellbroker::store::StoreService::start(&journal_path).expect("store starts");
	let gc = GcService::start(store.clone(), assets_dir.clone());

	let nb = notebook("/tmp/race.ipynb");

	let short_lived = AssetPath("short.png".to_string());
	std::fs::write(assets_dir.join(&short_lived.0), b"short").unwrap();
	gc.note_created(short_lived.clone(), nb.clone(), Duration::from_millis(20), "image/png".to_string())
		.await
		.expect("note_created short");

	let long_lived = AssetPath("long.png".to_string());
	std::fs::write(assets_dir.join(&long_lived.0), b"long").unwrap();
	gc.note_created(long_lived.clone(), nb.clone(), Duration::from_secs(10), "image/png".to_string())
		.await
		.expect("note_created long");

	// Still referenced: a prune right away must renew, not delete, even
	// though its ttl is tiny.
	let report = gc.prune(nb.clone(), vec![short_lived.clone()], false).await;
	assert!(report.deleted.is_empty());
	assert_eq!(report.renewed, vec![short_lived.clone()]);
	assert!(assets_dir.join(&short_lived.0).exists());

	// Not referenced, but its lease has not expired yet: must survive.
	let report = gc.prune(nb.clone(), vec![], false).await;
	assert!(
		!report.deleted.contains(&long_lived),
		"an asset with an unexpired lease must never be deleted: {report:?}"
	);
	assert!(assets_dir.join(&long_lived.0).exists());

	// The short-lived asset's renewed lease (20ms) has now had time to
	// expire, and it is no longer referenced: this prune should reclaim it.
	tokio::time::sleep(Duration::from_millis(60)).await;
	let report = gc.prune(nb, vec![], false).await;
	assert!(report.deleted.contains(&short_lived), "expired unreferenced asset should be reclaimed: {report:?}");
	assert!(!assets_dir.join(&short_lived.0).exists());
	assert!(!report.deleted.contains(&long_lived));
	assert!(assets_dir.join(&long_lived.0).exists());
}
