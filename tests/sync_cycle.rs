//! Full download / stale / conflict / push cycle against a cloud-sync
//! folder backend rooted in a temp directory.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use refcache::{
    AttachmentKey, AttachmentRecord, CacheStore, CloudSyncTransport, ConflictChoice, CopyKind,
    JobState, LinkMode, SyncConfig, SyncError, SyncFacade, SyncState, Transport,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "refcache=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn record(key: &str, filename: &str) -> AttachmentRecord {
    AttachmentRecord {
        key: AttachmentKey::from(key),
        library_id: 7,
        link_mode: LinkMode::ImportedFile,
        content_type: "application/pdf".to_string(),
        filename: filename.to_string(),
        charset: None,
        url: None,
        size_bytes: 0,
        server_version: None,
    }
}

fn seed_remote(dir: &Path, rec: &AttachmentRecord, contents: &[u8]) {
    let path = dir.join(rec.key.as_str()).join(&rec.filename);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn read_remote(dir: &Path, rec: &AttachmentRecord) -> Vec<u8> {
    std::fs::read(dir.join(rec.key.as_str()).join(&rec.filename)).unwrap()
}

fn build_facade(remote: &Path, cache_dir: &Path) -> SyncFacade {
    let transport = Transport::CloudSync(CloudSyncTransport::new(remote));
    let cache = Arc::new(CacheStore::with_dir(cache_dir).unwrap());
    SyncFacade::new(SyncConfig::default(), transport, cache)
}

#[tokio::test]
async fn download_stale_redownload_cycle() -> Result<()> {
    init_logging();
    let remote = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let facade = build_facade(remote.path(), cache.path());
    let rec = record("CYCLE1", "paper.pdf");

    // First fetch: missing -> completed -> up to date
    seed_remote(remote.path(), &rec, b"version one");
    let status = facade.state(&rec, CopyKind::Original).await?;
    assert_eq!(status.classification, SyncState::Missing);

    let done = facade.download(&rec)?.wait().await;
    let path = match done.state {
        JobState::Completed(path) => path,
        other => panic!("unexpected state: {:?}", other),
    };
    assert_eq!(std::fs::read(&path)?, b"version one");
    facade.mark_opened(&rec);

    let status = facade.state(&rec, CopyKind::Original).await?;
    assert_eq!(status.classification, SyncState::UpToDate);

    // Remote advances: stale after an explicit refresh, and a
    // re-download picks up the new bytes
    seed_remote(remote.path(), &rec, b"version two");
    facade.refresh_remote(&rec);
    let status = facade.state(&rec, CopyKind::Original).await?;
    assert_eq!(status.classification, SyncState::Stale);

    let done = facade.download(&rec)?.wait().await;
    assert!(matches!(done.state, JobState::Completed(_)));
    assert_eq!(std::fs::read(&path)?, b"version two");

    let status = facade.state(&rec, CopyKind::Original).await?;
    assert_eq!(status.classification, SyncState::UpToDate);
    Ok(())
}

#[tokio::test]
async fn conflict_keep_local_pushes_the_edit() -> Result<()> {
    init_logging();
    let remote = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let facade = build_facade(remote.path(), cache.path());
    let rec = record("CONF1", "notes.pdf");

    seed_remote(remote.path(), &rec, b"original");
    let done = facade.download(&rec)?.wait().await;
    assert!(matches!(done.state, JobState::Completed(_)));

    // Local edit lands as the modified copy
    let edit = cache.path().join("annotated.pdf");
    std::fs::write(&edit, b"local annotations")?;
    facade.stage_modified(&rec, &edit)?;
    assert!(facade.file_exists(&rec, CopyKind::Modified));

    // Remote advances underneath the edit: conflict
    seed_remote(remote.path(), &rec, b"remote rewrite");
    facade.refresh_remote(&rec);
    let status = facade.state(&rec, CopyKind::Modified).await?;
    assert_eq!(status.classification, SyncState::Conflicted);

    // A plain upload is refused; explicit keep-local is admitted
    assert!(matches!(
        facade.upload(&rec).await,
        Err(SyncError::ConflictUnresolved(_))
    ));

    let done = facade
        .resolve_conflict(&rec, ConflictChoice::KeepLocal)
        .await?
        .wait()
        .await;
    assert!(matches!(done.state, JobState::Completed(_)));

    // The edit won: remote holds it, the modified slot is gone, and the
    // attachment is up to date again
    assert_eq!(read_remote(remote.path(), &rec), b"local annotations");
    assert!(!facade.file_exists(&rec, CopyKind::Modified));
    let status = facade.state(&rec, CopyKind::Original).await?;
    assert_eq!(status.classification, SyncState::UpToDate);
    Ok(())
}

#[tokio::test]
async fn conflict_take_remote_discards_the_edit() -> Result<()> {
    init_logging();
    let remote = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let facade = build_facade(remote.path(), cache.path());
    let rec = record("CONF2", "notes.pdf");

    seed_remote(remote.path(), &rec, b"original");
    facade.download(&rec)?.wait().await;

    let edit = cache.path().join("annotated.pdf");
    std::fs::write(&edit, b"local annotations")?;
    facade.stage_modified(&rec, &edit)?;

    seed_remote(remote.path(), &rec, b"remote rewrite");
    facade.refresh_remote(&rec);

    let done = facade
        .resolve_conflict(&rec, ConflictChoice::TakeRemote)
        .await?
        .wait()
        .await;
    let path = match done.state {
        JobState::Completed(path) => path,
        other => panic!("unexpected state: {:?}", other),
    };

    assert!(!facade.file_exists(&rec, CopyKind::Modified));
    assert_eq!(std::fs::read(path)?, b"remote rewrite");

    // The discard shows up in the audit trail
    assert!(facade
        .recent_purges()
        .iter()
        .any(|p| p.reason.contains("take-remote")));
    Ok(())
}

#[tokio::test]
async fn remote_deletion_surfaces_not_found() -> Result<()> {
    init_logging();
    let remote = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let facade = build_facade(remote.path(), cache.path());
    let rec = record("GONE1", "paper.pdf");

    // Never seeded remotely: the fetch fails with NotFound, no retries
    let done = facade.download(&rec)?.wait().await;
    match done.state {
        JobState::Failed(failure) => {
            assert_eq!(failure.kind, refcache::FailureKind::NotFound);
        }
        other => panic!("unexpected state: {:?}", other),
    }
    assert!(!facade.file_exists(&rec, CopyKind::Original));
    Ok(())
}
