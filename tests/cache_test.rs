use bytes::Bytes;

use module_loader_engine::cache::address::{CanonicalAddress, ModuleNamespace};
use module_loader_engine::cache::store::{DiskResourceCache, ResourceCache};
use module_loader_engine::ledger::{ledger_file_name, ledger_key, ExtractionLedger, FileLedger};

fn addr(s: &str) -> CanonicalAddress {
    CanonicalAddress::parse(s).unwrap()
}

#[tokio::test]
async fn test_disk_cache_put_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let story = addr("http://localhost/intro/story.html");
    let image = addr("http://localhost/intro/story_content/m1.png");

    {
        let cache = DiskResourceCache::open(dir.path(), "drivesafe-modules-v2").unwrap();
        cache
            .put(&story, Bytes::from_static(b"<html></html>"), "text/html")
            .await
            .unwrap();
        cache
            .put(&image, Bytes::from(data.clone()), "image/png")
            .await
            .unwrap();
        assert_eq!(cache.len().await, 2);
    }

    let cache = DiskResourceCache::open(dir.path(), "drivesafe-modules-v2").unwrap();
    assert_eq!(cache.name(), "drivesafe-modules-v2");
    assert_eq!(cache.len().await, 2);

    let read_back = cache.get(&image).await.unwrap();
    assert_eq!(read_back.content, Bytes::from(data));
    assert_eq!(read_back.mime_type, "image/png");

    // Unwritten address returns None.
    assert!(cache
        .get(&addr("http://localhost/intro/none.js"))
        .await
        .is_none());

    assert_eq!(
        cache.get_by_basename("m1.png").await.unwrap().address,
        image
    );
    assert_eq!(
        cache.keys_with_prefix("http://localhost/intro/").await,
        vec![story, image]
    );
}

#[tokio::test]
async fn test_disk_cache_overwrite_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskResourceCache::open(dir.path(), "drivesafe-modules-v2").unwrap();
    let a = addr("http://localhost/m1/a.js");

    cache.put(&a, Bytes::from_static(b"one"), "application/javascript").await.unwrap();
    cache.put(&a, Bytes::from_static(b"one"), "application/javascript").await.unwrap();
    assert_eq!(cache.len().await, 1);
    assert_eq!(cache.get(&a).await.unwrap().content, Bytes::from_static(b"one"));

    let files = std::fs::read_dir(cache.dir()).unwrap().count();
    assert_eq!(files, 2);
}

#[tokio::test]
async fn test_version_bump_purges_old_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let a = addr("http://localhost/m1/story.html");
    {
        let old = DiskResourceCache::open(dir.path(), "drivesafe-modules-v1").unwrap();
        old.put(&a, Bytes::from_static(b"old"), "text/html").await.unwrap();
    }
    let statics = DiskResourceCache::open(dir.path(), "drivesafe-static-v1").unwrap();
    drop(statics);

    let current = DiskResourceCache::open(dir.path(), "drivesafe-modules-v2").unwrap();
    assert!(current.get(&a).await.is_none());
    assert!(!dir.path().join("drivesafe-modules-v1").exists());
    // Other prefixes are left alone.
    assert!(dir.path().join("drivesafe-static-v1").exists());
}

#[tokio::test]
async fn test_interrupted_write_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let a = addr("http://localhost/m1/story.html");
    let cache_dir = {
        let cache = DiskResourceCache::open(dir.path(), "drivesafe-modules-v2").unwrap();
        cache.put(&a, Bytes::from_static(b"ok"), "text/html").await.unwrap();
        cache.dir().to_path_buf()
    };
    std::fs::write(cache_dir.join("deadbeef.bin"), b"content without metadata").unwrap();
    std::fs::write(cache_dir.join("deadbeef.tmp-1-0"), b"partial").unwrap();

    let cache = DiskResourceCache::open(dir.path(), "drivesafe-modules-v2").unwrap();
    assert_eq!(cache.len().await, 1);
    assert!(!cache_dir.join("deadbeef.tmp-1-0").exists());
}

#[tokio::test]
async fn test_file_ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    {
        let ledger = FileLedger::open(&path).unwrap();
        assert!(!ledger.is_complete("intro").await);
        ledger.mark_complete("intro").await.unwrap();
        ledger.mark_complete("intro").await.unwrap();
    }

    let ledger = FileLedger::open(&path).unwrap();
    assert!(ledger.is_complete("intro").await);
    assert!(!ledger.is_complete("m1-yourdriverslicence").await);

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw[ledger_key("intro")], "true");
}

#[tokio::test]
async fn test_written_address_matches_request() {
    let origin = reqwest::Url::parse("http://localhost").unwrap();
    let ns = ModuleNamespace::new(&origin, "/elearning/", "m3-safedriving").unwrap();
    let written = ns.address_for("story_content/Image 1.jpg").unwrap();
    let requested =
        CanonicalAddress::for_request(&origin, "/elearning/m3-safedriving/story_content/Image%201.jpg")
            .unwrap();
    assert_eq!(written, requested);
}

#[tokio::test]
async fn test_basename_latest_write_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let m1 = addr("http://localhost/m1/story_content/slide.png");
    let m2 = addr("http://localhost/m2/story_content/slide.png");
    {
        let cache = DiskResourceCache::open(dir.path(), "drivesafe-modules-v2").unwrap();
        cache.put(&m1, Bytes::from_static(b"m1"), "image/png").await.unwrap();
        cache.put(&m2, Bytes::from_static(b"m2"), "image/png").await.unwrap();
    }

    let cache = DiskResourceCache::open(dir.path(), "drivesafe-modules-v2").unwrap();
    assert_eq!(cache.get_by_basename("slide.png").await.unwrap().address, m2);

    cache.put(&m1, Bytes::from_static(b"m1 again"), "image/png").await.unwrap();
    drop(cache);

    let cache = DiskResourceCache::open(dir.path(), "drivesafe-modules-v2").unwrap();
    let loose = cache.get_by_basename("slide.png").await.unwrap();
    assert_eq!(loose.address, m1);
    assert_eq!(loose.content, Bytes::from_static(b"m1 again"));
}

#[tokio::test]
async fn test_version_bump_retires_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let old_path = dir.path().join(ledger_file_name("drivesafe-modules-v2"));
    {
        let _cache = DiskResourceCache::open(dir.path(), "drivesafe-modules-v2").unwrap();
        let ledger = FileLedger::open(&old_path).unwrap();
        ledger.mark_complete("intro").await.unwrap();
    }

    let _cache = DiskResourceCache::open(dir.path(), "drivesafe-modules-v3").unwrap();
    assert!(!old_path.exists());
    let ledger = FileLedger::open(&dir.path().join(ledger_file_name("drivesafe-modules-v3"))).unwrap();
    assert!(!ledger.is_complete("intro").await);

    // Reopening the current version keeps its own ledger.
    ledger.mark_complete("intro").await.unwrap();
    let _again = DiskResourceCache::open(dir.path(), "drivesafe-modules-v3").unwrap();
    assert!(dir.path().join(ledger_file_name("drivesafe-modules-v3")).exists());
}
