//! Tests for the rolling writer

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::Local;
use tempfile::TempDir;

use crate::common::SinkError;
use crate::rolling::{RollingConfig, RollingWriter};

const SCAVENGE_TIMEOUT: Duration = Duration::from_secs(5);

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}

/// Names in `dir` starting with `prefix`, excluding `current`, sorted.
fn sibling_names(dir: &Path, prefix: &str, current: &str) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(prefix) && name != current)
        .collect();
    names.sort();
    names
}

fn backdate(path: &Path, age: Duration) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

fn total_bytes(dir: &Path, prefix: &str) -> u64 {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(prefix)
        })
        .map(|entry| entry.metadata().unwrap().len())
        .sum()
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn test_config_defaults_disable_everything() {
    let config = RollingConfig::default();
    assert_eq!(config.max_size, 0);
    assert_eq!(config.max_age_days, 0);
    assert_eq!(config.max_backups, 0);
    assert!(!config.compress);
    assert!(config.time_suffix.is_empty());
}

#[test]
fn test_config_deserialize() {
    let config: RollingConfig = toml::from_str(
        r#"
max_size = 1048576
max_age_days = 7
max_backups = 5
compress = true
time_suffix = ".%Y%m%d"
"#,
    )
    .unwrap();
    assert_eq!(config.max_size, 1_048_576);
    assert_eq!(config.max_age_days, 7);
    assert_eq!(config.max_backups, 5);
    assert!(config.compress);
    assert_eq!(config.time_suffix, ".%Y%m%d");
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_new_rejects_empty_path() {
    let result = RollingWriter::new("", RollingConfig::default());
    assert!(matches!(result, Err(SinkError::EmptyPath)));
}

#[test]
fn test_new_rejects_invalid_time_suffix() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("app.log");
    let result = RollingWriter::new(&path, RollingConfig::default().with_time_suffix(".%"));
    assert!(matches!(
        result,
        Err(SinkError::InvalidTimePattern { .. })
    ));
}

#[test]
fn test_new_creates_nested_directory() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("a/b/app.log");
    let _writer = RollingWriter::new(&path, RollingConfig::default()).unwrap();
    assert!(tmp.path().join("a/b").is_dir());
    // Lazy open: no file until the first write.
    assert!(!path.exists());
}

// ============================================================================
// Hot path
// ============================================================================

#[test]
fn test_write_appends() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("app.log");
    let writer = RollingWriter::new(&path, RollingConfig::default()).unwrap();

    assert_eq!(writer.write(b"hello ").unwrap(), 6);
    assert_eq!(writer.write(b"world\n").unwrap(), 6);

    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(content, "hello world\n");
}

#[test]
fn test_close_then_write_reopens() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("app.log");
    let writer = RollingWriter::new(&path, RollingConfig::default()).unwrap();

    writer.write(b"before\n").unwrap();
    writer.close().unwrap();
    writer.close().unwrap(); // idempotent
    writer.write(b"after\n").unwrap();

    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(content, "before\nafter\n");
}

#[test]
fn test_sync_without_open_file_is_ok() {
    let tmp = TempDir::new().unwrap();
    let writer =
        RollingWriter::new(tmp.path().join("app.log"), RollingConfig::default()).unwrap();
    writer.sync().unwrap();
}

#[test]
fn test_write_resumes_size_from_existing_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("app.log");
    fs::write(&path, vec![b'x'; 100]).unwrap();

    let writer =
        RollingWriter::new(&path, RollingConfig::default().with_max_size(110)).unwrap();
    writer.write(&[b'y'; 20]).unwrap();

    // 100 pre-existing + 20 written crossed the threshold: the combined
    // bytes moved to a backup and a fresh current file was opened.
    let backups = sibling_names(tmp.path(), "app.log", "app.log");
    assert_eq!(backups.len(), 1);
    assert!(backups[0].contains(".bk-"));
    assert_eq!(
        fs::metadata(tmp.path().join(&backups[0])).unwrap().len(),
        120
    );
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    assert_eq!(writer.metrics().rotations, 1);
}

// ============================================================================
// Size rotation
// ============================================================================

#[test]
fn test_size_rotation_single_producer() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("app.log");
    let config = RollingConfig::default()
        .with_max_size(1024)
        .with_max_backups(3);
    let writer = RollingWriter::new(&path, config).unwrap();

    for _ in 0..100 {
        writer.write(&[b'a'; 20]).unwrap();
    }

    assert!(path.exists());
    let backups = sibling_names(tmp.path(), "app.log", "app.log");
    assert!(!backups.is_empty());
    assert!(backups.len() <= 3, "backups: {:?}", backups);
    assert_eq!(total_bytes(tmp.path(), "app.log"), 2000);

    // No single file ever grew past the threshold plus one write.
    for name in &backups {
        assert!(fs::metadata(tmp.path().join(name)).unwrap().len() <= 1024 + 20);
    }
}

#[test]
fn test_max_size_zero_disables_rotation() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("app.log");
    let writer = RollingWriter::new(&path, RollingConfig::default()).unwrap();

    for _ in 0..100 {
        writer.write(&[b'a'; 100]).unwrap();
    }

    assert!(sibling_names(tmp.path(), "app.log", "app.log").is_empty());
    assert_eq!(fs::metadata(&path).unwrap().len(), 10_000);
}

// ============================================================================
// Time-patterned naming
// ============================================================================

#[test]
fn test_time_suffix_names_current_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("app.log");
    let writer = RollingWriter::new(
        &path,
        RollingConfig::default().with_time_suffix(crate::timefmt::DAILY),
    )
    .unwrap();

    let before = Local::now().format("%Y%m%d").to_string();
    writer.write(b"dated\n").unwrap();
    let after = Local::now().format("%Y%m%d").to_string();

    let candidates: Vec<PathBuf> = [before, after]
        .iter()
        .map(|day| tmp.path().join(format!("app.log.{}", day)))
        .collect();
    assert!(
        candidates.iter().any(|p| p.exists()),
        "no dated file among {:?}",
        candidates
    );
}

// ============================================================================
// Scavenging
// ============================================================================

#[test]
fn test_age_cleanup_removes_expired_siblings() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("app.log");
    for i in 0..5 {
        let stale = tmp.path().join(format!("app.log.2025010{}", i + 1));
        fs::write(&stale, b"old").unwrap();
        backdate(&stale, Duration::from_secs(10 * 24 * 60 * 60));
    }

    let writer =
        RollingWriter::new(&path, RollingConfig::default().with_max_age_days(7)).unwrap();
    writer.write(b"fresh\n").unwrap();

    assert!(wait_until(SCAVENGE_TIMEOUT, || {
        sibling_names(tmp.path(), "app.log", "app.log").is_empty()
    }));
    assert!(path.exists());
    assert!(wait_until(SCAVENGE_TIMEOUT, || {
        writer.metrics().files_removed == 5
    }));
}

#[test]
fn test_backup_cap_keeps_most_recent_siblings() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("app.log");
    for hours in 1..=5u64 {
        let name = tmp.path().join(format!("app.log.bk{}", hours));
        fs::write(&name, b"backup").unwrap();
        backdate(&name, Duration::from_secs(hours * 60 * 60));
    }

    let writer =
        RollingWriter::new(&path, RollingConfig::default().with_max_backups(2)).unwrap();
    writer.write(b"fresh\n").unwrap();

    assert!(wait_until(SCAVENGE_TIMEOUT, || {
        sibling_names(tmp.path(), "app.log", "app.log").len() == 2
    }));
    assert_eq!(
        sibling_names(tmp.path(), "app.log", "app.log"),
        vec!["app.log.bk1".to_string(), "app.log.bk2".to_string()]
    );
}

#[test]
fn test_compression_replaces_siblings_with_gz() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("app.log");
    for i in 0..3 {
        fs::write(
            tmp.path().join(format!("app.log.old{}", i)),
            format!("payload {}\n", i),
        )
        .unwrap();
    }

    let writer =
        RollingWriter::new(&path, RollingConfig::default().with_compress(true)).unwrap();
    writer.write(b"fresh\n").unwrap();

    assert!(wait_until(SCAVENGE_TIMEOUT, || {
        (0..3).all(|i| {
            let original = tmp.path().join(format!("app.log.old{}", i));
            let packed = tmp.path().join(format!("app.log.old{}.gz", i));
            packed.exists() && !original.exists()
        })
    }));

    for i in 0..3 {
        let packed = File::open(tmp.path().join(format!("app.log.old{}.gz", i))).unwrap();
        let mut content = String::new();
        flate2::read::GzDecoder::new(packed)
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, format!("payload {}\n", i));
    }
    assert!(wait_until(SCAVENGE_TIMEOUT, || {
        writer.metrics().files_compressed == 3
    }));
}

#[test]
fn test_scavenging_disabled_leaves_siblings_alone() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("app.log");
    let stale = tmp.path().join("app.log.20200101");
    fs::write(&stale, b"ancient").unwrap();
    backdate(&stale, Duration::from_secs(365 * 24 * 60 * 60));

    let writer = RollingWriter::new(&path, RollingConfig::default()).unwrap();
    writer.write(b"fresh\n").unwrap();
    std::thread::sleep(Duration::from_millis(200));

    assert!(stale.exists());
}
