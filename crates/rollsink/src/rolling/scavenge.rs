//! File lifecycle for rotated logs
//!
//! The scavenger runs on its own thread and wakes on a coalescing signal
//! from the write path. Each pass lists the sibling files of the current
//! log (same name prefix, not the file currently being written), applies
//! the retention filters, deletes what fell out, and gzip-compacts the
//! survivors that are not yet compressed.
//!
//! Everything here is best-effort: a failed unlink or compaction is
//! reported through `tracing` and retried implicitly on the next pass.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crossbeam::channel::{self, Receiver, Sender};
use flate2::write::GzEncoder;
use flate2::Compression;

use super::Shared;

/// Extension carried by compacted files.
pub const COMPRESS_SUFFIX: &str = ".gz";

/// One rotated (or stale) file found next to the current log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileRecord {
    /// File name, without the directory
    pub name: String,

    /// Last-modification time from the directory scan
    pub mod_time: SystemTime,
}

impl LogFileRecord {
    /// Whether the file already carries the compression suffix.
    pub fn is_compressed(&self) -> bool {
        self.name.ends_with(COMPRESS_SUFFIX)
    }

    /// The retention group: the name with the compression suffix stripped,
    /// so a file and its compressed form count as one.
    pub fn group(&self) -> &str {
        self.name
            .strip_suffix(COMPRESS_SUFFIX)
            .unwrap_or(&self.name)
    }
}

pub(crate) struct ScavengerHandle {
    pub(crate) notify_tx: Sender<()>,
    pub(crate) thread: Option<JoinHandle<()>>,
}

pub(crate) fn spawn(shared: Arc<Shared>) -> ScavengerHandle {
    let (notify_tx, notify_rx) = channel::bounded(1);
    let thread = std::thread::Builder::new()
        .name("rollsink-scavenger".into())
        .spawn(move || run(shared, notify_rx))
        .expect("failed to spawn scavenger thread");
    ScavengerHandle {
        notify_tx,
        thread: Some(thread),
    }
}

/// One pass per coalesced wakeup; exits when the writer drops its sender.
fn run(shared: Arc<Shared>, notify_rx: Receiver<()>) {
    while notify_rx.recv().is_ok() {
        if !shared.config.scavenging_enabled() {
            continue;
        }
        scavenge(&shared);
    }
}

fn scavenge(shared: &Shared) {
    let current_name = shared
        .state
        .lock()
        .current_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());

    let records =
        match list_sibling_files(&shared.dir, &shared.base_name, current_name.as_deref()) {
            Ok(records) => records,
            Err(error) => {
                tracing::debug!(dir = %shared.dir.display(), %error, "skipping scavenge pass");
                return;
            }
        };
    if records.is_empty() {
        return;
    }

    let mut remove = Vec::new();
    let records = filter_by_max_backups(records, &mut remove, shared.config.max_backups);
    let records = filter_by_max_age(records, &mut remove, shared.config.max_age_days);
    let compress = select_for_compression(&records, shared.config.compress);

    for record in &remove {
        let path = shared.dir.join(&record.name);
        match fs::remove_file(&path) {
            Ok(()) => {
                shared.metrics.files_removed.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                tracing::debug!(path = %path.display(), %error, "failed to remove stale log file");
            }
        }
    }

    for record in &compress {
        let src = shared.dir.join(&record.name);
        let dst = shared.dir.join(format!("{}{}", record.name, COMPRESS_SUFFIX));
        match compress_file(&src, &dst) {
            Ok(()) => {
                shared
                    .metrics
                    .files_compressed
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                tracing::debug!(path = %src.display(), %error, "failed to compress log file");
            }
        }
    }
}

/// List the regular files in `dir` whose names start with `prefix`,
/// excluding `current_name`, sorted most-recently-modified first.
pub fn list_sibling_files(
    dir: &Path,
    prefix: &str,
    current_name: Option<&str>,
) -> io::Result<Vec<LogFileRecord>> {
    let mut records = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        if !meta.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(prefix) || current_name == Some(name.as_str()) {
            continue;
        }
        let mod_time = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        records.push(LogFileRecord { name, mod_time });
    }
    records.sort_by(|a, b| b.mod_time.cmp(&a.mod_time));
    Ok(records)
}

/// Keep the most recent `max_backups` distinct retention groups; everything
/// beyond that goes to `remove`. A compressed twin of a kept file belongs to
/// the same group and is always retained with it. Disabled when
/// `max_backups` is 0 or fewer files exist than the limit.
pub fn filter_by_max_backups(
    records: Vec<LogFileRecord>,
    remove: &mut Vec<LogFileRecord>,
    max_backups: usize,
) -> Vec<LogFileRecord> {
    if max_backups == 0 || records.len() < max_backups {
        return records;
    }
    let mut kept_groups: HashSet<String> = HashSet::new();
    let mut remaining = Vec::with_capacity(records.len());
    for record in records {
        if kept_groups.contains(record.group()) {
            remaining.push(record);
        } else if kept_groups.len() < max_backups {
            kept_groups.insert(record.group().to_owned());
            remaining.push(record);
        } else {
            remove.push(record);
        }
    }
    remaining
}

/// Move records modified before `now - max_age_days` to `remove`.
/// Disabled when `max_age_days` is 0.
pub fn filter_by_max_age(
    records: Vec<LogFileRecord>,
    remove: &mut Vec<LogFileRecord>,
    max_age_days: u32,
) -> Vec<LogFileRecord> {
    if max_age_days == 0 {
        return records;
    }
    let cutoff = SystemTime::now() - Duration::from_secs(u64::from(max_age_days) * 24 * 60 * 60);
    let mut remaining = Vec::with_capacity(records.len());
    for record in records {
        if record.mod_time < cutoff {
            remove.push(record);
        } else {
            remaining.push(record);
        }
    }
    remaining
}

/// The surviving records that still need compaction.
pub fn select_for_compression(records: &[LogFileRecord], enabled: bool) -> Vec<LogFileRecord> {
    if !enabled {
        return Vec::new();
    }
    records
        .iter()
        .filter(|record| !record.is_compressed())
        .cloned()
        .collect()
}

/// Gzip `src` into `dst`, removing `src` on success. A partial `dst` is
/// removed on any error so a truncated archive is never left behind.
pub fn compress_file(src: &Path, dst: &Path) -> io::Result<()> {
    let mut input = File::open(src)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666);
    }
    let output = options.open(dst)?;

    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    if let Err(error) = io::copy(&mut input, &mut encoder) {
        let _ = fs::remove_file(dst);
        return Err(error);
    }
    let finished = encoder.finish().and_then(|mut writer| writer.flush());
    if let Err(error) = finished {
        let _ = fs::remove_file(dst);
        return Err(error);
    }
    fs::remove_file(src)
}

#[cfg(test)]
#[path = "scavenge_test.rs"]
mod scavenge_test;
