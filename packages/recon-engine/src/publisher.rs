//! C8 File Publisher.
//!
//! Atomic network<->local file replacement via stage-then-rename, with a
//! best-effort daily backup and an optional compact/repair step. Grounded
//! on a proxmox-backup-style stage-to-same-volume-then-rename pipeline:
//! the staging file always lives in the target's own directory so the
//! final rename is a same-filesystem, single-syscall swap -- never a
//! partially-written file is visible at the target path (§4.8 I6).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use tempfile::Builder;

use crate::error::EngineResult;

/// Host-native compact-and-repair facility. The spec's own phrase
/// ("if unavailable, use the raw local file") is why this is a trait: a
/// real Access/Jet backend would shell out to its compaction API; here
/// there is none, so [`NoopCompactor`] is the only implementation.
pub trait CompactAndRepair: Send + Sync {
    /// Attempt to compact `source` into a fresh file at `dest`. Returns
    /// `Ok(true)` if `dest` now holds the compacted copy, `Ok(false)` if
    /// compaction is unavailable and the caller should fall back to
    /// copying `source` directly.
    fn compact(&self, source: &Path, dest: &Path) -> io::Result<bool>;
}

/// No host compaction facility available; publish/refresh always falls
/// back to copying the raw file (§4.8 step 2).
pub struct NoopCompactor;

impl CompactAndRepair for NoopCompactor {
    fn compact(&self, _source: &Path, _dest: &Path) -> io::Result<bool> {
        Ok(false)
    }
}

pub struct FilePublisher;

impl FilePublisher {
    /// `publishLocalToNetwork` (§4.8): daily-backup the network file, then
    /// atomically replace it with a (possibly compacted) copy of the
    /// local file.
    pub fn publish_local_to_network(
        &self,
        local: &Path,
        network: &Path,
        compactor: &dyn CompactAndRepair,
    ) -> EngineResult<()> {
        backup_if_missing_for_today(network)?;

        let dir = network
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let compact_temp = dir.join(format!(
            ".compact_{}.tmp",
            local.file_name().and_then(|n| n.to_str()).unwrap_or("local")
        ));
        let source = if compactor.compact(local, &compact_temp)? {
            compact_temp.clone()
        } else {
            local.to_path_buf()
        };

        let result = stage_then_replace(&source, network);

        if compact_temp.exists() {
            let _ = fs::remove_file(&compact_temp);
        }
        result?;
        Ok(())
    }

    /// `refreshLocalFromNetwork` (§4.8): verify the network file is
    /// present and not exclusively held by another writer, then atomically
    /// replace the local file with its contents.
    pub fn refresh_local_from_network(
        &self,
        network: &Path,
        local: &Path,
        compactor: &dyn CompactAndRepair,
    ) -> EngineResult<()> {
        if !network.exists() {
            return Err(std::io::Error::new(
                io::ErrorKind::NotFound,
                format!("network file not found: {}", network.display()),
            )
            .into());
        }
        if is_exclusively_locked(network) {
            return Err(std::io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("network file is exclusively opened: {}", network.display()),
            )
            .into());
        }

        let dir = local
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let compact_temp = dir.join(".refresh_compact.tmp");
        let source = if compactor.compact(network, &compact_temp)? {
            compact_temp.clone()
        } else {
            network.to_path_buf()
        };

        let result = stage_then_replace(&source, local);
        if compact_temp.exists() {
            let _ = fs::remove_file(&compact_temp);
        }
        result
    }

    /// `ensureLocalSnapshotsUpToDate` (§4.8): compare `{length,
    /// lastWriteUtc}` and refresh only on a mismatch. Best-effort -- any
    /// failure is logged and swallowed, never propagated.
    pub fn ensure_local_snapshot_up_to_date(
        &self,
        network: &Path,
        local: &Path,
        compactor: &dyn CompactAndRepair,
    ) {
        match snapshots_differ(network, local) {
            Ok(false) => {}
            Ok(true) => {
                if let Err(err) = self.refresh_local_from_network(network, local, compactor) {
                    tracing::warn!(
                        network = %network.display(),
                        local = %local.display(),
                        error = %err,
                        "best-effort snapshot refresh failed"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(
                    network = %network.display(),
                    local = %local.display(),
                    error = %err,
                    "could not compare snapshot metadata"
                );
            }
        }
    }
}

fn snapshots_differ(network: &Path, local: &Path) -> io::Result<bool> {
    if !network.exists() {
        return Ok(false);
    }
    if !local.exists() {
        return Ok(true);
    }
    let net_meta = fs::metadata(network)?;
    let local_meta = fs::metadata(local)?;
    if net_meta.len() != local_meta.len() {
        return Ok(true);
    }
    let net_mtime = net_meta.modified()?;
    let local_mtime = local_meta.modified()?;
    Ok(net_mtime != local_mtime)
}

/// Stage `source`'s bytes in the same directory as `target`, then
/// atomically rename into place. If `target` already exists, it is first
/// renamed aside to `target.bak` (replacing any previous backup) so the
/// window between "old gone" and "new in place" never exposes a missing
/// or partial file at `target` -- at every instant one of the two paths
/// holds a complete copy.
fn stage_then_replace(source: &Path, target: &Path) -> EngineResult<()> {
    let dir = target
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut staging = Builder::new()
        .prefix(".stage_")
        .suffix(".tmp")
        .tempfile_in(&dir)?;
    io::copy(&mut fs::File::open(source)?, staging.as_file_mut())?;
    staging.as_file().sync_all()?;

    if target.exists() {
        let bak = backup_sibling_path(target);
        if bak.exists() {
            fs::remove_file(&bak)?;
        }
        fs::rename(target, &bak)?;
    }
    staging.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn backup_sibling_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("target")
        .to_string();
    name.push_str(".bak");
    target.with_file_name(name)
}

/// Best-effort daily backup (§4.8 step 1): copy `network` into
/// `Saved/{baseName}_{YYYY-MM-DD}.db` next to it, if that file does not
/// already exist for today.
fn backup_if_missing_for_today(network: &Path) -> EngineResult<()> {
    if !network.exists() {
        return Ok(());
    }
    let dir = network
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let saved_dir = dir.join("Saved");
    fs::create_dir_all(&saved_dir)?;

    let base_name = network
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("store");
    let today = Utc::now().format("%Y-%m-%d");
    let backup_path = saved_dir.join(format!("{base_name}_{today}.db"));

    if !backup_path.exists() {
        fs::copy(network, &backup_path)?;
    }
    Ok(())
}

/// Exclusivity probe (§4.8): attempt a near-zero-timeout `BEGIN
/// IMMEDIATE` against the target. `SQLITE_BUSY` (another connection holds
/// a write lock) is classified as "locked"; per the spec's explicit
/// wording, any other open failure is classified conservatively as
/// locked too.
fn is_exclusively_locked(path: &Path) -> bool {
    let conn = match Connection::open_with_flags(
        path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE,
    ) {
        Ok(conn) => conn,
        Err(_) => return true,
    };
    if conn.busy_timeout(Duration::from_millis(1)).is_err() {
        return true;
    }
    match conn.execute_batch("BEGIN IMMEDIATE; ROLLBACK;") {
        Ok(()) => false,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn write_file(path: &Path, contents: &[u8]) {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(contents).unwrap();
    }

    #[test]
    fn stage_then_replace_creates_target_and_backup() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.db");
        let target = dir.path().join("target.db");
        write_file(&source, b"v1");
        write_file(&target, b"v0");

        stage_then_replace(&source, &target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"v1");
        let bak = backup_sibling_path(&target);
        assert_eq!(fs::read(&bak).unwrap(), b"v0");
    }

    #[test]
    fn stage_then_replace_without_prior_target_just_renames_in() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.db");
        let target = dir.path().join("target.db");
        write_file(&source, b"only");

        stage_then_replace(&source, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"only");
        assert!(!backup_sibling_path(&target).exists());
    }

    #[test]
    fn publish_creates_dated_backup_once_per_day() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("local.db");
        let network = dir.path().join("network.db");
        write_file(&local, b"new");
        write_file(&network, b"old");

        let publisher = FilePublisher;
        publisher
            .publish_local_to_network(&local, &network, &NoopCompactor)
            .unwrap();

        let saved_dir = dir.path().join("Saved");
        let entries: Vec<_> = fs::read_dir(&saved_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(fs::read(&network).unwrap(), b"new");
    }

    #[test]
    fn refresh_fails_when_network_file_missing() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("local.db");
        let network = dir.path().join("does_not_exist.db");

        let publisher = FilePublisher;
        let result = publisher.refresh_local_from_network(&network, &local, &NoopCompactor);
        assert!(result.is_err());
    }

    #[test]
    fn refresh_copies_network_into_local() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("local.db");
        let network = dir.path().join("network.db");
        {
            let conn = Connection::open(&network).unwrap();
            conn.execute_batch("CREATE TABLE T (Id INTEGER PRIMARY KEY)").unwrap();
        }

        let publisher = FilePublisher;
        publisher
            .refresh_local_from_network(&network, &local, &NoopCompactor)
            .unwrap();
        let local_conn = Connection::open(&local).unwrap();
        let table_count: i64 = local_conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='T'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(table_count, 1);
    }

    #[test]
    fn ensure_snapshot_up_to_date_is_noop_when_identical() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("local.db");
        let network = dir.path().join("network.db");
        write_file(&network, b"same");
        fs::copy(&network, &local).unwrap();
        // Match mtimes exactly so the comparison reports "no difference".
        let net_time = fs::metadata(&network).unwrap().modified().unwrap();
        let file = fs::File::open(&local).unwrap();
        file.set_modified(net_time).unwrap();

        let before = fs::read(&local).unwrap();
        let publisher = FilePublisher;
        publisher.ensure_local_snapshot_up_to_date(&network, &local, &NoopCompactor);
        assert_eq!(fs::read(&local).unwrap(), before);
    }

    #[test]
    fn not_exclusively_locked_sqlite_file_reports_unlocked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE T (Id INTEGER)").unwrap();
        }
        assert!(!is_exclusively_locked(&path));
    }
}
