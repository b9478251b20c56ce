//! Retention rotator for backup-fetch
//!
//! Prunes expired archives from short-term and long-term storage and places a
//! freshly fetched archive into them.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::settings::RetentionPolicy;
use crate::error::{BackupError, BackupResult};

const SECONDS_PER_DAY: i64 = 86_400;

/// What a rotation did
#[derive(Debug, Default)]
pub struct RotationResult {
    /// Files removed because they outlived their retention
    pub pruned: Vec<PathBuf>,
    /// Files that should have been removed but could not be
    pub prune_failures: Vec<BackupError>,
    /// The long-term copy, on the archive day
    pub long_term_copy: Option<PathBuf>,
    /// Where the archive ended up in short-term storage
    pub stored_at: Option<PathBuf>,
}

/// Removes one expired file
pub type RemoveFile = fn(&Path) -> io::Result<()>;

fn remove_file(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

/// Applies a [`RetentionPolicy`] to local storage
pub struct RetentionRotator {
    policy: RetentionPolicy,
    remove_file: RemoveFile,
}

impl RetentionRotator {
    /// Create a new RetentionRotator
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            remove_file,
        }
    }

    /// Use `remove` instead of `fs::remove_file` when pruning
    pub fn with_remover(mut self, remove: RemoveFile) -> Self {
        self.remove_file = remove;
        self
    }

    /// Get the retention policy
    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Maximum age of a short-term archive
    pub fn short_term_max_age(&self) -> Duration {
        Duration::seconds(i64::from(self.policy.short_term_days) * SECONDS_PER_DAY)
    }

    /// Maximum age of a long-term archive
    pub fn long_term_max_age(&self) -> Duration {
        Duration::seconds(i64::from(self.policy.long_term_weeks) * 7 * SECONDS_PER_DAY)
    }

    /// Whether `now` falls on the long-term archive day (UTC)
    pub fn is_archive_day(&self, now: DateTime<Utc>) -> bool {
        now.weekday() == self.policy.archive_weekday
    }

    /// Rotate local storage, placing `archive` if one was fetched
    ///
    /// Short-term storage is pruned on every run. On the archive day the
    /// long-term storage is pruned as well and receives a copy of the archive.
    /// The archive is then moved into short-term storage.
    ///
    /// Pruning failures are collected in the result; a failed copy or move
    /// is returned as [`BackupError::Placement`].
    pub fn rotate(&self, archive: Option<&Path>, now: DateTime<Utc>) -> BackupResult<RotationResult> {
        let mut result = RotationResult::default();

        self.prune_into(
            &self.policy.short_term_path,
            self.short_term_max_age(),
            now,
            &mut result,
        );

        if self.is_archive_day(now) {
            self.prune_into(
                &self.policy.long_term_path,
                self.long_term_max_age(),
                now,
                &mut result,
            );

            if let Some(archive) = archive {
                let copy = copy_into(archive, &self.policy.long_term_path)?;
                info!(
                    "{} stored in {}",
                    file_name(archive),
                    self.policy.long_term_path.display()
                );
                result.long_term_copy = Some(copy);
            }
        } else {
            debug!(
                weekday = %now.weekday(),
                archive_day = %self.policy.archive_weekday,
                "Not the long-term archive day"
            );
        }

        if let Some(archive) = archive {
            let stored = move_into(archive, &self.policy.short_term_path)?;
            info!(
                "{} stored in {}",
                file_name(archive),
                self.policy.short_term_path.display()
            );
            result.stored_at = Some(stored);
        }

        Ok(result)
    }

    fn prune_into(&self, dir: &Path, max_age: Duration, now: DateTime<Utc>, result: &mut RotationResult) {
        let (pruned, failures) = prune_expired_with(dir, max_age, now, self.remove_file);

        for path in &pruned {
            info!("Removed {}", path.display());
        }
        for failure in &failures {
            warn!(error = %failure, "Could not prune archive");
        }

        result.pruned.extend(pruned);
        result.prune_failures.extend(failures);
    }
}

/// Remove regular files in `dir` whose age exceeds `max_age`
///
/// A file exactly `max_age` old is kept. A missing directory has nothing to
/// prune, and a file that disappears before it is removed is skipped.
pub fn prune_expired(
    dir: &Path,
    max_age: Duration,
    now: DateTime<Utc>,
) -> (Vec<PathBuf>, Vec<BackupError>) {
    prune_expired_with(dir, max_age, now, remove_file)
}

fn prune_expired_with(
    dir: &Path,
    max_age: Duration,
    now: DateTime<Utc>,
    remove: RemoveFile,
) -> (Vec<PathBuf>, Vec<BackupError>) {
    let mut pruned = Vec::new();
    let mut failures = Vec::new();

    if !dir.exists() {
        return (pruned, failures);
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            failures.push(prune_error(dir, e));
            return (pruned, failures);
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                failures.push(prune_error(dir, e));
                continue;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                failures.push(prune_error(&path, e));
                continue;
            }
        };

        if !metadata.is_file() {
            continue;
        }

        let modified = match metadata.modified() {
            Ok(time) => DateTime::<Utc>::from(time),
            Err(e) => {
                failures.push(prune_error(&path, e));
                continue;
            }
        };

        if now.signed_duration_since(modified) <= max_age {
            continue;
        }

        match remove(&path) {
            Ok(()) => pruned.push(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => failures.push(prune_error(&path, e)),
        }
    }

    pruned.sort();
    (pruned, failures)
}

/// Copy `archive` into `dir`, keeping the original
fn copy_into(archive: &Path, dir: &Path) -> BackupResult<PathBuf> {
    let target = target_path(archive, dir)?;

    fs::copy(archive, &target).map_err(|e| {
        BackupError::Placement(format!(
            "Failed to copy {} to {}: {}",
            archive.display(),
            target.display(),
            e
        ))
    })?;

    Ok(target)
}

/// Move `archive` into `dir`, falling back to copy and remove across filesystems
fn move_into(archive: &Path, dir: &Path) -> BackupResult<PathBuf> {
    let target = target_path(archive, dir)?;

    if fs::rename(archive, &target).is_ok() {
        return Ok(target);
    }

    fs::copy(archive, &target).map_err(|e| {
        BackupError::Placement(format!(
            "Failed to move {} to {}: {}",
            archive.display(),
            target.display(),
            e
        ))
    })?;

    if let Err(e) = fs::remove_file(archive) {
        warn!(error = %e, "Archive copied to {} but the working copy remains", target.display());
    }

    Ok(target)
}

fn target_path(archive: &Path, dir: &Path) -> BackupResult<PathBuf> {
    let name = archive.file_name().ok_or_else(|| {
        BackupError::Placement(format!("{} has no file name", archive.display()))
    })?;

    fs::create_dir_all(dir).map_err(|e| {
        BackupError::Placement(format!("Failed to create {}: {}", dir.display(), e))
    })?;

    Ok(dir.join(name))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn prune_error(path: &Path, err: io::Error) -> BackupError {
    BackupError::Prune {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};
    use std::fs::File;
    use std::time::SystemTime;
    use tempfile::TempDir;

    // 2024-01-03 is a Wednesday, 2024-01-07 a Sunday
    fn wednesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap()
    }

    fn sunday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 7, 12, 0, 0).unwrap()
    }

    fn touch(dir: &Path, name: &str, modified: DateTime<Utc>) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, name).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::from(modified))
            .unwrap();
        path
    }

    fn create_test_rotator() -> (RetentionRotator, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let policy = RetentionPolicy {
            short_term_days: 7,
            long_term_weeks: 26,
            short_term_path: temp_dir.path().join("short"),
            long_term_path: temp_dir.path().join("long"),
            archive_weekday: Weekday::Sun,
        };
        (RetentionRotator::new(policy), temp_dir)
    }

    fn fresh_archive(temp_dir: &TempDir, now: DateTime<Utc>) -> PathBuf {
        touch(&temp_dir.path().join("work"), "site-example.com-20240101.zip", now)
    }

    #[test]
    fn test_prune_boundary() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let now = wednesday();
        let week = Duration::days(7);

        let exact = touch(dir, "exact.zip", now - week);
        let older = touch(dir, "older.zip", now - week - Duration::seconds(1));
        let recent = touch(dir, "recent.zip", now - Duration::days(1));
        let ancient = touch(dir, "ancient.zip", now - Duration::days(30));

        let (pruned, failures) = prune_expired(dir, week, now);

        assert!(failures.is_empty());
        assert_eq!(pruned, vec![ancient.clone(), older.clone()]);
        assert!(exact.exists());
        assert!(recent.exists());
        assert!(!older.exists());
        assert!(!ancient.exists());
    }

    #[test]
    fn test_prune_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let (pruned, failures) =
            prune_expired(&temp_dir.path().join("absent"), Duration::days(1), wednesday());

        assert!(pruned.is_empty());
        assert!(failures.is_empty());
    }

    #[test]
    fn test_prune_ignores_directories() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested");
        fs::create_dir(&nested).unwrap();

        let (pruned, failures) = prune_expired(temp_dir.path(), Duration::zero(), wednesday() + Duration::days(10_000));

        assert!(pruned.is_empty());
        assert!(failures.is_empty());
        assert!(nested.exists());
    }

    #[test]
    fn test_rotate_on_regular_day() {
        let (rotator, temp_dir) = create_test_rotator();
        let now = wednesday();
        let policy = rotator.policy().clone();

        let stale = touch(&policy.short_term_path, "site-example.com-old.zip", now - Duration::days(8));
        let kept = touch(&policy.short_term_path, "site-example.com-new.zip", now - Duration::days(2));
        let long_old = touch(&policy.long_term_path, "site-example.com-ancient.zip", now - Duration::weeks(52));
        let archive = fresh_archive(&temp_dir, now);

        let result = rotator.rotate(Some(&archive), now).unwrap();

        assert_eq!(result.pruned, vec![stale.clone()]);
        assert!(result.long_term_copy.is_none());
        assert_eq!(
            result.stored_at.as_deref(),
            Some(policy.short_term_path.join("site-example.com-20240101.zip").as_path())
        );
        assert!(!archive.exists());
        assert!(kept.exists());
        // Long-term storage is untouched outside the archive day
        assert!(long_old.exists());
        assert_eq!(fs::read_dir(&policy.long_term_path).unwrap().count(), 1);
    }

    #[test]
    fn test_rotate_on_archive_day() {
        let (rotator, temp_dir) = create_test_rotator();
        let now = sunday();
        let policy = rotator.policy().clone();

        let long_old = touch(&policy.long_term_path, "site-example.com-ancient.zip", now - Duration::weeks(27));
        let long_kept = touch(&policy.long_term_path, "site-example.com-recent.zip", now - Duration::weeks(25));
        let archive = fresh_archive(&temp_dir, now);

        let result = rotator.rotate(Some(&archive), now).unwrap();

        assert_eq!(result.pruned, vec![long_old.clone()]);
        let copy = result.long_term_copy.unwrap();
        assert_eq!(copy, policy.long_term_path.join("site-example.com-20240101.zip"));
        assert!(copy.exists());
        assert!(long_kept.exists());
        assert!(result.stored_at.unwrap().exists());
        assert!(!archive.exists());
    }

    #[test]
    fn test_rotate_creates_storage_directories() {
        let (rotator, temp_dir) = create_test_rotator();
        let archive = fresh_archive(&temp_dir, sunday());

        rotator.rotate(Some(&archive), sunday()).unwrap();

        assert!(rotator.policy().short_term_path.is_dir());
        assert!(rotator.policy().long_term_path.is_dir());
    }

    #[test]
    fn test_rotate_twice_is_idempotent() {
        let (rotator, temp_dir) = create_test_rotator();
        let now = sunday();
        let policy = rotator.policy().clone();

        touch(&policy.short_term_path, "site-example.com-old.zip", now - Duration::days(10));
        let archive = fresh_archive(&temp_dir, now);

        let first = rotator.rotate(Some(&archive), now).unwrap();
        assert_eq!(first.pruned.len(), 1);

        let second = rotator.rotate(None, now).unwrap();
        assert!(second.pruned.is_empty());
        assert!(second.prune_failures.is_empty());
        assert!(second.stored_at.is_none());
        assert!(second.long_term_copy.is_none());
    }

    #[test]
    fn test_missing_archive_is_placement_error() {
        let (rotator, temp_dir) = create_test_rotator();
        let missing = temp_dir.path().join("work").join("site-example.com-gone.zip");

        let err = rotator.rotate(Some(&missing), wednesday()).unwrap_err();

        assert!(matches!(err, BackupError::Placement(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_zero_retention_prunes_everything_older() {
        let (rotator, _temp) = create_test_rotator();
        let now = wednesday();
        let policy = RetentionPolicy {
            short_term_days: 0,
            ..rotator.policy().clone()
        };
        let rotator = RetentionRotator::new(policy.clone());

        let old = touch(&policy.short_term_path, "a.zip", now - Duration::seconds(1));
        let same = touch(&policy.short_term_path, "b.zip", now);

        let result = rotator.rotate(None, now).unwrap();

        assert_eq!(result.pruned, vec![old]);
        assert!(same.exists());
    }

    /// Refuses to remove anything named `*locked*`
    fn remove_unless_locked(path: &Path) -> io::Result<()> {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if name.contains("locked") {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied"));
        }
        fs::remove_file(path)
    }

    /// Reports every file as already gone
    fn remove_vanished(_path: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::NotFound, "No such file or directory"))
    }

    #[test]
    fn test_prune_failure_is_collected_and_pruning_continues() {
        let (rotator, temp_dir) = create_test_rotator();
        let rotator = rotator.with_remover(remove_unless_locked);
        let now = wednesday();
        let policy = rotator.policy().clone();

        let locked = touch(&policy.short_term_path, "site-example.com-locked.zip", now - Duration::days(9));
        let older = touch(&policy.short_term_path, "site-example.com-older.zip", now - Duration::days(20));
        let archive = fresh_archive(&temp_dir, now);

        let result = rotator.rotate(Some(&archive), now).unwrap();

        assert_eq!(result.pruned, vec![older.clone()]);
        assert!(!older.exists());
        assert!(locked.exists());

        assert_eq!(result.prune_failures.len(), 1);
        let failure = &result.prune_failures[0];
        assert!(matches!(failure, BackupError::Prune { path, .. } if path.contains("locked")));
        assert!(!failure.is_fatal());

        let stored = result.stored_at.unwrap();
        assert_eq!(stored, policy.short_term_path.join("site-example.com-20240101.zip"));
        assert!(stored.exists());
        assert!(!archive.exists());
    }

    #[test]
    fn test_vanished_file_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let now = wednesday();
        let gone = touch(temp_dir.path(), "gone.zip", now - Duration::days(30));

        let (pruned, failures) =
            prune_expired_with(temp_dir.path(), Duration::days(7), now, remove_vanished);

        assert!(pruned.is_empty());
        assert!(failures.is_empty());
        assert!(gone.exists());
    }

    #[test]
    fn test_archive_day_uses_utc() {
        let (rotator, _temp) = create_test_rotator();

        assert!(rotator.is_archive_day(sunday()));
        assert!(!rotator.is_archive_day(wednesday()));
        // Late Saturday UTC is still Saturday, whatever the local zone says
        assert!(!rotator.is_archive_day(Utc.with_ymd_and_hms(2024, 1, 6, 23, 59, 59).unwrap()));
    }
}
