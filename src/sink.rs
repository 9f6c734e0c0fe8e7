// Author: Jacques Murray

//! The JSON log sink: a size-rotated file, optionally teed to stdout.
//!
//! When the active file would grow past its size cap it is renamed to
//! `<stem>-<UTC timestamp>.<ext>` in the same directory and a fresh file is
//! opened in its place. Older segments are pruned when a backup count is set.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

use crate::config::LogConfig;
use crate::error::Error;

const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// A log file that rotates itself once it reaches `max_size` bytes.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_size: u64,
    max_backups: Option<usize>,
    file: File,
    size: u64,
}

impl RotatingFile {
    /// Opens (or creates) `path` for appending, creating parent directories.
    pub fn open(path: impl Into<PathBuf>, max_size: u64) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            max_size,
            max_backups: None,
            file,
            size,
        })
    }

    /// Keeps at most `max_backups` rotated segments.
    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = Some(max_backups);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rotated segments belonging to this file, oldest first.
    pub fn backups(&self) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .segments()?
            .into_iter()
            .map(|(_, path)| path)
            .collect())
    }

    /// Backups with their sort key. Only names of the form
    /// `<stem>-<timestamp>[_n]<ext>` count; anything else is left alone.
    fn segments(&self) -> io::Result<Vec<(BackupKey, PathBuf)>> {
        let (stem, ext) = self.name_parts();
        let prefix = format!("{stem}-");

        let mut segments = Vec::new();
        for entry in fs::read_dir(self.dir())? {
            let path = entry?.path();
            if path == self.path {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let key = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(&ext))
                .and_then(parse_backup);
            if let Some(key) = key {
                segments.push((key, path));
            }
        }
        segments.sort();
        Ok(segments)
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn name_parts(&self) -> (String, String) {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        (stem, ext)
    }

    /// Next free backup name for `at`. Segments rotated within the same
    /// millisecond get a counter one past the highest already on disk, so a
    /// newer segment never sorts before an older one.
    fn backup_path(&self, at: DateTime<Utc>) -> io::Result<PathBuf> {
        let (stem, ext) = self.name_parts();
        let stamp = at.format(BACKUP_TIME_FORMAT).to_string();
        let dir = self.dir();

        let taken = self
            .segments()?
            .into_iter()
            .filter(|((time, _), _)| time.format(BACKUP_TIME_FORMAT).to_string() == stamp)
            .map(|((_, n), _)| n)
            .max();
        let mut n = taken.map_or(0, |n| n.saturating_add(1));

        loop {
            let candidate = if n == 0 {
                dir.join(format!("{stem}-{stamp}{ext}"))
            } else {
                dir.join(format!("{stem}-{stamp}_{n}{ext}"))
            };
            if !candidate.exists() {
                return Ok(candidate);
            }
            n = n.saturating_add(1);
        }
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.rotate_at(Utc::now())
    }

    fn rotate_at(&mut self, at: DateTime<Utc>) -> io::Result<()> {
        self.file.flush()?;
        fs::rename(&self.path, self.backup_path(at)?)?;
        self.file = open_append(&self.path)?;
        self.size = 0;
        self.prune()
    }

    fn prune(&self) -> io::Result<()> {
        let Some(keep) = self.max_backups else {
            return Ok(());
        };
        let backups = self.backups()?;
        let excess = backups.len().saturating_sub(keep);
        for old in &backups[..excess] {
            fs::remove_file(old)?;
        }
        Ok(())
    }
}

/// Rotation time, then the same-millisecond counter.
type BackupKey = (NaiveDateTime, u32);

/// Parses the part of a backup name between `<stem>-` and `<ext>`.
fn parse_backup(middle: &str) -> Option<BackupKey> {
    let (stamp, n) = match middle.split_once('_') {
        Some((stamp, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
            (stamp, n.parse().ok()?)
        }
        Some(_) => return None,
        None => (middle, 0),
    };
    let time = NaiveDateTime::parse_from_str(stamp, BACKUP_TIME_FORMAT).ok()?;
    Some((time, n))
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.size > 0 && self.size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let written = self.file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Builds a JSON formatting subscriber for `config`, wrapped in a
/// [`Dispatch`] so it can be scoped to one client.
pub fn json_dispatch(config: &LogConfig) -> Result<Dispatch, Error> {
    let level = LevelFilter::from_str(&config.level)
        .map_err(|e| Error::Config(format!("log.level {:?}: {}", config.level, e)))?;

    let mut file = RotatingFile::open(&config.path, config.max_size_bytes())?;
    if let Some(max_backups) = config.max_backups {
        file = file.with_max_backups(max_backups);
    }

    let file = Mutex::new(file);
    let writer = if config.stdout {
        BoxMakeWriter::new(file.and(io::stdout))
    } else {
        BoxMakeWriter::new(file)
    };

    let subscriber = tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_max_level(level)
        .with_writer(writer)
        .finish();

    Ok(Dispatch::new(subscriber))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/bca.log");
        let file = RotatingFile::open(&path, 1024).unwrap();
        assert!(path.exists());
        assert_eq!(file.path(), path);
    }

    #[test]
    fn test_rotates_when_size_cap_would_be_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bca.log");
        let mut file = RotatingFile::open(&path, 32).unwrap();

        file.write_all(b"0123456789012345678901234\n").unwrap();
        assert!(file.backups().unwrap().is_empty());

        file.write_all(b"second line\n").unwrap();
        let backups = file.backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(
            fs::read_to_string(&backups[0]).unwrap(),
            "0123456789012345678901234\n"
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "second line\n");
    }

    #[test]
    fn test_oversized_write_lands_in_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bca.log");
        let mut file = RotatingFile::open(&path, 4).unwrap();
        file.write_all(b"longer than the cap\n").unwrap();
        assert!(file.backups().unwrap().is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "longer than the cap\n");
    }

    #[test]
    fn test_existing_size_counts_towards_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bca.log");
        fs::write(&path, "already twenty bytes").unwrap();

        let mut file = RotatingFile::open(&path, 24).unwrap();
        file.write_all(b"more\n").unwrap();
        assert_eq!(file.backups().unwrap().len(), 1);
    }

    #[test]
    fn test_prunes_old_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bca.log");
        let mut file = RotatingFile::open(&path, 8).unwrap().with_max_backups(2);

        for i in 0..6 {
            file.write_all(format!("line {i}\n").as_bytes()).unwrap();
        }

        let backups = file.backups().unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(fs::read_to_string(&backups[1]).unwrap(), "line 4\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "line 5\n");
    }

    #[test]
    fn test_rotations_within_one_millisecond_keep_newest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bca.log");
        let mut file = RotatingFile::open(&path, 1024).unwrap().with_max_backups(2);
        let at = Utc::now();

        for i in 0..5 {
            file.write_all(format!("segment {i}\n").as_bytes()).unwrap();
            file.rotate_at(at).unwrap();
        }

        let backups = file.backups().unwrap();
        let contents: Vec<_> = backups
            .iter()
            .map(|b| fs::read_to_string(b).unwrap())
            .collect();
        assert_eq!(contents, ["segment 3\n", "segment 4\n"]);
    }

    #[test]
    fn test_parse_backup_orders_collisions_after_base_name() {
        let mut names = vec![
            "2024-01-02T03-04-05.006_2",
            "2024-01-02T03-04-05.007",
            "2024-01-02T03-04-05.006",
            "2024-01-02T03-04-05.006_10",
            "2024-01-02T03-04-05.006_1",
        ];
        names.sort_by_key(|n| parse_backup(n).unwrap());
        assert_eq!(
            names,
            [
                "2024-01-02T03-04-05.006",
                "2024-01-02T03-04-05.006_1",
                "2024-01-02T03-04-05.006_2",
                "2024-01-02T03-04-05.006_10",
                "2024-01-02T03-04-05.007",
            ]
        );
    }

    #[test]
    fn test_parse_backup_rejects_other_names() {
        for middle in [
            "archive",
            "server",
            "2024-01-02",
            "2024-01-02T03-04-05.006_x",
            "2024-01-02T03-04-05.006_",
        ] {
            assert_eq!(parse_backup(middle), None, "{middle}");
        }
    }

    #[test]
    fn test_unrelated_files_are_not_backups() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("other.log"), "x").unwrap();
        fs::write(dir.path().join("bca.txt"), "x").unwrap();
        fs::write(dir.path().join("bca-archive.log"), "x").unwrap();
        let file = RotatingFile::open(dir.path().join("bca.log"), 8).unwrap();
        assert!(file.backups().unwrap().is_empty());
    }

    #[test]
    fn test_pruning_spares_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bca-archive.log");
        let server = dir.path().join("bca-server.log");
        fs::write(&archive, "keep me").unwrap();
        fs::write(&server, "keep me").unwrap();

        let mut file = RotatingFile::open(dir.path().join("bca.log"), 8)
            .unwrap()
            .with_max_backups(1);
        for i in 0..4 {
            file.write_all(format!("line {i}\n").as_bytes()).unwrap();
        }

        assert_eq!(file.backups().unwrap().len(), 1);
        assert_eq!(fs::read_to_string(&archive).unwrap(), "keep me");
        assert_eq!(fs::read_to_string(&server).unwrap(), "keep me");
    }

    #[test]
    fn test_json_dispatch_rotates_and_keeps_lines_whole() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            path: dir.path().join("bca.log"),
            max_size_mb: 1,
            max_backups: Some(1),
            stdout: false,
            ..LogConfig::default()
        };
        let dispatch = json_dispatch(&config).unwrap();
        let padding = "x".repeat(400);

        tracing::dispatcher::with_default(&dispatch, || {
            for i in 0..4000 {
                tracing::info!(attempt = i, "{}", padding);
            }
        });

        let file = RotatingFile::open(&config.path, config.max_size_bytes()).unwrap();
        let backups = file.backups().unwrap();
        assert_eq!(backups.len(), 1);

        for segment in backups.iter().chain([&config.path]) {
            let written = fs::read_to_string(segment).unwrap();
            assert!(written.len() as u64 <= config.max_size_bytes());
            for line in written.lines() {
                let entry: serde_json::Value = serde_json::from_str(line).unwrap();
                assert_eq!(entry["level"], "INFO");
            }
        }
    }

    #[test]
    fn test_json_dispatch_tees_to_stdout_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            path: dir.path().join("bca.log"),
            stdout: true,
            ..LogConfig::default()
        };
        let dispatch = json_dispatch(&config).unwrap();
        tracing::dispatcher::with_default(&dispatch, || {
            tracing::warn!(session_id = "s-1", "teed entry");
        });

        let written = fs::read_to_string(&config.path).unwrap();
        let entry: serde_json::Value = serde_json::from_str(written.trim_end()).unwrap();
        assert_eq!(entry["message"], "teed entry");
        assert_eq!(entry["session_id"], "s-1");
    }

    #[test]
    fn test_json_dispatch_rejects_unknown_level() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            path: dir.path().join("bca.log"),
            level: "loud".into(),
            stdout: false,
            ..LogConfig::default()
        };
        assert!(matches!(json_dispatch(&config), Err(Error::Config(_))));
    }
}
