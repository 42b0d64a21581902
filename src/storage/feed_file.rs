use chrono::NaiveDateTime;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FILE_PREFIX: &str = "feed_";
const FILE_SUFFIX: &str = ".csv";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const TEMP_MARKER: &str = ".tmp.";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Failed to create feeds directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write feed file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// File name for a feed downloaded at `at`: `feed_YYYYMMDD_HHMMSS.csv`.
pub fn feed_file_name(at: &NaiveDateTime) -> String {
    format!("{FILE_PREFIX}{}{FILE_SUFFIX}", at.format(TIMESTAMP_FORMAT))
}

/// Returns the timestamp embedded in a feed file name, if `name` is one.
pub fn parse_feed_file_name(name: &str) -> Option<NaiveDateTime> {
    let stamp = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    // chrono accepts variable-width fields; the name must be fixed width
    let fixed = stamp.len() == 15
        && stamp
            .char_indices()
            .all(|(i, c)| if i == 8 { c == '_' } else { c.is_ascii_digit() });
    if !fixed {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

/// Creates `dir` and any missing parents.
///
/// An existing directory is swept for temp files left by an interrupted
/// write, so they are never staged alongside real feed files.
pub fn ensure_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.is_dir() {
        remove_stale_temp_files(dir);
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|source| PersistError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %dir.display(), "Created feeds directory");
    Ok(())
}

/// True for names produced by `atomic_write`: `.feed_<stamp>.csv.tmp.<suffix>`.
fn is_temp_file_name(name: &str) -> bool {
    name.strip_prefix('.')
        .and_then(|rest| rest.split_once(TEMP_MARKER))
        .is_some_and(|(target, suffix)| {
            parse_feed_file_name(target).is_some() && !suffix.is_empty()
        })
}

/// Best effort; a file that cannot be removed is logged and left alone.
fn remove_stale_temp_files(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "Cannot scan feeds directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !is_temp_file_name(&name.to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::warn!(path = %path.display(), "Removed leftover temp file"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove leftover temp file")
            }
        }
    }
}

/// Writes `body` to a new timestamped file inside `dir` and returns its path.
///
/// The body is written verbatim. With `write_bom` a UTF-8 byte-order mark is
/// prepended unless the body already starts with one.
///
/// The write goes through a temporary file in the same directory and a
/// rename, so the feed file is never observed half-written. Two runs in the
/// same second map to the same name; the later one replaces the earlier.
pub fn write_feed(
    dir: &Path,
    body: &[u8],
    write_bom: bool,
    at: &NaiveDateTime,
) -> Result<PathBuf, PersistError> {
    ensure_dir(dir)?;

    let name = feed_file_name(at);
    let path = dir.join(&name);
    if path.exists() {
        tracing::warn!(path = %path.display(), "Feed file already exists, replacing it");
    }

    let bom: &[u8] = if write_bom && !body.starts_with(UTF8_BOM) {
        UTF8_BOM
    } else {
        &[]
    };

    atomic_write(dir, &path, &[bom, body])?;

    tracing::info!(
        path = %path.display(),
        bytes = bom.len() + body.len(),
        bom = !bom.is_empty(),
        "Feed file written"
    );
    Ok(path)
}

fn atomic_write(dir: &Path, dst: &Path, parts: &[&[u8]]) -> Result<(), PersistError> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let write_err = |source| PersistError::Write {
        path: dst.to_path_buf(),
        source,
    };

    // Unpredictable temp name so a pre-placed symlink cannot be followed
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let file_name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = dir.join(format!(".{file_name}{TEMP_MARKER}{random_suffix:016x}"));

    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .map_err(write_err)?;

    let written = parts
        .iter()
        .try_for_each(|part| temp_file.write_all(part))
        .and_then(|()| temp_file.sync_all());
    drop(temp_file);

    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(write_err(e));
    }

    // On Windows, rename fails if destination exists, so remove it first
    #[cfg(windows)]
    if dst.exists() {
        if let Err(e) = std::fs::remove_file(dst) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(write_err(e));
        }
    }

    std::fs::rename(&temp_path, dst).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        write_err(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_file_name_format() {
        assert_eq!(feed_file_name(&at(9, 5, 3)), "feed_20240307_090503.csv");
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(parse_feed_file_name("feed_20240307_090503.csv").is_some());
        assert!(parse_feed_file_name("feed_2024037_090503.csv").is_none());
        assert!(parse_feed_file_name("feed_20240307-090503.csv").is_none());
        assert!(parse_feed_file_name("feed_20241307_090503.csv").is_none());
        assert!(parse_feed_file_name("notes.csv").is_none());
        assert!(parse_feed_file_name("feed_20240307_090503.csv.tmp").is_none());
    }

    #[test]
    fn test_write_round_trips_body() {
        let dir = tempfile::tempdir().unwrap();
        let body = "indicator,risk\n203.0.113.7,high\n".as_bytes();

        let path = write_feed(dir.path(), body, false, &at(12, 0, 0)).unwrap();

        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(std::fs::read(&path).unwrap(), body);
    }

    #[test]
    fn test_write_keeps_non_utf8_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let body = [0x69, 0x70, 0x2c, 0xff, 0xfe, 0x0a];
        let path = write_feed(dir.path(), &body, false, &at(12, 0, 1)).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), body);
    }

    #[test]
    fn test_write_with_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_feed(dir.path(), b"a,b\n", true, &at(12, 0, 0)).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"\xEF\xBB\xBFa,b\n");
    }

    #[test]
    fn test_bom_not_doubled() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_feed(dir.path(), b"\xEF\xBB\xBFa,b\n", true, &at(12, 0, 0)).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"\xEF\xBB\xBFa,b\n");
    }

    #[test]
    fn test_write_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let feeds = dir.path().join("nested").join("feeds");

        let path = write_feed(&feeds, b"x\n", false, &at(1, 2, 3)).unwrap();

        assert!(feeds.is_dir());
        assert_eq!(path, feeds.join("feed_20240307_010203.csv"));
    }

    #[test]
    fn test_same_second_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        write_feed(dir.path(), b"first\n", false, &at(8, 0, 0)).unwrap();
        let path = write_feed(dir.path(), b"second\n", false, &at(8, 0, 0)).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second\n");
        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_temp_file_name_recognition() {
        assert!(is_temp_file_name(".feed_20240307_090503.csv.tmp.0000017e4c2a9f00"));
        assert!(!is_temp_file_name("feed_20240307_090503.csv"));
        assert!(!is_temp_file_name(".feed_20240307_090503.csv.tmp."));
        assert!(!is_temp_file_name(".notes.csv.tmp.0000017e4c2a9f00"));
        assert!(!is_temp_file_name(".gitkeep"));
    }

    #[test]
    fn test_ensure_dir_removes_interrupted_writes() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(".feed_20240307_090503.csv.tmp.0000017e4c2a9f00");
        std::fs::write(&stale, b"partial").unwrap();
        std::fs::write(dir.path().join("feed_20240307_090503.csv"), b"a,b\n").unwrap();
        std::fs::write(dir.path().join(".gitkeep"), b"").unwrap();

        ensure_dir(dir.path()).unwrap();

        assert!(!stale.exists());
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![".gitkeep", "feed_20240307_090503.csv"]);
    }

    #[test]
    fn test_ensure_dir_fails_when_path_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("feeds");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = ensure_dir(&blocker).unwrap_err();
        assert!(matches!(err, PersistError::CreateDir { .. }));
    }

    proptest! {
        #[test]
        fn prop_file_name_round_trips(
            year in 1970i32..2100,
            month in 1u32..=12,
            day in 1u32..=28,
            hour in 0u32..24,
            minute in 0u32..60,
            second in 0u32..60,
        ) {
            let ts = NaiveDate::from_ymd_opt(year, month, day)
                .unwrap()
                .and_hms_opt(hour, minute, second)
                .unwrap();
            let name = feed_file_name(&ts);
            prop_assert_eq!(name.len(), "feed_YYYYMMDD_HHMMSS.csv".len());
            prop_assert_eq!(parse_feed_file_name(&name), Some(ts));
        }
    }
}
