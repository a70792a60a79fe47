//! # Artifact Module
//!
//! Deterministic, session-labeled file names and collision-free creation.
//!
//! Every persisted artifact is named
//! `<modality>_<session>_<utc-stamp>_<base-epoch-ms>.<ext>` and paired with a
//! sibling `.json` metadata record of the same stem. Two requests landing in
//! the same millisecond for the same session would derive the same stem, so
//! creation is exclusive and retries with a numeric suffix.

use crate::clock::file_stamp_utc;
use crate::types::{Modality, NO_SESSION, TandemError};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Upper bound on suffix attempts before giving up.
const MAX_SUFFIX: u32 = 10_000;

/// Name parts of one persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub modality: Modality,
    pub session: String,
    pub base_epoch_ms: i64,
}

impl ArtifactName {
    /// Build a name; a blank session falls back to [`NO_SESSION`].
    #[must_use]
    pub fn new(modality: impl Into<Modality>, session: &str, base_epoch_ms: i64) -> Self {
        let session = sanitize(session);
        Self {
            modality: modality.into(),
            session: if session.is_empty() {
                NO_SESSION.to_string()
            } else {
                session
            },
            base_epoch_ms,
        }
    }

    /// File stem without extension.
    #[must_use]
    pub fn stem(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.modality,
            self.session,
            file_stamp_utc(self.base_epoch_ms),
            self.base_epoch_ms
        )
    }

    /// `dir/<stem>.<ext>`.
    #[must_use]
    pub fn path(&self, dir: &Path, ext: &str) -> PathBuf {
        dir.join(format!("{}.{}", self.stem(), ext))
    }
}

/// Keep ids safe to embed in a file name.
fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Exclusively create `dir/<stem>.<ext>`, falling back to `<stem>_1`, `<stem>_2`, ...
///
/// Returns the open file and the stem actually used, so the caller can
/// place the sibling metadata under the same stem.
pub fn create_unique(dir: &Path, stem: &str, ext: &str) -> Result<(File, PathBuf), TandemError> {
    std::fs::create_dir_all(dir)?;
    for n in 0..MAX_SUFFIX {
        let candidate = if n == 0 {
            dir.join(format!("{}.{}", stem, ext))
        } else {
            dir.join(format!("{}_{}.{}", stem, n, ext))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(TandemError::IoError(format!(
        "no free file name for {} after {} attempts",
        stem, MAX_SUFFIX
    )))
}

/// Sibling path with a different extension, e.g. the `.json` next to a `.csv`.
#[must_use]
pub fn sibling(path: &Path, ext: &str) -> PathBuf {
    path.with_extension(ext)
}

/// Bare file name for metadata records.
#[must_use]
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stem_layout() {
        let name = ArtifactName::new("eye", "no_4", 1_609_459_200_123);
        assert_eq!(name.stem(), "eye_no_4_2021-01-01_00-00-00.123Z_1609459200123");
    }

    #[test]
    fn blank_session_falls_back() {
        let name = ArtifactName::new("audio", "  ", 5);
        assert_eq!(name.session, NO_SESSION);
    }

    #[test]
    fn hostile_session_ids_are_sanitized() {
        let name = ArtifactName::new("eye", "../x y", 5);
        assert_eq!(name.session, ".._x_y");
        assert!(!name.stem().contains('/'));
    }

    #[test]
    fn collisions_get_numeric_suffix() {
        let dir = TempDir::new().expect("tempdir");
        let (_a, first) = create_unique(dir.path(), "eye_x", "csv").expect("first");
        let (_b, second) = create_unique(dir.path(), "eye_x", "csv").expect("second");
        let (_c, third) = create_unique(dir.path(), "eye_x", "csv").expect("third");
        assert_eq!(file_name(&first), "eye_x.csv");
        assert_eq!(file_name(&second), "eye_x_1.csv");
        assert_eq!(file_name(&third), "eye_x_2.csv");
        assert_eq!(file_name(&sibling(&second, "json")), "eye_x_1.json");
    }
}
