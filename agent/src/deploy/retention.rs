//! Selection of obsolete deployment directories

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::SystemTime;

/// A deployment directory and when it was created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionCandidate {
    pub path: PathBuf,
    pub created: SystemTime,
}

impl RetentionCandidate {
    pub fn new(path: impl Into<PathBuf>, created: SystemTime) -> Self {
        Self {
            path: path.into(),
            created,
        }
    }
}

impl From<(PathBuf, SystemTime)> for RetentionCandidate {
    fn from((path, created): (PathBuf, SystemTime)) -> Self {
        Self { path, created }
    }
}

/// Directories to delete so that, besides the protected ones, only the
/// `retain_count` most recently created remain
pub fn directories_to_delete(
    candidates: &[RetentionCandidate],
    protected: &BTreeSet<PathBuf>,
    retain_count: usize,
) -> BTreeSet<PathBuf> {
    let mut ordered: Vec<&RetentionCandidate> = candidates
        .iter()
        .filter(|c| !protected.contains(&c.path))
        .collect();
    ordered.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.path.cmp(&b.path)));

    ordered
        .into_iter()
        .skip(retain_count)
        .map(|c| c.path.clone())
        .collect()
}
