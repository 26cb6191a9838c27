use anyhow::Context;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::Result;

/// Persistent record of tweet ids already handled
///
/// Ids are committed once a tweet reaches a terminal state, so each tweet
/// gets at most one processing attempt across restarts.
#[derive(Debug)]
pub struct SeenSet {
    ids: HashSet<u64>,
    path: PathBuf,
}

impl SeenSet {
    /// Load the set from disk; a missing file starts an empty set
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ids = match fs_err::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<u64>>(&raw) {
                Ok(list) => list.into_iter().collect(),
                Err(e) => {
                    tracing::warn!("ignoring corrupt seen-tweets file {}: {e}", path.display());
                    HashSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        Ok(Self { ids, path })
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// Record an id and persist the set immediately
    pub fn insert(&mut self, id: u64) -> Result<()> {
        if self.ids.insert(id) {
            self.persist()?;
        }
        Ok(())
    }

    /// Highest id recorded so far, used as the polling cursor
    pub fn last_seen_id(&self) -> Option<u64> {
        self.ids.iter().copied().max()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::create_dir_all(parent)?;
            }
        }

        // Sorted output keeps the file diffable across runs
        let mut list: Vec<u64> = self.ids.iter().copied().collect();
        list.sort_unstable();

        let json = serde_json::to_string_pretty(&list)?;
        fs_err::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        Ok(())
    }
}
