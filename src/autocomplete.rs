//! Card-name autocomplete.
//!
//! A sorted, de-duplicated set of known card names, independent of the
//! listings themselves. Names are imported from a newline-delimited file at
//! startup or through the `import-names` command.

use crate::validation::validate_name;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Maximum number of results returned by [`CardNameIndex::search`].
pub const MAX_SEARCH_RESULTS: usize = 20;

#[derive(Debug, Default)]
pub struct CardNameIndex {
    names: RwLock<BTreeSet<String>>,
}

impl CardNameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every known name, ascending.
    pub fn all_names(&self) -> Vec<String> {
        self.names.read().iter().cloned().collect()
    }

    /// Names containing `query`, case-insensitively, ascending and capped.
    ///
    /// A blank query matches nothing.
    pub fn search(&self, query: &str) -> Vec<String> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.names
            .read()
            .iter()
            .filter(|name| name.to_lowercase().contains(&needle))
            .take(MAX_SEARCH_RESULTS)
            .cloned()
            .collect()
    }

    /// Add names, returning how many were new.
    ///
    /// Blank lines and duplicates are ignored; names that fail validation are
    /// skipped with a warning.
    pub fn import<I, S>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = self.names.write();
        let mut added = 0;
        for raw in names {
            let raw = raw.as_ref();
            if raw.trim().is_empty() {
                continue;
            }
            match validate_name(raw) {
                Ok(name) => {
                    if set.insert(name) {
                        added += 1;
                    }
                }
                Err(e) => warn!(name = %raw, error = %e, "skipping card name"),
            }
        }
        added
    }

    /// Import a newline-delimited names file.
    pub fn load_file(&self, path: &Path) -> std::io::Result<usize> {
        let content = fs::read_to_string(path)?;
        let added = self.import(content.lines());
        info!(added, total = self.len(), path = %path.display(), "imported card names");
        Ok(added)
    }

    /// Write every name to `path`, one per line, ascending.
    pub fn save_file(&self, path: &Path) -> std::io::Result<()> {
        let mut content = self.all_names().join("\n");
        content.push('\n');
        fs::write(path, content)
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
