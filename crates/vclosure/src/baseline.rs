use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};

/// Previously accepted error lines. Matching is trim- and case-insensitive
/// but otherwise exact.
#[derive(Debug, Default)]
pub struct BaselineSet {
    accepted: BTreeSet<String>,
}

impl BaselineSet {
    /// Load from an optional path; a missing file means an empty baseline.
    pub fn load(path: Option<&Path>) -> Result<BaselineSet> {
        let Some(path) = path else {
            return Ok(BaselineSet::default());
        };
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BaselineSet::default())
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read baseline {}", path.display()))
            }
        };
        let accepted = text
            .lines()
            .map(normalize)
            .filter(|line| !line.is_empty())
            .collect();
        Ok(BaselineSet { accepted })
    }

    pub fn contains(&self, error: &str) -> bool {
        self.accepted.contains(&normalize(error))
    }
}

fn normalize(line: &str) -> String {
    line.trim().to_lowercase()
}
