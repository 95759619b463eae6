use std::collections::BTreeMap;

use anyhow::{Context, Result};

use crate::identity::Identity;
use crate::version::AssemblyVersion;

/// Names exempt from closure checking, each with an optional version
/// ceiling. A ceiling-less entry ignores the name outright.
#[derive(Debug, Default)]
pub struct IgnorePolicy {
    entries: BTreeMap<String, Option<AssemblyVersion>>,
}

impl IgnorePolicy {
    /// Parse a `name1[,ver1];name2[,ver2];...` list.
    pub fn parse(list: &str) -> Result<IgnorePolicy> {
        let mut policy = IgnorePolicy::default();
        for entry in list.split(';') {
            let id = Identity::parse(entry).with_context(|| format!("--ignore entry {entry:?}"))?;
            if policy.entries.insert(id.name.clone(), id.version).is_some() {
                anyhow::bail!("--ignore lists {:?} more than once", id.name);
            }
        }
        Ok(policy)
    }

    /// A dependency is exempt iff its name is listed and the ceiling, when
    /// present, is at or above the required version.
    pub fn is_ignored(&self, name: &str, required: Option<&AssemblyVersion>) -> bool {
        match self.entries.get(name) {
            None => false,
            Some(None) => true,
            Some(Some(ceiling)) => match required {
                None => true,
                Some(required) => ceiling >= required,
            },
        }
    }

    pub fn is_ignored_ref(&self, reference: &Identity) -> bool {
        self.is_ignored(&reference.name, reference.version.as_ref())
    }
}
