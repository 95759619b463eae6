use anyhow::{bail, Context, Result};

use crate::version::AssemblyVersion;

/// A dependency requirement: a logical name plus an optional minimum
/// version. A `None` version equals only another `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub version: Option<AssemblyVersion>,
}

impl Identity {
    /// Parse `name[,version]`, splitting on the first comma.
    pub fn parse(text: &str) -> Result<Identity> {
        let text = text.trim();
        match text.split_once(',') {
            None => {
                if text.is_empty() {
                    bail!("empty reference");
                }
                Ok(Identity {
                    name: text.to_string(),
                    version: None,
                })
            }
            Some((name, version)) => {
                let name = name.trim();
                if name.is_empty() {
                    bail!("reference has no name: {text:?}");
                }
                let version = AssemblyVersion::parse(version)
                    .with_context(|| format!("reference {text:?}"))?;
                Ok(Identity {
                    name: name.to_string(),
                    version: Some(version),
                })
            }
        }
    }
}
