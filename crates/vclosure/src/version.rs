use std::fmt;

use anyhow::{bail, Result};

/// Dotted numeric assembly version, ordered the way the runtime orders
/// them: component-wise, with an absent part ranking below a present zero
/// (`1.0 < 1.0.0 < 1.0.0.1 < 1.1`). Display keeps the part count the value
/// was built with; versions read from metadata always carry four parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssemblyVersion {
    major: u32,
    minor: u32,
    build: Option<u32>,
    revision: Option<u32>,
}

impl AssemblyVersion {
    pub const ZERO: AssemblyVersion = AssemblyVersion {
        major: 0,
        minor: 0,
        build: Some(0),
        revision: Some(0),
    };

    pub fn from_quad(quad: [u16; 4]) -> AssemblyVersion {
        AssemblyVersion {
            major: quad[0] as u32,
            minor: quad[1] as u32,
            build: Some(quad[2] as u32),
            revision: Some(quad[3] as u32),
        }
    }

    /// Parse two to four dot-separated numeric parts.
    pub fn parse(text: &str) -> Result<AssemblyVersion> {
        let text = text.trim();
        let mut parts = Vec::new();
        for part in text.split('.') {
            let Ok(part) = part.parse::<u32>() else {
                bail!("invalid version part {part:?} in {text:?}");
            };
            parts.push(part);
        }
        if parts.len() < 2 || parts.len() > 4 {
            bail!("version must have 2 to 4 dotted parts: {text:?}");
        }
        Ok(AssemblyVersion {
            major: parts[0],
            minor: parts[1],
            build: parts.get(2).copied(),
            revision: parts.get(3).copied(),
        })
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{build}")?;
        }
        if let Some(revision) = self.revision {
            write!(f, ".{revision}")?;
        }
        Ok(())
    }
}
