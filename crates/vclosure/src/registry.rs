use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::identity::Identity;
use crate::ignore::IgnorePolicy;
use crate::version::AssemblyVersion;

/// Metadata of one managed assembly as produced by the reader boundary,
/// plus the file it was parsed from.
#[derive(Debug, Clone)]
pub struct AssemblyDescriptor {
    pub name: String,
    pub version: AssemblyVersion,
    pub references: Vec<Identity>,
    pub path: PathBuf,
}

impl AssemblyDescriptor {
    fn from_raw(raw: vclosure_pe::RawAssembly, path: &Path) -> AssemblyDescriptor {
        AssemblyDescriptor {
            name: raw.name,
            version: AssemblyVersion::from_quad(raw.version),
            references: raw
                .references
                .into_iter()
                .map(|r| Identity {
                    name: r.name,
                    version: Some(AssemblyVersion::from_quad(r.version)),
                })
                .collect(),
            path: path.to_path_buf(),
        }
    }
}

/// Everything known about the build output: managed assemblies by name
/// (highest version wins) and the lowercase names of native binaries found
/// during the scan.
#[derive(Debug, Default)]
pub struct Registry {
    managed: BTreeMap<String, AssemblyDescriptor>,
    native: BTreeSet<String>,
}

impl Registry {
    /// Insert an explicitly-supplied descriptor. A duplicate name across
    /// explicit inputs is a configuration error.
    pub fn add_explicit(&mut self, descriptor: AssemblyDescriptor) -> Result<()> {
        if self.managed.contains_key(&descriptor.name) {
            anyhow::bail!(
                "duplicate assembly: {:?} was supplied more than once",
                descriptor.name
            );
        }
        self.managed.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Parse an explicit file input and insert it. Files that are not
    /// managed images are skipped; the native set is scan-only.
    pub fn add_explicit_file(&mut self, path: &Path) -> Result<()> {
        match vclosure_pe::parse_assembly(path) {
            Ok(raw) => self.add_explicit(AssemblyDescriptor::from_raw(raw, path)),
            Err(vclosure_pe::PeError::NotManagedImage | vclosure_pe::PeError::Malformed(_)) => {
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    /// Recursively scan `root` in sorted order, keeping the highest version
    /// per name and routing unparseable files into the native set.
    pub fn scan_directory(&mut self, root: &Path, policy: &IgnorePolicy) -> Result<()> {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.with_context(|| format!("scan {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdb"))
            {
                continue;
            }
            match vclosure_pe::parse_assembly(path) {
                Ok(raw) => {
                    let descriptor = AssemblyDescriptor::from_raw(raw, path);
                    if policy.is_ignored(&descriptor.name, Some(&descriptor.version)) {
                        continue;
                    }
                    match self.managed.get(&descriptor.name) {
                        Some(known) if known.version >= descriptor.version => {}
                        _ => {
                            self.managed.insert(descriptor.name.clone(), descriptor);
                        }
                    }
                }
                Err(vclosure_pe::PeError::NotManagedImage | vclosure_pe::PeError::Malformed(_)) => {
                    // Native binaries carry no managed metadata.
                    let stem = path
                        .file_stem()
                        .unwrap_or_default()
                        .to_string_lossy()
                        .to_lowercase();
                    self.native.insert(stem);
                }
                Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
            }
        }
        Ok(())
    }

    pub fn is_known_native(&self, name: &str) -> bool {
        self.native.contains(&name.to_lowercase())
    }

    pub fn lookup(&self, name: &str) -> Option<&AssemblyDescriptor> {
        self.managed.get(name)
    }

    /// All managed descriptors in name order.
    pub fn assemblies(&self) -> impl Iterator<Item = &AssemblyDescriptor> {
        self.managed.values()
    }

    pub fn managed_count(&self) -> usize {
        self.managed.len()
    }

    pub fn native_count(&self) -> usize {
        self.native.len()
    }
}
