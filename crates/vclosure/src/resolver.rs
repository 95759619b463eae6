use std::path::Path;

use crate::gac;
use crate::ignore::IgnorePolicy;
use crate::registry::{AssemblyDescriptor, Registry};
use crate::report::{ClosureError, ErrorSet};
use crate::version::AssemblyVersion;

#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    /// Consult the machine-wide cache for names the registry lacks.
    pub check_cache: bool,
    /// Verify platform-invoke imports against the native/managed sets.
    pub check_native_imports: bool,
}

impl Default for ResolveOptions {
    fn default() -> ResolveOptions {
        ResolveOptions {
            check_cache: false,
            check_native_imports: true,
        }
    }
}

enum Lookup {
    Resolved,
    Missing,
    Insufficient { found: AssemblyVersion },
}

/// Check every assembly in the registry for unresolved or under-versioned
/// dependencies, accumulating violations into `errors`.
pub fn resolve(
    registry: &Registry,
    policy: &IgnorePolicy,
    options: &ResolveOptions,
    errors: &mut ErrorSet,
) {
    for assembly in registry.assemblies() {
        check_references(registry, policy, options, assembly, errors);
        if options.check_native_imports {
            check_native_imports(registry, options, assembly, errors);
        }
    }
}

fn check_references(
    registry: &Registry,
    policy: &IgnorePolicy,
    options: &ResolveOptions,
    assembly: &AssemblyDescriptor,
    errors: &mut ErrorSet,
) {
    for reference in &assembly.references {
        if policy.is_ignored_ref(reference) {
            continue;
        }
        match lookup(registry, options, &reference.name, reference.version.as_ref()) {
            Lookup::Resolved => {}
            Lookup::Missing => errors.insert(ClosureError::Missing {
                assembly: assembly.name.clone(),
                dependency: reference.name.clone(),
                required: reference.version.unwrap_or(AssemblyVersion::ZERO),
            }),
            Lookup::Insufficient { found } => errors.insert(ClosureError::InsufficientVersion {
                dependency: reference.name.clone(),
                found,
                required: reference.version.unwrap_or(AssemblyVersion::ZERO),
            }),
        }
    }
}

/// Platform-invoke imports must resolve like any other dependency. A
/// descriptor whose backing file is gone is skipped, and a reader failure
/// on one assembly never aborts the remaining ones.
fn check_native_imports(
    registry: &Registry,
    options: &ResolveOptions,
    assembly: &AssemblyDescriptor,
    errors: &mut ErrorSet,
) {
    let path = assembly.path.as_path();
    if !path.is_file() {
        return;
    }
    let imports = match vclosure_pe::native_imports(path) {
        Ok(imports) => imports,
        Err(vclosure_pe::PeError::NotManagedImage) => return,
        Err(err) => {
            eprintln!("skipping native-import scan of {}: {err}", path.display());
            return;
        }
    };
    for import in &imports {
        let module = bare_module_name(import);
        match lookup(registry, options, module, Some(&AssemblyVersion::ZERO)) {
            Lookup::Resolved => {}
            _ => errors.insert(ClosureError::MissingNativeImport {
                assembly: assembly.name.clone(),
                module: module.to_string(),
            }),
        }
    }
}

/// Tri-source lookup: the native set is matched by name alone; the managed
/// map and the optional machine cache are version-checked.
fn lookup(
    registry: &Registry,
    options: &ResolveOptions,
    name: &str,
    required: Option<&AssemblyVersion>,
) -> Lookup {
    if registry.is_known_native(name) {
        return Lookup::Resolved;
    }
    if let Some(known) = registry.lookup(name) {
        return match required {
            Some(required) if known.version < *required => Lookup::Insufficient {
                found: known.version,
            },
            _ => Lookup::Resolved,
        };
    }
    if options.check_cache {
        if let Some(found) = gac::cache_lookup(name) {
            return match required {
                Some(required) if found < *required => Lookup::Insufficient { found },
                _ => Lookup::Resolved,
            };
        }
    }
    Lookup::Missing
}

/// Windows-style imports carry a dot-plus-three extension; Unix-style come
/// bare. Both normalize to the bare module name.
fn bare_module_name(import: &str) -> &str {
    let path = Path::new(import);
    match (path.file_stem().and_then(|s| s.to_str()), path.extension()) {
        (Some(stem), Some(ext)) if ext.len() == 3 => stem,
        _ => import,
    }
}
