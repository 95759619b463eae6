use std::path::PathBuf;

use walkdir::WalkDir;

use crate::version::AssemblyVersion;

/// Overrides the cache roots; used by tests and by hosts with relocated
/// caches.
pub const GAC_ROOT_ENV: &str = "VCLOSURE_GAC_ROOT";

/// Look a simple assembly name up in the machine-wide cache, returning the
/// highest installed version. Every probe failure means "absent".
pub fn cache_lookup(name: &str) -> Option<AssemblyVersion> {
    let file_name = format!("{name}.dll");
    let mut best: Option<AssemblyVersion> = None;
    for root in cache_roots() {
        let base = root.join(name);
        if !base.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&base).sort_by_file_name().into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            if !entry
                .file_name()
                .to_string_lossy()
                .eq_ignore_ascii_case(&file_name)
            {
                continue;
            }
            let Ok(raw) = vclosure_pe::parse_assembly(entry.path()) else {
                continue;
            };
            if !raw.name.eq_ignore_ascii_case(name) {
                continue;
            }
            let version = AssemblyVersion::from_quad(raw.version);
            if best.map_or(true, |b| version > b) {
                best = Some(version);
            }
        }
    }
    best
}

fn cache_roots() -> Vec<PathBuf> {
    if let Some(root) = std::env::var_os(GAC_ROOT_ENV) {
        return vec![PathBuf::from(root)];
    }
    let mut roots = Vec::new();
    if cfg!(windows) {
        if let Some(windir) = std::env::var_os("WINDIR") {
            let windir = PathBuf::from(windir);
            for sub in ["GAC_MSIL", "GAC_64", "GAC_32"] {
                roots.push(windir.join("Microsoft.NET").join("assembly").join(sub));
                roots.push(windir.join("assembly").join(sub));
            }
        }
    } else {
        roots.push(PathBuf::from("/usr/lib/mono/gac"));
        roots.push(PathBuf::from("/usr/local/lib/mono/gac"));
    }
    roots
}
