use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::baseline::BaselineSet;
use crate::registry::Registry;
use crate::version::AssemblyVersion;

pub const CLOSURE_REPORT_SCHEMA_VERSION: &str = "vclosure.report@0.1.0";

/// One closure violation. `Display` is both the reported line and the text
/// baselines are matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosureError {
    Missing {
        assembly: String,
        dependency: String,
        required: AssemblyVersion,
    },
    InsufficientVersion {
        dependency: String,
        found: AssemblyVersion,
        required: AssemblyVersion,
    },
    MissingNativeImport {
        assembly: String,
        module: String,
    },
}

impl fmt::Display for ClosureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosureError::Missing {
                assembly,
                dependency,
                required,
            } => write!(f, "{assembly} is missing {dependency}, {required}"),
            ClosureError::InsufficientVersion {
                dependency,
                found,
                required,
            } => write!(f, "Insufficient version: {dependency}, {found} < {required}"),
            ClosureError::MissingNativeImport { assembly, module } => {
                write!(f, "{assembly} is missing native assembly {module}")
            }
        }
    }
}

/// Deduplicating violation accumulator; baseline suppression happens at
/// insertion, so suppressed errors never reach the set or the report.
#[derive(Debug)]
pub struct ErrorSet {
    baseline: BaselineSet,
    errors: BTreeSet<String>,
    suppressed: u64,
}

impl ErrorSet {
    pub fn new(baseline: BaselineSet) -> ErrorSet {
        ErrorSet {
            baseline,
            errors: BTreeSet::new(),
            suppressed: 0,
        }
    }

    pub fn insert(&mut self, error: ClosureError) {
        let text = error.to_string();
        let text = text.trim();
        if self.baseline.contains(text) {
            self.suppressed += 1;
            return;
        }
        self.errors.insert(text.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(String::as_str)
    }
}

#[derive(Debug, Serialize)]
struct ClosureReport<'a> {
    schema_version: &'static str,
    ok: bool,
    assemblies: u64,
    native_modules: u64,
    errors: Vec<&'a str>,
    suppressed: u64,
}

/// One tab-prefixed line per surviving error, in set order.
pub fn write_errors(errors: &ErrorSet, out: &mut impl Write) -> Result<()> {
    for error in errors.iter() {
        writeln!(out, "\t{error}").context("write stdout")?;
    }
    Ok(())
}

pub fn write_json_report(registry: &Registry, errors: &ErrorSet, out: &mut impl Write) -> Result<()> {
    let report = ClosureReport {
        schema_version: CLOSURE_REPORT_SCHEMA_VERSION,
        ok: errors.is_empty(),
        assemblies: registry.managed_count() as u64,
        native_modules: registry.native_count() as u64,
        errors: errors.iter().collect(),
        suppressed: errors.suppressed(),
    };
    let mut bytes = serde_json::to_vec(&report)?;
    bytes.push(b'\n');
    out.write_all(&bytes).context("write stdout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn v(text: &str) -> AssemblyVersion {
        AssemblyVersion::parse(text).unwrap()
    }

    fn missing(assembly: &str, dependency: &str, required: &str) -> ClosureError {
        ClosureError::Missing {
            assembly: assembly.to_string(),
            dependency: dependency.to_string(),
            required: v(required),
        }
    }

    #[test]
    fn formats_each_kind_verbatim() {
        assert_eq!(
            missing("App", "Contoso.Data", "4.0.0.0").to_string(),
            "App is missing Contoso.Data, 4.0.0.0"
        );
        assert_eq!(
            ClosureError::InsufficientVersion {
                dependency: "B".to_string(),
                found: v("1.5.0.0"),
                required: v("2.0.0.0"),
            }
            .to_string(),
            "Insufficient version: B, 1.5.0.0 < 2.0.0.0"
        );
        assert_eq!(
            ClosureError::MissingNativeImport {
                assembly: "App".to_string(),
                module: "sqlite3".to_string(),
            }
            .to_string(),
            "App is missing native assembly sqlite3"
        );
    }

    #[test]
    fn deduplicates_identical_errors() {
        let mut errors = ErrorSet::new(BaselineSet::default());
        errors.insert(missing("App", "B", "1.0"));
        errors.insert(missing("App", "B", "1.0"));
        assert_eq!(errors.iter().count(), 1);
    }

    #[test]
    fn suppresses_baselined_errors_at_insertion() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("vclosure_report_baseline_{}", std::process::id()));
        std::fs::write(&path, "app is missing b, 1.0  \n").unwrap();
        let baseline = BaselineSet::load(Some(Path::new(&path))).unwrap();
        let _ = std::fs::remove_file(&path);

        let mut errors = ErrorSet::new(baseline);
        errors.insert(missing("App", "B", "1.0"));
        errors.insert(missing("App", "C", "1.0"));
        assert_eq!(errors.suppressed(), 1);
        assert_eq!(errors.iter().collect::<Vec<_>>(), vec!["App is missing C, 1.0"]);
    }

    #[test]
    fn writes_tab_prefixed_lines() {
        let mut errors = ErrorSet::new(BaselineSet::default());
        errors.insert(missing("App", "C", "1.0"));
        errors.insert(missing("App", "B", "1.0"));

        let mut out = Vec::new();
        write_errors(&errors, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\tApp is missing B, 1.0\n\tApp is missing C, 1.0\n"
        );
    }
}
