use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

mod baseline;
mod gac;
mod identity;
mod ignore;
mod registry;
mod report;
mod resolver;
mod version;

#[derive(Parser, Debug)]
#[command(name = "vclosure")]
#[command(about = "Verify that a build output carries a closed set of assembly dependencies.", long_about = None)]
#[command(version)]
struct Cli {
    /// Assembly files to check, plus at most one directory to scan
    /// recursively.
    #[arg(value_name = "PATH", required = true)]
    inputs: Vec<PathBuf>,

    /// Fall back to the machine-wide assembly cache for unresolved
    /// references.
    #[arg(long)]
    check_gac: bool,

    /// Skip the platform-invoke native-import check.
    #[arg(long)]
    no_check_pinvokes: bool,

    /// File of accepted error lines to suppress, one per line.
    #[arg(long, value_name = "PATH")]
    baseline_file: Option<PathBuf>,

    /// Names to exempt from checking: `name[,version]` entries separated
    /// by `;`. A version caps how far the exemption reaches.
    #[arg(long, value_name = "LIST")]
    ignore: Option<String>,

    /// Emit a machine-readable JSON report instead of per-line output.
    #[arg(long)]
    json: bool,
}

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();

    let policy = match &cli.ignore {
        Some(list) => ignore::IgnorePolicy::parse(list)?,
        None => ignore::IgnorePolicy::default(),
    };

    let mut registry = registry::Registry::default();
    let mut scanned_root: Option<PathBuf> = None;
    for input in &cli.inputs {
        if input.is_file() {
            registry.add_explicit_file(input)?;
        } else if input.is_dir() {
            if let Some(previous) = &scanned_root {
                anyhow::bail!(
                    "invalid arguments: only one directory is allowed, got {} and {}",
                    previous.display(),
                    input.display()
                );
            }
            scanned_root = Some(input.clone());
            registry.scan_directory(input, &policy)?;
        } else {
            anyhow::bail!("input path does not exist: {}", input.display());
        }
    }

    let baseline = baseline::BaselineSet::load(cli.baseline_file.as_deref())?;
    let mut errors = report::ErrorSet::new(baseline);

    let options = resolver::ResolveOptions {
        check_cache: cli.check_gac,
        check_native_imports: !cli.no_check_pinvokes,
    };
    resolver::resolve(&registry, &policy, &options, &mut errors);

    let mut stdout = std::io::stdout();
    if cli.json {
        report::write_json_report(&registry, &errors, &mut stdout)?;
    } else {
        report::write_errors(&errors, &mut stdout)?;
    }

    Ok(if errors.is_empty() {
        std::process::ExitCode::SUCCESS
    } else {
        std::process::ExitCode::from(1)
    })
}
