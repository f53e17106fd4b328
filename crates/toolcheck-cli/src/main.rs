//! `tool-compliance` entry point
//!
//! Scans every tool package under a tools root (or one package) and writes
//! JSON and Markdown compliance reports. Exits non-zero when any check fails.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toolcheck_core::RulesRegistry;
use toolcheck_runtime::{parse_venv_map, Report, ReportBuilder, ScanOptions};

#[derive(Parser)]
#[command(name = "tool-compliance")]
#[command(about = "Check tool packages against the integration contract")]
#[command(version)]
struct Cli {
    /// Scan only this tool package
    tool_path: Option<PathBuf>,

    /// Project root
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Directory holding tool packages, relative to the project root
    #[arg(long, default_value = "src/tools")]
    tools_root: PathBuf,

    /// JSON report path, relative to the project root
    #[arg(long, default_value = "docs/tool_compliance_report.json")]
    out_json: PathBuf,

    /// Markdown report path, relative to the project root
    #[arg(long, default_value = "docs/tool_compliance_report.md")]
    out_md: PathBuf,

    /// Re-run `make analyze` for each tool
    #[arg(long)]
    run_analysis: bool,

    /// Re-run `make evaluate` for each tool
    #[arg(long)]
    run_evaluate: bool,

    /// Re-run `make evaluate-llm` for each tool
    #[arg(long)]
    run_llm: bool,

    /// Python venv exported to make (default: <root>/.venv when present)
    #[arg(long)]
    venv: Option<PathBuf>,

    /// Per-tool venv overrides: name=path,name=path
    #[arg(long)]
    venv_map: Option<String>,

    /// Only structure, make, schema and docs checks
    #[arg(long)]
    preflight: bool,

    /// Print failures only; skip reports for a single tool
    #[arg(long)]
    quiet: bool,

    /// Load rules from this directory instead of the bundled set
    #[arg(long)]
    rules_dir: Option<PathBuf>,
}

fn under(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// `path` as given, else relative to the project root.
fn resolve_tool_path(root: &Path, path: &Path) -> anyhow::Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    let under_root = root.join(path);
    if !under_root.exists() {
        bail!("Tool path not found: {}", path.display());
    }
    Ok(under_root)
}

fn print_failures(report: &Report) {
    for (tool, check) in report.failures() {
        eprintln!("FAIL: {} - {}: {}", tool, check.check_id, check.message);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "error" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let root = cli.root.clone();
    let rules = match &cli.rules_dir {
        Some(dir) => RulesRegistry::from_dir(dir)
            .with_context(|| format!("Failed to load rules from {}", dir.display()))?,
        None => RulesRegistry::embedded().context("Failed to load bundled rules")?,
    };

    let venv = cli.venv.clone().or_else(|| {
        let candidate = root.join(".venv");
        candidate.exists().then_some(candidate)
    });
    let options = ScanOptions {
        run_analysis: cli.run_analysis,
        run_evaluate: cli.run_evaluate,
        run_llm: cli.run_llm,
        venv,
        preflight: cli.preflight,
    };
    let venv_map = cli.venv_map.as_deref().map(parse_venv_map).unwrap_or_default();
    let builder = ReportBuilder::new(&rules, options)
        .venv_map(venv_map)
        .project_root(&root);

    let single = cli.tool_path.is_some();
    let report = match &cli.tool_path {
        Some(path) => {
            builder.build_single(&resolve_tool_path(&root, path)?)
        }
        None => {
            let tools_root = under(&root, &cli.tools_root);
            if !tools_root.is_dir() {
                bail!("Tools root not found: {}", tools_root.display());
            }
            builder.build(&tools_root)?
        }
    };

    if !(cli.quiet && single) {
        let out_json = under(&root, &cli.out_json);
        let out_md = under(&root, &cli.out_md);
        report.write_json(&out_json)?;
        report.write_markdown(&out_md)?;
        tracing::info!(json = %out_json.display(), markdown = %out_md.display(), "Reports written");
    }

    if cli.quiet {
        print_failures(&report);
    } else {
        println!(
            "Tool compliance: {} tools, {} passed, {} failed",
            report.summary.tool_count, report.summary.passed, report.summary.failed
        );
    }

    std::process::exit(if report.all_passed() { 0 } else { 1 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["tool-compliance"]);
        assert_eq!(cli.tools_root, PathBuf::from("src/tools"));
        assert_eq!(cli.out_json, PathBuf::from("docs/tool_compliance_report.json"));
        assert_eq!(cli.out_md, PathBuf::from("docs/tool_compliance_report.md"));
        assert!(cli.tool_path.is_none());
        assert!(!cli.run_analysis && !cli.preflight && !cli.quiet);
    }

    #[test]
    fn test_single_tool_flags() {
        let cli = Cli::parse_from([
            "tool-compliance",
            "src/tools/scc",
            "--quiet",
            "--preflight",
            "--venv-map",
            "scc=/opt/scc-venv",
        ]);
        assert_eq!(cli.tool_path, Some(PathBuf::from("src/tools/scc")));
        assert!(cli.quiet && cli.preflight);
        assert_eq!(cli.venv_map.as_deref(), Some("scc=/opt/scc-venv"));
    }

    #[test]
    fn test_missing_tool_path_is_error() {
        let err = resolve_tool_path(Path::new("/nonexistent/root"), Path::new("src/tools/nope")).unwrap_err();
        assert_eq!(err.to_string(), "Tool path not found: src/tools/nope");

        let root = std::env::temp_dir();
        let found = resolve_tool_path(&root, &root).unwrap();
        assert_eq!(found, root);
    }

    #[test]
    fn test_relative_paths_resolve_under_root() {
        let root = Path::new("/work/project");
        assert_eq!(under(root, Path::new("docs/r.json")), root.join("docs/r.json"));
        assert_eq!(under(root, Path::new("/tmp/r.json")), PathBuf::from("/tmp/r.json"));
    }
}
