//! # toolcheck-runtime
//!
//! Drives full compliance scans on top of `toolcheck-core`.
//!
//! The core crate only inspects files. This crate adds the parts that touch
//! the outside world: running a tool's build targets, locating the
//! artifacts it produced earlier, and writing the combined report.
//!
//! ## Example
//!
//! ```rust,ignore
//! use toolcheck_core::RulesRegistry;
//! use toolcheck_runtime::{ReportBuilder, ScanOptions};
//!
//! let rules = RulesRegistry::embedded()?;
//! let report = ReportBuilder::new(&rules, ScanOptions::default()).build("src/tools".as_ref())?;
//! report.write_markdown("docs/tool_compliance_report.md".as_ref())?;
//! std::process::exit(if report.all_passed() { 0 } else { 1 });
//! ```

pub mod artifacts;
pub mod make;
pub mod orchestrator;
pub mod report;

pub use artifacts::{
    find_evaluation_output, find_latest_output, find_llm_evaluation_output, Freshness,
    STALE_THRESHOLD_DAYS,
};
pub use make::{run_make, summarize_output, ExecutionError, MakeEnv, MakeOutcome};
pub use orchestrator::{ExecutionOrchestrator, ScanOptions};
pub use report::{find_tools, parse_venv_map, Report, ReportBuilder, ReportError, ReportSummary};
