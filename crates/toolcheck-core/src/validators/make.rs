//! Build-file checks.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use super::ToolContext;
use crate::model::{CheckResult, Severity};

lazy_static! {
    static ref INCLUDE_COMMON: Regex = Regex::new(r"(?m)^-?include\s+\.\./Makefile\.common").unwrap();
    static ref OUTPUT_DIR_DEF: Regex = Regex::new(r"(?m)^OUTPUT_DIR\s*\??\s*=\s*(.+)$").unwrap();
    static ref OUTPUT_DIR_CONVENTION: Regex =
        Regex::new(r"^outputs/(?:\$\(RUN_ID\)|\$\{RUN_ID\})").unwrap();
    static ref ANALYZE_RECIPE: Regex = Regex::new(r"(?m)^analyze:.*?\n((?:\t.*\n)*)").unwrap();
}

const MAKEFILE: &str = "Makefile";
const EXPECTED_OUTPUT_DIR: &str = "outputs/$(RUN_ID)";

/// Target names declared at column zero.
///
/// Indented lines (recipes) and comments are skipped; everything before
/// the first `:` of any other line counts as a target.
pub fn parse_make_targets(content: &str) -> BTreeSet<String> {
    content
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with(['\t', ' ', '#']))
        .filter_map(|line| line.split_once(':'))
        .map(|(target, _)| target.trim().to_string())
        .filter(|target| !target.is_empty())
        .collect()
}

pub struct MakefileValidator<'a> {
    ctx: &'a ToolContext<'a>,
}

impl<'a> MakefileValidator<'a> {
    pub fn new(ctx: &'a ToolContext<'a>) -> Self {
        Self { ctx }
    }

    fn read(&self, check_id: &str, severity: Severity) -> Result<String, CheckResult> {
        let path = self.ctx.path(MAKEFILE);
        if !path.exists() {
            return Err(CheckResult::fail(check_id, severity, "Makefile missing").with_evidence([MAKEFILE]));
        }
        fs::read_to_string(&path).map_err(|e| {
            CheckResult::fail(check_id, severity, "Makefile unreadable").with_evidence([e.to_string()])
        })
    }

    /// `make.targets`
    pub fn targets(&self) -> CheckResult {
        const ID: &str = "make.targets";
        let content = match self.read(ID, Severity::High) {
            Ok(c) => c,
            Err(check) => return check,
        };
        let declared = parse_make_targets(&content);
        let required: BTreeSet<&str> = self
            .ctx
            .rules
            .common()
            .required_make_targets
            .iter()
            .map(String::as_str)
            .collect();
        let missing: Vec<&str> = required
            .into_iter()
            .filter(|t| !declared.contains(*t))
            .collect();

        if missing.is_empty() {
            CheckResult::pass(ID, Severity::High, "Makefile targets present")
        } else {
            CheckResult::fail(ID, Severity::High, "Missing required Makefile targets").with_evidence(missing)
        }
    }

    /// `make.permissions`
    pub fn permissions(&self) -> CheckResult {
        const ID: &str = "make.permissions";
        let path = self.ctx.path(MAKEFILE);
        let meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => {
                return CheckResult::fail(ID, Severity::Low, "Makefile missing").with_evidence([MAKEFILE])
            }
        };
        match readable_mode(&path, &meta) {
            Ok(()) => CheckResult::pass(ID, Severity::Low, "Makefile has correct permissions"),
            Err(mode) => CheckResult::fail(ID, Severity::Low, "Makefile is not readable")
                .with_evidence([format!("Current mode: {}", mode)]),
        }
    }

    /// `make.uses_common`
    pub fn uses_common(&self) -> CheckResult {
        const ID: &str = "make.uses_common";
        let content = match self.read(ID, Severity::Medium) {
            Ok(c) => c,
            Err(check) => return check,
        };
        if INCLUDE_COMMON.is_match(&content) {
            return CheckResult::pass(ID, Severity::Medium, "Makefile includes ../Makefile.common");
        }
        CheckResult::fail(ID, Severity::Medium, "Makefile does not include ../Makefile.common").with_evidence([
            "Add: include ../Makefile.common",
            "This provides shared variables (RUN_ID, OUTPUT_DIR, VENV_READY) and common targets",
        ])
    }

    /// `make.output_dir_convention`
    pub fn output_dir_convention(&self) -> CheckResult {
        const ID: &str = "make.output_dir_convention";
        let content = match self.read(ID, Severity::Low) {
            Ok(c) => c,
            Err(check) => return check,
        };

        let Some(value) = OUTPUT_DIR_DEF
            .captures(&content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
        else {
            if INCLUDE_COMMON.is_match(&content) {
                return CheckResult::pass(ID, Severity::Low, "OUTPUT_DIR inherited from Makefile.common")
                    .with_evidence([EXPECTED_OUTPUT_DIR]);
            }
            return CheckResult::fail(ID, Severity::Low, "OUTPUT_DIR not defined")
                .with_evidence(["Add: OUTPUT_DIR ?= outputs/$(RUN_ID)"]);
        };

        if OUTPUT_DIR_CONVENTION.is_match(&value) {
            return CheckResult::pass(ID, Severity::Low, "OUTPUT_DIR follows convention").with_evidence([value]);
        }

        let mut issues = Vec::new();
        if value.contains("output/") && !value.contains("outputs/") {
            issues.push("Uses singular 'output/' instead of 'outputs/'".to_string());
        }
        if value.contains("/runs") {
            issues.push("Uses hardcoded '/runs' instead of '$(RUN_ID)'".to_string());
        }
        if !value.contains("$(RUN_ID)") && !value.contains("${RUN_ID}") {
            issues.push("Does not use $(RUN_ID) for unique output directories".to_string());
        }
        if issues.is_empty() {
            return CheckResult::pass(ID, Severity::Low, "OUTPUT_DIR defined").with_evidence([value]);
        }
        issues.push(format!("Current: {}", value));
        issues.push(format!("Expected: {}", EXPECTED_OUTPUT_DIR));
        CheckResult::fail(ID, Severity::Low, "OUTPUT_DIR does not follow convention").with_evidence(issues)
    }

    /// `make.output_filename`
    pub fn output_filename(&self) -> CheckResult {
        const ID: &str = "make.output_filename";
        let content = match self.read(ID, Severity::Medium) {
            Ok(c) => c,
            Err(check) => return check,
        };

        let Some(recipe) = ANALYZE_RECIPE.captures(&content).and_then(|c| c.get(1)) else {
            return CheckResult::fail(ID, Severity::Medium, "No analyze target found in Makefile");
        };
        let recipe = recipe.as_str();

        if recipe.contains("output.json") {
            CheckResult::pass(ID, Severity::Medium, "analyze target produces output.json")
        } else if recipe.contains("--output-dir") || recipe.contains("--output") {
            CheckResult::pass(ID, Severity::Medium, "analyze target uses output directory argument")
        } else if recipe.contains("$(REPO_NAME).json") {
            CheckResult::fail(
                ID,
                Severity::Medium,
                "analyze target uses $(REPO_NAME).json instead of output.json",
            )
            .with_evidence([
                "Non-standard: $(REPO_NAME).json",
                "Standard: output.json or --output $(OUTPUT_DIR)/output.json",
            ])
        } else {
            CheckResult::pass(ID, Severity::Medium, "analyze target output pattern acceptable")
        }
    }
}

#[cfg(unix)]
fn readable_mode(_path: &Path, meta: &fs::Metadata) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;
    let mode = meta.permissions().mode();
    if mode & 0o444 != 0 {
        Ok(())
    } else {
        Err(format!("0o{:o}", mode))
    }
}

#[cfg(not(unix))]
fn readable_mode(path: &Path, _meta: &fs::Metadata) -> Result<(), String> {
    fs::File::open(path).map(|_| ()).map_err(|e| e.to_string())
}
