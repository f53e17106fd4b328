//! Per-tool scan orchestration.
//!
//! A scan has three optional execution phases (analyze, evaluate,
//! evaluate-llm) followed by the output checks and the static battery.
//! Each phase either re-runs the tool's build target in a scoped
//! temporary directory or falls back to whatever the tool produced last.
//!
//! ## Key Guarantees
//!
//! 1. **Sequential**: checks run in a fixed order on the calling thread
//! 2. **Non-fatal**: nothing a tool does can abort the scan; every problem
//!    becomes a failed check
//! 3. **Clean**: phase directories are `TempDir`s, removed on drop

use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;

use toolcheck_core::validators::evaluation::{evaluation_quality, llm_quality};
use toolcheck_core::validators::{load_json, sql_joins};
use toolcheck_core::{
    AdapterIntegrationHarness, AdapterIntrospector, CheckResult, DocsValidator,
    EntityAlignmentValidator, EvaluationArtifactValidator, MakefileValidator,
    ModelCoverageValidator, OutputContentValidator, RulesRegistry, SchemaContractValidator,
    Severity, StructuralValidator, ToolContext, ToolResult,
};

use crate::artifacts::{
    find_evaluation_output, find_latest_output, find_llm_evaluation_output, Freshness,
};
use crate::make::{make_check, ExecutionError, MakeEnv};

const TEMP_PREFIX: &str = "tool-compliance-";
const EVAL_TEMP_PREFIX: &str = "tool-compliance-eval-";

/// Which phases to re-run and how.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Re-run `make analyze` instead of using a pre-existing output
    pub run_analysis: bool,

    /// Re-run `make evaluate`
    pub run_evaluate: bool,

    /// Re-run `make evaluate-llm`
    pub run_llm: bool,

    /// Isolated Python environment exported to make and used for
    /// out-of-process schema validation
    pub venv: Option<PathBuf>,

    /// Only the structural, make, schema and docs checks
    pub preflight: bool,
}

impl ScanOptions {
    /// Same options with a different venv.
    pub fn with_venv(&self, venv: Option<PathBuf>) -> Self {
        Self {
            venv,
            ..self.clone()
        }
    }
}

/// Time `f` and attach its duration unless it recorded one itself.
fn timed(f: impl FnOnce() -> CheckResult) -> CheckResult {
    let start = Instant::now();
    let check = f();
    check.with_duration(elapsed_ms(start))
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Runs the full check battery against one tool package.
///
/// # Example
///
/// ```rust,ignore
/// let rules = RulesRegistry::embedded()?;
/// let orchestrator = ExecutionOrchestrator::new(&rules, ScanOptions::default());
/// let result = orchestrator.scan(Path::new("src/tools/scc"));
/// ```
pub struct ExecutionOrchestrator<'r> {
    rules: &'r RulesRegistry,
    options: ScanOptions,
    project_root: Option<PathBuf>,
}

/// Mutable state threaded through the phases of one scan.
struct ScanState {
    env: MakeEnv,
    output_path: Option<PathBuf>,
    checks: Vec<CheckResult>,
    /// Held until the scan ends so later phases can still read earlier output
    temp_dirs: Vec<TempDir>,
}

impl ScanState {
    fn push(&mut self, check: CheckResult) {
        self.checks.push(check);
    }

    fn temp_dir(&mut self, prefix: &str) -> Result<PathBuf, ExecutionError> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(ExecutionError::TempDir)?;
        let path = dir.path().to_path_buf();
        self.temp_dirs.push(dir);
        Ok(path)
    }
}

impl<'r> ExecutionOrchestrator<'r> {
    pub fn new(rules: &'r RulesRegistry, options: ScanOptions) -> Self {
        Self {
            rules,
            options,
            project_root: None,
        }
    }

    /// Resolve shared persistence and SQL paths against `root` rather
    /// than three levels above each tool.
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    fn context(&self, tool_root: &Path) -> ToolContext<'r> {
        match &self.project_root {
            Some(root) => ToolContext::with_project_root(tool_root, root, self.rules),
            None => ToolContext::new(tool_root, self.rules),
        }
    }

    /// Scan one tool. Preflight options short-circuit to [`Self::preflight`].
    pub fn scan(&self, tool_root: &Path) -> ToolResult {
        if self.options.preflight {
            return self.preflight(tool_root);
        }
        let ctx = self.context(tool_root);
        tracing::info!(tool = %ctx.tool_name, "Scanning tool");

        let mut state = ScanState {
            env: MakeEnv::new(self.options.venv.as_deref()),
            output_path: None,
            checks: Vec::new(),
            temp_dirs: Vec::new(),
        };

        self.analyze_phase(&ctx, &mut state);
        self.evaluate_phase(&ctx, &mut state);
        self.llm_phase(&ctx, &mut state);
        self.output_checks(&ctx, &mut state);
        state.checks.extend(self.battery(&ctx));

        let result = ToolResult::new(ctx.tool_name.clone(), std::mem::take(&mut state.checks));
        tracing::info!(
            tool = %result.name,
            status = %result.status,
            failed = result.failed_checks().count(),
            "Scan complete"
        );
        result
    }

    /// Fast static subset: no make runs, no output or adapter checks.
    pub fn preflight(&self, tool_root: &Path) -> ToolResult {
        let ctx = self.context(tool_root);
        let structure = StructuralValidator::new(&ctx);
        let make = MakefileValidator::new(&ctx);
        let schema = SchemaContractValidator::new(&ctx);
        let docs = DocsValidator::new(&ctx);

        let checks = vec![
            timed(|| structure.required_paths()),
            timed(|| make.targets()),
            timed(|| make.permissions()),
            timed(|| make.uses_common()),
            timed(|| make.output_dir_convention()),
            timed(|| make.output_filename()),
            timed(|| schema.valid_json_and_draft()),
            timed(|| schema.contract()),
            timed(|| docs.blueprint_structure()),
            timed(|| docs.eval_strategy_structure()),
            timed(|| structure.test_structure_naming()),
        ];
        ToolResult::new(ctx.tool_name.clone(), checks)
    }

    fn analyze_phase(&self, ctx: &ToolContext<'_>, state: &mut ScanState) {
        const ID: &str = "run.analyze";
        let tool_root = &ctx.tool_root;

        if !self.options.run_analysis {
            match find_latest_output(tool_root) {
                Some(existing) => {
                    state.push(fallback_found(ID, Severity::Critical, "Pre-existing analysis output found", &existing));
                    state.output_path = Some(existing);
                }
                None => state.push(
                    CheckResult::fail(
                        ID,
                        Severity::Critical,
                        "No analysis output found - run with --run-analysis or execute 'make analyze'",
                    )
                    .with_duration(0.0),
                ),
            }
            return;
        }

        let tmp = match state.temp_dir(TEMP_PREFIX) {
            Ok(tmp) => tmp,
            Err(e) => {
                state.push(phase_setup_failed(ID, Severity::Critical, "analyze", &e));
                return;
            }
        };
        let env = &mut state.env;
        env.set("OUTPUT_DIR", display(&tmp));
        env.set("REPO_PATH", display(&tool_root.join("eval-repos").join("synthetic")));
        env.set("REPO_NAME", "synthetic");
        env.set("RUN_ID", "compliance");
        env.set("REPO_ID", "compliance");
        env.set("VENV_READY", display(&tmp.join(".venv_ready")));
        env.set("SKIP_SETUP", "1");

        let (check, succeeded) = make_check(tool_root, "analyze", &state.env, ID, Severity::Critical);
        state.push(check);
        if succeeded {
            let produced = tmp.join("output.json");
            state.output_path = if produced.exists() {
                Some(produced)
            } else {
                find_latest_output(tool_root)
            };
        }
    }

    fn evaluate_phase(&self, ctx: &ToolContext<'_>, state: &mut ScanState) {
        const ID: &str = "run.evaluate";
        const QUALITY_ID: &str = "evaluation.quality";
        let tool_root = &ctx.tool_root;

        if !self.options.run_evaluate {
            let Some(existing) = find_evaluation_output(tool_root) else {
                state.push(
                    CheckResult::fail(
                        ID,
                        Severity::High,
                        "No evaluation output found - run with --run-evaluate or execute 'make evaluate'",
                    )
                    .with_duration(0.0),
                );
                state.push(
                    CheckResult::fail(QUALITY_ID, Severity::High, "Evaluation quality check skipped (no outputs)")
                        .with_duration(0.0),
                );
                return;
            };
            state.push(fallback_found(ID, Severity::High, "Pre-existing evaluation output found", &existing));

            let results = tool_root.join("evaluation").join("results");
            let candidates = [
                results.join("checks.json"),
                results.join("evaluation_report.json"),
                results.join("llm_evaluation.json"),
                tool_root.join("evaluation").join("scorecard.json"),
            ];
            state.push(quality_or_missing(&candidates, QUALITY_ID, evaluation_quality));
            return;
        }

        let eval_dir = match state.temp_dir(EVAL_TEMP_PREFIX) {
            Ok(dir) => dir,
            Err(e) => {
                state.push(phase_setup_failed(ID, Severity::High, "evaluate", &e));
                return;
            }
        };
        state.env.set("EVAL_OUTPUT_DIR", display(&eval_dir));
        state.env.set("VENV_READY", display(&eval_dir.join(".venv_ready")));
        state.env.set("SKIP_SETUP", "1");

        let (check, succeeded) = make_check(tool_root, "evaluate", &state.env, ID, Severity::High);
        state.push(check);
        if !succeeded {
            return;
        }

        let missing: Vec<String> = self
            .rules
            .evaluation_outputs_for(&ctx.tool_name)
            .iter()
            .map(|name| eval_dir.join(name))
            .filter(|p| !p.exists())
            .map(|p| display(&p))
            .collect();
        let results_check = if missing.is_empty() {
            CheckResult::pass("evaluation.results", Severity::High, "Evaluation outputs present")
        } else {
            CheckResult::fail("evaluation.results", Severity::High, "Missing evaluation outputs").with_evidence(missing)
        };
        state.push(results_check);

        let produced = eval_dir.join("output.json");
        if produced.exists() {
            state.output_path = Some(produced);
        }
        let candidates = [
            eval_dir.join("checks.json"),
            eval_dir.join("evaluation_report.json"),
            eval_dir.join("llm_evaluation.json"),
        ];
        state.push(quality_or_missing(&candidates, QUALITY_ID, evaluation_quality));
    }

    fn llm_phase(&self, ctx: &ToolContext<'_>, state: &mut ScanState) {
        const ID: &str = "run.evaluate_llm";
        const QUALITY_ID: &str = "evaluation.llm_quality";
        let tool_root = &ctx.tool_root;

        if !self.options.run_llm {
            let Some(existing) = find_llm_evaluation_output(tool_root) else {
                state.push(
                    CheckResult::fail(
                        ID,
                        Severity::Medium,
                        "No LLM evaluation output found - run with --run-llm or execute 'make evaluate-llm'",
                    )
                    .with_duration(0.0),
                );
                state.push(
                    CheckResult::fail(QUALITY_ID, Severity::Medium, "LLM evaluation quality check skipped (no outputs)")
                        .with_duration(0.0),
                );
                return;
            };
            state.push(fallback_found(ID, Severity::Medium, "Pre-existing LLM evaluation output found", &existing));

            let is_json = existing.extension().and_then(|e| e.to_str()) == Some("json");
            let candidate = if is_json {
                existing
            } else {
                tool_root
                    .join("evaluation")
                    .join("llm")
                    .join("results")
                    .join("llm_evaluation.json")
            };
            state.push(llm_quality_or_missing(&candidate));
            return;
        }

        let llm_dir = match state.temp_dir(EVAL_TEMP_PREFIX) {
            Ok(dir) => dir,
            Err(e) => {
                state.push(phase_setup_failed(ID, Severity::Medium, "evaluate-llm", &e));
                return;
            }
        };
        state.env.set("EVAL_OUTPUT_DIR", display(&llm_dir));
        state.env.set("VENV_READY", display(&llm_dir.join(".venv_ready")));
        state.env.set("SKIP_SETUP", "1");

        let (check, succeeded) = make_check(tool_root, "evaluate-llm", &state.env, ID, Severity::Medium);
        state.push(check);
        if !succeeded {
            return;
        }

        let in_temp = llm_dir.join("llm_evaluation.json");
        let in_repo = tool_root
            .join("evaluation")
            .join("results")
            .join("llm_evaluation.json");
        let present = in_temp.exists() || in_repo.exists();
        let results_check = if present {
            CheckResult::pass("evaluation.llm_results", Severity::Medium, "LLM evaluation output present")
        } else {
            CheckResult::fail("evaluation.llm_results", Severity::Medium, "LLM evaluation output missing")
                .with_evidence([display(&in_temp), display(&in_repo)])
        };
        state.push(results_check);
        state.push(llm_quality_or_missing(&in_temp));
    }

    /// `output.load` and, when an output parsed, the output content checks.
    fn output_checks(&self, ctx: &ToolContext<'_>, state: &mut ScanState) {
        const ID: &str = "output.load";
        let start = Instant::now();
        let source = state
            .output_path
            .clone()
            .filter(|p| p.exists())
            .or_else(|| find_latest_output(&ctx.tool_root));
        let loaded = match &source {
            Some(path) => load_json(path).map(|doc| (doc, path.clone())),
            None => Err("No output.json found".to_string()),
        };
        let load_ms = elapsed_ms(start);

        let (output, source) = match loaded {
            Ok(loaded) => loaded,
            Err(error) => {
                tracing::warn!(tool = %ctx.tool_name, error = %error, "No usable output");
                state.push(
                    CheckResult::fail(ID, Severity::High, "No output.json available")
                        .with_evidence([error])
                        .with_duration(load_ms),
                );
                return;
            }
        };
        state.push(
            CheckResult::pass(ID, Severity::High, "Output JSON loaded")
                .with_evidence([display(&source)])
                .with_duration(load_ms),
        );

        let content = OutputContentValidator::new(ctx);
        let schema = SchemaContractValidator::new(ctx);
        state.push(timed(|| content.paths(&output)));
        state.push(timed(|| content.data_completeness(&output)));
        state.push(timed(|| content.path_consistency(&output)));

        let meta_start = Instant::now();
        let metadata = content.metadata(&output);
        let meta_ms = elapsed_ms(meta_start);
        state
            .checks
            .extend(metadata.into_iter().map(|c| c.with_duration(meta_ms)));

        state.push(timed(|| content.metadata_consistency(&output)));
        state.push(timed(|| schema.version_alignment(&output)));
        let venv = self.options.venv.as_deref();
        state.push(timed(|| schema.validate_instance(&source, venv)));
    }

    /// Static checks appended to every full scan, in report order.
    fn battery(&self, ctx: &ToolContext<'_>) -> Vec<CheckResult> {
        let structure = StructuralValidator::new(ctx);
        let make = MakefileValidator::new(ctx);
        let schema = SchemaContractValidator::new(ctx);
        let docs = DocsValidator::new(ctx);
        let evaluation = EvaluationArtifactValidator::new(ctx);
        let adapter = AdapterIntrospector::new(ctx);
        let harness = AdapterIntegrationHarness::new(ctx);
        let coverage = ModelCoverageValidator::new(ctx);
        let entities = EntityAlignmentValidator::new(ctx);

        let mut checks = vec![
            timed(|| structure.required_paths()),
            timed(|| make.targets()),
            timed(|| make.permissions()),
            timed(|| make.uses_common()),
            timed(|| make.output_dir_convention()),
            timed(|| make.output_filename()),
            timed(|| schema.valid_json_and_draft()),
            timed(|| schema.contract()),
            timed(|| docs.blueprint_structure()),
            timed(|| docs.eval_strategy_structure()),
            timed(|| structure.check_modules()),
            timed(|| structure.llm_prompts()),
            timed(|| structure.llm_judge_count()),
            timed(|| structure.ground_truth()),
            timed(|| structure.scorecard()),
            timed(|| evaluation.programmatic_exists()),
            timed(|| evaluation.programmatic_schema()),
            timed(|| evaluation.programmatic_quality()),
            timed(|| evaluation.llm_exists()),
            timed(|| evaluation.llm_schema()),
            timed(|| evaluation.llm_includes_programmatic()),
            timed(|| evaluation.llm_decision_quality()),
            timed(|| docs.rollup_validation()),
            timed(|| adapter.compliance()),
            timed(|| adapter.schema_alignment()),
            timed(|| harness.run()),
            timed(|| adapter.quality_rule_coverage()),
        ];

        // Checks that only apply when the tool has an adapter rule
        let optional = [
            timed_opt(|| adapter.adapter_registered()),
            timed_opt(|| coverage.schema_table()),
            timed_opt(|| coverage.dbt_staging_model()),
        ];
        checks.extend(optional.into_iter().flatten());

        checks.push(timed(|| coverage.dbt_model_coverage()));
        checks.push(timed(|| entities.repository_alignment()));
        checks.push(timed(|| structure.test_structure_naming()));
        checks.push(timed(|| sql_joins::cross_tool_join_patterns(ctx)));
        checks
    }
}

fn timed_opt(f: impl FnOnce() -> Option<CheckResult>) -> Option<CheckResult> {
    let start = Instant::now();
    f().map(|check| check.with_duration(elapsed_ms(start)))
}

/// Passing phase check for a located pre-existing artifact.
fn fallback_found(check_id: &str, severity: Severity, message: &str, path: &Path) -> CheckResult {
    let freshness = Freshness::of(path);
    if freshness.is_stale() {
        tracing::warn!(path = %path.display(), age_days = freshness.age_days, "Using stale output");
    }
    let mut evidence = vec![display(path)];
    evidence.extend(freshness.warning());
    CheckResult::pass(check_id, severity, format!("{}{}", message, freshness.suffix()))
        .with_evidence(evidence)
        .with_duration(0.0)
}

fn phase_setup_failed(check_id: &str, severity: Severity, target: &str, error: &ExecutionError) -> CheckResult {
    CheckResult::fail(check_id, severity, format!("make {} failed", target))
        .with_evidence([error.to_string()])
        .with_duration(0.0)
}

/// Run `check` on the first existing candidate, or fail listing them all.
fn quality_or_missing(candidates: &[PathBuf], check_id: &str, check: fn(&Path) -> CheckResult) -> CheckResult {
    match candidates.iter().find(|p| p.exists()) {
        Some(found) => timed(|| check(found)),
        None => CheckResult::fail(check_id, Severity::High, "Evaluation results JSON missing")
            .with_evidence(candidates.iter().map(|p| display(p)))
            .with_duration(0.0),
    }
}

fn llm_quality_or_missing(candidate: &Path) -> CheckResult {
    if candidate.exists() {
        timed(|| llm_quality(candidate))
    } else {
        CheckResult::fail("evaluation.llm_quality", Severity::Medium, "LLM evaluation JSON missing")
            .with_evidence([display(candidate)])
            .with_duration(0.0)
    }
}
