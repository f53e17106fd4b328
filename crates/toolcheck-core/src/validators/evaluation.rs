//! Evaluation artifact checks.
//!
//! Programmatic results live at `evaluation/results/evaluation_report.json`
//! and LLM results at `evaluation/results/llm_evaluation.json`; the LLM file
//! must embed the programmatic verdict it was given. Only file contents are
//! inspected here, nothing is re-scored.

use serde_json::Value;
use std::path::Path;

use super::{display_value, is_blank, load_json, ToolContext};
use crate::model::{CheckResult, Severity};

pub const PROGRAMMATIC_EVAL_PATH: &str = "evaluation/results/evaluation_report.json";
pub const LLM_EVAL_PATH: &str = "evaluation/results/llm_evaluation.json";

pub const PASSING_DECISIONS: [&str; 3] = ["PASS", "STRONG_PASS", "WEAK_PASS"];

/// Passing bar on the 1-5 judge scale.
const LLM_SCORE_THRESHOLD: f64 = 3.5;
/// Programmatic scores at or below 1.0 are fractions.
const FRACTION_SCORE_THRESHOLD: f64 = 0.7;
/// Computed pass needs this score and zero failed checks.
const COMPUTED_SCORE_THRESHOLD: f64 = 0.9;

const PROGRAMMATIC_INPUT_FIELDS: [&str; 3] = ["file", "decision", "score"];
const MAX_KEY_EVIDENCE: usize = 10;

/// First pointer whose value is not blank.
fn first_truthy<'v>(payload: &'v Value, pointers: &[&str]) -> Option<&'v Value> {
    pointers
        .iter()
        .filter_map(|p| payload.pointer(p))
        .find(|v| !is_blank(Some(*v)))
}

/// First pointer whose value is present and not null.
fn first_present<'v>(payload: &'v Value, pointers: &[&str]) -> Option<&'v Value> {
    pointers
        .iter()
        .filter_map(|p| payload.pointer(p))
        .find(|v| !v.is_null())
}

fn numeric(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

fn decision_label(value: &Value) -> String {
    display_value(value).to_uppercase()
}

fn is_passing(decision: &str) -> bool {
    PASSING_DECISIONS.contains(&decision)
}

fn has_key(payload: &Value, key: &str) -> bool {
    payload.get(key).is_some()
}

fn leading_keys(payload: &Value) -> Vec<String> {
    payload
        .as_object()
        .map(|m| m.keys().take(MAX_KEY_EVIDENCE).cloned().collect())
        .unwrap_or_default()
}

/// `evaluation.quality` over a programmatic results file.
///
/// Decision first; otherwise a score with a failed count is judged on the
/// fractional scale, a bare score on the judge scale.
pub fn evaluation_quality(results_path: &Path) -> CheckResult {
    const ID: &str = "evaluation.quality";
    let payload = match load_json(results_path) {
        Ok(v) => v,
        Err(e) => return CheckResult::fail(ID, Severity::High, "Evaluation results are invalid JSON").with_evidence([e]),
    };

    if let Some(decision) = first_truthy(&payload, &["/decision", "/classification", "/summary/decision"]) {
        let label = decision_label(decision);
        return if is_passing(&label) {
            CheckResult::pass(ID, Severity::High, "Evaluation decision meets threshold").with_evidence([label])
        } else {
            CheckResult::fail(ID, Severity::High, "Evaluation decision below required threshold").with_evidence([label])
        };
    }

    let score_value = first_present(
        &payload,
        &[
            "/score",
            "/total_score",
            "/overall_score",
            "/summary/score",
            "/summary/total_score",
            "/summary/overall_score",
            "/summary/weighted_score",
        ],
    );
    let failed = first_present(
        &payload,
        &["/failed", "/checks_failed", "/summary/failed", "/summary/checks_failed"],
    );
    let total = first_truthy(&payload, &["/total", "/checks_total", "/summary/total"]);

    let Some(score) = numeric(score_value) else {
        return CheckResult::fail(ID, Severity::High, "Evaluation decision missing")
            .with_evidence(["missing decision and summary score"]);
    };
    let score_text = score_value.map(display_value).unwrap_or_default();

    match failed {
        Some(failed) => {
            let evidence = [
                format!("score={}", score_text),
                format!("failed={}", display_value(failed)),
                format!("total={}", total.map(display_value).unwrap_or_else(|| "null".to_string())),
            ];
            let none_failed = numeric(Some(failed)).is_some_and(|f| f as i64 == 0);
            if score >= COMPUTED_SCORE_THRESHOLD && none_failed {
                CheckResult::pass(ID, Severity::High, "Evaluation score meets threshold (computed)").with_evidence(evidence)
            } else {
                CheckResult::fail(ID, Severity::High, "Evaluation score below required threshold").with_evidence(evidence)
            }
        }
        None => {
            let evidence = [format!("weighted_score={}", score_text)];
            if score >= LLM_SCORE_THRESHOLD {
                CheckResult::pass(ID, Severity::High, "LLM evaluation score meets threshold").with_evidence(evidence)
            } else {
                CheckResult::fail(ID, Severity::High, "LLM evaluation score below required threshold").with_evidence(evidence)
            }
        }
    }
}

/// `evaluation.llm_quality` over an LLM results file.
pub fn llm_quality(results_path: &Path) -> CheckResult {
    const ID: &str = "evaluation.llm_quality";
    let payload = match load_json(results_path) {
        Ok(v) => v,
        Err(e) => {
            return CheckResult::fail(ID, Severity::Medium, "LLM evaluation results are invalid JSON").with_evidence([e])
        }
    };

    if let Some(decision) = first_truthy(&payload, &["/decision", "/summary/verdict"]) {
        let label = decision_label(decision);
        return if is_passing(&label) {
            CheckResult::pass(ID, Severity::Medium, "LLM evaluation decision meets threshold").with_evidence([label])
        } else {
            CheckResult::fail(ID, Severity::Medium, "LLM evaluation decision below required threshold")
                .with_evidence([label])
        };
    }

    let score_value = first_truthy(
        &payload,
        &[
            "/combined_score",
            "/score",
            "/weighted_score",
            "/summary/combined_score",
            "/summary/score",
            "/summary/weighted_score",
        ],
    );
    match numeric(score_value) {
        Some(score) => {
            let evidence = [format!("score={}", score_value.map(display_value).unwrap_or_default())];
            if score >= LLM_SCORE_THRESHOLD {
                CheckResult::pass(ID, Severity::Medium, "LLM evaluation score meets threshold").with_evidence(evidence)
            } else {
                CheckResult::fail(ID, Severity::Medium, "LLM evaluation score below required threshold")
                    .with_evidence(evidence)
            }
        }
        None => CheckResult::fail(ID, Severity::Medium, "LLM evaluation missing decision and score")
            .with_evidence(["missing decision and score fields"]),
    }
}

/// Checks over the uniform evaluation files of one package.
pub struct EvaluationArtifactValidator<'a> {
    ctx: &'a ToolContext<'a>,
}

impl<'a> EvaluationArtifactValidator<'a> {
    pub fn new(ctx: &'a ToolContext<'a>) -> Self {
        Self { ctx }
    }

    /// Loaded file, or the failed check for a missing or unparsable one.
    fn load(
        &self,
        relative: &str,
        check_id: &str,
        severity: Severity,
        missing_message: &str,
        invalid_message: &str,
    ) -> Result<Value, CheckResult> {
        let path = self.ctx.path(relative);
        if !path.exists() {
            return Err(CheckResult::fail(check_id, severity, missing_message).with_evidence([relative]));
        }
        load_json(&path).map_err(|e| CheckResult::fail(check_id, severity, invalid_message).with_evidence([e]))
    }

    fn exists(&self, relative: &str, check_id: &str, severity: Severity, found: &str, missing: &str) -> CheckResult {
        if self.ctx.path(relative).exists() {
            CheckResult::pass(check_id, severity, found).with_evidence([relative])
        } else {
            CheckResult::fail(check_id, severity, missing).with_evidence([relative])
        }
    }

    /// `evaluation.programmatic_exists`
    pub fn programmatic_exists(&self) -> CheckResult {
        self.exists(
            PROGRAMMATIC_EVAL_PATH,
            "evaluation.programmatic_exists",
            Severity::High,
            "Programmatic evaluation file exists",
            "Missing evaluation_report.json at uniform path",
        )
    }

    /// `evaluation.programmatic_schema`; decision, score and checks accept
    /// aliases, and summary may be replaced by per-dimension counts.
    pub fn programmatic_schema(&self) -> CheckResult {
        const ID: &str = "evaluation.programmatic_schema";
        let payload = match self.load(
            PROGRAMMATIC_EVAL_PATH,
            ID,
            Severity::High,
            "Cannot validate schema - file missing",
            "Invalid JSON in evaluation_report.json",
        ) {
            Ok(v) => v,
            Err(check) => return check,
        };
        let any = |keys: &[&str]| keys.iter().any(|k| has_key(&payload, k));
        let dimension_counts = payload
            .get("dimensions")
            .and_then(Value::as_array)
            .is_some_and(|dims| dims.iter().any(|d| has_key(d, "checks_passed") && has_key(d, "checks_total")));

        let mut missing = Vec::new();
        if !any(&["timestamp"]) {
            missing.push("timestamp");
        }
        if !any(&["decision", "classification"]) {
            missing.push("decision");
        }
        if !any(&["score", "total_score", "overall_score"]) {
            missing.push("score");
        }
        if !any(&["checks", "dimensions"]) {
            missing.push("checks");
        }
        if !any(&["summary"]) && !dimension_counts {
            missing.push("summary");
        }

        if missing.is_empty() {
            CheckResult::pass(ID, Severity::High, "Programmatic evaluation schema valid").with_evidence(leading_keys(&payload))
        } else {
            CheckResult::fail(ID, Severity::High, "Missing required fields in evaluation_report.json").with_evidence(missing)
        }
    }

    /// `evaluation.programmatic_quality`
    pub fn programmatic_quality(&self) -> CheckResult {
        const ID: &str = "evaluation.programmatic_quality";
        let payload = match self.load(
            PROGRAMMATIC_EVAL_PATH,
            ID,
            Severity::High,
            "Cannot check quality - file missing",
            "Invalid JSON",
        ) {
            Ok(v) => v,
            Err(check) => return check,
        };

        if let Some(decision) = first_truthy(&payload, &["/decision", "/classification"]) {
            let label = decision_label(decision);
            return if is_passing(&label) {
                CheckResult::pass(ID, Severity::High, "Programmatic evaluation passed").with_evidence([label])
            } else {
                CheckResult::fail(ID, Severity::High, "Programmatic evaluation failed").with_evidence([label])
            };
        }

        let score_value = first_truthy(&payload, &["/score", "/overall_score", "/total_score"]);
        let Some(score) = numeric(score_value) else {
            return CheckResult::fail(ID, Severity::High, "Missing decision and score in evaluation_report.json");
        };
        let evidence = [format!("score={}", score_value.map(display_value).unwrap_or_default())];
        let passes = if score <= 1.0 {
            score >= FRACTION_SCORE_THRESHOLD
        } else {
            score >= LLM_SCORE_THRESHOLD
        };
        if passes {
            CheckResult::pass(ID, Severity::High, "Programmatic score passes threshold").with_evidence(evidence)
        } else {
            CheckResult::fail(ID, Severity::High, "Programmatic score below threshold").with_evidence(evidence)
        }
    }

    /// `evaluation.llm_exists`
    pub fn llm_exists(&self) -> CheckResult {
        self.exists(
            LLM_EVAL_PATH,
            "evaluation.llm_exists",
            Severity::Medium,
            "LLM evaluation file exists",
            "Missing llm_evaluation.json at uniform path",
        )
    }

    /// `evaluation.llm_schema`; `judges` stands in for `dimensions`.
    pub fn llm_schema(&self) -> CheckResult {
        const ID: &str = "evaluation.llm_schema";
        let payload = match self.load(
            LLM_EVAL_PATH,
            ID,
            Severity::Medium,
            "Cannot validate schema - file missing",
            "Invalid JSON in llm_evaluation.json",
        ) {
            Ok(v) => v,
            Err(check) => return check,
        };

        let mut missing: Vec<&str> = ["timestamp", "model", "decision", "score", "programmatic_input"]
            .into_iter()
            .filter(|k| !has_key(&payload, k))
            .collect();
        if !has_key(&payload, "dimensions") && !has_key(&payload, "judges") {
            missing.push("dimensions");
        }

        if missing.is_empty() {
            CheckResult::pass(ID, Severity::Medium, "LLM evaluation schema valid").with_evidence(leading_keys(&payload))
        } else {
            CheckResult::fail(ID, Severity::Medium, "Missing required fields in llm_evaluation.json").with_evidence(missing)
        }
    }

    /// `evaluation.llm_includes_programmatic`
    pub fn llm_includes_programmatic(&self) -> CheckResult {
        const ID: &str = "evaluation.llm_includes_programmatic";
        let payload = match self.load(LLM_EVAL_PATH, ID, Severity::Medium, "Cannot check - file missing", "Invalid JSON") {
            Ok(v) => v,
            Err(check) => return check,
        };

        let input = payload.get("programmatic_input");
        let Some(input) = input.filter(|v| !is_blank(Some(*v))) else {
            return CheckResult::fail(ID, Severity::Medium, "Missing programmatic_input field in llm_evaluation.json")
                .with_evidence(["LLM evaluation must include programmatic results"]);
        };
        let missing: Vec<&str> = PROGRAMMATIC_INPUT_FIELDS
            .into_iter()
            .filter(|f| !has_key(input, f))
            .collect();
        if !missing.is_empty() {
            return CheckResult::fail(ID, Severity::Medium, "Incomplete programmatic_input in llm_evaluation.json")
                .with_evidence([format!("missing: {}", missing.join(", "))]);
        }

        let field = |name: &str| input.get(name).map(display_value).unwrap_or_default();
        CheckResult::pass(ID, Severity::Medium, "LLM evaluation includes programmatic input")
            .with_evidence([format!("file={}", field("file")), format!("decision={}", field("decision"))])
    }

    /// `evaluation.llm_decision_quality`
    pub fn llm_decision_quality(&self) -> CheckResult {
        const ID: &str = "evaluation.llm_decision_quality";
        let payload = match self.load(
            LLM_EVAL_PATH,
            ID,
            Severity::Medium,
            "Cannot check quality - file missing",
            "Invalid JSON",
        ) {
            Ok(v) => v,
            Err(check) => return check,
        };

        if let Some(decision) = first_truthy(&payload, &["/decision", "/summary/verdict", "/summary/decision"]) {
            let label = decision_label(decision);
            return if is_passing(&label) {
                CheckResult::pass(ID, Severity::Medium, "LLM evaluation passed").with_evidence([label])
            } else {
                CheckResult::fail(ID, Severity::Medium, "LLM evaluation failed").with_evidence([label])
            };
        }

        let score_value = first_truthy(&payload, &["/score", "/combined_score", "/summary/weighted_score"]);
        let Some(score) = numeric(score_value) else {
            return CheckResult::fail(ID, Severity::Medium, "Missing decision and score in llm_evaluation.json");
        };
        let evidence = [format!("score={}", score_value.map(display_value).unwrap_or_default())];
        if score >= LLM_SCORE_THRESHOLD {
            CheckResult::pass(ID, Severity::Medium, "LLM score passes threshold").with_evidence(evidence)
        } else {
            CheckResult::fail(ID, Severity::Medium, "LLM score below threshold").with_evidence(evidence)
        }
    }

    /// Every uniform-file check, programmatic first.
    pub fn all(&self) -> Vec<CheckResult> {
        vec![
            self.programmatic_exists(),
            self.programmatic_schema(),
            self.programmatic_quality(),
            self.llm_exists(),
            self.llm_schema(),
            self.llm_includes_programmatic(),
            self.llm_decision_quality(),
        ]
    }
}
