//! Existence checks over the package layout.

use std::fs;

use super::{files_with_extension, walk_files, ToolContext};
use crate::model::{CheckResult, Severity};
use crate::rules::GroundTruthMode;

const GROUND_TRUTH_DIR: &str = "evaluation/ground-truth";
const JUDGE_HELPERS: [&str; 2] = ["__init__.py", "base.py"];

/// Path, check-module, prompt, ground-truth and test-layout checks.
pub struct StructuralValidator<'a> {
    ctx: &'a ToolContext<'a>,
}

impl<'a> StructuralValidator<'a> {
    pub fn new(ctx: &'a ToolContext<'a>) -> Self {
        Self { ctx }
    }

    fn no_rule(&self, check_id: &str) -> CheckResult {
        CheckResult::fail(
            check_id,
            Severity::Medium,
            format!("No tool rule registered for {}", self.ctx.tool_name),
        )
        .with_evidence([format!("rules/{}.yaml", self.ctx.tool_name)])
    }

    /// `structure.paths`: all configured paths exist, missing ones listed once.
    pub fn required_paths(&self) -> CheckResult {
        let mut missing: Vec<&str> = Vec::new();
        for path in &self.ctx.rules.common().required_paths {
            if !self.ctx.path(path).exists() && !missing.contains(&path.as_str()) {
                missing.push(path);
            }
        }
        if missing.is_empty() {
            CheckResult::pass("structure.paths", Severity::High, "All required paths present")
        } else {
            CheckResult::fail("structure.paths", Severity::High, "Missing required paths").with_evidence(missing)
        }
    }

    /// `evaluation.check_modules`
    pub fn check_modules(&self) -> CheckResult {
        const ID: &str = "evaluation.check_modules";
        let Some(rule) = self.ctx.rules.tool(&self.ctx.tool_name) else {
            return self.no_rule(ID);
        };
        let dir = self.ctx.path("scripts/checks");
        let missing: Vec<&String> = rule
            .required_check_modules
            .iter()
            .filter(|name| !dir.join(name).exists())
            .collect();
        if missing.is_empty() {
            CheckResult::pass(ID, Severity::Medium, "Check modules present")
        } else {
            CheckResult::fail(ID, Severity::Medium, "Missing required check modules")
                .with_evidence(missing.into_iter().cloned())
        }
    }

    /// `evaluation.llm_prompts`
    pub fn llm_prompts(&self) -> CheckResult {
        const ID: &str = "evaluation.llm_prompts";
        let Some(rule) = self.ctx.rules.tool(&self.ctx.tool_name) else {
            return self.no_rule(ID);
        };
        let dir = self.ctx.path("evaluation/llm/prompts");
        let missing: Vec<&String> = rule
            .required_prompts
            .iter()
            .filter(|name| !dir.join(name).exists())
            .collect();
        if missing.is_empty() {
            CheckResult::pass(ID, Severity::Medium, "LLM prompts present")
        } else {
            CheckResult::fail(ID, Severity::Medium, "Missing required LLM prompts")
                .with_evidence(missing.into_iter().cloned())
        }
    }

    /// `evaluation.llm_judge_count`
    pub fn llm_judge_count(&self) -> CheckResult {
        const ID: &str = "evaluation.llm_judge_count";
        let dir = self.ctx.path("evaluation/llm/judges");
        if !dir.is_dir() {
            return CheckResult::fail(ID, Severity::Medium, "evaluation/llm/judges/ directory missing")
                .with_evidence(["evaluation/llm/judges/"]);
        }
        let judges: Vec<String> = files_with_extension(&dir, "py")
            .into_iter()
            .filter(|name| !JUDGE_HELPERS.contains(&name.as_str()))
            .collect();
        let minimum = self.ctx.rules.common().min_llm_judges;
        let count = judges.len();
        if count < minimum {
            CheckResult::fail(
                ID,
                Severity::Medium,
                format!("Insufficient LLM judges: {} found, minimum {} required", count, minimum),
            )
            .with_evidence(judges)
        } else {
            CheckResult::pass(
                ID,
                Severity::Medium,
                format!("LLM judge count meets minimum ({} >= {})", count, minimum),
            )
            .with_evidence(judges)
        }
    }

    /// `evaluation.ground_truth`, per the tool's ground-truth mode.
    pub fn ground_truth(&self) -> CheckResult {
        const ID: &str = "evaluation.ground_truth";
        let dir = self.ctx.path(GROUND_TRUTH_DIR);
        if !dir.is_dir() {
            return CheckResult::fail(ID, Severity::High, "Ground truth directory missing")
                .with_evidence([GROUND_TRUTH_DIR]);
        }

        match self.ctx.rules.ground_truth_mode(&self.ctx.tool_name) {
            GroundTruthMode::SyntheticJson => {
                if dir.join("synthetic.json").is_file() {
                    CheckResult::pass(ID, Severity::High, "synthetic.json ground truth present")
                } else {
                    CheckResult::fail(ID, Severity::High, "synthetic.json ground truth missing")
                        .with_evidence(["evaluation/ground-truth/synthetic.json"])
                }
            }
            GroundTruthMode::PerLanguage => {
                let synthetic = self.ctx.path("eval-repos/synthetic");
                let mut repos: Vec<String> = fs::read_dir(&synthetic)
                    .map(|entries| {
                        entries
                            .filter_map(Result::ok)
                            .filter(|e| e.path().is_dir())
                            .map(|e| e.file_name().to_string_lossy().into_owned())
                            .filter(|name| !name.starts_with('.'))
                            .collect()
                    })
                    .unwrap_or_default();
                repos.sort();
                let missing: Vec<String> = repos
                    .into_iter()
                    .map(|name| format!("{}.json", name))
                    .filter(|file| !dir.join(file).is_file())
                    .collect();
                if missing.is_empty() {
                    CheckResult::pass(ID, Severity::High, "Ground truth covers synthetic repos")
                } else {
                    CheckResult::fail(ID, Severity::High, "Missing per-language ground truth").with_evidence(missing)
                }
            }
            GroundTruthMode::Any => {
                let files = files_with_extension(&dir, "json");
                if files.is_empty() {
                    CheckResult::fail(ID, Severity::High, "No ground truth JSON files found")
                } else {
                    CheckResult::pass(ID, Severity::High, "Ground truth files present").with_evidence(files)
                }
            }
        }
    }

    /// `evaluation.scorecard`
    pub fn scorecard(&self) -> CheckResult {
        const ID: &str = "evaluation.scorecard";
        const PATH: &str = "evaluation/scorecard.md";
        match fs::metadata(self.ctx.path(PATH)) {
            Err(_) => CheckResult::fail(ID, Severity::Medium, "Scorecard missing").with_evidence([PATH]),
            Ok(meta) if meta.len() == 0 => {
                CheckResult::fail(ID, Severity::Low, "Scorecard is empty").with_evidence([PATH])
            }
            Ok(_) => CheckResult::pass(ID, Severity::Low, "Scorecard present"),
        }
    }

    /// `test.structure_naming`
    pub fn test_structure_naming(&self) -> CheckResult {
        const ID: &str = "test.structure_naming";
        let tests = self.ctx.path("tests");
        if !tests.is_dir() {
            return CheckResult::fail(ID, Severity::Medium, "tests/ directory missing").with_evidence(["tests/"]);
        }

        let naming = &self.ctx.rules.common().test_naming;
        let mut issues = Vec::new();
        let mut bad_names = Vec::new();
        for sub in ["unit", "integration"] {
            let dir = tests.join(sub);
            if !dir.is_dir() {
                issues.push(format!("tests/{}/ directory missing", sub));
                continue;
            }
            for file in walk_files(&dir) {
                let ext = file.extension().and_then(|e| e.to_str()).unwrap_or_default();
                if !naming.extensions.iter().any(|e| e == ext) {
                    continue;
                }
                let name = file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                if naming.exempt.iter().any(|e| *e == name) || name.starts_with(&naming.prefix) {
                    continue;
                }
                let relative = file.strip_prefix(&self.ctx.tool_root).unwrap_or(&file);
                bad_names.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        if !bad_names.is_empty() {
            issues.push(format!(
                "Test files not following {}* convention: {}",
                naming.prefix,
                bad_names.join(", ")
            ));
        }

        if issues.is_empty() {
            CheckResult::pass(ID, Severity::Medium, "Test structure and naming conventions followed")
        } else {
            CheckResult::fail(ID, Severity::Medium, "Test structure/naming issues").with_evidence(issues)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RulesRegistry;
    use std::path::Path;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    fn tool_dir(name: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src/tools").join(name);
        fs::create_dir_all(&root).unwrap();
        (dir, root)
    }

    #[test]
    fn test_missing_schema_is_reported_once() {
        let (_dir, root) = tool_dir("scc");
        let rules = RulesRegistry::embedded().unwrap();
        for path in &rules.common().required_paths {
            if path != "schemas/output.schema.json" {
                touch(&root, path);
            }
        }
        let ctx = ToolContext::new(&root, &rules);
        let check = StructuralValidator::new(&ctx).required_paths();
        assert!(check.failed());
        assert_eq!(check.evidence, vec!["schemas/output.schema.json"]);
    }

    #[test]
    fn test_duplicate_required_paths_deduplicated() {
        let (_dir, root) = tool_dir("scc");
        let common = "required_paths: [Makefile, README.md, Makefile]\nrequired_make_targets: [setup]\n";
        let rules = RulesRegistry::from_yaml(common, Vec::new()).unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let check = StructuralValidator::new(&ctx).required_paths();
        assert_eq!(check.evidence, vec!["Makefile", "README.md"]);
    }

    #[test]
    fn test_unregistered_tool_fails_module_checks() {
        let (_dir, root) = tool_dir("mystery");
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let v = StructuralValidator::new(&ctx);
        assert_eq!(v.check_modules().message, "No tool rule registered for mystery");
        assert!(v.llm_prompts().failed());
    }

    #[test]
    fn test_check_modules_lists_missing() {
        let (_dir, root) = tool_dir("scc");
        touch(&root, "scripts/checks/accuracy.py");
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let check = StructuralValidator::new(&ctx).check_modules();
        assert_eq!(check.evidence, vec!["coverage.py", "performance.py"]);
    }

    #[test]
    fn test_ground_truth_modes() {
        let rules = RulesRegistry::embedded().unwrap();

        let (_d1, scc) = tool_dir("scc");
        fs::create_dir_all(scc.join(GROUND_TRUTH_DIR)).unwrap();
        let ctx = ToolContext::new(&scc, &rules);
        assert_eq!(
            StructuralValidator::new(&ctx).ground_truth().message,
            "synthetic.json ground truth missing"
        );

        let (_d2, lizard) = tool_dir("lizard");
        fs::create_dir_all(lizard.join("eval-repos/synthetic/python")).unwrap();
        fs::create_dir_all(lizard.join("eval-repos/synthetic/.cache")).unwrap();
        fs::create_dir_all(lizard.join("eval-repos/synthetic/go")).unwrap();
        touch(&lizard, "evaluation/ground-truth/python.json");
        let ctx = ToolContext::new(&lizard, &rules);
        let check = StructuralValidator::new(&ctx).ground_truth();
        assert_eq!(check.evidence, vec!["go.json"]);

        let (_d3, other) = tool_dir("unregistered");
        fs::create_dir_all(other.join(GROUND_TRUTH_DIR)).unwrap();
        let ctx = ToolContext::new(&other, &rules);
        assert_eq!(
            StructuralValidator::new(&ctx).ground_truth().message,
            "No ground truth JSON files found"
        );
    }

    #[test]
    fn test_judge_count() {
        let (_dir, root) = tool_dir("scc");
        for name in ["__init__.py", "base.py", "accuracy.py", "actionability.py", "fit.py"] {
            touch(&root, &format!("evaluation/llm/judges/{}", name));
        }
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let check = StructuralValidator::new(&ctx).llm_judge_count();
        assert_eq!(check.message, "Insufficient LLM judges: 3 found, minimum 4 required");
    }

    #[test]
    fn test_scorecard_empty() {
        let (_dir, root) = tool_dir("scc");
        fs::create_dir_all(root.join("evaluation")).unwrap();
        fs::write(root.join("evaluation/scorecard.md"), "").unwrap();
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let check = StructuralValidator::new(&ctx).scorecard();
        assert_eq!(check.severity, Severity::Low);
        assert!(check.failed());
    }

    #[test]
    fn test_structure_naming() {
        let (_dir, root) = tool_dir("scc");
        touch(&root, "tests/unit/test_ok.py");
        touch(&root, "tests/unit/conftest.py");
        touch(&root, "tests/unit/nested/helpers.py");
        touch(&root, "tests/unit/README.md");
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let check = StructuralValidator::new(&ctx).test_structure_naming();
        assert_eq!(
            check.evidence,
            vec![
                "tests/integration/ directory missing".to_string(),
                "Test files not following test_* convention: tests/unit/nested/helpers.py".to_string(),
            ]
        );
    }
}
