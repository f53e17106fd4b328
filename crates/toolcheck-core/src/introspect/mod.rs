//! Adapter introspection.
//!
//! An adapter's operations are fixed by the `ToolAdapter` trait, so what is
//! left to inspect is its declared contract: the constants, the DDL it would
//! create, and whether `validate_quality` actually enforces the rules it
//! claims.

pub mod resolver;

pub use resolver::{ModuleResolver, ResolveError, TwoRootResolver};

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use toolcheck_sot::AdapterRegistration;

use crate::ddl::{load_schema, parse_ddl_statement, types_match};
use crate::model::{CheckResult, Severity};
use crate::validators::ToolContext;

lazy_static! {
    static ref QUALITY_RULES_LIST: Regex = Regex::new(r"(?s)quality_rules:\s*&\[(.*?)\]").unwrap();
    static ref QUOTED_NAME: Regex = Regex::new(r#""(\w+)""#).unwrap();
}

/// Rule names from the `quality_rules: &[..]` literal in adapter source.
pub fn declared_quality_rules(source: &str) -> Option<Vec<String>> {
    let list = QUALITY_RULES_LIST.captures(source)?.get(1)?.as_str();
    Some(
        QUOTED_NAME
            .captures_iter(list)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect(),
    )
}

/// Body of the first `fn <name>` that has one, by brace counting.
///
/// Braces inside string literals are counted too; adapter sources only use
/// balanced `{}` placeholders there.
pub fn function_body<'s>(source: &'s str, name: &str) -> Option<&'s str> {
    let needle = format!("fn {}", name);
    for (start, _) in source.match_indices(&needle) {
        let rest = &source[start + needle.len()..];
        // `fn validate_quality_v2` is a different function.
        if rest.starts_with(|c: char| c == '_' || c.is_alphanumeric()) {
            continue;
        }
        let open = match (rest.find('{'), rest.find(';')) {
            (Some(open), Some(semi)) if semi < open => continue,
            (Some(open), _) => open,
            (None, _) => return None,
        };
        let body_start = start + needle.len() + open + 1;
        let mut depth = 1usize;
        for (offset, ch) in source[body_start..].char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&source[body_start..body_start + offset]);
                    }
                }
                _ => {}
            }
        }
        return None;
    }
    None
}

/// Declared rules whose configured patterns never appear in `body`.
/// Rules without configured patterns are not checked.
pub fn unimplemented_rules(
    declared: &[String],
    body: &str,
    patterns: &BTreeMap<String, Vec<String>>,
) -> Vec<(String, Vec<String>)> {
    let body = body.to_lowercase();
    declared
        .iter()
        .filter_map(|rule| {
            let expected = patterns.get(rule).filter(|p| !p.is_empty())?;
            let implemented = expected.iter().any(|p| body.contains(&p.to_lowercase()));
            (!implemented).then(|| (rule.clone(), expected.clone()))
        })
        .collect()
}

pub struct AdapterIntrospector<'a> {
    ctx: &'a ToolContext<'a>,
    resolver: Box<dyn ModuleResolver + 'a>,
}

impl<'a> AdapterIntrospector<'a> {
    /// Introspector using a [`TwoRootResolver`] over the configured engine root.
    pub fn new(ctx: &'a ToolContext<'a>) -> Self {
        let resolver = TwoRootResolver::new(&ctx.rules.common().sot_layout.engine_root);
        Self::with_resolver(ctx, Box::new(resolver))
    }

    pub fn with_resolver(ctx: &'a ToolContext<'a>, resolver: Box<dyn ModuleResolver + 'a>) -> Self {
        Self { ctx, resolver }
    }

    /// Adapter registered for this tool per its rule.
    pub fn locate(&self) -> Result<&'static AdapterRegistration, ResolveError> {
        let tool = &self.ctx.tool_name;
        let locator = self
            .ctx
            .rules
            .adapter_for(tool)
            .ok_or_else(|| ResolveError::NoRule(tool.clone()))?;
        let registration = self.resolver.resolve(&locator.module, &locator.class_name)?;
        if registration.tool != tool.as_str() {
            return Err(ResolveError::ToolMismatch {
                class: registration.class.to_string(),
                registered: registration.tool.to_string(),
                expected: tool.clone(),
            });
        }
        Ok(registration)
    }

    /// Locate, or the failed check explaining why not.
    fn locate_for(&self, id: &str, no_rule_message: &str) -> Result<&'static AdapterRegistration, CheckResult> {
        self.locate().map_err(|e| match e {
            ResolveError::NoRule(_) => CheckResult::fail(id, Severity::High, no_rule_message),
            other => {
                let reference = self
                    .ctx
                    .rules
                    .adapter_for(&self.ctx.tool_name)
                    .map(|l| format!("{}.{}", l.module, l.class_name))
                    .unwrap_or_default();
                tracing::warn!(tool = %self.ctx.tool_name, error = %other, "Adapter resolution failed");
                CheckResult::fail(
                    id,
                    Severity::High,
                    format!("Unable to import adapter {}: {}", reference, other),
                )
                .with_evidence([other.to_string()])
            }
        })
    }

    /// `adapter.compliance`
    pub fn compliance(&self) -> CheckResult {
        const ID: &str = "adapter.compliance";
        let registration = match self.locate_for(ID, "No adapter compliance rule defined") {
            Ok(r) => r,
            Err(check) => return check,
        };
        let missing = registration.verify(&self.ctx.project_root);
        if missing.is_empty() {
            CheckResult::pass(ID, Severity::Info, "Adapter exposes schema, LZ contract, and validation hooks")
        } else {
            CheckResult::fail(ID, Severity::High, "Adapter missing required contract elements").with_evidence(missing)
        }
    }

    /// `adapter.schema_alignment`: adapter DDL against the canonical schema.
    pub fn schema_alignment(&self) -> CheckResult {
        const ID: &str = "adapter.schema_alignment";
        let registration = match self.locate_for(ID, "No adapter rule defined") {
            Ok(r) => r,
            Err(check) => return check,
        };
        let table_ddl = registration.contract.table_ddl;
        if table_ddl.is_empty() {
            return CheckResult::fail(ID, Severity::High, "Adapter has no TABLE_DDL to validate");
        }

        let schema_path = self.ctx.project_path(&self.ctx.rules.common().sot_layout.schema_path);
        if !schema_path.is_file() {
            return CheckResult::fail(ID, Severity::High, "schema.sql not found")
                .with_evidence([schema_path.display().to_string()]);
        }
        let canonical = match load_schema(&schema_path) {
            Ok(schema) => schema,
            Err(e) => {
                return CheckResult::fail(ID, Severity::High, "Unable to read schema.sql").with_evidence([e.to_string()])
            }
        };

        let mut mismatches = Vec::new();
        for (table, ddl) in table_ddl {
            let Some(expected) = canonical.get(*table) else {
                mismatches.push(format!("{}: not in schema.sql", table));
                continue;
            };
            let declared = parse_ddl_statement(ddl);
            for (column, schema_type) in expected.iter() {
                match declared.get(column) {
                    None => mismatches.push(format!("{}.{}: missing in TABLE_DDL", table, column)),
                    Some(adapter_type) if !types_match(adapter_type, schema_type) => mismatches.push(format!(
                        "{}.{}: type mismatch (adapter={}, schema={})",
                        table, column, adapter_type, schema_type
                    )),
                    Some(_) => {}
                }
            }
            for (column, _) in declared.iter() {
                if !expected.contains(column) {
                    mismatches.push(format!("{}.{}: in TABLE_DDL but not in schema.sql", table, column));
                }
            }
        }

        if mismatches.is_empty() {
            CheckResult::pass(ID, Severity::High, "TABLE_DDL matches schema.sql")
        } else {
            CheckResult::fail(ID, Severity::High, "TABLE_DDL does not match schema.sql").with_evidence(mismatches)
        }
    }

    /// `adapter.quality_rules_coverage`: best-effort scan of the adapter
    /// source for evidence that each declared rule is enforced.
    pub fn quality_rule_coverage(&self) -> CheckResult {
        const ID: &str = "adapter.quality_rules_coverage";
        let registration = match self.locate_for(ID, "No adapter rule defined") {
            Ok(r) => r,
            Err(check) => return check,
        };
        let Some(declared) = declared_quality_rules(registration.source) else {
            return CheckResult::fail(ID, Severity::Medium, "QUALITY_RULES not found in adapter");
        };
        let Some(body) = function_body(registration.source, "validate_quality") else {
            return CheckResult::fail(ID, Severity::Medium, "validate_quality method not found");
        };

        let gaps = unimplemented_rules(&declared, body, &self.ctx.rules.common().quality_rule_patterns);
        if gaps.is_empty() {
            return CheckResult::pass(
                ID,
                Severity::Info,
                format!("All {} quality rules have implementation coverage", declared.len()),
            )
            .with_evidence(declared);
        }

        let names: Vec<&str> = gaps.iter().map(|(rule, _)| rule.as_str()).collect();
        let message = format!("QUALITY_RULES declared but not implemented: {}", names.join(", "));
        let evidence = gaps
            .iter()
            .map(|(rule, patterns)| format!("{}: expected patterns [{}]", rule, patterns.join(", ")));
        CheckResult::fail(ID, Severity::Medium, message).with_evidence(evidence)
    }

    /// `sot.adapter_registered`; `None` for tools without an adapter rule.
    pub fn adapter_registered(&self) -> Option<CheckResult> {
        const ID: &str = "sot.adapter_registered";
        let locator = self.ctx.rules.adapter_for(&self.ctx.tool_name)?;
        let class = &locator.class_name;
        Some(match self.locate() {
            Ok(_) => CheckResult::pass(
                ID,
                Severity::Medium,
                format!("Adapter {} properly registered in the adapter catalog", class),
            ),
            Err(ResolveError::UnknownModule(module)) => CheckResult::fail(
                ID,
                Severity::Medium,
                format!("Adapter module {} not registered in the adapter catalog", module),
            )
            .with_evidence([module]),
            Err(ResolveError::UnknownClass { module, class, .. }) => CheckResult::fail(
                ID,
                Severity::Medium,
                format!("Adapter {} not exported by {}", class, module),
            )
            .with_evidence([class]),
            Err(other) => CheckResult::fail(ID, Severity::Medium, other.to_string()).with_evidence([class.clone()]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RulesRegistry;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;
    use toolcheck_sot::adapters::{layout, AdapterContract};

    const DRIFTED_SOURCE: &str = r#"
pub const CONTRACT: AdapterContract = AdapterContract {
    quality_rules: &["paths", "unlisted"],
};

impl ToolAdapter for DriftedAdapter<'_> {
    fn validate_quality(&self, data: &Value) -> Result<(), AdapterError> {
        let errors = vec![format!("{}: nothing checked", "files")];
        self.base.raise_quality_errors(errors)
    }

    fn do_persist(&self, payload: &Value) -> Result<i64, AdapterError> {
        is_repo_relative_path("outside the quality body");
        Ok(1)
    }
}
"#;

    static DRIFTED_CONTRACT: AdapterContract = AdapterContract {
        tool_name: "scc",
        schema_path: "src/tools/scc/schemas/output.schema.json",
        lz_tables: &[("lz_scc_file_metrics", &[("run_pk", "BIGINT")])],
        quality_rules: &["paths", "unlisted"],
        table_ddl: &[
            (
                "lz_scc_file_metrics",
                "CREATE TABLE lz_scc_file_metrics (run_pk INTEGER, file_id TEXT, code_lines DOUBLE, extra VARCHAR)",
            ),
            ("lz_scc_extra", "CREATE TABLE lz_scc_extra (run_pk BIGINT)"),
        ],
    };

    static DRIFTED: AdapterRegistration = AdapterRegistration {
        tool: "scc",
        module: "persistence.adapters.scc",
        class: "SccAdapter",
        contract: &DRIFTED_CONTRACT,
        source: DRIFTED_SOURCE,
        factory: layout::create,
    };

    struct FixedResolver;

    impl ModuleResolver for FixedResolver {
        fn resolve(&self, _module: &str, _class: &str) -> Result<&'static AdapterRegistration, ResolveError> {
            Ok(&DRIFTED)
        }
    }

    fn project_with_schema(tool: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src/tools").join(tool);
        fs::create_dir_all(root.join("schemas")).unwrap();
        fs::write(root.join("schemas/output.schema.json"), "{}").unwrap();
        let schema = dir.path().join("src/sot-engine/persistence/schema.sql");
        fs::create_dir_all(schema.parent().unwrap()).unwrap();
        fs::write(&schema, toolcheck_sot::CANONICAL_SCHEMA_SQL).unwrap();
        (dir, root)
    }

    #[test]
    fn test_declared_quality_rules() {
        assert_eq!(
            declared_quality_rules(DRIFTED_SOURCE),
            Some(vec!["paths".to_string(), "unlisted".to_string()])
        );
        assert_eq!(declared_quality_rules("fn main() {}"), None);
    }

    #[test]
    fn test_function_body_stops_at_matching_brace() {
        let body = function_body(DRIFTED_SOURCE, "validate_quality").unwrap();
        assert!(body.contains("raise_quality_errors"));
        assert!(!body.contains("is_repo_relative_path"));
    }

    #[test]
    fn test_function_body_skips_declarations() {
        let source = "trait T { fn validate_quality(&self); }\nfn validate_quality_v2() { a }\nfn validate_quality() { b }";
        assert_eq!(function_body(source, "validate_quality"), Some(" b "));
        assert_eq!(function_body("fn validate_quality() { {", "validate_quality"), None);
    }

    #[test]
    fn test_bundled_adapters_pass_all_checks() {
        let rules = RulesRegistry::embedded().unwrap();
        for tool in ["layout-scanner", "scc", "lizard"] {
            let (_dir, root) = project_with_schema(tool);
            let ctx = ToolContext::new(&root, &rules);
            let introspector = AdapterIntrospector::new(&ctx);
            for check in [
                introspector.compliance(),
                introspector.schema_alignment(),
                introspector.quality_rule_coverage(),
                introspector.adapter_registered().unwrap(),
            ] {
                assert!(check.passed(), "{} {}: {} {:?}", tool, check.check_id, check.message, check.evidence);
            }
        }
    }

    #[test]
    fn test_unimplemented_quality_rule_named() {
        let (_dir, root) = project_with_schema("scc");
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let check = AdapterIntrospector::with_resolver(&ctx, Box::new(FixedResolver)).quality_rule_coverage();
        assert!(check.failed());
        assert_eq!(check.message, "QUALITY_RULES declared but not implemented: paths");
        assert_eq!(
            check.evidence,
            vec!["paths: expected patterns [is_repo_relative_path, normalize_file_path]"]
        );
    }

    #[test]
    fn test_schema_alignment_reports_drift() {
        let (_dir, root) = project_with_schema("scc");
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let check = AdapterIntrospector::with_resolver(&ctx, Box::new(FixedResolver)).schema_alignment();
        assert!(check.failed());
        assert!(check.evidence.contains(&"lz_scc_extra: not in schema.sql".to_string()));
        assert!(check.evidence.contains(&"lz_scc_file_metrics.extra: in TABLE_DDL but not in schema.sql".to_string()));
        assert!(check.evidence.contains(&"lz_scc_file_metrics.relative_path: missing in TABLE_DDL".to_string()));
        assert!(check
            .evidence
            .contains(&"lz_scc_file_metrics.code_lines: type mismatch (adapter=DOUBLE, schema=INTEGER)".to_string()));
        assert!(!check.evidence.iter().any(|e| e.starts_with("lz_scc_file_metrics.run_pk")));
        assert!(!check.evidence.iter().any(|e| e.starts_with("lz_scc_extra.")));
    }

    #[test]
    fn test_missing_schema_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src/tools/lizard");
        fs::create_dir_all(&root).unwrap();
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new(&root, &rules);
        let introspector = AdapterIntrospector::new(&ctx);

        let check = introspector.schema_alignment();
        assert_eq!(check.message, "schema.sql not found");

        let check = introspector.compliance();
        assert_eq!(
            check.evidence,
            vec!["SCHEMA_PATH not found: src/tools/lizard/schemas/output.schema.json"]
        );
    }

    #[test]
    fn test_resolution_failures_become_checks() {
        let common = include_str!("../../rules/common.yaml");
        let tool = "adapter: {module: persistence.adapters.scc, class: MissingAdapter}";
        let rules = RulesRegistry::from_yaml(common, vec![("scc".to_string(), tool)]).unwrap();
        let ctx = ToolContext::new(Path::new("/repo/src/tools/scc"), &rules);
        let introspector = AdapterIntrospector::new(&ctx);

        let check = introspector.compliance();
        assert!(check.failed());
        assert!(check
            .message
            .starts_with("Unable to import adapter persistence.adapters.scc.MissingAdapter: Module"));
        assert_eq!(
            introspector.adapter_registered().unwrap().message,
            "Adapter MissingAdapter not exported by persistence.adapters.scc"
        );
    }

    #[test]
    fn test_adapter_registered_for_wrong_tool() {
        let common = include_str!("../../rules/common.yaml");
        let tool = "adapter: {module: persistence.adapters.scc, class: SccAdapter}";
        let rules = RulesRegistry::from_yaml(common, vec![("cloc".to_string(), tool)]).unwrap();
        let ctx = ToolContext::new("/repo/src/tools/cloc", &rules);
        let err = AdapterIntrospector::new(&ctx).locate().unwrap_err();
        assert_eq!(err.to_string(), "SccAdapter is registered for scc, not cloc");
    }

    #[test]
    fn test_no_rule() {
        let rules = RulesRegistry::embedded().unwrap();
        let ctx = ToolContext::new("/repo/src/tools/mystery", &rules);
        let introspector = AdapterIntrospector::new(&ctx);
        assert_eq!(introspector.compliance().message, "No adapter compliance rule defined");
        assert_eq!(introspector.schema_alignment().message, "No adapter rule defined");
        assert!(introspector.adapter_registered().is_none());
    }
}
