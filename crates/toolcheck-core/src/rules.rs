//! Rule registry: the static configuration every check reads.
//!
//! `rules/common.yaml` holds package-wide conventions; `rules/<tool>.yaml`
//! holds one [`ToolRule`] per registered tool. The defaults are compiled in;
//! [`RulesRegistry::from_dir`] swaps in an on-disk directory instead.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

const EMBEDDED_COMMON: &str = include_str!("../rules/common.yaml");
const EMBEDDED_TOOLS: &[(&str, &str)] = &[
    ("layout-scanner", include_str!("../rules/layout-scanner.yaml")),
    ("lizard", include_str!("../rules/lizard.yaml")),
    ("scc", include_str!("../rules/scc.yaml")),
];

/// Errors that can occur when loading rules.
#[derive(Error, Debug)]
pub enum RulesError {
    #[error("Failed to read rules: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse {file}: {source}")]
    YamlError {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Rules directory has no common.yaml: {0}")]
    MissingCommon(String),

    #[error("Invalid rules: {0}")]
    ValidationError(String),
}

/// How a tool proves it has ground truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundTruthMode {
    /// `synthetic.json` exists
    SyntheticJson,
    /// One `<dir>.json` per synthetic eval-repo subdirectory
    PerLanguage,
    /// At least one JSON file
    #[default]
    Any,
}

/// Where a tool's persistence adapter lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterLocator {
    /// Dotted module reference, e.g. `persistence.adapters.lizard`
    pub module: String,
    #[serde(rename = "class")]
    pub class_name: String,
}

/// Per-tool registry entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolRule {
    #[serde(default)]
    pub required_check_modules: Vec<String>,

    #[serde(default)]
    pub required_prompts: Vec<String>,

    #[serde(default)]
    pub ground_truth_mode: GroundTruthMode,

    /// Overrides `default_evaluation_outputs` when non-empty
    #[serde(default)]
    pub evaluation_outputs: Vec<String>,

    #[serde(default)]
    pub adapter: Option<AdapterLocator>,

    /// Overrides `tool_entities` when non-empty
    #[serde(default)]
    pub entities: Vec<String>,
}

/// Repository type and insert operation that persist an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMapping {
    pub repository: String,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountListPair {
    pub count_field: String,
    pub list_field: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataCompletenessRules {
    #[serde(default)]
    pub count_list_pairs: Vec<CountListPair>,

    /// Section name → fields every item must carry
    #[serde(default)]
    pub required_data_fields: BTreeMap<String, Vec<String>>,

    /// Tool name → section overrides merged over `required_data_fields`
    #[serde(default)]
    pub required_data_fields_overrides: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl DataCompletenessRules {
    /// Required fields per section with `tool`'s overrides applied.
    pub fn required_fields_for(&self, tool: Option<&str>) -> BTreeMap<String, Vec<String>> {
        let mut fields = self.required_data_fields.clone();
        if let Some(overrides) = tool.and_then(|t| self.required_data_fields_overrides.get(t)) {
            fields.extend(overrides.clone());
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathConsistencyRules {
    /// Section name → fields holding paths
    #[serde(default)]
    pub section_path_fields: BTreeMap<String, Vec<String>>,

    /// Sections whose `file_path` must appear in `data.files`
    #[serde(default)]
    pub reference_sections: Vec<String>,

    #[serde(default = "default_max_reference_issues")]
    pub max_reference_issues: usize,
}

impl Default for PathConsistencyRules {
    fn default() -> Self {
        Self {
            section_path_fields: BTreeMap::new(),
            reference_sections: Vec::new(),
            max_reference_issues: default_max_reference_issues(),
        }
    }
}

/// Project-relative locations of the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SotLayout {
    pub engine_root: String,
    pub shared_root: String,
    pub schema_path: String,
    pub fixtures_dir: String,
    pub dbt_models_dir: String,
    #[serde(default)]
    pub sql_dirs: Vec<String>,
}

impl Default for SotLayout {
    fn default() -> Self {
        Self {
            engine_root: "src/sot-engine".to_string(),
            shared_root: "src".to_string(),
            schema_path: "src/sot-engine/persistence/schema.sql".to_string(),
            fixtures_dir: "src/sot-engine/persistence/fixtures".to_string(),
            dbt_models_dir: "src/sot-engine/dbt/models".to_string(),
            sql_dirs: vec![
                "src/sot-engine/dbt/models".to_string(),
                "src/sot-engine/dbt/analysis".to_string(),
                "src/insights/queries".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestNamingRules {
    pub prefix: String,
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exempt: Vec<String>,
}

impl Default for TestNamingRules {
    fn default() -> Self {
        Self {
            prefix: "test_".to_string(),
            extensions: vec!["py".to_string()],
            exempt: vec!["__init__.py".to_string(), "conftest.py".to_string()],
        }
    }
}

/// Package-wide conventions from `common.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonConfig {
    #[serde(default)]
    pub required_paths: Vec<String>,

    pub required_make_targets: Vec<String>,

    #[serde(default)]
    pub blueprint_required_sections: Vec<String>,

    #[serde(default)]
    pub eval_strategy_required_sections: Vec<String>,

    #[serde(default = "default_min_llm_judges")]
    pub min_llm_judges: usize,

    #[serde(default = "default_evaluation_outputs")]
    pub default_evaluation_outputs: Vec<String>,

    /// Quality rule → substrings that show it is implemented
    #[serde(default)]
    pub quality_rule_patterns: BTreeMap<String, Vec<String>>,

    /// Tool → entity type names it persists
    #[serde(default)]
    pub tool_entities: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub entity_repository_map: BTreeMap<String, EntityMapping>,

    #[serde(default)]
    pub data_completeness_rules: DataCompletenessRules,

    #[serde(default)]
    pub path_consistency_rules: PathConsistencyRules,

    #[serde(default)]
    pub sot_layout: SotLayout,

    #[serde(default)]
    pub test_naming: TestNamingRules,
}

fn default_min_llm_judges() -> usize {
    4
}

fn default_evaluation_outputs() -> Vec<String> {
    vec!["scorecard.md".to_string(), "checks.json".to_string()]
}

fn default_max_reference_issues() -> usize {
    10
}

/// Immutable view over common config and all tool rules.
#[derive(Debug, Clone)]
pub struct RulesRegistry {
    common: CommonConfig,
    tools: BTreeMap<String, ToolRule>,
}

impl RulesRegistry {
    /// Rules compiled into this crate.
    pub fn embedded() -> Result<Self, RulesError> {
        Self::from_yaml(
            EMBEDDED_COMMON,
            EMBEDDED_TOOLS.iter().map(|(name, yaml)| (name.to_string(), *yaml)),
        )
    }

    /// Load `common.yaml` plus every other `*.yaml` in `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, RulesError> {
        let common_path = dir.join("common.yaml");
        if !common_path.is_file() {
            return Err(RulesError::MissingCommon(dir.display().to_string()));
        }
        let common = fs::read_to_string(&common_path)?;

        let mut tool_sources = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem == "common" {
                continue;
            }
            tool_sources.push((stem.to_string(), fs::read_to_string(&path)?));
        }

        Self::from_yaml(
            &common,
            tool_sources.iter().map(|(name, yaml)| (name.clone(), yaml.as_str())),
        )
    }

    /// Parse and validate rules from YAML text.
    pub fn from_yaml<'a>(
        common_yaml: &str,
        tools: impl IntoIterator<Item = (String, &'a str)>,
    ) -> Result<Self, RulesError> {
        let common: CommonConfig =
            serde_yaml::from_str(common_yaml).map_err(|source| RulesError::YamlError {
                file: "common.yaml".to_string(),
                source,
            })?;

        let mut rules = BTreeMap::new();
        for (name, yaml) in tools {
            // An empty file is a registered tool with default rules.
            let rule: ToolRule = if yaml.trim().is_empty() {
                ToolRule::default()
            } else {
                serde_yaml::from_str(yaml).map_err(|source| RulesError::YamlError {
                    file: format!("{}.yaml", name),
                    source,
                })?
            };
            rules.insert(name, rule);
        }

        let registry = Self {
            common,
            tools: rules,
        };
        registry.validate()?;
        tracing::debug!(tools = registry.tools.len(), "Loaded rules registry");
        Ok(registry)
    }

    fn validate(&self) -> Result<(), RulesError> {
        if self.common.required_make_targets.is_empty() {
            return Err(RulesError::ValidationError(
                "required_make_targets must not be empty".to_string(),
            ));
        }
        for (entity, mapping) in &self.common.entity_repository_map {
            if mapping.repository.trim().is_empty() || mapping.method.trim().is_empty() {
                return Err(RulesError::ValidationError(format!(
                    "entity_repository_map.{} needs repository and method",
                    entity
                )));
            }
        }
        for (tool, rule) in &self.tools {
            if let Some(adapter) = &rule.adapter {
                if adapter.module.trim().is_empty() || adapter.class_name.trim().is_empty() {
                    return Err(RulesError::ValidationError(format!(
                        "{}: adapter needs module and class",
                        tool
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn common(&self) -> &CommonConfig {
        &self.common
    }

    pub fn tool(&self, name: &str) -> Option<&ToolRule> {
        self.tools.get(name)
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn adapter_for(&self, tool: &str) -> Option<&AdapterLocator> {
        self.tool(tool).and_then(|r| r.adapter.as_ref())
    }

    /// Entity names declared for `tool`; the tool rule wins over common config.
    pub fn entities_for(&self, tool: &str) -> Vec<String> {
        match self.tool(tool) {
            Some(rule) if !rule.entities.is_empty() => rule.entities.clone(),
            _ => self
                .common
                .tool_entities
                .get(tool)
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Expected evaluation output filenames for `tool`.
    pub fn evaluation_outputs_for(&self, tool: &str) -> Vec<String> {
        match self.tool(tool) {
            Some(rule) if !rule.evaluation_outputs.is_empty() => rule.evaluation_outputs.clone(),
            _ => self.common.default_evaluation_outputs.clone(),
        }
    }

    pub fn ground_truth_mode(&self, tool: &str) -> GroundTruthMode {
        self.tool(tool)
            .map(|r| r.ground_truth_mode)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COMMON: &str = r#"
required_paths: [Makefile, README.md]
required_make_targets: [setup, analyze]
entity_repository_map:
  ToolRun: {repository: ToolRunRepository, method: insert}
data_completeness_rules:
  required_data_fields:
    files: [path]
  required_data_fields_overrides:
    lizard:
      files: [path, language]
"#;

    #[test]
    fn test_embedded_rules_load() {
        let registry = RulesRegistry::embedded().unwrap();
        assert!(registry.common().required_paths.contains(&"Makefile".to_string()));
        assert_eq!(registry.common().min_llm_judges, 4);

        let lizard = registry.adapter_for("lizard").unwrap();
        assert_eq!(lizard.module, "persistence.adapters.lizard");
        assert_eq!(lizard.class_name, "LizardAdapter");
        assert_eq!(registry.ground_truth_mode("scc"), GroundTruthMode::SyntheticJson);
        assert!(!registry.entities_for("lizard").is_empty());
    }

    #[test]
    fn test_required_paths_optional() {
        let registry = RulesRegistry::from_yaml("required_make_targets: [setup]\n", Vec::new()).unwrap();
        assert!(registry.common().required_paths.is_empty());
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let registry = RulesRegistry::from_yaml(COMMON, Vec::new()).unwrap();
        let common = registry.common();
        assert_eq!(common.default_evaluation_outputs, vec!["scorecard.md", "checks.json"]);
        assert_eq!(common.sot_layout.schema_path, "src/sot-engine/persistence/schema.sql");
        assert_eq!(common.test_naming.prefix, "test_");
        assert_eq!(registry.ground_truth_mode("unknown"), GroundTruthMode::Any);
        assert_eq!(registry.evaluation_outputs_for("unknown").len(), 2);
    }

    #[test]
    fn test_tool_overrides_required_fields() {
        let registry = RulesRegistry::from_yaml(COMMON, Vec::new()).unwrap();
        let rules = &registry.common().data_completeness_rules;
        assert_eq!(rules.required_fields_for(None)["files"], vec!["path"]);
        assert_eq!(rules.required_fields_for(Some("lizard"))["files"], vec!["path", "language"]);
    }

    #[test]
    fn test_tool_rule_parsing() {
        let tool = r#"
required_check_modules: [accuracy.py]
ground_truth_mode: per_language
evaluation_outputs: [scorecard.md]
adapter:
  module: persistence.adapters.demo
  class: DemoAdapter
"#;
        let registry =
            RulesRegistry::from_yaml(COMMON, vec![("demo".to_string(), tool)]).unwrap();
        let rule = registry.tool("demo").unwrap();
        assert_eq!(rule.ground_truth_mode, GroundTruthMode::PerLanguage);
        assert_eq!(registry.evaluation_outputs_for("demo"), vec!["scorecard.md"]);
        assert_eq!(registry.tool_names().collect::<Vec<_>>(), vec!["demo"]);
    }

    #[test]
    fn test_invalid_adapter_rejected() {
        let tool = "adapter: {module: '', class: X}";
        let err = RulesRegistry::from_yaml(COMMON, vec![("bad".to_string(), tool)]).unwrap_err();
        assert!(matches!(err, RulesError::ValidationError(_)));
    }

    #[test]
    fn test_yaml_error_names_file() {
        let err = RulesRegistry::from_yaml(COMMON, vec![("bad".to_string(), "adapter: [")])
            .unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn test_from_dir() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            RulesRegistry::from_dir(dir.path()),
            Err(RulesError::MissingCommon(_))
        ));

        fs::write(dir.path().join("common.yaml"), COMMON).unwrap();
        fs::write(dir.path().join("scc.yaml"), "ground_truth_mode: synthetic_json\n").unwrap();
        fs::write(dir.path().join("empty.yaml"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = RulesRegistry::from_dir(dir.path()).unwrap();
        assert_eq!(registry.tool_names().collect::<Vec<_>>(), vec!["empty", "scc"]);
        assert_eq!(registry.ground_truth_mode("scc"), GroundTruthMode::SyntheticJson);
    }
}
