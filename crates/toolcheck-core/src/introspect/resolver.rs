//! Adapter lookup by dotted module reference.

use thiserror::Error;
use toolcheck_sot::{catalog, AdapterRegistration};

/// Why an adapter reference could not be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No adapter rule defined for {0}")]
    NoRule(String),

    #[error("No adapter module named {0}")]
    UnknownModule(String),

    #[error("Module {module} does not export {class} (exports: {})", .exported.join(", "))]
    UnknownClass {
        module: String,
        class: String,
        exported: Vec<String>,
    },

    #[error("{class} is registered for {registered}, not {expected}")]
    ToolMismatch {
        class: String,
        registered: String,
        expected: String,
    },
}

/// Maps a `(module, class)` reference from the tool rules to a compiled-in
/// adapter registration.
pub trait ModuleResolver {
    fn resolve(&self, module: &str, class: &str) -> Result<&'static AdapterRegistration, ResolveError>;
}

/// Resolves against the engine root (`persistence.adapters.x`) first, then
/// against the shared source root, where references carry the engine
/// package as a prefix (`sot_engine.persistence.adapters.x`).
#[derive(Debug, Clone)]
pub struct TwoRootResolver {
    prefixes: Vec<String>,
}

impl TwoRootResolver {
    /// `engine_root` is the project-relative engine directory, e.g.
    /// `src/sot-engine`; its last component names the outer package.
    pub fn new(engine_root: &str) -> Self {
        let package = engine_root
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(engine_root);
        let mut prefixes = vec![format!("{}.", package)];
        let underscored = format!("{}.", package.replace('-', "_"));
        if !prefixes.contains(&underscored) {
            prefixes.push(underscored);
        }
        Self { prefixes }
    }

    /// Module names to try, inner root first.
    fn candidates<'m>(&self, module: &'m str) -> Vec<&'m str> {
        let mut found = vec![module];
        for prefix in &self.prefixes {
            if let Some(inner) = module.strip_prefix(prefix.as_str()) {
                found.push(inner);
            }
        }
        found
    }
}

impl Default for TwoRootResolver {
    fn default() -> Self {
        Self::new("src/sot-engine")
    }
}

impl ModuleResolver for TwoRootResolver {
    fn resolve(&self, module: &str, class: &str) -> Result<&'static AdapterRegistration, ResolveError> {
        for candidate in self.candidates(module) {
            let exported: Vec<&'static AdapterRegistration> =
                catalog::adapters_in_module(candidate).collect();
            if exported.is_empty() {
                continue;
            }
            tracing::debug!(module = %module, root_module = %candidate, class = %class, "Resolving adapter");
            return exported
                .iter()
                .find(|a| a.class == class)
                .copied()
                .ok_or_else(|| ResolveError::UnknownClass {
                    module: module.to_string(),
                    class: class.to_string(),
                    exported: exported.iter().map(|a| a.class.to_string()).collect(),
                });
        }
        Err(ResolveError::UnknownModule(module.to_string()))
    }
}
