//! # toolcheck-core
//!
//! Deterministic contract checks for tool integration packages.
//!
//! A tool package lives under `<project>/src/tools/<name>` and must honour a
//! fixed contract: directory layout, build targets, an output schema, a
//! persistence adapter whose DDL matches the canonical schema, downstream
//! models, and evaluation artifacts. Every check here reads files or drives
//! an adapter against a throwaway database and returns a [`CheckResult`].
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: the same package always yields the same checks
//! 2. **Non-fatal**: validators never return errors; a broken artifact is a
//!    failed check
//! 3. **Traceable**: every failure carries its evidence
//!
//! ## Example
//!
//! ```rust,ignore
//! use toolcheck_core::{RulesRegistry, StructuralValidator, ToolContext};
//!
//! let rules = RulesRegistry::embedded()?;
//! let ctx = ToolContext::new("src/tools/scc", &rules);
//! let check = StructuralValidator::new(&ctx).required_paths();
//! println!("{} {}", check.check_id, check.status);
//! ```

pub mod ddl;
pub mod harness;
pub mod introspect;
pub mod model;
pub mod rules;
pub mod validators;

// Re-export main types at crate root
pub use ddl::{parse_ddl_statement, parse_schema, types_match, CanonicalSchema, DdlError, TableColumns};
pub use harness::{AdapterIntegrationHarness, HarnessError};
pub use introspect::{AdapterIntrospector, ModuleResolver, ResolveError, TwoRootResolver};
pub use model::{CheckResult, Severity, Status, ToolResult};
pub use rules::{CommonConfig, GroundTruthMode, RulesError, RulesRegistry, ToolRule};
pub use validators::{
    DocsValidator, EntityAlignmentValidator, EvaluationArtifactValidator, MakefileValidator,
    ModelCoverageValidator, OutputContentValidator, SchemaContractValidator, StructuralValidator,
    ToolContext,
};
