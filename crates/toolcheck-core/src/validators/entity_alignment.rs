//! Entity/repository alignment against the persistence catalog.

use toolcheck_sot::catalog::{self, EntityDescriptor};

use super::ToolContext;
use crate::model::{CheckResult, Severity};
use crate::rules::EntityMapping;

pub struct EntityAlignmentValidator<'a> {
    ctx: &'a ToolContext<'a>,
}

impl<'a> EntityAlignmentValidator<'a> {
    pub fn new(ctx: &'a ToolContext<'a>) -> Self {
        Self { ctx }
    }

    /// `entity.repository_alignment`: every declared entity exists, carries
    /// fields, is immutable, and maps to a repository insert operation.
    pub fn repository_alignment(&self) -> CheckResult {
        const ID: &str = "entity.repository_alignment";
        let entities = self.ctx.rules.entities_for(&self.ctx.tool_name);
        if entities.is_empty() {
            return CheckResult::fail(ID, Severity::High, "No entity mappings defined for this tool");
        }

        let mapping = &self.ctx.rules.common().entity_repository_map;
        let problems: Vec<String> = entities
            .iter()
            .filter_map(|name| entity_problem(name, catalog::find_entity(name), mapping.get(name)))
            .collect();

        if problems.is_empty() {
            CheckResult::pass(ID, Severity::High, "All entities have aligned repositories").with_evidence(entities)
        } else {
            CheckResult::fail(ID, Severity::High, "Entity-repository alignment issues").with_evidence(problems)
        }
    }
}

/// First alignment problem for one declared entity, if any.
fn entity_problem(
    name: &str,
    entity: Option<&EntityDescriptor>,
    target: Option<&EntityMapping>,
) -> Option<String> {
    let Some(entity) = entity else {
        return Some(format!("{}: entity type not found", name));
    };
    if (entity.fields)().is_empty() {
        return Some(format!("{}: not a structured record", name));
    }
    if !entity.immutable {
        return Some(format!("{}: entity not immutable", name));
    }
    let Some(target) = target else {
        return Some(format!("{}: no repository mapping defined", name));
    };
    let Some(repository) = catalog::find_repository(&target.repository) else {
        return Some(format!("{}: repository {} not found", name, target.repository));
    };
    (!repository.has_operation(&target.method))
        .then(|| format!("{}: repository missing {} method", name, target.method))
}
