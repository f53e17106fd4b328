//! Registration point for adapters, entities and repositories.
//!
//! The compliance engine can only reason about what is compiled in, so this
//! module publishes static descriptors: each adapter with its module path,
//! contract, factory and source text; each entity with its field list; each
//! repository with its operations.

use std::path::Path;

use rusqlite::Connection;

use crate::adapters::{layout, lizard, scc, AdapterContract, AdapterFactory};
use crate::entities::{
    entity_fields, Entity, LayoutDirectory, LayoutFile, LizardFileMetric, LizardFunctionMetric,
    SccFileMetric, ToolRun,
};
use crate::repositories::{LayoutRepository, LizardRepository, SccRepository, ToolRunRepository};

/// A compiled-in adapter.
pub struct AdapterRegistration {
    pub tool: &'static str,
    /// Dotted module reference, as written in tool rules.
    pub module: &'static str,
    pub class: &'static str,
    pub contract: &'static AdapterContract,
    /// Adapter source text, for static inspection.
    pub source: &'static str,
    pub factory: AdapterFactory,
}

impl AdapterRegistration {
    /// Value-level contract problems; empty when the registration is sound.
    pub fn verify(&self, project_root: &Path) -> Vec<String> {
        let contract = self.contract;
        let mut missing = Vec::new();

        if contract.schema_path.trim().is_empty() {
            missing.push("SCHEMA_PATH".to_string());
        }
        if contract.lz_tables.is_empty() {
            missing.push("LZ_TABLES".to_string());
        }
        if contract.quality_rules.is_empty() {
            missing.push("QUALITY_RULES".to_string());
        }
        if contract.table_ddl.is_empty() {
            missing.push("TABLE_DDL".to_string());
        }

        if !contract.schema_path.trim().is_empty()
            && !project_root.join(contract.schema_path).is_file()
        {
            missing.push(format!("SCHEMA_PATH not found: {}", contract.schema_path));
        }
        missing
    }
}

impl std::fmt::Debug for AdapterRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistration")
            .field("tool", &self.tool)
            .field("module", &self.module)
            .field("class", &self.class)
            .finish()
    }
}

/// A landing-zone entity type.
#[derive(Debug, Clone, Copy)]
pub struct EntityDescriptor {
    pub name: &'static str,
    pub fields: fn() -> Vec<String>,
    pub immutable: bool,
}

impl EntityDescriptor {
    pub const fn of<E: Entity>() -> Self {
        Self {
            name: E::NAME,
            fields: entity_fields::<E>,
            immutable: E::IMMUTABLE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RepositoryDescriptor {
    pub name: &'static str,
    pub operations: &'static [&'static str],
}

impl RepositoryDescriptor {
    pub fn has_operation(&self, operation: &str) -> bool {
        self.operations.contains(&operation)
    }
}

/// Tool-specific repository handed to an adapter factory.
#[derive(Debug, Clone, Copy)]
pub enum ToolRepository<'c> {
    Scc(SccRepository<'c>),
    Lizard(LizardRepository<'c>),
}

/// Repository registered for `tool`, if any.
pub fn repository_for<'c>(tool: &str, conn: &'c Connection) -> Option<ToolRepository<'c>> {
    match tool {
        "scc" => Some(ToolRepository::Scc(SccRepository::new(conn))),
        "lizard" => Some(ToolRepository::Lizard(LizardRepository::new(conn))),
        _ => None,
    }
}

static ADAPTERS: &[AdapterRegistration] = &[
    AdapterRegistration {
        tool: "layout-scanner",
        module: "persistence.adapters.layout",
        class: "LayoutAdapter",
        contract: &layout::CONTRACT,
        source: include_str!("adapters/layout.rs"),
        factory: layout::create,
    },
    AdapterRegistration {
        tool: "scc",
        module: "persistence.adapters.scc",
        class: "SccAdapter",
        contract: &scc::CONTRACT,
        source: include_str!("adapters/scc.rs"),
        factory: scc::create,
    },
    AdapterRegistration {
        tool: "lizard",
        module: "persistence.adapters.lizard",
        class: "LizardAdapter",
        contract: &lizard::CONTRACT,
        source: include_str!("adapters/lizard.rs"),
        factory: lizard::create,
    },
];

static ENTITIES: &[EntityDescriptor] = &[
    EntityDescriptor::of::<ToolRun>(),
    EntityDescriptor::of::<LayoutFile>(),
    EntityDescriptor::of::<LayoutDirectory>(),
    EntityDescriptor::of::<SccFileMetric>(),
    EntityDescriptor::of::<LizardFileMetric>(),
    EntityDescriptor::of::<LizardFunctionMetric>(),
];

static REPOSITORIES: &[RepositoryDescriptor] = &[
    RepositoryDescriptor {
        name: ToolRunRepository::NAME,
        operations: ToolRunRepository::OPERATIONS,
    },
    RepositoryDescriptor {
        name: LayoutRepository::NAME,
        operations: LayoutRepository::OPERATIONS,
    },
    RepositoryDescriptor {
        name: SccRepository::NAME,
        operations: SccRepository::OPERATIONS,
    },
    RepositoryDescriptor {
        name: LizardRepository::NAME,
        operations: LizardRepository::OPERATIONS,
    },
];

pub fn adapters() -> &'static [AdapterRegistration] {
    ADAPTERS
}

pub fn entities() -> &'static [EntityDescriptor] {
    ENTITIES
}

pub fn repositories() -> &'static [RepositoryDescriptor] {
    REPOSITORIES
}

/// Adapters exported under `module`, in registration order.
pub fn adapters_in_module(module: &str) -> impl Iterator<Item = &'static AdapterRegistration> + '_ {
    ADAPTERS.iter().filter(move |a| a.module == module)
}

pub fn find_adapter(module: &str, class: &str) -> Option<&'static AdapterRegistration> {
    ADAPTERS.iter().find(|a| a.module == module && a.class == class)
}

pub fn find_adapter_by_class(class: &str) -> Option<&'static AdapterRegistration> {
    ADAPTERS.iter().find(|a| a.class == class)
}

pub fn find_entity(name: &str) -> Option<&'static EntityDescriptor> {
    ENTITIES.iter().find(|e| e.name == name)
}

pub fn find_repository(name: &str) -> Option<&'static RepositoryDescriptor> {
    REPOSITORIES.iter().find(|r| r.name == name)
}
