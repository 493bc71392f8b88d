mod activation;
mod bindings;
mod catalog;
mod engine;
mod sqlgen;
mod tables;
mod view;

// Library exports
pub mod prelude {
    // Catalog
    pub use crate::catalog::{
        Catalog, CatalogBuilder, MacroDefinition, MacroParameter, ParamType, TableRole,
    };

    // Role bindings
    pub use crate::bindings::{BindingEvent, BindingEventKind, RoleBindings, Subscription};

    // SQL generation
    pub use crate::sqlgen::{
        MappingStatus, extract_table_placeholders, generate_definition_sql,
        generate_invocation_sql, validate_mappings,
    };

    // Engine seam
    pub use crate::engine::SqlEngine;

    // Activation
    pub use crate::activation::{ActivationManager, ActivationOutcome, PendingMacro};

    // Catalog views
    pub use crate::view::{
        AvailabilitySummary, CatalogView, RoleUsage, RunnableTemplate, TemplateStatus,
    };

    // Table lifecycle
    pub use crate::tables::{TableBridge, TableEvent, TableStore};
}

// Internal imports for use within the crate
#[allow(unused_imports)]
pub(crate) mod imports {
    // Core types
    pub use crate::catalog::{
        Catalog, CatalogBuilder, MacroDefinition, MacroParameter, ParamType, TableRole,
    };

    pub use crate::bindings::{BindingEvent, BindingEventKind, RoleBindings, Subscription};
    pub use crate::engine::SqlEngine;

    // Result and error handling
    pub type Result<T> = anyhow::Result<T>;
    pub use anyhow::Context as _;

    // Collections
    pub use std::collections::{HashMap, HashSet};

    // Async
    pub use std::sync::Arc;
    pub use tokio::sync::RwLock;

    // Lazy initialization
    pub use std::sync::LazyLock;

    // Testing
    #[cfg(test)]
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    }
}
