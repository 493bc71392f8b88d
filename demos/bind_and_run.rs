//! Example: wiring the registry end to end against a stub engine
//!
//! Builds a small catalog, attaches an activation manager, and walks the
//! binding lifecycle: upload, rename, removal. Statements that would hit a
//! real analytical engine are printed instead.
//!
//! Run with: cargo run --example bind_and_run

use macrodeck_core::prelude::*;
use std::sync::Arc;

/// Stand-in for a real engine connection: prints every statement it is
/// asked to run.
struct PrintingEngine;

#[async_trait::async_trait]
impl SqlEngine for PrintingEngine {
    async fn execute(&self, sql: &str) -> anyhow::Result<()> {
        println!("  engine <- {sql}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let catalog = Arc::new(
        Catalog::builder()
            .role(
                TableRole::new("facts", "The primary fact table")
                    .columns(["col", "value"])
                    .category("core"),
            )
            .role(TableRole::new("lookup", "A reference lookup table"))
            .macro_def(
                MacroDefinition::new(
                    "summary",
                    "Value summary",
                    "-- counts per distinct value\n\
                     SELECT col, COUNT(*) FROM {{facts}} GROUP BY col",
                    ["facts"],
                )
                .description("Counts rows per column value")
                .category("aggregation"),
            )
            .macro_def(
                MacroDefinition::new(
                    "top_n",
                    "Top rows",
                    "SELECT * FROM {{facts}} ORDER BY value DESC LIMIT ${limit}",
                    ["facts"],
                )
                .category("aggregation")
                .parameter(MacroParameter::new("limit", ParamType::Number).default_value("10")),
            )
            .macro_def(MacroDefinition::new(
                "joined",
                "Facts with lookup",
                "SELECT * FROM {{facts}} f JOIN {{lookup}} l ON f.col = l.col",
                ["facts", "lookup"],
            ))
            .build()?,
    );

    let bindings = RoleBindings::new(catalog.clone());
    let manager = ActivationManager::new(catalog.clone(), bindings.clone(), Arc::new(PrintingEngine));
    manager.attach().await;
    let view = CatalogView::new(catalog);

    // --- A table arrives; auto-binding matches it to the facts role ---
    println!("upload 'monthly_facts':");
    let bound = bindings.auto_bind("monthly_facts").await;
    println!("  auto-bound role: {bound:?}");
    manager.settled().await;

    let snapshot = bindings.all_bindings().await;
    let summary = view.availability_summary(&snapshot);
    println!(
        "  {} of {} templates runnable ({}%)",
        summary.satisfied, summary.total, summary.percent
    );
    for runnable in view.runnable_templates(&snapshot) {
        println!("  runnable: {} -> {}", runnable.def.title, runnable.invocation_sql);
    }
    for pending in manager.pending_macros().await {
        println!("  locked: {} (needs {:?})", pending.title, pending.missing_roles);
    }

    // --- The table is renamed; the macro is regenerated transparently ---
    println!("\nrename 'monthly_facts' -> 'facts_2026':");
    bindings.rebind_on_rename("monthly_facts", "facts_2026").await;
    manager.settled().await;

    // --- The table is removed; dependent macros are dropped ---
    println!("\nremove 'facts_2026':");
    bindings.unbind_by_table("facts_2026").await;
    manager.settled().await;
    println!(
        "  active macros left: {}",
        manager.active_macros().await.len()
    );

    manager.dispose().await;
    Ok(())
}
