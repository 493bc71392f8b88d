use crate::imports::*;

use crate::sqlgen;
use tokio::sync::{Mutex, mpsc, watch};

/*
    The reactive core. Subscribes to RoleBindings changes and keeps the set
    of macros defined in the query engine in sync with binding state:

    * Map event for role R    -> activate every macro depending on R
    * Unmap event for role R  -> deactivate every active macro depending on R

    Binding mutations never await engine work. Each event is enqueued onto a
    per-macro FIFO queue in notification order and drained by a background
    worker, so an unbind's drop can never land after a newer rebind's define.
    Direct calls (activate_all_satisfied, reactivate, ...) additionally
    serialize against queued work through a per-macro mutex held across each
    engine round-trip.
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// The definition statement was accepted; the macro is now active.
    Activated,
    /// One or more dependency roles are unbound; nothing was attempted.
    Unsatisfied,
    /// The engine rejected the definition statement; the macro is inactive.
    Failed,
}

/// Diagnostic pairing of an inactive macro with the roles still missing,
/// for "upload X to unlock this" messaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMacro {
    pub id: String,
    pub title: String,
    pub missing_roles: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum MacroOp {
    Activate,
    Deactivate,
}

pub struct ActivationManager {
    catalog: Arc<Catalog>,
    bindings: RoleBindings,
    engine: Arc<dyn SqlEngine>,
    // Sole authoritative record of which macro ids are currently active.
    active: RwLock<HashSet<String>>,
    id_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    // Sync-locked so the binding observer can enqueue without awaiting.
    queues: std::sync::Mutex<HashMap<String, mpsc::UnboundedSender<MacroOp>>>,
    inflight: watch::Sender<usize>,
    subscription: Mutex<Option<Subscription>>,
}

impl ActivationManager {
    pub fn new(
        catalog: Arc<Catalog>,
        bindings: RoleBindings,
        engine: Arc<dyn SqlEngine>,
    ) -> Arc<Self> {
        let (inflight, _) = watch::channel(0);
        Arc::new(ActivationManager {
            catalog,
            bindings,
            engine,
            active: RwLock::new(HashSet::new()),
            id_locks: Mutex::new(HashMap::new()),
            queues: std::sync::Mutex::new(HashMap::new()),
            inflight,
            subscription: Mutex::new(None),
        })
    }

    /// Installs the binding-change observer. Call once at wiring time, after
    /// construction; the subscription holds only a weak back-reference.
    pub async fn attach(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let subscription = self
            .bindings
            .subscribe(move |event| {
                let Some(manager) = weak.upgrade() else {
                    return Ok(());
                };
                manager.on_binding_event(event);
                Ok(())
            })
            .await;
        *self.subscription.lock().await = Some(subscription);
    }

    /// Defines the macro in the engine if all of its dependency roles are
    /// bound. An unsatisfied dependency set is an expected non-event; an
    /// engine rejection is logged and reported as `Failed` rather than
    /// raised, since this also runs inside the notification path. An unknown
    /// id is a caller bug and errors loudly.
    #[tracing::instrument(skip(self))]
    pub async fn activate_if_satisfied(&self, id: &str) -> Result<ActivationOutcome> {
        let def = self
            .catalog
            .macro_def(id)
            .ok_or_else(|| anyhow::anyhow!("Unknown macro id '{id}'"))?;

        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        let snapshot = self.bindings.all_bindings().await;
        let status = sqlgen::validate_mappings(def, &snapshot);
        if !status.satisfied {
            tracing::debug!(
                macro_id = id,
                missing = ?status.missing_roles,
                "Dependencies unsatisfied, not activating"
            );
            return Ok(ActivationOutcome::Unsatisfied);
        }

        let sql = sqlgen::generate_definition_sql(def, &snapshot);
        match self.engine.execute(&sql).await {
            Ok(()) => {
                self.active.write().await.insert(id.to_string());
                tracing::debug!(macro_id = id, "Macro activated");
                Ok(ActivationOutcome::Activated)
            }
            Err(error) => {
                self.active.write().await.remove(id);
                tracing::warn!(macro_id = id, %error, "Engine rejected macro definition");
                Ok(ActivationOutcome::Failed)
            }
        }
    }

    /// Drops the macro from the engine, retrying with the generic drop form
    /// if the table-macro form is rejected. The id leaves the active set even
    /// when both forms fail: a macro whose dependencies are gone must not be
    /// reported active, and its generated SQL may reference a table that no
    /// longer exists. Cleanup of the engine-side definition is best-effort.
    #[tracing::instrument(skip(self))]
    pub async fn deactivate(&self, id: &str) -> Result<()> {
        if self.catalog.macro_def(id).is_none() {
            return Err(anyhow::anyhow!("Unknown macro id '{id}'"));
        }

        let lock = self.id_lock(id).await;
        let _guard = lock.lock().await;

        if let Err(error) = self.engine.execute(&sqlgen::drop_sql(id)).await {
            tracing::debug!(macro_id = id, %error, "Table-macro drop rejected, trying fallback");
            if let Err(error) = self.engine.execute(&sqlgen::drop_sql_fallback(id)).await {
                tracing::warn!(
                    macro_id = id,
                    %error,
                    "Both drop forms rejected, leaving engine-side definition behind"
                );
            }
        }

        self.active.write().await.remove(id);
        tracing::debug!(macro_id = id, "Macro deactivated");
        Ok(())
    }

    /// Drop-then-define, for regenerating a macro after its bindings moved to
    /// a different concrete table.
    pub async fn reactivate(&self, id: &str) -> Result<ActivationOutcome> {
        self.deactivate(id).await?;
        self.activate_if_satisfied(id).await
    }

    /// Sweeps every catalog macro through `activate_if_satisfied`. Used once
    /// at startup and after bulk rebinding.
    #[tracing::instrument(skip(self))]
    pub async fn activate_all_satisfied(&self) -> Result<Vec<(String, ActivationOutcome)>> {
        let mut outcomes = Vec::with_capacity(self.catalog.macros().len());
        for def in self.catalog.macros() {
            let outcome = self.activate_if_satisfied(&def.id).await?;
            outcomes.push((def.id.clone(), outcome));
        }
        Ok(outcomes)
    }

    /// Every inactive macro paired with its still-missing roles. A macro that
    /// is satisfied but failed activation appears with an empty missing list.
    pub async fn pending_macros(&self) -> Vec<PendingMacro> {
        let snapshot = self.bindings.all_bindings().await;
        let active = self.active.read().await;
        self.catalog
            .macros()
            .iter()
            .filter(|def| !active.contains(&def.id))
            .map(|def| PendingMacro {
                id: def.id.clone(),
                title: def.title.clone(),
                missing_roles: sqlgen::validate_mappings(def, &snapshot).missing_roles,
            })
            .collect()
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.active.read().await.contains(id)
    }

    /// Snapshot of currently active macro ids.
    pub async fn active_macros(&self) -> HashSet<String> {
        self.active.read().await.clone()
    }

    /// Resolves once all queued and in-flight activation work has drained.
    /// Binding mutations return before their engine effects land, so tests
    /// and shutdown paths await this instead of asserting immediately.
    pub async fn settled(&self) {
        let mut rx = self.inflight.subscribe();
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    /// Teardown: detaches from the binding table, drains pending work, and
    /// forces every active macro back to inactive.
    pub async fn dispose(&self) {
        if let Some(subscription) = self.subscription.lock().await.take() {
            subscription.cancel().await;
        }
        self.settled().await;
        let ids: Vec<String> = self.active.read().await.iter().cloned().collect();
        for id in ids {
            if let Err(error) = self.deactivate(&id).await {
                tracing::error!(macro_id = id.as_str(), %error, "Teardown deactivation failed");
            }
        }
    }

    // Notification handler. Synchronous: ordering is fixed here, per macro,
    // at enqueue time; the engine work itself happens on the queue workers.
    fn on_binding_event(self: &Arc<Self>, event: &BindingEvent) {
        let dependents = self.catalog.macros_depending_on(&event.role);
        if dependents.is_empty() {
            return;
        }
        let op = match event.kind {
            BindingEventKind::Map => MacroOp::Activate,
            BindingEventKind::Unmap => MacroOp::Deactivate,
        };
        tracing::debug!(
            role = event.role.as_str(),
            ?op,
            macro_count = dependents.len(),
            "Binding change affects dependent macros"
        );
        for id in dependents {
            self.enqueue(id, op);
        }
    }

    fn enqueue(self: &Arc<Self>, id: &str, op: MacroOp) {
        let sender = self.queue_sender(id);
        self.inflight.send_modify(|pending| *pending += 1);
        if sender.send(op).is_err() {
            self.inflight.send_modify(|pending| *pending -= 1);
        }
    }

    fn queue_sender(self: &Arc<Self>, id: &str) -> mpsc::UnboundedSender<MacroOp> {
        let mut queues = self.queues.lock().expect("queue registry poisoned");
        if let Some(sender) = queues.get(id) {
            return sender.clone();
        }
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(self);
        let macro_id = id.to_string();
        tokio::spawn(async move {
            while let Some(op) = receiver.recv().await {
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.run_queued(&macro_id, op).await;
                manager.inflight.send_modify(|pending| *pending -= 1);
            }
        });
        queues.insert(id.to_string(), sender.clone());
        sender
    }

    async fn run_queued(&self, id: &str, op: MacroOp) {
        let result = match op {
            MacroOp::Activate => self.activate_if_satisfied(id).await.map(|_| ()),
            MacroOp::Deactivate => {
                // Only active macros are dropped; the state is read at
                // execution time since an earlier queued activate may have
                // run after this event was enqueued.
                if self.is_active(id).await {
                    self.deactivate(id).await
                } else {
                    Ok(())
                }
            }
        };
        if let Err(error) = result {
            // Only reachable for ids absent from the catalog, which the
            // dependents index cannot produce.
            tracing::error!(macro_id = id, %error, "Queued macro operation failed");
        }
    }

    async fn id_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.id_locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl std::fmt::Debug for ActivationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationManager")
            .field("macro_count", &self.catalog.macros().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::RecordingEngine;
    use crate::imports::init_tracing;
    use crate::view::CatalogView;

    fn catalog() -> Arc<Catalog> {
        Arc::new(
            Catalog::builder()
                .role(TableRole::new("facts", "Primary fact table"))
                .role(TableRole::new("lookup", "Reference lookup table"))
                .macro_def(MacroDefinition::new(
                    "summary",
                    "Value summary",
                    "SELECT col, COUNT(*) FROM {{facts}} GROUP BY col",
                    ["facts"],
                ))
                .macro_def(MacroDefinition::new(
                    "joined",
                    "Facts with lookup",
                    "SELECT * FROM {{facts}} f JOIN {{lookup}} l ON f.col = l.col",
                    ["facts", "lookup"],
                ))
                .build()
                .unwrap(),
        )
    }

    async fn wired() -> (RoleBindings, Arc<RecordingEngine>, Arc<ActivationManager>) {
        let catalog = catalog();
        let bindings = RoleBindings::new(catalog.clone());
        let engine = RecordingEngine::new();
        let manager = ActivationManager::new(catalog, bindings.clone(), engine.clone());
        manager.attach().await;
        (bindings, engine, manager)
    }

    #[tokio::test]
    async fn bind_activates_and_unbind_by_table_deactivates() {
        init_tracing();
        let (bindings, engine, manager) = wired().await;
        let view = CatalogView::new(bindings.catalog().clone());

        let summary = view.availability_summary(&bindings.all_bindings().await);
        assert_eq!((summary.satisfied, summary.total, summary.percent), (0, 2, 0));

        bindings.bind("facts", "uploaded_table_7").await;
        manager.settled().await;

        assert!(manager.is_active("summary").await);
        assert!(!manager.is_active("joined").await);
        assert_eq!(
            engine.statements(),
            vec![
                "CREATE OR REPLACE MACRO summary() AS TABLE \
                 SELECT col, COUNT(*) FROM uploaded_table_7 GROUP BY col"
                    .to_string()
            ]
        );

        let snapshot = bindings.all_bindings().await;
        let runnable = view.runnable_templates(&snapshot);
        assert_eq!(runnable.len(), 1);
        assert_eq!(runnable[0].def.id, "summary");
        let summary = view.availability_summary(&snapshot);
        assert_eq!((summary.satisfied, summary.total, summary.percent), (1, 2, 50));

        assert_eq!(
            bindings.unbind_by_table("uploaded_table_7").await.as_deref(),
            Some("facts")
        );
        manager.settled().await;

        assert!(!manager.is_active("summary").await);
        assert_eq!(
            engine.statements_containing("DROP"),
            vec!["DROP MACRO TABLE summary".to_string()]
        );
        assert!(view.runnable_templates(&bindings.all_bindings().await).is_empty());
    }

    #[tokio::test]
    async fn partial_dependencies_stay_pending() {
        init_tracing();
        let (bindings, engine, manager) = wired().await;

        bindings.bind("facts", "t1").await;
        manager.settled().await;

        // joined needs lookup as well
        assert!(!manager.is_active("joined").await);
        let pending = manager.pending_macros().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "joined");
        assert_eq!(pending[0].missing_roles, ["lookup"]);

        bindings.bind("lookup", "t2").await;
        manager.settled().await;
        assert!(manager.is_active("joined").await);
        assert!(manager.pending_macros().await.is_empty());
        assert_eq!(engine.statements_containing("joined").len(), 1);
    }

    #[tokio::test]
    async fn engine_rejection_keeps_macro_inactive() {
        init_tracing();
        let (bindings, engine, manager) = wired().await;
        engine.fail_when_containing("MACRO summary");

        bindings.bind("facts", "t1").await;
        manager.settled().await;

        assert!(!manager.is_active("summary").await);
        assert!(engine.statements_containing("summary").is_empty());

        // Recovers on the next activation cycle once the engine accepts it
        engine.clear_failures();
        assert_eq!(
            manager.activate_if_satisfied("summary").await.unwrap(),
            ActivationOutcome::Activated
        );
        assert!(manager.is_active("summary").await);
    }

    #[tokio::test]
    async fn deactivate_falls_back_and_always_clears_the_flag() {
        init_tracing();
        let (bindings, engine, manager) = wired().await;

        bindings.bind("facts", "t1").await;
        manager.settled().await;
        assert!(manager.is_active("summary").await);

        // Table-macro drop form rejected, generic form accepted
        engine.fail_when_containing("DROP MACRO TABLE");
        manager.deactivate("summary").await.unwrap();
        assert!(!manager.is_active("summary").await);
        assert_eq!(
            engine.statements_containing("DROP"),
            vec!["DROP MACRO summary".to_string()]
        );

        // Both drop forms rejected: still marked inactive
        manager.activate_if_satisfied("summary").await.unwrap();
        engine.fail_when_containing("DROP MACRO");
        manager.deactivate("summary").await.unwrap();
        assert!(!manager.is_active("summary").await);
    }

    #[tokio::test]
    async fn unknown_macro_id_errors_loudly() {
        init_tracing();
        let (_bindings, _engine, manager) = wired().await;

        for result in [
            manager.activate_if_satisfied("ghost").await.err(),
            manager.deactivate("ghost").await.err(),
            manager.reactivate("ghost").await.err(),
        ] {
            assert!(result.unwrap().to_string().contains("Unknown macro id"));
        }
    }

    #[tokio::test]
    async fn rename_regenerates_against_the_new_table() {
        init_tracing();
        let (bindings, engine, manager) = wired().await;

        bindings.bind("facts", "before").await;
        manager.settled().await;
        bindings.rebind_on_rename("before", "after").await;
        manager.settled().await;

        assert!(manager.is_active("summary").await);
        let defines = engine.statements_containing("CREATE OR REPLACE MACRO summary");
        assert_eq!(defines.len(), 2);
        assert!(defines[1].contains("FROM after "));
    }

    #[tokio::test]
    async fn rapid_unbind_rebind_ends_active() {
        init_tracing();
        let (bindings, engine, manager) = wired().await;

        bindings.bind("facts", "t1").await;
        manager.settled().await;

        // No settling between: the drop must not land after the new define
        bindings.unbind("facts").await;
        bindings.bind("facts", "t2").await;
        manager.settled().await;

        assert!(manager.is_active("summary").await);
        let statements = engine.statements_containing("summary");
        assert!(
            statements
                .last()
                .unwrap()
                .contains("CREATE OR REPLACE MACRO summary"),
            "define must be the final summary statement, got {statements:?}"
        );
        assert!(statements.last().unwrap().contains("FROM t2 "));
    }

    #[tokio::test]
    async fn activate_all_satisfied_sweeps_the_catalog() {
        init_tracing();
        let catalog = catalog();
        let bindings = RoleBindings::new(catalog.clone());
        let engine = RecordingEngine::new();
        // Bindings established before the manager exists, as at startup
        bindings.bind("facts", "t1").await;
        bindings.bind("lookup", "t2").await;

        let manager = ActivationManager::new(catalog, bindings.clone(), engine.clone());
        manager.attach().await;
        let outcomes = manager.activate_all_satisfied().await.unwrap();
        assert_eq!(
            outcomes,
            vec![
                ("summary".to_string(), ActivationOutcome::Activated),
                ("joined".to_string(), ActivationOutcome::Activated),
            ]
        );
        assert_eq!(manager.active_macros().await.len(), 2);
    }

    #[tokio::test]
    async fn reactivate_drops_then_defines() {
        init_tracing();
        let (bindings, engine, manager) = wired().await;

        bindings.bind("facts", "t1").await;
        manager.settled().await;

        assert_eq!(
            manager.reactivate("summary").await.unwrap(),
            ActivationOutcome::Activated
        );
        let statements = engine.statements_containing("summary");
        assert_eq!(statements.len(), 3);
        assert!(statements[1].starts_with("DROP MACRO TABLE"));
        assert!(statements[2].starts_with("CREATE OR REPLACE"));
    }

    #[tokio::test]
    async fn dispose_detaches_and_deactivates_everything() {
        init_tracing();
        let (bindings, engine, manager) = wired().await;

        bindings.bind("facts", "t1").await;
        bindings.bind("lookup", "t2").await;
        manager.settled().await;
        assert_eq!(manager.active_macros().await.len(), 2);

        manager.dispose().await;
        assert!(manager.active_macros().await.is_empty());
        assert_eq!(engine.statements_containing("DROP").len(), 2);

        // Detached: later binding changes reach no one
        bindings.bind("facts", "t3").await;
        manager.settled().await;
        assert!(manager.active_macros().await.is_empty());
    }
}
