use crate::imports::*;

use polars::prelude::DataFrame;
use std::path::Path;

/*
    Types:
    * TableEvent - Lifecycle notification from the upload/table-management layer
    * TableBridge - Turns table lifecycle events into role binding mutations
    * TableStore - In-memory store of uploaded tables, keyed by concrete name
*/

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableEvent {
    Loaded { name: String },
    Renamed { old: String, new: String },
    Removed { name: String },
}

/// The adapter between concrete table lifecycle and role bindings: a loaded
/// table is auto-bound by name heuristics, a rename follows the binding to
/// the new name, a removal unbinds by reverse lookup. Returns the affected
/// role so callers can surface "bound to <role>" messaging.
#[derive(Debug, Clone)]
pub struct TableBridge {
    bindings: RoleBindings,
}

impl TableBridge {
    pub fn new(bindings: RoleBindings) -> Self {
        TableBridge { bindings }
    }

    pub async fn handle(&self, event: &TableEvent) -> Option<String> {
        let role = match event {
            TableEvent::Loaded { name } => self.bindings.auto_bind(name).await,
            TableEvent::Renamed { old, new } => self.bindings.rebind_on_rename(old, new).await,
            TableEvent::Removed { name } => self.bindings.unbind_by_table(name).await,
        };
        tracing::debug!(?event, ?role, "Handled table lifecycle event");
        role
    }
}

#[derive(Debug, Clone)]
pub struct TableStore {
    store: Arc<RwLock<HashMap<String, DataFrame>>>,
    bridge: TableBridge,
}

impl TableStore {
    pub fn new(bindings: RoleBindings) -> Self {
        TableStore {
            store: Arc::new(RwLock::new(HashMap::new())),
            bridge: TableBridge::new(bindings),
        }
    }

    /// Registers (or replaces) a table and runs auto-binding. Returns the
    /// role the table was bound to, if any.
    pub async fn insert(&self, name: &str, frame: DataFrame) -> Option<String> {
        self.store
            .write()
            .await
            .insert(name.to_string(), frame);
        self.bridge
            .handle(&TableEvent::Loaded {
                name: name.to_string(),
            })
            .await
    }

    /// Reads a CSV file into the store under `name`.
    pub async fn load_csv(&self, name: &str, path: &Path) -> Result<Option<String>> {
        use polars::prelude::SerReader;

        let path = path.to_path_buf();
        let frame = tokio::task::spawn_blocking(move || -> Result<DataFrame> {
            polars::prelude::CsvReadOptions::default()
                .with_has_header(true)
                .try_into_reader_with_file_path(Some(path.clone()))?
                .finish()
                .map_err(|e| anyhow::anyhow!("Failed to read CSV file {}: {}", path.display(), e))
        })
        .await
        .map_err(|e| anyhow::anyhow!("Task join error: {}", e))??;

        tracing::debug!(table = name, rows = frame.height(), "Loaded CSV table");
        Ok(self.insert(name, frame).await)
    }

    /// Renames a stored table, carrying any role binding along. Returns the
    /// affected role, if the old name was bound.
    pub async fn rename(&self, old: &str, new: &str) -> Result<Option<String>> {
        {
            let mut store = self.store.write().await;
            let frame = store
                .remove(old)
                .ok_or_else(|| anyhow::anyhow!("No table named '{old}' to rename"))?;
            store.insert(new.to_string(), frame);
        }
        Ok(self
            .bridge
            .handle(&TableEvent::Renamed {
                old: old.to_string(),
                new: new.to_string(),
            })
            .await)
    }

    /// Drops a stored table and unbinds whatever role pointed at it. Returns
    /// the unbound role, if any. A no-op for unknown names.
    pub async fn remove(&self, name: &str) -> Option<String> {
        let existed = self.store.write().await.remove(name).is_some();
        if !existed {
            return None;
        }
        self.bridge
            .handle(&TableEvent::Removed {
                name: name.to_string(),
            })
            .await
    }

    pub async fn get(&self, name: &str) -> Option<DataFrame> {
        self.store.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.store.read().await.keys().cloned().collect()
    }

    pub async fn columns(&self, name: &str) -> Option<Vec<String>> {
        self.store.read().await.get(name).map(|frame| {
            frame
                .get_column_names()
                .iter()
                .map(|c| c.to_string())
                .collect()
        })
    }
}
