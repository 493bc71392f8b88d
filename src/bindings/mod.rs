use crate::imports::*;


/*
    Types:
    * RoleBindings - Mutable role -> concrete table mapping with change notification
    * BindingEvent / BindingEventKind - Change notification payload
    * Subscription - Capability returned by subscribe(), cancels the observer
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingEventKind {
    /// A role was bound or rebound to a concrete table.
    Map,
    /// A role's binding was removed.
    Unmap,
}

#[derive(Debug, Clone)]
pub struct BindingEvent {
    pub kind: BindingEventKind,
    pub role: String,
    /// The new concrete table for Map events, None for Unmap.
    pub table: Option<String>,
    /// The previously bound table, if the role was bound before.
    pub previous: Option<String>,
}

type BindingObserver = Arc<dyn Fn(&BindingEvent) -> Result<()> + Send + Sync>;

struct Inner {
    // Insertion order is load-bearing: reverse lookups resolve to the first
    // bound role, and clear() unbinds in binding order.
    bindings: Vec<(String, String)>,
    observers: Vec<(u64, BindingObserver)>,
    next_observer: u64,
}

#[derive(Clone)]
pub struct RoleBindings {
    catalog: Arc<Catalog>,
    inner: Arc<RwLock<Inner>>,
}

impl std::fmt::Debug for RoleBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleBindings")
            .field("role_count", &self.catalog.roles().len())
            .finish()
    }
}

impl RoleBindings {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        RoleBindings {
            catalog,
            inner: Arc::new(RwLock::new(Inner {
                bindings: Vec::new(),
                observers: Vec::new(),
                next_observer: 0,
            })),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Records or overwrites the binding for `role`. Never fails: the
    /// concrete table is not checked for existence, and nothing stops two
    /// roles pointing at the same table (reverse lookups then resolve to the
    /// first bound role).
    ///
    /// Observers are notified before this call returns.
    pub async fn bind(&self, role: &str, table: &str) {
        let (event, observers) = {
            let mut inner = self.inner.write().await;
            let previous = match inner.bindings.iter_mut().find(|(r, _)| r == role) {
                Some(entry) => Some(std::mem::replace(&mut entry.1, table.to_string())),
                None => {
                    inner.bindings.push((role.to_string(), table.to_string()));
                    None
                }
            };
            tracing::debug!(role, table, ?previous, "Bound role");
            let event = BindingEvent {
                kind: BindingEventKind::Map,
                role: role.to_string(),
                table: Some(table.to_string()),
                previous,
            };
            (event, inner.observers.clone())
        };
        notify(&observers, &event);
    }

    /// Removes the binding if present, returning the previously bound table.
    /// A no-op without notification when the role was not bound.
    pub async fn unbind(&self, role: &str) -> Option<String> {
        let (event, observers, previous) = {
            let mut inner = self.inner.write().await;
            let position = inner.bindings.iter().position(|(r, _)| r == role)?;
            let (_, previous) = inner.bindings.remove(position);
            tracing::debug!(role, previous = previous.as_str(), "Unbound role");
            let event = BindingEvent {
                kind: BindingEventKind::Unmap,
                role: role.to_string(),
                table: None,
                previous: Some(previous.clone()),
            };
            (event, inner.observers.clone(), previous)
        };
        notify(&observers, &event);
        Some(previous)
    }

    /// Reverse lookup removal: unbinds whichever role is currently bound to
    /// `table`, returning that role. Used when a concrete table is deleted by
    /// its own identity.
    pub async fn unbind_by_table(&self, table: &str) -> Option<String> {
        let role = self.role_for(table).await?;
        self.unbind(&role).await;
        Some(role)
    }

    /// Follows a concrete table rename: the role bound to `old` is rebound to
    /// `new` through the same path as `bind`, so observers see a Map event
    /// carrying the previous table. Returns the affected role.
    pub async fn rebind_on_rename(&self, old: &str, new: &str) -> Option<String> {
        let role = self.role_for(old).await?;
        self.bind(&role, new).await;
        Some(role)
    }

    /// Heuristic binding for a newly arrived table. An exact
    /// (case-insensitive) role name match binds unconditionally, overwriting
    /// any existing binding. A substring match in either direction only binds
    /// a role that is currently unbound, so it cannot steal an explicit
    /// binding. Returns the role bound, if any.
    pub async fn auto_bind(&self, candidate: &str) -> Option<String> {
        let candidate_lower = candidate.to_lowercase();

        for role in self.catalog.roles() {
            if role.name.eq_ignore_ascii_case(candidate) {
                self.bind(&role.name, candidate).await;
                tracing::debug!(role = role.name.as_str(), candidate, "Auto-bound (exact)");
                return Some(role.name.clone());
            }
        }

        for role in self.catalog.roles() {
            let role_lower = role.name.to_lowercase();
            let related = candidate_lower.contains(&role_lower)
                || role_lower.contains(&candidate_lower);
            if related && !self.is_bound(&role.name).await {
                self.bind(&role.name, candidate).await;
                tracing::debug!(
                    role = role.name.as_str(),
                    candidate,
                    "Auto-bound (substring)"
                );
                return Some(role.name.clone());
            }
        }

        None
    }

    pub async fn is_bound(&self, role: &str) -> bool {
        self.inner
            .read()
            .await
            .bindings
            .iter()
            .any(|(r, _)| r == role)
    }

    pub async fn bound_table(&self, role: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .bindings
            .iter()
            .find(|(r, _)| r == role)
            .map(|(_, t)| t.clone())
    }

    /// First role (in binding order) currently bound to `table`.
    pub async fn role_for(&self, table: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .bindings
            .iter()
            .find(|(_, t)| t == table)
            .map(|(r, _)| r.clone())
    }

    /// Snapshot of the full mapping.
    pub async fn all_bindings(&self) -> HashMap<String, String> {
        self.inner.read().await.bindings.iter().cloned().collect()
    }

    /// Snapshot of bound role names, in binding order.
    pub async fn bound_roles(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .bindings
            .iter()
            .map(|(r, _)| r.clone())
            .collect()
    }

    /// Catalog roles without a current binding, with their catalog metadata.
    pub async fn unbound_roles(&self) -> Vec<TableRole> {
        let inner = self.inner.read().await;
        self.catalog
            .roles()
            .iter()
            .filter(|role| !inner.bindings.iter().any(|(r, _)| *r == role.name))
            .cloned()
            .collect()
    }

    /// Registers a change observer, invoked synchronously for every mutation.
    /// An observer error is logged and does not interrupt delivery to the
    /// rest. The returned Subscription removes the observer when cancelled.
    pub async fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&BindingEvent) -> Result<()> + Send + Sync + 'static,
    {
        let mut inner = self.inner.write().await;
        let id = inner.next_observer;
        inner.next_observer += 1;
        inner.observers.push((id, Arc::new(observer)));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Unbinds every bound role, emitting one Unmap notification per role in
    /// binding order. Observable effects are identical to calling `unbind`
    /// for each bound role.
    pub async fn clear(&self) {
        let (events, observers) = {
            let mut inner = self.inner.write().await;
            let drained: Vec<(String, String)> = inner.bindings.drain(..).collect();
            let events: Vec<BindingEvent> = drained
                .into_iter()
                .map(|(role, previous)| BindingEvent {
                    kind: BindingEventKind::Unmap,
                    role,
                    table: None,
                    previous: Some(previous),
                })
                .collect();
            tracing::debug!(unbound = events.len(), "Cleared all role bindings");
            (events, inner.observers.clone())
        };
        for event in &events {
            notify(&observers, event);
        }
    }
}

fn notify(observers: &[(u64, BindingObserver)], event: &BindingEvent) {
    for (id, observer) in observers {
        if let Err(error) = observer(event) {
            // One misbehaving observer must not starve the others.
            tracing::warn!(
                observer_id = id,
                role = event.role.as_str(),
                %error,
                "Binding observer failed"
            );
        }
    }
}

pub struct Subscription {
    id: u64,
    inner: std::sync::Weak<RwLock<Inner>>,
}

impl Subscription {
    /// Detaches the observer. Idempotent; a no-op once the binding table
    /// itself is gone.
    pub async fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .write()
                .await
                .observers
                .retain(|(id, _)| *id != self.id);
        }
    }
}
