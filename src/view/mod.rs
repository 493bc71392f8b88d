use crate::imports::*;

use crate::sqlgen;

/*
    Read-only projections over the catalog and a bindings snapshot, for the
    search/command-palette layer. Every method is a pure function of its
    arguments: the caller passes the snapshot (RoleBindings::all_bindings),
    nothing is locked, and calling per keystroke is fine.
*/

#[derive(Debug, Clone)]
pub struct RunnableTemplate<'a> {
    pub def: &'a MacroDefinition,
    /// Ready-to-edit sample call, defaults filled in.
    pub invocation_sql: String,
}

#[derive(Debug, Clone)]
pub struct TemplateStatus<'a> {
    pub def: &'a MacroDefinition,
    pub satisfied: bool,
    /// Empty when satisfied.
    pub missing_roles: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RoleUsage<'a> {
    pub role: &'a TableRole,
    pub bound: bool,
    /// How many catalog macros depend on this role, for "upload this to
    /// unlock N templates" messaging.
    pub dependent_macros: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilitySummary {
    pub satisfied: usize,
    pub total: usize,
    /// Rounded to the nearest integer; 0 for an empty catalog.
    pub percent: u8,
}

/// Category label used for macros without a category tag.
pub const UNCATEGORIZED: &str = "other";

#[derive(Debug, Clone)]
pub struct CatalogView {
    catalog: Arc<Catalog>,
}

impl CatalogView {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        CatalogView { catalog }
    }

    /// Every macro whose dependencies are currently satisfied, paired with
    /// its sample invocation.
    pub fn runnable_templates(&self, bindings: &HashMap<String, String>) -> Vec<RunnableTemplate<'_>> {
        self.catalog
            .macros()
            .iter()
            .filter(|def| sqlgen::validate_mappings(def, bindings).satisfied)
            .map(|def| RunnableTemplate {
                def,
                invocation_sql: sqlgen::generate_invocation_sql(def),
            })
            .collect()
    }

    /// Every macro annotated with its satisfaction state.
    pub fn all_templates_with_status(
        &self,
        bindings: &HashMap<String, String>,
    ) -> Vec<TemplateStatus<'_>> {
        self.catalog
            .macros()
            .iter()
            .map(|def| {
                let status = sqlgen::validate_mappings(def, bindings);
                TemplateStatus {
                    def,
                    satisfied: status.satisfied,
                    missing_roles: status.missing_roles,
                }
            })
            .collect()
    }

    /// Templates grouped by category tag, categories in first-seen catalog
    /// order with the uncategorized bucket last.
    pub fn by_category(
        &self,
        bindings: &HashMap<String, String>,
        include_unsatisfied: bool,
    ) -> Vec<(String, Vec<TemplateStatus<'_>>)> {
        let mut groups: Vec<(String, Vec<TemplateStatus>)> = Vec::new();
        let mut uncategorized: Vec<TemplateStatus> = Vec::new();

        for status in self.all_templates_with_status(bindings) {
            if !include_unsatisfied && !status.satisfied {
                continue;
            }
            match &status.def.category {
                Some(category) => match groups.iter_mut().find(|(name, _)| name == category) {
                    Some((_, entries)) => entries.push(status),
                    None => groups.push((category.clone(), vec![status])),
                },
                None => uncategorized.push(status),
            }
        }

        if !uncategorized.is_empty() {
            groups.push((UNCATEGORIZED.to_string(), uncategorized));
        }
        groups
    }

    /// Case-insensitive substring match over title, description, category
    /// and identifier. An empty query returns the unfiltered set.
    pub fn search(
        &self,
        query: &str,
        bindings: &HashMap<String, String>,
        include_unsatisfied: bool,
    ) -> Vec<TemplateStatus<'_>> {
        let needle = query.trim().to_lowercase();
        self.all_templates_with_status(bindings)
            .into_iter()
            .filter(|status| include_unsatisfied || status.satisfied)
            .filter(|status| {
                if needle.is_empty() {
                    return true;
                }
                let def = status.def;
                def.title.to_lowercase().contains(&needle)
                    || def.description.to_lowercase().contains(&needle)
                    || def.id.to_lowercase().contains(&needle)
                    || def
                        .category
                        .as_ref()
                        .is_some_and(|c| c.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Every catalog role with its binding state and dependent macro count.
    pub fn roles_with_usage_counts(&self, bindings: &HashMap<String, String>) -> Vec<RoleUsage<'_>> {
        self.catalog
            .roles()
            .iter()
            .map(|role| RoleUsage {
                role,
                bound: bindings.contains_key(&role.name),
                dependent_macros: self.catalog.macros_depending_on(&role.name).len(),
            })
            .collect()
    }

    pub fn availability_summary(&self, bindings: &HashMap<String, String>) -> AvailabilitySummary {
        let total = self.catalog.macros().len();
        let satisfied = self
            .catalog
            .macros()
            .iter()
            .filter(|def| sqlgen::validate_mappings(def, bindings).satisfied)
            .count();
        let percent = if total == 0 {
            0
        } else {
            ((satisfied as f64 / total as f64) * 100.0).round() as u8
        };
        AvailabilitySummary {
            satisfied,
            total,
            percent,
        }
    }
}
