use crate::imports::*;

/*
    Types:
    * TableRole - An abstract table placeholder that macro templates depend on
    * ParamType / MacroParameter - Formal parameter metadata for a macro template
    * MacroDefinition - A named, parameterized SQL query template
    * Catalog - Immutable set of roles and macro definitions, fixed at startup
    * CatalogBuilder - Validating constructor for Catalog
*/

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TableRole {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub expected_columns: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl TableRole {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        TableRole {
            name: name.into(),
            description: description.into(),
            expected_columns: Vec::new(),
            category: None,
        }
    }

    pub fn columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.expected_columns = columns.into_iter().map(|c| c.into()).collect();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Number,
    Text,
    Identifier,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MacroParameter {
    pub name: String,
    pub ty: ParamType,
    /// Literal argument text used both as the definition default and in
    /// generated sample invocations.
    #[serde(default)]
    pub default: Option<String>,
}

impl MacroParameter {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        MacroParameter {
            name: name.into(),
            ty,
            default: None,
        }
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MacroDefinition {
    /// Unique identifier, also the name the macro is defined under in the
    /// query engine.
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub parameters: Vec<MacroParameter>,
    /// Role names this template depends on. Must all be declared in the
    /// catalog the definition is added to.
    pub required_roles: Vec<String>,
    /// SQL body with `{{role}}` table placeholders and `${param}` parameter
    /// placeholders.
    pub body: String,
}

impl MacroDefinition {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        required_roles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        MacroDefinition {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            category: None,
            parameters: Vec::new(),
            required_roles: required_roles.into_iter().map(|r| r.into()).collect(),
            body: body.into(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn parameter(mut self, parameter: MacroParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

#[derive(Debug, Default)]
pub struct Catalog {
    roles: Vec<TableRole>,
    macros: Vec<MacroDefinition>,
    role_index: HashMap<String, usize>,
    macro_index: HashMap<String, usize>,
    // role name -> macro ids depending on it, in macro insertion order
    dependents: HashMap<String, Vec<String>>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn role(&self, name: &str) -> Option<&TableRole> {
        self.role_index.get(name).map(|i| &self.roles[*i])
    }

    pub fn macro_def(&self, id: &str) -> Option<&MacroDefinition> {
        self.macro_index.get(id).map(|i| &self.macros[*i])
    }

    /// Roles in declaration order.
    pub fn roles(&self) -> &[TableRole] {
        &self.roles
    }

    /// Macro definitions in declaration order.
    pub fn macros(&self) -> &[MacroDefinition] {
        &self.macros
    }

    pub fn macros_depending_on(&self, role: &str) -> &[String] {
        self.dependents.get(role).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Default)]
pub struct CatalogBuilder {
    roles: Vec<TableRole>,
    macros: Vec<MacroDefinition>,
}

impl CatalogBuilder {
    pub fn role(mut self, role: TableRole) -> Self {
        self.roles.push(role);
        self
    }

    pub fn macro_def(mut self, def: MacroDefinition) -> Self {
        self.macros.push(def);
        self
    }

    /// Validates role/macro name uniqueness and that every macro dependency
    /// names a declared role. These are the only points the invariants can be
    /// checked once, so violations are hard errors here rather than runtime
    /// surprises during activation.
    pub fn build(self) -> Result<Catalog> {
        let mut role_index = HashMap::new();
        for (i, role) in self.roles.iter().enumerate() {
            if role_index.insert(role.name.clone(), i).is_some() {
                return Err(anyhow::anyhow!(
                    "Duplicate role name '{}' in catalog",
                    role.name
                ));
            }
        }

        let mut macro_index = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for (i, def) in self.macros.iter().enumerate() {
            if macro_index.insert(def.id.clone(), i).is_some() {
                return Err(anyhow::anyhow!("Duplicate macro id '{}' in catalog", def.id));
            }
            for role in &def.required_roles {
                if !role_index.contains_key(role) {
                    return Err(anyhow::anyhow!(
                        "Macro '{}' depends on undeclared role '{}'",
                        def.id,
                        role
                    ));
                }
                dependents
                    .entry(role.clone())
                    .or_default()
                    .push(def.id.clone());
            }
        }

        tracing::debug!(
            role_count = self.roles.len(),
            macro_count = self.macros.len(),
            "Built template catalog"
        );

        Ok(Catalog {
            roles: self.roles,
            macros: self.macros,
            role_index,
            macro_index,
            dependents,
        })
    }
}
