use crate::imports::*;

use regex::Regex;

/*
    Pure SQL synthesis over a MacroDefinition and a bindings snapshot.

    Placeholder forms:
    * {{role}}  - table placeholder, substituted with the bound concrete table
    * ${param}  - parameter placeholder, substituted with the bare parameter
                  name so the generated statement stays parameterized
    * [param]   - editable token emitted into sample invocations for
                  parameters without a default
*/

static TABLE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("table placeholder pattern")
});

static PARAM_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").expect("parameter placeholder pattern")
});

/// Unique table placeholder names in first-appearance order.
pub fn extract_table_placeholders(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for capture in TABLE_PLACEHOLDER.captures_iter(body) {
        let name = &capture[1];
        if seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
    }
    names
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingStatus {
    pub satisfied: bool,
    pub missing_roles: Vec<String>,
}

/// True iff every dependency role of the macro has a concrete binding.
pub fn validate_mappings(def: &MacroDefinition, bindings: &HashMap<String, String>) -> MappingStatus {
    let missing_roles: Vec<String> = def
        .required_roles
        .iter()
        .filter(|role| !bindings.contains_key(role.as_str()))
        .cloned()
        .collect();
    MappingStatus {
        satisfied: missing_roles.is_empty(),
        missing_roles,
    }
}

/// Builds the statement that defines (or redefines) the macro in the query
/// engine against the current bindings.
///
/// Callers are expected to have checked `validate_mappings` first; a table
/// placeholder with no binding passes through untouched, which the engine
/// will reject.
pub fn generate_definition_sql(def: &MacroDefinition, bindings: &HashMap<String, String>) -> String {
    let body = strip_comment_lines(&def.body);

    let body = TABLE_PLACEHOLDER.replace_all(&body, |caps: &regex::Captures| {
        match bindings.get(&caps[1]) {
            Some(table) => table.clone(),
            None => caps[0].to_string(),
        }
    });

    // Parameter placeholders become macro-local variable references, not
    // literal values: the defined macro stays parameterized.
    let body = PARAM_PLACEHOLDER.replace_all(&body, |caps: &regex::Captures| caps[1].to_string());

    let params = def
        .parameters
        .iter()
        .map(|p| match &p.default {
            Some(default) => format!("{} := {}", p.name, default),
            None => p.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "CREATE OR REPLACE MACRO {}({}) AS TABLE {}",
        def.id,
        params,
        body.trim()
    )
}

/// A ready-to-edit sample call of the macro, using declared defaults where
/// present and `[name]` edit tokens where not.
pub fn generate_invocation_sql(def: &MacroDefinition) -> String {
    let args = def
        .parameters
        .iter()
        .map(|p| match &p.default {
            Some(default) => default.clone(),
            None => format!("[{}]", p.name),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT * FROM {}({})", def.id, args)
}

/// Drop statement for a table-valued macro.
pub fn drop_sql(id: &str) -> String {
    format!("DROP MACRO TABLE {id}")
}

/// Fallback drop form, for engines that register the macro under the plain
/// macro namespace.
pub fn drop_sql_fallback(id: &str) -> String {
    format!("DROP MACRO {id}")
}

// Best-effort, line-prefix only: a line whose trimmed text starts with `--`
// is dropped. A `--` mid-line (including inside a string literal) is left
// alone; this is deliberately not a SQL tokenizer.
fn strip_comment_lines(body: &str) -> String {
    body.lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
}
