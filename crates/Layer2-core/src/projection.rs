//! Helper Projection Generator
//!
//! Emits a JavaScript helper object per server key so a scripting surface
//! can discover and call tools without knowing the wire protocol. The
//! catalog snapshot is embedded in the generated source; discovery calls
//! (listTools, searchTools, getToolSchema) run entirely locally, and only
//! invoke / getData cross the single `__invokeTool` RPC boundary.

use crate::mcp::ToolDefinition;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tether_foundation::{Error, Result};

/// Parameters shown inline in a compact description before folding the
/// rest into "+K more"
const MAX_INLINE_PARAMS: usize = 4;

/// Tool signatures shown per server in the compact catalog description
const MAX_INLINE_TOOLS: usize = 5;

/// Default row cap for staged-data follow-up queries
const STAGED_QUERY_LIMIT: u32 = 100;

/// One parameter extracted from a JSON Schema
struct ParamSummary {
    name: String,
    type_name: String,
    required: bool,
}

/// Pull parameter names, types and requiredness out of a JSON Schema
/// object. Schemas are server-owned and frequently sloppy; anything that
/// does not look like `{properties: {...}}` yields the permissive
/// fallback.
fn schema_params(schema: &Value) -> Option<Vec<ParamSummary>> {
    let properties = schema.get("properties")?.as_object()?;

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut params: Vec<ParamSummary> = properties
        .iter()
        .map(|(name, prop)| ParamSummary {
            name: name.clone(),
            type_name: prop
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("any")
                .to_string(),
            required: required.contains(&name.as_str()),
        })
        .collect();

    // Required params first, stable by name within each group
    params.sort_by(|a, b| b.required.cmp(&a.required).then(a.name.cmp(&b.name)));
    Some(params)
}

/// Compact one-line signature for a tool schema, e.g.
/// `(query: string, limit?: number, +3 more)`. Unparseable schemas fall
/// back to `(args?: object)`.
pub fn summarize_schema(schema: &Value) -> String {
    let Some(params) = schema_params(schema) else {
        return "(args?: object)".to_string();
    };

    if params.is_empty() {
        return "()".to_string();
    }

    let shown: Vec<String> = params
        .iter()
        .take(MAX_INLINE_PARAMS)
        .map(|p| {
            if p.required {
                format!("{}: {}", p.name, p.type_name)
            } else {
                format!("{}?: {}", p.name, p.type_name)
            }
        })
        .collect();

    let hidden = params.len().saturating_sub(MAX_INLINE_PARAMS);
    if hidden > 0 {
        format!("({}, +{} more)", shown.join(", "), hidden)
    } else {
        format!("({})", shown.join(", "))
    }
}

/// Lookup aliases for a tool name: lowercased and separator-stripped
/// variants, so `list_issues`, `listIssues` and `listissues` all resolve.
fn name_aliases(name: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    let stripped: String = lower.chars().filter(|c| *c != '_' && *c != '-').collect();

    let mut aliases = Vec::new();
    if lower != name {
        aliases.push(lower.clone());
    }
    if stripped != lower && stripped != name {
        aliases.push(stripped);
    }
    aliases
}

/// Catalog snapshot embedded in the generated helper
fn catalog_snapshot(tools: &BTreeMap<String, ToolDefinition>) -> Value {
    let entries: serde_json::Map<String, Value> = tools
        .iter()
        .map(|(name, tool)| {
            (
                name.clone(),
                json!({
                    "description": tool.description.clone().unwrap_or_default(),
                    "signature": summarize_schema(&tool.input_schema),
                    "inputSchema": tool.input_schema,
                }),
            )
        })
        .collect();
    Value::Object(entries)
}

fn alias_table(tools: &BTreeMap<String, ToolDefinition>) -> Value {
    let mut aliases = serde_json::Map::new();
    for name in tools.keys() {
        for alias in name_aliases(name) {
            // First registration wins on alias collisions between tools
            aliases
                .entry(alias)
                .or_insert_with(|| Value::String(name.clone()));
        }
    }
    Value::Object(aliases)
}

/// Generate the JavaScript helper source for one server.
///
/// The result defines `const <serverKey> = {...}` with listTools,
/// searchTools, getToolSchema, invoke and getData. invoke throws a
/// classified error on failure unless `throwOnError: false`; getData
/// additionally follows a staged result with a bounded follow-up query.
/// The host environment must provide `__invokeTool(serverKey, toolName,
/// args)` returning the normalized `{ok, data, error, staged}` envelope.
pub fn generate_helper(server_key: &str, tools: &BTreeMap<String, ToolDefinition>) -> String {
    let catalog_json =
        serde_json::to_string(&catalog_snapshot(tools)).unwrap_or_else(|_| "{}".to_string());
    let aliases_json =
        serde_json::to_string(&alias_table(tools)).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"// Generated tool helper for server '{key}'. Do not edit.
const {key} = (() => {{
  const __tools = {catalog};
  const __aliases = {aliases};

  function __resolve(name) {{
    if (Object.prototype.hasOwnProperty.call(__tools, name)) return name;
    const alias = __aliases[String(name).toLowerCase()];
    return alias !== undefined ? alias : null;
  }}

  function __unknownToolError(name) {{
    const known = Object.keys(__tools);
    const needle = String(name).toLowerCase().replace(/[_-]/g, "");
    const near = known.filter(
      (k) => k.toLowerCase().replace(/[_-]/g, "").includes(needle) ||
             needle.includes(k.toLowerCase().replace(/[_-]/g, ""))
    );
    let message = `Unknown tool '${{name}}' on server '{key}'.`;
    if (near.length > 0) {{
      message += ` Did you mean: ${{near.join(", ")}}?`;
    }}
    message += ` Known tools: ${{known.join(", ")}}`;
    return new Error(message);
  }}

  function listTools() {{
    return Object.entries(__tools).map(([name, t]) => ({{
      name,
      description: t.description,
      signature: t.signature,
    }}));
  }}

  function searchTools(query) {{
    const needle = String(query).toLowerCase();
    return listTools().filter(
      (t) =>
        t.name.toLowerCase().includes(needle) ||
        t.description.toLowerCase().includes(needle)
    );
  }}

  function getToolSchema(name) {{
    const resolved = __resolve(name);
    if (resolved === null) throw __unknownToolError(name);
    return __tools[resolved].inputSchema;
  }}

  async function invoke(name, args = {{}}, options = {{}}) {{
    const resolved = __resolve(name);
    if (resolved === null) throw __unknownToolError(name);
    const result = await __invokeTool("{key}", resolved, args);
    if (!result.ok && options.throwOnError !== false) {{
      const e = result.error || {{}};
      const err = new Error(`${{e.code || "UNKNOWN_ERROR"}}: ${{e.message || "tool call failed"}}`);
      err.code = e.code || "UNKNOWN_ERROR";
      err.details = e.details;
      throw err;
    }}
    return result;
  }}

  async function getData(name, args = {{}}, options = {{}}) {{
    const result = await invoke(name, args, options);
    if (!result.ok || !result.staged) return result;
    const staged = result.staged;
    if (!staged.primaryTable) return result;
    const sql = `SELECT * FROM ${{staged.primaryTable}} LIMIT {limit}`;
    return invoke("query", {{ data_access_id: staged.dataAccessId, query: sql }}, options);
  }}

  return {{ listTools, searchTools, getToolSchema, invoke, getData }};
}})();
"#,
        key = server_key,
        catalog = catalog_json,
        aliases = aliases_json,
        limit = STAGED_QUERY_LIMIT,
    )
}

/// Bare JavaScript identifier: letters, digits and underscore, no
/// leading digit
fn valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Register an extra identifier pointing at an existing server helper
/// object, e.g. `generate_alias("gh", "github")` emits
/// `const gh = github;`. The alias must be a bare identifier so the
/// emitted line is valid source.
pub fn generate_alias(alias: &str, server_key: &str) -> Result<String> {
    if !valid_identifier(alias) {
        return Err(Error::InvalidInput(format!(
            "Alias '{}' is not a valid identifier",
            alias
        )));
    }
    if !valid_identifier(server_key) {
        return Err(Error::InvalidInput(format!(
            "Server key '{}' is not a valid identifier",
            server_key
        )));
    }
    Ok(format!("const {} = {};\n", alias, server_key))
}

/// Compact one-server catalog description: the first few tool signatures
/// plus a "+K more" tail. Embedded in downstream prompt context, so size
/// is bounded regardless of how many tools a server exposes.
pub fn compact_description(server_key: &str, tools: &BTreeMap<String, ToolDefinition>) -> String {
    let signatures: Vec<String> = tools
        .iter()
        .take(MAX_INLINE_TOOLS)
        .map(|(name, tool)| format!("{}{}", name, summarize_schema(&tool.input_schema)))
        .collect();

    let hidden = tools.len().saturating_sub(MAX_INLINE_TOOLS);
    if hidden > 0 {
        format!(
            "{}: {}, +{} more tools",
            server_key,
            signatures.join(", "),
            hidden
        )
    } else {
        format!("{}: {}", server_key, signatures.join(", "))
    }
}

/// Generate helper sources for every server in a catalog, concatenated in
/// key order
pub fn generate_all(catalog: &crate::catalog::AggregatedCatalog) -> String {
    catalog
        .iter()
        .map(|(key, entry)| generate_helper(key, &entry.tools))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, description: &str, schema: Value) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: Some(description.to_string()),
            input_schema: schema,
        }
    }

    fn sample_tools() -> BTreeMap<String, ToolDefinition> {
        let mut tools = BTreeMap::new();
        tools.insert(
            "search_issues".to_string(),
            tool(
                "search_issues",
                "Search issues",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "limit": { "type": "number" }
                    },
                    "required": ["query"]
                }),
            ),
        );
        tools.insert(
            "query".to_string(),
            tool(
                "query",
                "Run a SQL query",
                json!({
                    "type": "object",
                    "properties": { "query": { "type": "string" } },
                    "required": ["query"]
                }),
            ),
        );
        tools
    }

    #[test]
    fn test_summarize_required_before_optional() {
        let schema = json!({
            "type": "object",
            "properties": {
                "limit": { "type": "number" },
                "query": { "type": "string" }
            },
            "required": ["query"]
        });
        assert_eq!(summarize_schema(&schema), "(query: string, limit?: number)");
    }

    #[test]
    fn test_summarize_folds_excess_params() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": { "type": "string" },
                "b": { "type": "string" },
                "c": { "type": "string" },
                "d": { "type": "string" },
                "e": { "type": "string" },
                "f": { "type": "string" }
            }
        });
        let summary = summarize_schema(&schema);
        assert!(summary.ends_with("+2 more)"), "got {}", summary);
    }

    #[test]
    fn test_summarize_permissive_fallback() {
        assert_eq!(summarize_schema(&json!(null)), "(args?: object)");
        assert_eq!(summarize_schema(&json!({"type": "object"})), "(args?: object)");
        assert_eq!(
            summarize_schema(&json!({"type": "object", "properties": {}})),
            "()"
        );
    }

    #[test]
    fn test_helper_source_shape() {
        let source = generate_helper("github", &sample_tools());

        assert!(source.contains("const github = "));
        assert!(source.contains("function listTools()"));
        assert!(source.contains("function searchTools(query)"));
        assert!(source.contains("function getToolSchema(name)"));
        assert!(source.contains("async function invoke(name"));
        assert!(source.contains("async function getData(name"));
        // Throws by default, suppressed only by throwOnError: false
        assert!(source.contains("options.throwOnError !== false"));
        // Single RPC boundary
        assert!(source.contains(r#"__invokeTool("github""#));
        // Embedded catalog
        assert!(source.contains("search_issues"));
        assert!(source.contains("Run a SQL query"));
    }

    #[test]
    fn test_aliases_cover_name_variants() {
        let aliases = alias_table(&sample_tools());
        assert_eq!(aliases["searchissues"], "search_issues");
    }

    #[test]
    fn test_compact_description_folds_excess_tools() {
        let mut tools = BTreeMap::new();
        for i in 0..8 {
            let name = format!("tool{}", i);
            tools.insert(name.clone(), tool(&name, "", json!({"type": "object"})));
        }

        let description = compact_description("alpha", &tools);
        assert!(description.starts_with("alpha: tool0(args?: object)"));
        assert!(description.ends_with("+3 more tools"));
    }

    #[test]
    fn test_compact_description_small_server() {
        let description = compact_description("github", &sample_tools());
        assert!(!description.contains("more tools"));
        assert!(description.contains("query(query: string)"));
    }

    #[test]
    fn test_generate_alias_points_at_server_object() {
        assert_eq!(
            generate_alias("gh", "github").unwrap(),
            "const gh = github;\n"
        );
        assert!(generate_alias("bad-name", "github").is_err());
        assert!(generate_alias("1st", "github").is_err());
        assert!(generate_alias("gh", "not a key").is_err());
    }

    #[test]
    fn test_staged_follow_up_uses_limit() {
        let source = generate_helper("db", &sample_tools());
        assert!(source.contains("LIMIT 100"));
    }
}
