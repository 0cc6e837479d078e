//! Query execution against an in-memory root value.
//!
//! Just enough of the query semantics to serve canned/synthesized data:
//! operation selection, aliases, fragments (gated on the `__type`
//! discriminator), `__typename`, and element-wise list resolution. Field
//! arguments are accepted but do not influence lookup, matching the behavior
//! of plain-value resolvers.

use async_graphql_parser::parse_query;
use async_graphql_parser::types::{
    DocumentOperations, ExecutableDocument, OperationDefinition, Selection, SelectionSet,
};
use serde_json::{json, Map, Value};

use crate::schema::{GraphqlError, GraphqlTypes};

/// Execute a query string against `root`, returning a standard
/// `{"data": ...}` envelope.
pub fn execute(
    types: &GraphqlTypes,
    root: &Value,
    query: &str,
    operation_name: Option<&str>,
) -> Result<Value, GraphqlError> {
    let doc = parse_query(query).map_err(|err| GraphqlError::Query(err.to_string()))?;
    let operation = select_operation(&doc, operation_name)?;
    let data = resolve_set(types, &doc, &operation.selection_set.node, root)?;
    Ok(json!({ "data": data }))
}

fn select_operation<'a>(
    doc: &'a ExecutableDocument,
    name: Option<&str>,
) -> Result<&'a OperationDefinition, GraphqlError> {
    match &doc.operations {
        DocumentOperations::Single(op) => Ok(&op.node),
        DocumentOperations::Multiple(ops) => match name {
            Some(name) => ops
                .iter()
                .find(|(key, _)| key.as_str() == name)
                .map(|(_, op)| &op.node)
                .ok_or_else(|| GraphqlError::Query(format!("unknown operation \"{name}\""))),
            None if ops.len() == 1 => ops
                .iter()
                .next()
                .map(|(_, op)| &op.node)
                .ok_or_else(|| GraphqlError::Query("empty document".to_string())),
            None => Err(GraphqlError::Query(
                "must provide operation name for multi-operation documents".to_string(),
            )),
        },
    }
}

fn resolve_set(
    types: &GraphqlTypes,
    doc: &ExecutableDocument,
    set: &SelectionSet,
    data: &Value,
) -> Result<Value, GraphqlError> {
    let mut out = Map::new();
    collect_set(types, doc, set, data, &mut out)?;
    Ok(Value::Object(out))
}

fn collect_set(
    types: &GraphqlTypes,
    doc: &ExecutableDocument,
    set: &SelectionSet,
    data: &Value,
    out: &mut Map<String, Value>,
) -> Result<(), GraphqlError> {
    for item in &set.items {
        match &item.node {
            Selection::Field(field) => {
                let field = &field.node;
                let name = field.name.node.as_str();
                let key = field
                    .alias
                    .as_ref()
                    .map(|alias| alias.node.to_string())
                    .unwrap_or_else(|| name.to_string());
                if name == "__typename" {
                    out.insert(key, data.get("__type").cloned().unwrap_or(Value::Null));
                    continue;
                }
                let value = data.get(name).cloned().unwrap_or(Value::Null);
                let resolved = resolve_value(types, doc, &field.selection_set.node, &value)?;
                out.insert(key, resolved);
            }
            Selection::FragmentSpread(spread) => {
                let name = spread.node.fragment_name.node.as_str();
                let fragment = doc
                    .fragments
                    .iter()
                    .find(|(key, _)| key.as_str() == name)
                    .map(|(_, fragment)| &fragment.node)
                    .ok_or_else(|| {
                        GraphqlError::Query(format!("unknown fragment \"{name}\""))
                    })?;
                if condition_matches(types, Some(fragment.type_condition.node.on.node.as_str()), data)
                {
                    collect_set(types, doc, &fragment.selection_set.node, data, out)?;
                }
            }
            Selection::InlineFragment(inline) => {
                let condition = inline
                    .node
                    .type_condition
                    .as_ref()
                    .map(|c| c.node.on.node.as_str());
                if condition_matches(types, condition, data) {
                    collect_set(types, doc, &inline.node.selection_set.node, data, out)?;
                }
            }
        }
    }
    Ok(())
}

fn resolve_value(
    types: &GraphqlTypes,
    doc: &ExecutableDocument,
    set: &SelectionSet,
    value: &Value,
) -> Result<Value, GraphqlError> {
    if set.items.is_empty() {
        return Ok(value.clone());
    }
    match value {
        Value::Array(items) => {
            let resolved: Result<Vec<Value>, GraphqlError> = items
                .iter()
                .map(|item| resolve_value(types, doc, set, item))
                .collect();
            Ok(Value::Array(resolved?))
        }
        Value::Object(_) => resolve_set(types, doc, set, value),
        Value::Null => Ok(Value::Null),
        // Selecting into a scalar: serve the scalar as-is rather than fail.
        other => Ok(other.clone()),
    }
}

/// A fragment applies when its condition matches the value's `__type`
/// discriminator; values without a discriminator (hand-stored overrides)
/// accept every fragment.
fn condition_matches(types: &GraphqlTypes, condition: Option<&str>, data: &Value) -> bool {
    let Some(condition) = condition else {
        return true;
    };
    match data.get("__type").and_then(Value::as_str) {
        Some(concrete) => types.satisfies(concrete, condition),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::build_types;
    use serde_json::json;

    const SDL: &str = r#"
        interface Node { id: ID! }
        type User implements Node { id: ID!, name: String }
        type Bot implements Node { id: ID!, model: String }
        type Query { me: User, node: Node, friends: [User] }
    "#;

    fn root() -> Value {
        json!({
            "me": {"__type": "User", "id": "1", "name": "ada"},
            "node": {"__type": "Bot", "id": "9", "model": "T800"},
            "friends": [
                {"__type": "User", "id": "2", "name": "grace"},
                {"__type": "User", "id": "3", "name": "alan"}
            ]
        })
    }

    #[test]
    fn test_basic_selection_strips_discriminator() {
        let types = build_types(SDL).unwrap();
        let result = execute(&types, &root(), "{ me { id name } }", None).unwrap();
        assert_eq!(
            result,
            json!({"data": {"me": {"id": "1", "name": "ada"}}})
        );
    }

    #[test]
    fn test_alias_and_typename() {
        let types = build_types(SDL).unwrap();
        let result = execute(
            &types,
            &root(),
            "{ user: me { __typename ident: id } }",
            None,
        )
        .unwrap();
        assert_eq!(
            result,
            json!({"data": {"user": {"__typename": "User", "ident": "1"}}})
        );
    }

    #[test]
    fn test_inline_fragments_gate_on_type() {
        let types = build_types(SDL).unwrap();
        let query = "{ node { id ... on User { name } ... on Bot { model } } }";
        let result = execute(&types, &root(), query, None).unwrap();
        assert_eq!(
            result,
            json!({"data": {"node": {"id": "9", "model": "T800"}}})
        );
    }

    #[test]
    fn test_named_fragment_on_interface() {
        let types = build_types(SDL).unwrap();
        let query = "query Q { node { ...ident } } fragment ident on Node { id }";
        let result = execute(&types, &root(), query, None).unwrap();
        assert_eq!(result, json!({"data": {"node": {"id": "9"}}}));
    }

    #[test]
    fn test_lists_resolve_element_wise() {
        let types = build_types(SDL).unwrap();
        let result = execute(&types, &root(), "{ friends { name } }", None).unwrap();
        assert_eq!(
            result,
            json!({"data": {"friends": [{"name": "grace"}, {"name": "alan"}]}})
        );
    }

    #[test]
    fn test_missing_field_is_null() {
        let types = build_types(SDL).unwrap();
        let result = execute(&types, &root(), "{ me { id missing } }", None).unwrap();
        assert_eq!(result["data"]["me"]["missing"], Value::Null);
    }

    #[test]
    fn test_operation_selection_by_name() {
        let types = build_types(SDL).unwrap();
        let query = "query A { me { id } } query B { me { name } }";
        let result = execute(&types, &root(), query, Some("B")).unwrap();
        assert_eq!(result, json!({"data": {"me": {"name": "ada"}}}));
        assert!(execute(&types, &root(), query, None).is_err());
    }

    #[test]
    fn test_malformed_query_is_error() {
        let types = build_types(SDL).unwrap();
        assert!(matches!(
            execute(&types, &root(), "{ me {", None),
            Err(GraphqlError::Query(_))
        ));
    }
}
