//! Schema table built from SDL text.
//!
//! The SDL is parsed once per schema (the parser's output is trusted as-is)
//! and flattened into kind buckets keyed by type name, plus a `root` table
//! mapping operations to their root object types.

use std::collections::HashMap;

use async_graphql_parser::types::{
    BaseType, Type, TypeKind, TypeSystemDefinition,
};
use async_graphql_parser::parse_schema;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum GraphqlError {
    #[error("GraphQL Error: {0}")]
    Schema(String),
    #[error("GraphQL Error: {0}")]
    Query(String),
    #[error("can't handle \"{0}\" type yet")]
    UnsupportedType(String),
}

/// A (possibly wrapped) reference to a named type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "ofType")]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    fn from_ast(ty: &Type) -> Self {
        let base = match &ty.base {
            BaseType::Named(name) => TypeRef::Named(name.to_string()),
            BaseType::List(inner) => TypeRef::List(Box::new(Self::from_ast(inner))),
        };
        if ty.nullable {
            base
        } else {
            TypeRef::NonNull(Box::new(base))
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }

    /// The named type at the bottom of the wrapper chain.
    pub fn named(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.named(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub implements: Vec<String>,
}

/// Interface or union: matching is by the set of concrete possible types.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbstractDef {
    pub name: String,
    pub possible_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<String>,
}

/// All named types of one schema, bucketed by kind.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlTypes {
    pub objects: HashMap<String, ObjectDef>,
    pub input_objects: HashMap<String, ObjectDef>,
    pub interfaces: HashMap<String, AbstractDef>,
    pub unions: HashMap<String, AbstractDef>,
    pub enums: HashMap<String, EnumDef>,
    pub scalars: Vec<String>,
    /// Operation (`query`/`mutation`/`subscription`) → root object name.
    pub root: HashMap<String, String>,
}

impl GraphqlTypes {
    /// Whether `concrete` satisfies `condition` (same type, interface
    /// implementor, or union member).
    pub fn satisfies(&self, concrete: &str, condition: &str) -> bool {
        if concrete == condition {
            return true;
        }
        if let Some(interface) = self.interfaces.get(condition) {
            return interface.possible_types.iter().any(|t| t == concrete);
        }
        if let Some(union) = self.unions.get(condition) {
            return union.possible_types.iter().any(|t| t == concrete);
        }
        false
    }
}

/// Parse SDL text into a [`GraphqlTypes`] table.
pub fn build_types(sdl: &str) -> Result<GraphqlTypes, GraphqlError> {
    let doc = parse_schema(sdl).map_err(|err| GraphqlError::Schema(err.to_string()))?;
    let mut types = GraphqlTypes::default();

    for definition in &doc.definitions {
        match definition {
            TypeSystemDefinition::Schema(schema) => {
                let ops = [
                    ("query", &schema.node.query),
                    ("mutation", &schema.node.mutation),
                    ("subscription", &schema.node.subscription),
                ];
                for (op, name) in ops {
                    if let Some(name) = name {
                        types.root.insert(op.to_string(), name.node.to_string());
                    }
                }
            }
            TypeSystemDefinition::Type(def) => {
                let name = def.node.name.node.to_string();
                match &def.node.kind {
                    TypeKind::Object(obj) => {
                        let fields = obj
                            .fields
                            .iter()
                            .map(|f| FieldDef {
                                name: f.node.name.node.to_string(),
                                ty: TypeRef::from_ast(&f.node.ty.node),
                            })
                            .collect();
                        let implements = obj
                            .implements
                            .iter()
                            .map(|i| i.node.to_string())
                            .collect();
                        types.objects.insert(
                            name.clone(),
                            ObjectDef {
                                name,
                                fields,
                                implements,
                            },
                        );
                    }
                    TypeKind::InputObject(input) => {
                        let fields = input
                            .fields
                            .iter()
                            .map(|f| FieldDef {
                                name: f.node.name.node.to_string(),
                                ty: TypeRef::from_ast(&f.node.ty.node),
                            })
                            .collect();
                        types.input_objects.insert(
                            name.clone(),
                            ObjectDef {
                                name,
                                fields,
                                implements: Vec::new(),
                            },
                        );
                    }
                    TypeKind::Interface(_) => {
                        types.interfaces.insert(
                            name.clone(),
                            AbstractDef {
                                name,
                                possible_types: Vec::new(),
                            },
                        );
                    }
                    TypeKind::Union(union) => {
                        let possible_types =
                            union.members.iter().map(|m| m.node.to_string()).collect();
                        types.unions.insert(
                            name.clone(),
                            AbstractDef {
                                name,
                                possible_types,
                            },
                        );
                    }
                    TypeKind::Enum(en) => {
                        let values = en
                            .values
                            .iter()
                            .map(|v| v.node.value.node.to_string())
                            .collect();
                        types.enums.insert(name.clone(), EnumDef { name, values });
                    }
                    TypeKind::Scalar => types.scalars.push(name),
                }
            }
            TypeSystemDefinition::Directive(_) => {}
        }
    }

    // Conventional root names when no schema block overrides them.
    for (op, default) in [
        ("query", "Query"),
        ("mutation", "Mutation"),
        ("subscription", "Subscription"),
    ] {
        if !types.root.contains_key(op) && types.objects.contains_key(default) {
            types.root.insert(op.to_string(), default.to_string());
        }
    }

    // Interfaces learn their possible types from the objects implementing them.
    let implementors: Vec<(String, String)> = types
        .objects
        .values()
        .flat_map(|obj| {
            obj.implements
                .iter()
                .map(|i| (i.clone(), obj.name.clone()))
                .collect::<Vec<_>>()
        })
        .collect();
    for (interface, object) in implementors {
        if let Some(def) = types.interfaces.get_mut(&interface) {
            def.possible_types.push(object);
        }
    }
    for def in types.interfaces.values_mut() {
        def.possible_types.sort();
    }

    for root in types.root.values() {
        if !types.objects.contains_key(root) {
            return Err(GraphqlError::Schema(format!(
                "root type \"{root}\" is not defined"
            )));
        }
    }
    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        interface Node { id: ID! }
        type User implements Node { id: ID!, name: String, age: Int }
        type Bot implements Node { id: ID!, model: String! }
        union Actor = User | Bot
        enum Role { ADMIN USER }
        type Query { me: User, node: Node, actor: Actor, role: Role }
        type Mutation { rename(name: String!): User }
    "#;

    #[test]
    fn test_buckets_and_roots() {
        let types = build_types(SDL).unwrap();
        assert!(types.objects.contains_key("User"));
        assert!(types.interfaces.contains_key("Node"));
        assert_eq!(types.unions["Actor"].possible_types, vec!["User", "Bot"]);
        assert_eq!(types.enums["Role"].values, vec!["ADMIN", "USER"]);
        assert_eq!(types.root["query"], "Query");
        assert_eq!(types.root["mutation"], "Mutation");
    }

    #[test]
    fn test_interface_possible_types_computed() {
        let types = build_types(SDL).unwrap();
        assert_eq!(types.interfaces["Node"].possible_types, vec!["Bot", "User"]);
    }

    #[test]
    fn test_explicit_schema_block() {
        let types = build_types(
            r#"
            schema { query: Root }
            type Root { ping: String }
        "#,
        )
        .unwrap();
        assert_eq!(types.root["query"], "Root");
    }

    #[test]
    fn test_satisfies() {
        let types = build_types(SDL).unwrap();
        assert!(types.satisfies("User", "User"));
        assert!(types.satisfies("User", "Node"));
        assert!(types.satisfies("Bot", "Actor"));
        assert!(!types.satisfies("User", "Role"));
    }

    #[test]
    fn test_invalid_sdl_is_schema_error() {
        assert!(matches!(
            build_types("type {"),
            Err(GraphqlError::Schema(_))
        ));
    }
}
