//! Structurally valid random responses synthesized from the schema table.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Value};

use crate::schema::{GraphqlError, GraphqlTypes, ObjectDef, TypeRef};

/// Generate a random value for a type reference.
///
/// With `all` unset, only `NON_NULL` object fields are populated. Objects are
/// stamped with a `__type` discriminator so abstract types can be resolved
/// later; the executor strips it from wire output.
pub fn generate(types: &GraphqlTypes, ty: &TypeRef, all: bool) -> Result<Value, GraphqlError> {
    match ty {
        TypeRef::NonNull(inner) => generate(types, inner, all),
        // Always exactly one element; callers must not read cardinality into it.
        TypeRef::List(inner) => Ok(Value::Array(vec![generate(types, inner, all)?])),
        TypeRef::Named(name) => generate_named(types, name, all),
    }
}

/// Generate a random object for a named object type.
pub fn generate_object(
    types: &GraphqlTypes,
    object: &ObjectDef,
    all: bool,
) -> Result<Value, GraphqlError> {
    let mut out = Map::new();
    out.insert("__type".to_string(), Value::String(object.name.clone()));
    for field in &object.fields {
        if all || field.ty.is_non_null() {
            out.insert(field.name.clone(), generate(types, &field.ty, all)?);
        }
    }
    Ok(Value::Object(out))
}

fn generate_named(types: &GraphqlTypes, name: &str, all: bool) -> Result<Value, GraphqlError> {
    let mut rng = rand::thread_rng();
    if let Some(object) = types.objects.get(name) {
        return generate_object(types, object, all);
    }
    if let Some(abstract_def) = types.interfaces.get(name).or_else(|| types.unions.get(name)) {
        let concrete = abstract_def
            .possible_types
            .choose(&mut rng)
            .ok_or_else(|| GraphqlError::UnsupportedType(name.to_string()))?;
        return generate_named(types, concrete, all);
    }
    if let Some(en) = types.enums.get(name) {
        let value = en
            .values
            .choose(&mut rng)
            .ok_or_else(|| GraphqlError::UnsupportedType(name.to_string()))?;
        return Ok(Value::String(value.clone()));
    }
    if types.input_objects.contains_key(name) {
        return Err(GraphqlError::UnsupportedType(name.to_string()));
    }
    // Built-in and custom scalars; unknown names synthesize as strings.
    Ok(match name {
        "Int" => Value::from(rng.gen_range(0..10)),
        "ID" => Value::String(rng.gen_range(0..10).to_string()),
        "Float" => Value::from(rng.gen_range(0.0..10.0)),
        "Boolean" => Value::Bool(rng.gen_bool(0.5)),
        _ => Value::String(lorem(&mut rng)),
    })
}

fn lorem(rng: &mut impl Rng) -> String {
    // Fixed placeholder word with a random leading truncation.
    "lorem_ipsum"[rng.gen_range(0..10)..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::build_types;

    const SDL: &str = r#"
        interface Node { id: ID! }
        type User implements Node { id: ID!, name: String, age: Int! }
        type Bot implements Node { id: ID!, model: String! }
        enum Role { ADMIN USER }
        type Query { me: User!, node: Node!, roles: [Role!]!, flag: Boolean! }
    "#;

    #[test]
    fn test_required_only_omits_nullable_fields() {
        let types = build_types(SDL).unwrap();
        let user = types.objects.get("User").unwrap();
        let value = generate_object(&types, user, false).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("id"));
        assert!(obj.contains_key("age"));
        assert!(!obj.contains_key("name"));
    }

    #[test]
    fn test_all_fields_includes_nullable() {
        let types = build_types(SDL).unwrap();
        let user = types.objects.get("User").unwrap();
        let value = generate_object(&types, user, true).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("name"));
        assert_eq!(obj["__type"], "User");
    }

    #[test]
    fn test_abstract_resolves_to_concrete_with_discriminator() {
        let types = build_types(SDL).unwrap();
        let value = generate(&types, &TypeRef::Named("Node".into()), true).unwrap();
        let name = value["__type"].as_str().unwrap();
        assert!(name == "User" || name == "Bot");
    }

    #[test]
    fn test_list_has_exactly_one_element() {
        let types = build_types(SDL).unwrap();
        let value = generate(
            &types,
            &TypeRef::List(Box::new(TypeRef::Named("Role".into()))),
            true,
        )
        .unwrap();
        let list = value.as_array().unwrap();
        assert_eq!(list.len(), 1);
        let member = list[0].as_str().unwrap();
        assert!(member == "ADMIN" || member == "USER");
    }

    #[test]
    fn test_scalars_in_range() {
        let types = build_types(SDL).unwrap();
        for _ in 0..20 {
            let int = generate(&types, &TypeRef::Named("Int".into()), true).unwrap();
            let n = int.as_i64().unwrap();
            assert!((0..10).contains(&n));
            let id = generate(&types, &TypeRef::Named("ID".into()), true).unwrap();
            assert!(id.as_str().unwrap().parse::<u8>().unwrap() < 10);
            let s = generate(&types, &TypeRef::Named("String".into()), true).unwrap();
            assert!("lorem_ipsum".ends_with(s.as_str().unwrap()));
        }
    }

    #[test]
    fn test_input_object_is_unsupported() {
        let types = build_types("input Filter { q: String }\ntype Query { a: Int }").unwrap();
        assert!(matches!(
            generate(&types, &TypeRef::Named("Filter".into()), true),
            Err(GraphqlError::UnsupportedType(_))
        ));
    }
}
