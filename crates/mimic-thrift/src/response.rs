//! Random response synthesis from the type graph, plus the type formatter
//! used in request logs.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Value};

use crate::file::{ExtraType, FieldType, Requiredness, ThriftJson, TypeId, TypeNode};

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("can't handle \"{0}\" type yet")]
    UnsupportedType(String),
    #[error("unknown type \"{0}\"")]
    UnknownClass(String),
}

/// Generate a structurally valid random value for a resolved type.
///
/// With `all_fields` unset, only fields whose requiredness is not `optional`
/// are populated. Unions always carry exactly their first field, matching
/// the wire invariant that at most one member is set.
pub fn generate_response(
    def: &ThriftJson,
    ty: &FieldType,
    all_fields: bool,
) -> Result<Value, GenerateError> {
    let mut rng = rand::thread_rng();
    if let Some(ExtraType::Enum { class }) = &ty.extra {
        let en = def
            .find_enum(class)
            .ok_or_else(|| GenerateError::UnknownClass(class.clone()))?;
        let member = en
            .members
            .choose(&mut rng)
            .ok_or_else(|| GenerateError::UnknownClass(class.clone()))?;
        return Ok(Value::from(member.value));
    }
    if let Some(node) = &ty.node {
        return match node {
            TypeNode::Struct { class } | TypeNode::Union { class } | TypeNode::Exception { class } => {
                let target = def
                    .find_struct(class)
                    .ok_or_else(|| GenerateError::UnknownClass(class.clone()))?;
                let mut out = Map::new();
                if target.is_union {
                    if let Some(field) = target.fields.first() {
                        out.insert(
                            field.name.clone(),
                            generate_response(def, &field.ty, all_fields)?,
                        );
                    }
                    return Ok(Value::Object(out));
                }
                for field in &target.fields {
                    if all_fields || field.required != Requiredness::Optional {
                        out.insert(
                            field.name.clone(),
                            generate_response(def, &field.ty, all_fields)?,
                        );
                    }
                }
                Ok(Value::Object(out))
            }
            TypeNode::List {
                elem_type_id,
                elem_type,
                extra,
            }
            | TypeNode::Set {
                elem_type_id,
                elem_type,
                extra,
            } => {
                let elem = FieldType {
                    type_id: *elem_type_id,
                    node: elem_type.as_deref().cloned(),
                    extra: extra.clone(),
                };
                // Always a single element.
                Ok(Value::Array(vec![generate_response(def, &elem, all_fields)?]))
            }
            TypeNode::Map {
                key_type_id,
                value_type_id,
                key_type,
                value_type,
                key_extra,
                value_extra,
            } => {
                let key_ty = FieldType {
                    type_id: *key_type_id,
                    node: key_type.as_deref().cloned(),
                    extra: key_extra.clone(),
                };
                let value_ty = FieldType {
                    type_id: *value_type_id,
                    node: value_type.as_deref().cloned(),
                    extra: value_extra.clone(),
                };
                let key = match generate_response(def, &key_ty, all_fields)? {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                let mut out = Map::new();
                out.insert(key, generate_response(def, &value_ty, all_fields)?);
                Ok(Value::Object(out))
            }
        };
    }
    match ty.type_id {
        TypeId::Void => Ok(Value::Null),
        TypeId::Bool => Ok(Value::Bool(rng.gen_bool(0.5))),
        TypeId::Byte | TypeId::I8 | TypeId::I16 | TypeId::I32 | TypeId::I64 => {
            Ok(Value::from(rng.gen_range(0..10)))
        }
        TypeId::Double => Ok(Value::from(rng.gen_range(0.0..10.0))),
        TypeId::String => Ok(Value::String(
            "lorem_ipsum"[rng.gen_range(0..10)..].to_string(),
        )),
        other => Err(GenerateError::UnsupportedType(other.as_str().to_string())),
    }
}

/// Short type description used in request log strings, e.g.
/// `map<string,list<Inner>>`.
pub fn format_thrift(ty: &FieldType) -> String {
    if let Some(node) = &ty.node {
        return match node {
            TypeNode::Struct { class } | TypeNode::Union { class } | TypeNode::Exception { class } => {
                class.clone()
            }
            TypeNode::List {
                elem_type_id,
                elem_type,
                extra,
            } => format!(
                "list<{}>",
                format_thrift(&FieldType {
                    type_id: *elem_type_id,
                    node: elem_type.as_deref().cloned(),
                    extra: extra.clone(),
                })
            ),
            TypeNode::Set {
                elem_type_id,
                elem_type,
                extra,
            } => format!(
                "set<{}>",
                format_thrift(&FieldType {
                    type_id: *elem_type_id,
                    node: elem_type.as_deref().cloned(),
                    extra: extra.clone(),
                })
            ),
            TypeNode::Map {
                key_type_id,
                value_type_id,
                key_type,
                value_type,
                key_extra,
                value_extra,
            } => format!(
                "map<{},{}>",
                format_thrift(&FieldType {
                    type_id: *key_type_id,
                    node: key_type.as_deref().cloned(),
                    extra: key_extra.clone(),
                }),
                format_thrift(&FieldType {
                    type_id: *value_type_id,
                    node: value_type.as_deref().cloned(),
                    extra: value_extra.clone(),
                })
            ),
        };
    }
    ty.type_id.as_str().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ThriftParser;

    async fn fixture() -> ThriftJson {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gen.thrift");
        std::fs::write(
            &path,
            r#"
            enum Color { RED = 1 GREEN = 2 BLUE = 3 }
            struct Mixed {
              1: required string name
              2: optional i32 age
              3: i64 count
            }
            union Either {
              1: string text
              2: i32 number
              3: bool flag
            }
            struct Wrapper {
              1: list<Color> colors
              2: map<string, Mixed> byName
            }
        "#,
        )
        .unwrap();
        ThriftParser::new(vec![])
            .parse(path.to_str().unwrap())
            .await
            .unwrap()
    }

    fn struct_type(class: &str) -> FieldType {
        FieldType {
            type_id: TypeId::Struct,
            node: Some(TypeNode::Struct {
                class: class.into(),
            }),
            extra: None,
        }
    }

    #[tokio::test]
    async fn test_required_only_skips_optional() {
        let def = fixture().await;
        let value = generate_response(&def, &struct_type("Mixed"), false).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("name"));
        // req_out counts as required for output.
        assert!(obj.contains_key("count"));
        assert!(!obj.contains_key("age"));
    }

    #[tokio::test]
    async fn test_all_fields_includes_optional() {
        let def = fixture().await;
        let value = generate_response(&def, &struct_type("Mixed"), true).unwrap();
        assert!(value.as_object().unwrap().contains_key("age"));
    }

    #[tokio::test]
    async fn test_union_always_has_exactly_one_field() {
        let def = fixture().await;
        let ty = FieldType {
            type_id: TypeId::Union,
            node: Some(TypeNode::Union {
                class: "Either".into(),
            }),
            extra: None,
        };
        for all_fields in [false, true] {
            let value = generate_response(&def, &ty, all_fields).unwrap();
            assert_eq!(value.as_object().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_enum_generates_member_value() {
        let def = fixture().await;
        let ty = FieldType {
            type_id: TypeId::I32,
            node: None,
            extra: Some(ExtraType::Enum {
                class: "Color".into(),
            }),
        };
        for _ in 0..10 {
            let value = generate_response(&def, &ty, true).unwrap();
            assert!([1, 2, 3].contains(&value.as_i64().unwrap()));
        }
    }

    #[tokio::test]
    async fn test_containers_have_single_entry() {
        let def = fixture().await;
        let value = generate_response(&def, &struct_type("Wrapper"), true).unwrap();
        assert_eq!(value["colors"].as_array().unwrap().len(), 1);
        assert_eq!(value["byName"].as_object().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_binary_is_unsupported() {
        let def = fixture().await;
        let ty = FieldType::scalar(TypeId::Binary);
        assert!(matches!(
            generate_response(&def, &ty, true),
            Err(GenerateError::UnsupportedType(_))
        ));
    }

    #[tokio::test]
    async fn test_format_thrift() {
        let def = fixture().await;
        let wrapper = def.find_struct("Wrapper").unwrap();
        assert_eq!(format_thrift(&wrapper.fields[0].ty), "list<i32>");
        assert_eq!(format_thrift(&wrapper.fields[1].ty), "map<string,Mixed>");
        assert_eq!(format_thrift(&FieldType::scalar(TypeId::Void)), "void");
    }
}
