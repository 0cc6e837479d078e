//! Type-graph-driven value codec.
//!
//! One generic encode/decode pair interprets the parsed type graph instead of
//! generating per-type code: dispatch is on `typeId` (and the nested `type`
//! node), with JSON values as the in-memory representation throughout.

use serde_json::{Map, Number, Value};

use crate::file::{Field, FieldType, ThriftJson, TypeId, TypeNode};
use crate::protocol::{CodecError, ProtocolReader, ProtocolWriter, TType};

/// Thrift application exception codes used by the engine.
pub const EXCEPTION_UNKNOWN: i32 = 0;
pub const EXCEPTION_UNKNOWN_METHOD: i32 = 1;
pub const EXCEPTION_MISSING_RESULT: i32 = 5;

/// `TApplicationException` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationException {
    pub message: String,
    pub kind: i32,
}

impl ApplicationException {
    pub fn unknown_method(name: &str) -> Self {
        Self {
            message: format!("Unknown function {name}"),
            kind: EXCEPTION_UNKNOWN_METHOD,
        }
    }

    pub fn missing_result(name: &str) -> Self {
        Self {
            message: format!("Mimic: no data found for function '{name}'"),
            kind: EXCEPTION_MISSING_RESULT,
        }
    }

    /// Human-readable tag used in request logs and client errors.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EXCEPTION_UNKNOWN_METHOD => "UNKNOWN_METHOD",
            EXCEPTION_MISSING_RESULT => "MISSING_RESULT",
            _ => "UNKNOWN",
        }
    }

    pub fn write(&self, writer: &mut dyn ProtocolWriter) {
        writer.write_struct_begin("TApplicationException");
        writer.write_field_begin("message", TType::String, 1);
        writer.write_string(&self.message);
        writer.write_field_end();
        writer.write_field_begin("type", TType::I32, 2);
        writer.write_i32(self.kind);
        writer.write_field_end();
        writer.write_field_stop();
        writer.write_struct_end();
    }

    pub fn read(reader: &mut dyn ProtocolReader) -> Result<Self, CodecError> {
        let mut exception = Self {
            message: String::new(),
            kind: EXCEPTION_UNKNOWN,
        };
        reader.read_struct_begin()?;
        while let Some((field_type, id)) = reader.read_field_begin()? {
            match (id, field_type) {
                (1, TType::String) => exception.message = reader.read_string()?,
                (2, TType::I32) => exception.kind = reader.read_i32()?,
                (_, other) => reader.skip(other)?,
            }
            reader.read_field_end()?;
        }
        reader.read_struct_end()?;
        Ok(exception)
    }
}

/// Wire tag for a resolved field type.
pub fn wire_type(ty: &FieldType) -> TType {
    match ty.type_id {
        TypeId::Bool => TType::Bool,
        TypeId::Byte | TypeId::I8 => TType::Byte,
        TypeId::I16 => TType::I16,
        TypeId::I32 => TType::I32,
        TypeId::I64 => TType::I64,
        TypeId::Double => TType::Double,
        TypeId::String | TypeId::Binary | TypeId::Slist => TType::String,
        TypeId::Struct | TypeId::Union | TypeId::Exception => TType::Struct,
        TypeId::List => TType::List,
        TypeId::Set => TType::Set,
        TypeId::Map => TType::Map,
        TypeId::Void => TType::Void,
    }
}

fn elem_field_type(type_id: TypeId, node: &Option<Box<TypeNode>>, extra: &Option<crate::file::ExtraType>) -> FieldType {
    FieldType {
        type_id,
        node: node.as_deref().cloned(),
        extra: extra.clone(),
    }
}

/// Encode a JSON value guided by its resolved type.
pub fn write_value(
    writer: &mut dyn ProtocolWriter,
    def: &ThriftJson,
    ty: &FieldType,
    value: &Value,
) -> Result<(), CodecError> {
    if let Some(node) = &ty.node {
        return match node {
            TypeNode::Struct { class } | TypeNode::Union { class } | TypeNode::Exception { class } => {
                let target = def
                    .find_struct(class)
                    .ok_or_else(|| CodecError::Unsupported(class.clone()))?;
                write_struct(writer, def, &target.name, &target.fields, value)
            }
            TypeNode::List {
                elem_type_id,
                elem_type,
                extra,
            } => {
                let elem = elem_field_type(*elem_type_id, elem_type, extra);
                let items = value.as_array().cloned().unwrap_or_default();
                writer.write_list_begin(wire_type(&elem), items.len());
                for item in &items {
                    write_value(writer, def, &elem, item)?;
                }
                writer.write_list_end();
                Ok(())
            }
            TypeNode::Set {
                elem_type_id,
                elem_type,
                extra,
            } => {
                let elem = elem_field_type(*elem_type_id, elem_type, extra);
                let items = value.as_array().cloned().unwrap_or_default();
                writer.write_set_begin(wire_type(&elem), items.len());
                for item in &items {
                    write_value(writer, def, &elem, item)?;
                }
                writer.write_set_end();
                Ok(())
            }
            TypeNode::Map {
                key_type_id,
                value_type_id,
                key_type,
                value_type,
                key_extra,
                value_extra,
            } => {
                let key_ty = elem_field_type(*key_type_id, key_type, key_extra);
                let value_ty = elem_field_type(*value_type_id, value_type, value_extra);
                let entries = value.as_object().cloned().unwrap_or_default();
                writer.write_map_begin(wire_type(&key_ty), wire_type(&value_ty), entries.len());
                for (key, entry) in &entries {
                    write_key(writer, &key_ty, key)?;
                    write_value(writer, def, &value_ty, entry)?;
                }
                writer.write_map_end();
                Ok(())
            }
        };
    }
    match ty.type_id {
        TypeId::Bool => writer.write_bool(value.as_bool().unwrap_or_default()),
        TypeId::Byte | TypeId::I8 => writer.write_byte(value.as_i64().unwrap_or_default() as i8),
        TypeId::I16 => writer.write_i16(value.as_i64().unwrap_or_default() as i16),
        TypeId::I32 => writer.write_i32(value.as_i64().unwrap_or_default() as i32),
        TypeId::I64 => writer.write_i64(value.as_i64().unwrap_or_default()),
        TypeId::Double => writer.write_double(value.as_f64().unwrap_or_default()),
        TypeId::String | TypeId::Binary | TypeId::Slist => {
            match value {
                Value::String(s) => writer.write_string(s),
                other => writer.write_string(&other.to_string()),
            }
        }
        other => return Err(CodecError::Unsupported(other.as_str().to_string())),
    }
    Ok(())
}

/// Map keys arrive as JSON strings; coerce them to the declared key type.
fn write_key(writer: &mut dyn ProtocolWriter, ty: &FieldType, key: &str) -> Result<(), CodecError> {
    match ty.type_id {
        TypeId::Bool => writer.write_bool(key == "true" || key == "1"),
        TypeId::Byte | TypeId::I8 => writer.write_byte(key.parse().unwrap_or_default()),
        TypeId::I16 => writer.write_i16(key.parse().unwrap_or_default()),
        TypeId::I32 => writer.write_i32(key.parse().unwrap_or_default()),
        TypeId::I64 => writer.write_i64(key.parse().unwrap_or_default()),
        TypeId::Double => writer.write_double(key.parse().unwrap_or_default()),
        TypeId::String | TypeId::Binary | TypeId::Slist => writer.write_string(key),
        other => return Err(CodecError::Unsupported(other.as_str().to_string())),
    }
    Ok(())
}

/// Encode an object as a struct with the given fields, skipping null/missing
/// entries.
pub fn write_struct(
    writer: &mut dyn ProtocolWriter,
    def: &ThriftJson,
    name: &str,
    fields: &[Field],
    value: &Value,
) -> Result<(), CodecError> {
    writer.write_struct_begin(name);
    for field in fields {
        let entry = value.get(&field.name);
        match entry {
            Some(entry) if !entry.is_null() => {
                writer.write_field_begin(&field.name, wire_type(&field.ty), field.key);
                write_value(writer, def, &field.ty, entry)?;
                writer.write_field_end();
            }
            _ => {}
        }
    }
    writer.write_field_stop();
    writer.write_struct_end();
    Ok(())
}

/// Decode a value guided by its resolved type.
pub fn read_value(
    reader: &mut dyn ProtocolReader,
    def: &ThriftJson,
    ty: &FieldType,
) -> Result<Value, CodecError> {
    if let Some(node) = &ty.node {
        return match node {
            TypeNode::Struct { class } | TypeNode::Union { class } | TypeNode::Exception { class } => {
                let target = def
                    .find_struct(class)
                    .ok_or_else(|| CodecError::Unsupported(class.clone()))?;
                read_struct(reader, def, &target.fields)
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
                let elem = elem_field_type(*elem_type_id, elem_type, extra);
                let (_, size) = if matches!(node, TypeNode::List { .. }) {
                    reader.read_list_begin()?
                } else {
                    reader.read_set_begin()?
                };
                let mut items = Vec::with_capacity(size.min(1024));
                for _ in 0..size {
                    items.push(read_value(reader, def, &elem)?);
                }
                if matches!(node, TypeNode::List { .. }) {
                    reader.read_list_end()?;
                } else {
                    reader.read_set_end()?;
                }
                Ok(Value::Array(items))
            }
            TypeNode::Map {
                key_type_id,
                value_type_id,
                key_type,
                value_type,
                key_extra,
                value_extra,
            } => {
                let key_ty = elem_field_type(*key_type_id, key_type, key_extra);
                let value_ty = elem_field_type(*value_type_id, value_type, value_extra);
                let (_, _, size) = reader.read_map_begin()?;
                let mut entries = Map::new();
                for _ in 0..size {
                    let key = match read_value(reader, def, &key_ty)? {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    entries.insert(key, read_value(reader, def, &value_ty)?);
                }
                reader.read_map_end()?;
                Ok(Value::Object(entries))
            }
        };
    }
    Ok(match ty.type_id {
        TypeId::Bool => Value::Bool(reader.read_bool()?),
        TypeId::Byte | TypeId::I8 => Value::from(reader.read_byte()?),
        TypeId::I16 => Value::from(reader.read_i16()?),
        TypeId::I32 => Value::from(reader.read_i32()?),
        TypeId::I64 => Value::from(reader.read_i64()?),
        TypeId::Double => Number::from_f64(reader.read_double()?)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        TypeId::String | TypeId::Binary | TypeId::Slist => Value::String(reader.read_string()?),
        other => return Err(CodecError::Unsupported(other.as_str().to_string())),
    })
}

/// Decode a struct, matching incoming fields by id and skipping unknown or
/// type-mismatched fields to keep the framing intact.
pub fn read_struct(
    reader: &mut dyn ProtocolReader,
    def: &ThriftJson,
    fields: &[Field],
) -> Result<Value, CodecError> {
    reader.read_struct_begin()?;
    let mut out = Map::new();
    while let Some((field_type, id)) = reader.read_field_begin()? {
        let declared = fields.iter().find(|f| f.key == id);
        match declared {
            Some(field) if wire_type(&field.ty) == field_type => {
                out.insert(field.name.clone(), read_value(reader, def, &field.ty)?);
            }
            _ => reader.skip(field_type)?,
        }
        reader.read_field_end()?;
    }
    reader.read_struct_end()?;
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ThriftParser;
    use crate::protocol::{reader_for, writer_for};
    use assert_json_diff::assert_json_eq;
    use mimic_core::ThriftProtocol;
    use serde_json::json;

    async fn fixture() -> ThriftJson {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.thrift");
        std::fs::write(
            &path,
            r#"
            enum Status { OK = 200 ERROR = 500 }
            struct Inner { 1: i64 id 2: optional string label }
            struct Outer {
              1: required string name
              2: Inner inner
              3: list<Inner> items
              4: map<string, i32> counts
              5: Status status
              6: bool active
              7: double score
              8: set<string> tags
            }
        "#,
        )
        .unwrap();
        ThriftParser::new(vec![])
            .parse(path.to_str().unwrap())
            .await
            .unwrap()
    }

    fn outer_type() -> FieldType {
        FieldType {
            type_id: TypeId::Struct,
            node: Some(TypeNode::Struct {
                class: "Outer".into(),
            }),
            extra: None,
        }
    }

    fn sample() -> Value {
        json!({
            "name": "alpha",
            "inner": {"id": 7, "label": "x"},
            "items": [{"id": 1}, {"id": 2, "label": "two"}],
            "counts": {"a": 1, "b": 2},
            "status": 200,
            "active": true,
            "score": 4.5,
            "tags": ["t1", "t2"]
        })
    }

    #[tokio::test]
    async fn test_roundtrip_all_protocols() {
        let def = fixture().await;
        let ty = outer_type();
        let value = sample();
        for protocol in [
            ThriftProtocol::Binary,
            ThriftProtocol::Compact,
            ThriftProtocol::Json,
        ] {
            let mut writer = writer_for(protocol);
            write_value(writer.as_mut(), &def, &ty, &value).unwrap();
            let bytes = writer.finish();
            let mut reader = reader_for(protocol, &bytes).unwrap();
            let decoded = read_value(reader.as_mut(), &def, &ty).unwrap();
            assert_eq!(decoded, value, "roundtrip failed for {protocol:?}");
        }
    }

    #[tokio::test]
    async fn test_null_fields_are_omitted() {
        let def = fixture().await;
        let ty = outer_type();
        let value = json!({ "name": "only", "inner": null });
        let mut writer = writer_for(ThriftProtocol::Binary);
        write_value(writer.as_mut(), &def, &ty, &value).unwrap();
        let bytes = writer.finish();
        let mut reader = reader_for(ThriftProtocol::Binary, &bytes).unwrap();
        let decoded = read_value(reader.as_mut(), &def, &ty).unwrap();
        assert_json_eq!(decoded, json!({ "name": "only" }));
    }

    #[tokio::test]
    async fn test_unknown_fields_are_skipped() {
        let def = fixture().await;
        // Encode with a field id the decoder's view doesn't declare.
        let mut writer = writer_for(ThriftProtocol::Binary);
        writer.write_struct_begin("Outer");
        writer.write_field_begin("name", TType::String, 1);
        writer.write_string("kept");
        writer.write_field_end();
        writer.write_field_begin("mystery", TType::I64, 99);
        writer.write_i64(123);
        writer.write_field_end();
        writer.write_field_stop();
        writer.write_struct_end();
        let bytes = writer.finish();

        let outer = def.find_struct("Outer").unwrap().clone();
        let mut reader = reader_for(ThriftProtocol::Binary, &bytes).unwrap();
        let decoded = read_struct(reader.as_mut(), &def, &outer.fields).unwrap();
        assert_eq!(decoded, json!({ "name": "kept" }));
    }

    #[test]
    fn test_application_exception_roundtrip() {
        let exception = ApplicationException::missing_result("fetch");
        for protocol in [
            ThriftProtocol::Binary,
            ThriftProtocol::Compact,
            ThriftProtocol::Json,
        ] {
            let mut writer = writer_for(protocol);
            exception.write(writer.as_mut());
            let bytes = writer.finish();
            let mut reader = reader_for(protocol, &bytes).unwrap();
            let decoded = ApplicationException::read(reader.as_mut()).unwrap();
            assert_eq!(decoded, exception);
            assert_eq!(decoded.kind_name(), "MISSING_RESULT");
        }
    }
}
