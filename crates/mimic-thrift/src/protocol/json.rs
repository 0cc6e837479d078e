//! JSON protocol (TJSONProtocol wire form).
//!
//! Messages are `[1, name, type, seqid, payload]`; structs are objects keyed
//! by field id with a single-entry `{typeName: value}` wrapper; lists are
//! `[elemType, size, ...items]`; maps are `[keyType, valueType, size, {..}]`.
//! Bools are 1/0. The writer assembles a `serde_json::Value` tree through a
//! frame stack; the reader walks a parsed tree the same way.

use serde_json::{Map, Value};

use super::{CodecError, MessageHeader, MessageType, ProtocolReader, ProtocolWriter, TType};

fn type_name(field_type: TType) -> &'static str {
    match field_type {
        TType::Bool => "tf",
        TType::Byte => "i8",
        TType::I16 => "i16",
        TType::I32 => "i32",
        TType::I64 => "i64",
        TType::Double => "dbl",
        TType::String => "str",
        TType::Struct => "rec",
        TType::Map => "map",
        TType::List => "lst",
        TType::Set => "set",
        TType::Stop | TType::Void => "",
    }
}

fn type_from_name(name: &str) -> Result<TType, CodecError> {
    Ok(match name {
        "tf" => TType::Bool,
        "i8" => TType::Byte,
        "i16" => TType::I16,
        "i32" => TType::I32,
        "i64" => TType::I64,
        "dbl" => TType::Double,
        "str" => TType::String,
        "rec" => TType::Struct,
        "map" => TType::Map,
        "lst" => TType::List,
        "set" => TType::Set,
        other => {
            return Err(CodecError::Malformed(format!(
                "unknown json type name \"{other}\""
            )))
        }
    })
}

enum WriteFrame {
    Message(Vec<Value>),
    Struct(Map<String, Value>),
    Field { id: i16, field_type: TType },
    List { elem: TType, items: Vec<Value> },
    Set { elem: TType, items: Vec<Value> },
    MapBody {
        key: TType,
        value: TType,
        items: Vec<Value>,
    },
}

pub struct JsonWriter {
    stack: Vec<WriteFrame>,
    root: Option<Value>,
}

impl JsonWriter {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            root: None,
        }
    }

    fn push_value(&mut self, value: Value) {
        if matches!(self.stack.last(), Some(WriteFrame::Field { .. })) {
            let Some(WriteFrame::Field { id, field_type }) = self.stack.pop() else {
                return;
            };
            let mut wrapper = Map::new();
            wrapper.insert(type_name(field_type).to_string(), value);
            if let Some(WriteFrame::Struct(fields)) = self.stack.last_mut() {
                fields.insert(id.to_string(), Value::Object(wrapper));
            } else {
                self.push_value(Value::Object(wrapper));
            }
            return;
        }
        match self.stack.last_mut() {
            Some(WriteFrame::Message(items)) => items.push(value),
            Some(WriteFrame::List { items, .. })
            | Some(WriteFrame::Set { items, .. })
            | Some(WriteFrame::MapBody { items, .. }) => items.push(value),
            Some(WriteFrame::Field { .. }) => {}
            Some(WriteFrame::Struct(_)) | None => self.root = Some(value),
        }
    }
}

impl Default for JsonWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolWriter for JsonWriter {
    fn write_message_begin(&mut self, name: &str, message_type: MessageType, seq_id: i32) {
        self.stack.push(WriteFrame::Message(vec![
            Value::from(1),
            Value::String(name.to_string()),
            Value::from(message_type as i32),
            Value::from(seq_id),
        ]));
    }

    fn write_message_end(&mut self) {
        if let Some(WriteFrame::Message(items)) = self.stack.pop() {
            self.root = Some(Value::Array(items));
        }
    }

    fn write_struct_begin(&mut self, _name: &str) {
        self.stack.push(WriteFrame::Struct(Map::new()));
    }

    fn write_struct_end(&mut self) {
        if let Some(WriteFrame::Struct(fields)) = self.stack.pop() {
            self.push_value(Value::Object(fields));
        }
    }

    fn write_field_begin(&mut self, _name: &str, field_type: TType, id: i16) {
        self.stack.push(WriteFrame::Field { id, field_type });
    }

    fn write_field_end(&mut self) {}

    fn write_field_stop(&mut self) {}

    fn write_list_begin(&mut self, elem_type: TType, _size: usize) {
        self.stack.push(WriteFrame::List {
            elem: elem_type,
            items: Vec::new(),
        });
    }

    fn write_list_end(&mut self) {
        if let Some(WriteFrame::List { elem, items }) = self.stack.pop() {
            let mut list = vec![
                Value::String(type_name(elem).to_string()),
                Value::from(items.len()),
            ];
            list.extend(items);
            self.push_value(Value::Array(list));
        }
    }

    fn write_set_begin(&mut self, elem_type: TType, _size: usize) {
        self.stack.push(WriteFrame::Set {
            elem: elem_type,
            items: Vec::new(),
        });
    }

    fn write_set_end(&mut self) {
        if let Some(WriteFrame::Set { elem, items }) = self.stack.pop() {
            let mut list = vec![
                Value::String(type_name(elem).to_string()),
                Value::from(items.len()),
            ];
            list.extend(items);
            self.push_value(Value::Array(list));
        }
    }

    fn write_map_begin(&mut self, key_type: TType, value_type: TType, _size: usize) {
        self.stack.push(WriteFrame::MapBody {
            key: key_type,
            value: value_type,
            items: Vec::new(),
        });
    }

    fn write_map_end(&mut self) {
        if let Some(WriteFrame::MapBody { key, value, items }) = self.stack.pop() {
            let mut body = Map::new();
            let size = items.len() / 2;
            let mut iter = items.into_iter();
            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                let key_text = match k {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                body.insert(key_text, v);
            }
            self.push_value(Value::Array(vec![
                Value::String(type_name(key).to_string()),
                Value::String(type_name(value).to_string()),
                Value::from(size),
                Value::Object(body),
            ]));
        }
    }

    fn write_bool(&mut self, value: bool) {
        self.push_value(Value::from(if value { 1 } else { 0 }));
    }

    fn write_byte(&mut self, value: i8) {
        self.push_value(Value::from(value));
    }

    fn write_i16(&mut self, value: i16) {
        self.push_value(Value::from(value));
    }

    fn write_i32(&mut self, value: i32) {
        self.push_value(Value::from(value));
    }

    fn write_i64(&mut self, value: i64) {
        self.push_value(Value::from(value));
    }

    fn write_double(&mut self, value: f64) {
        self.push_value(Value::from(value));
    }

    fn write_string(&mut self, value: &str) {
        self.push_value(Value::String(value.to_string()));
    }

    fn finish(mut self: Box<Self>) -> Vec<u8> {
        // An unterminated message frame finishes implicitly.
        if self.root.is_none() {
            if let Some(WriteFrame::Message(items)) = self.stack.pop() {
                self.root = Some(Value::Array(items));
            }
        }
        serde_json::to_vec(&self.root.unwrap_or(Value::Null)).unwrap_or_default()
    }
}

enum ReadFrame {
    Message { items: Vec<Value>, idx: usize },
    Struct { entries: Vec<(String, Value)>, idx: usize },
    Pending(Option<Value>),
    List { items: Vec<Value>, idx: usize },
    MapBody {
        pairs: Vec<(String, Value)>,
        idx: usize,
        key_next: bool,
    },
}

pub struct JsonReader {
    stack: Vec<ReadFrame>,
    consumed: usize,
}

impl JsonReader {
    pub fn new(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<Value>();
        let value = match stream.next() {
            Some(Ok(value)) => value,
            Some(Err(err)) if err.is_eof() => return Err(CodecError::Incomplete),
            Some(Err(err)) => return Err(CodecError::Malformed(err.to_string())),
            None => return Err(CodecError::Incomplete),
        };
        let consumed = stream.byte_offset();
        let stack = match value {
            Value::Array(items) => vec![ReadFrame::Message { items, idx: 0 }],
            other => vec![ReadFrame::Pending(Some(other))],
        };
        Ok(Self { stack, consumed })
    }

    fn next_value(&mut self) -> Result<Value, CodecError> {
        match self.stack.last_mut() {
            Some(ReadFrame::Message { items, idx }) => {
                let value = items
                    .get(*idx)
                    .cloned()
                    .ok_or_else(|| CodecError::Malformed("message underrun".to_string()))?;
                *idx += 1;
                Ok(value)
            }
            Some(ReadFrame::Pending(slot)) => slot
                .take()
                .ok_or_else(|| CodecError::Malformed("field value already read".to_string())),
            Some(ReadFrame::List { items, idx }) => {
                let value = items
                    .get(*idx)
                    .cloned()
                    .ok_or_else(|| CodecError::Malformed("list underrun".to_string()))?;
                *idx += 1;
                Ok(value)
            }
            Some(ReadFrame::MapBody {
                pairs,
                idx,
                key_next,
            }) => {
                let (key, value) = pairs
                    .get(*idx)
                    .cloned()
                    .ok_or_else(|| CodecError::Malformed("map underrun".to_string()))?;
                if *key_next {
                    *key_next = false;
                    Ok(Value::String(key))
                } else {
                    *key_next = true;
                    *idx += 1;
                    Ok(value)
                }
            }
            Some(ReadFrame::Struct { .. }) | None => {
                Err(CodecError::Malformed("value outside of field".to_string()))
            }
        }
    }
}

impl ProtocolReader for JsonReader {
    fn read_message_begin(&mut self) -> Result<MessageHeader, CodecError> {
        let Some(ReadFrame::Message { items, idx }) = self.stack.last_mut() else {
            return Err(CodecError::Malformed("not a message".to_string()));
        };
        if items.len() < 4 {
            return Err(CodecError::Malformed("short message header".to_string()));
        }
        if items[0].as_i64() != Some(1) {
            return Err(CodecError::Malformed(
                "bad json protocol version".to_string(),
            ));
        }
        let name = items[1].as_str().unwrap_or_default().to_string();
        let message_type = MessageType::from_wire(items[2].as_i64().unwrap_or_default() as u8)?;
        let seq_id = items[3].as_i64().unwrap_or_default() as i32;
        *idx = 4;
        Ok(MessageHeader {
            name,
            message_type,
            seq_id,
        })
    }

    fn read_message_end(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<(), CodecError> {
        let value = self.next_value()?;
        let Value::Object(map) = value else {
            return Err(CodecError::Malformed("expected struct object".to_string()));
        };
        self.stack.push(ReadFrame::Struct {
            entries: map.into_iter().collect(),
            idx: 0,
        });
        Ok(())
    }

    fn read_struct_end(&mut self) -> Result<(), CodecError> {
        if matches!(self.stack.last(), Some(ReadFrame::Struct { .. })) {
            self.stack.pop();
        }
        Ok(())
    }

    fn read_field_begin(&mut self) -> Result<Option<(TType, i16)>, CodecError> {
        let Some(ReadFrame::Struct { entries, idx }) = self.stack.last_mut() else {
            return Err(CodecError::Malformed("field outside struct".to_string()));
        };
        let Some((key, value)) = entries.get(*idx).cloned() else {
            return Ok(None);
        };
        *idx += 1;
        let id: i16 = key
            .parse()
            .map_err(|_| CodecError::Malformed(format!("bad field id \"{key}\"")))?;
        let Value::Object(wrapper) = value else {
            return Err(CodecError::Malformed("bad field wrapper".to_string()));
        };
        let (name, inner) = wrapper
            .into_iter()
            .next()
            .ok_or_else(|| CodecError::Malformed("empty field wrapper".to_string()))?;
        let field_type = type_from_name(&name)?;
        self.stack.push(ReadFrame::Pending(Some(inner)));
        Ok(Some((field_type, id)))
    }

    fn read_field_end(&mut self) -> Result<(), CodecError> {
        if matches!(self.stack.last(), Some(ReadFrame::Pending(_))) {
            self.stack.pop();
        }
        Ok(())
    }

    fn read_list_begin(&mut self) -> Result<(TType, usize), CodecError> {
        let value = self.next_value()?;
        let Value::Array(mut items) = value else {
            return Err(CodecError::Malformed("expected list array".to_string()));
        };
        if items.len() < 2 {
            return Err(CodecError::Malformed("short list header".to_string()));
        }
        let rest = items.split_off(2);
        let elem_type = type_from_name(items[0].as_str().unwrap_or_default())?;
        let size = items[1].as_u64().unwrap_or_default() as usize;
        self.stack.push(ReadFrame::List {
            items: rest,
            idx: 0,
        });
        Ok((elem_type, size))
    }

    fn read_list_end(&mut self) -> Result<(), CodecError> {
        if matches!(self.stack.last(), Some(ReadFrame::List { .. })) {
            self.stack.pop();
        }
        Ok(())
    }

    fn read_set_begin(&mut self) -> Result<(TType, usize), CodecError> {
        self.read_list_begin()
    }

    fn read_set_end(&mut self) -> Result<(), CodecError> {
        self.read_list_end()
    }

    fn read_map_begin(&mut self) -> Result<(TType, TType, usize), CodecError> {
        let value = self.next_value()?;
        let Value::Array(items) = value else {
            return Err(CodecError::Malformed("expected map array".to_string()));
        };
        if items.len() < 4 {
            return Err(CodecError::Malformed("short map header".to_string()));
        }
        let key_type = type_from_name(items[0].as_str().unwrap_or_default())?;
        let value_type = type_from_name(items[1].as_str().unwrap_or_default())?;
        let size = items[2].as_u64().unwrap_or_default() as usize;
        let Value::Object(body) = items[3].clone() else {
            return Err(CodecError::Malformed("bad map body".to_string()));
        };
        self.stack.push(ReadFrame::MapBody {
            pairs: body.into_iter().collect(),
            idx: 0,
            key_next: true,
        });
        Ok((key_type, value_type, size))
    }

    fn read_map_end(&mut self) -> Result<(), CodecError> {
        if matches!(self.stack.last(), Some(ReadFrame::MapBody { .. })) {
            self.stack.pop();
        }
        Ok(())
    }

    fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.next_value()? {
            Value::Bool(b) => Ok(b),
            Value::Number(n) => Ok(n.as_i64() != Some(0)),
            Value::String(s) => Ok(s != "0" && !s.is_empty()),
            other => Err(CodecError::Malformed(format!("bad bool {other}"))),
        }
    }

    fn read_byte(&mut self) -> Result<i8, CodecError> {
        self.read_i64().map(|v| v as i8)
    }

    fn read_i16(&mut self) -> Result<i16, CodecError> {
        self.read_i64().map(|v| v as i16)
    }

    fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.read_i64().map(|v| v as i32)
    }

    fn read_i64(&mut self) -> Result<i64, CodecError> {
        match self.next_value()? {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| CodecError::Malformed("non-integer number".to_string())),
            // Map keys arrive as strings.
            Value::String(s) => s
                .parse()
                .map_err(|_| CodecError::Malformed(format!("bad integer \"{s}\""))),
            other => Err(CodecError::Malformed(format!("bad integer {other}"))),
        }
    }

    fn read_double(&mut self) -> Result<f64, CodecError> {
        match self.next_value()? {
            Value::Number(n) => Ok(n.as_f64().unwrap_or_default()),
            Value::String(s) => s
                .parse()
                .map_err(|_| CodecError::Malformed(format!("bad double \"{s}\""))),
            other => Err(CodecError::Malformed(format!("bad double {other}"))),
        }
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        match self.next_value()? {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }

    fn position(&self) -> usize {
        self.consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrip() {
        let mut writer = Box::new(JsonWriter::new());
        writer.write_message_begin("add", MessageType::Call, 1);
        writer.write_struct_begin("args");
        writer.write_field_begin("a", TType::I32, 1);
        writer.write_i32(4);
        writer.write_field_end();
        writer.write_field_begin("flag", TType::Bool, 2);
        writer.write_bool(true);
        writer.write_field_end();
        writer.write_field_stop();
        writer.write_struct_end();
        writer.write_message_end();
        let bytes = ProtocolWriter::finish(writer);

        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!([1, "add", 1, 1, {"1": {"i32": 4}, "2": {"tf": 1}}])
        );

        let mut reader = JsonReader::new(&bytes).unwrap();
        let header = reader.read_message_begin().unwrap();
        assert_eq!(header.name, "add");
        reader.read_struct_begin().unwrap();
        let (field_type, id) = reader.read_field_begin().unwrap().unwrap();
        assert_eq!((field_type, id), (TType::I32, 1));
        assert_eq!(reader.read_i32().unwrap(), 4);
        reader.read_field_end().unwrap();
        let (field_type, _) = reader.read_field_begin().unwrap().unwrap();
        assert_eq!(field_type, TType::Bool);
        assert!(reader.read_bool().unwrap());
        reader.read_field_end().unwrap();
        assert!(reader.read_field_begin().unwrap().is_none());
    }

    #[test]
    fn test_containers() {
        let mut writer = Box::new(JsonWriter::new());
        writer.write_struct_begin("s");
        writer.write_field_begin("l", TType::List, 1);
        writer.write_list_begin(TType::String, 2);
        writer.write_string("a");
        writer.write_string("b");
        writer.write_list_end();
        writer.write_field_end();
        writer.write_field_begin("m", TType::Map, 2);
        writer.write_map_begin(TType::I32, TType::String, 1);
        writer.write_i32(7);
        writer.write_string("seven");
        writer.write_map_end();
        writer.write_field_end();
        writer.write_field_stop();
        writer.write_struct_end();
        let bytes = ProtocolWriter::finish(writer);

        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!({
                "1": {"lst": ["str", 2, "a", "b"]},
                "2": {"map": ["i32", "str", 1, {"7": "seven"}]}
            })
        );

        let mut reader = JsonReader::new(&bytes).unwrap();
        reader.read_struct_begin().unwrap();
        let (field_type, _) = reader.read_field_begin().unwrap().unwrap();
        assert_eq!(field_type, TType::List);
        let (elem, size) = reader.read_list_begin().unwrap();
        assert_eq!((elem, size), (TType::String, 2));
        assert_eq!(reader.read_string().unwrap(), "a");
        assert_eq!(reader.read_string().unwrap(), "b");
        reader.read_list_end().unwrap();
        reader.read_field_end().unwrap();
        let (field_type, _) = reader.read_field_begin().unwrap().unwrap();
        assert_eq!(field_type, TType::Map);
        let (key_type, value_type, size) = reader.read_map_begin().unwrap();
        assert_eq!((key_type, value_type, size), (TType::I32, TType::String, 1));
        assert_eq!(reader.read_i32().unwrap(), 7);
        assert_eq!(reader.read_string().unwrap(), "seven");
        reader.read_map_end().unwrap();
    }

    #[test]
    fn test_truncated_json_is_incomplete() {
        assert!(matches!(
            JsonReader::new(br#"[1, "add", 1, 1, {"1""#),
            Err(CodecError::Incomplete)
        ));
    }
}
