//! Thrift wire protocols.
//!
//! All three protocols implement the same reader/writer pair and operate on
//! complete in-memory messages; transports (buffered/framed, TCP/HTTP) hand
//! them full byte slices. Readers report how many bytes one message
//! consumed so the buffered transport can drain its buffer.

mod binary;
mod compact;
mod json;

pub use binary::{BinaryReader, BinaryWriter};
pub use compact::{CompactReader, CompactWriter};
pub use json::{JsonReader, JsonWriter};

use mimic_core::ThriftProtocol;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// More bytes are needed to finish the current message.
    #[error("incomplete message")]
    Incomplete,
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("can't handle \"{0}\" type yet")]
    Unsupported(String),
}

/// Wire type tags (binary protocol numbering is the canonical one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TType {
    Stop = 0,
    Void = 1,
    Bool = 2,
    Byte = 3,
    Double = 4,
    I16 = 6,
    I32 = 8,
    I64 = 10,
    String = 11,
    Struct = 12,
    Map = 13,
    Set = 14,
    List = 15,
}

impl TType {
    pub fn from_wire(value: u8) -> Result<Self, CodecError> {
        Ok(match value {
            0 => TType::Stop,
            1 => TType::Void,
            2 => TType::Bool,
            3 => TType::Byte,
            4 => TType::Double,
            6 => TType::I16,
            8 => TType::I32,
            10 => TType::I64,
            11 => TType::String,
            12 => TType::Struct,
            13 => TType::Map,
            14 => TType::Set,
            15 => TType::List,
            other => return Err(CodecError::Malformed(format!("unknown type tag {other}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 1,
    Reply = 2,
    Exception = 3,
    Oneway = 4,
}

impl MessageType {
    pub fn from_wire(value: u8) -> Result<Self, CodecError> {
        Ok(match value {
            1 => MessageType::Call,
            2 => MessageType::Reply,
            3 => MessageType::Exception,
            4 => MessageType::Oneway,
            other => {
                return Err(CodecError::Malformed(format!(
                    "unknown message type {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct MessageHeader {
    pub name: String,
    pub message_type: MessageType,
    pub seq_id: i32,
}

pub trait ProtocolWriter: Send {
    fn write_message_begin(&mut self, name: &str, message_type: MessageType, seq_id: i32);
    fn write_message_end(&mut self);
    fn write_struct_begin(&mut self, name: &str);
    fn write_struct_end(&mut self);
    fn write_field_begin(&mut self, name: &str, field_type: TType, id: i16);
    fn write_field_end(&mut self);
    fn write_field_stop(&mut self);
    fn write_list_begin(&mut self, elem_type: TType, size: usize);
    fn write_list_end(&mut self);
    fn write_set_begin(&mut self, elem_type: TType, size: usize);
    fn write_set_end(&mut self);
    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize);
    fn write_map_end(&mut self);
    fn write_bool(&mut self, value: bool);
    fn write_byte(&mut self, value: i8);
    fn write_i16(&mut self, value: i16);
    fn write_i32(&mut self, value: i32);
    fn write_i64(&mut self, value: i64);
    fn write_double(&mut self, value: f64);
    fn write_string(&mut self, value: &str);
    fn finish(self: Box<Self>) -> Vec<u8>;
}

pub trait ProtocolReader: Send {
    fn read_message_begin(&mut self) -> Result<MessageHeader, CodecError>;
    fn read_message_end(&mut self) -> Result<(), CodecError>;
    fn read_struct_begin(&mut self) -> Result<(), CodecError>;
    fn read_struct_end(&mut self) -> Result<(), CodecError>;
    /// `None` marks the stop field.
    fn read_field_begin(&mut self) -> Result<Option<(TType, i16)>, CodecError>;
    fn read_field_end(&mut self) -> Result<(), CodecError>;
    fn read_list_begin(&mut self) -> Result<(TType, usize), CodecError>;
    fn read_list_end(&mut self) -> Result<(), CodecError>;
    fn read_set_begin(&mut self) -> Result<(TType, usize), CodecError>;
    fn read_set_end(&mut self) -> Result<(), CodecError>;
    fn read_map_begin(&mut self) -> Result<(TType, TType, usize), CodecError>;
    fn read_map_end(&mut self) -> Result<(), CodecError>;
    fn read_bool(&mut self) -> Result<bool, CodecError>;
    fn read_byte(&mut self) -> Result<i8, CodecError>;
    fn read_i16(&mut self) -> Result<i16, CodecError>;
    fn read_i32(&mut self) -> Result<i32, CodecError>;
    fn read_i64(&mut self) -> Result<i64, CodecError>;
    fn read_double(&mut self) -> Result<f64, CodecError>;
    fn read_string(&mut self) -> Result<String, CodecError>;
    /// Bytes consumed from the input once the message has been read.
    fn position(&self) -> usize;

    /// Structurally drain a value of the given type.
    fn skip(&mut self, field_type: TType) -> Result<(), CodecError> {
        match field_type {
            TType::Bool => self.read_bool().map(|_| ()),
            TType::Byte => self.read_byte().map(|_| ()),
            TType::Double => self.read_double().map(|_| ()),
            TType::I16 => self.read_i16().map(|_| ()),
            TType::I32 => self.read_i32().map(|_| ()),
            TType::I64 => self.read_i64().map(|_| ()),
            TType::String => self.read_string().map(|_| ()),
            TType::Struct => {
                self.read_struct_begin()?;
                while let Some((field_type, _)) = self.read_field_begin()? {
                    self.skip(field_type)?;
                    self.read_field_end()?;
                }
                self.read_struct_end()
            }
            TType::List => {
                let (elem_type, size) = self.read_list_begin()?;
                for _ in 0..size {
                    self.skip(elem_type)?;
                }
                self.read_list_end()
            }
            TType::Set => {
                let (elem_type, size) = self.read_set_begin()?;
                for _ in 0..size {
                    self.skip(elem_type)?;
                }
                self.read_set_end()
            }
            TType::Map => {
                let (key_type, value_type, size) = self.read_map_begin()?;
                for _ in 0..size {
                    self.skip(key_type)?;
                    self.skip(value_type)?;
                }
                self.read_map_end()
            }
            TType::Stop | TType::Void => Err(CodecError::Malformed(format!(
                "cannot skip {field_type:?}"
            ))),
        }
    }
}

/// Writer for the configured protocol.
pub fn writer_for(protocol: ThriftProtocol) -> Box<dyn ProtocolWriter> {
    match protocol {
        ThriftProtocol::Binary => Box::new(BinaryWriter::new()),
        ThriftProtocol::Compact => Box::new(CompactWriter::new()),
        ThriftProtocol::Json => Box::new(JsonWriter::new()),
    }
}

/// Reader for the configured protocol over one in-memory message.
pub fn reader_for<'a>(
    protocol: ThriftProtocol,
    bytes: &'a [u8],
) -> Result<Box<dyn ProtocolReader + 'a>, CodecError> {
    Ok(match protocol {
        ThriftProtocol::Binary => Box::new(BinaryReader::new(bytes)),
        ThriftProtocol::Compact => Box::new(CompactReader::new(bytes)),
        ThriftProtocol::Json => Box::new(JsonReader::new(bytes)?),
    })
}
