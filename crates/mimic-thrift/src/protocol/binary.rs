//! Strict binary protocol (big-endian), with tolerant reading of the
//! old unframed header.

use super::{CodecError, MessageHeader, MessageType, ProtocolReader, ProtocolWriter, TType};

const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;

pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }
}

impl Default for BinaryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolWriter for BinaryWriter {
    fn write_message_begin(&mut self, name: &str, message_type: MessageType, seq_id: i32) {
        self.write_i32((VERSION_1 | message_type as u32) as i32);
        self.write_string(name);
        self.write_i32(seq_id);
    }

    fn write_message_end(&mut self) {}

    fn write_struct_begin(&mut self, _name: &str) {}

    fn write_struct_end(&mut self) {}

    fn write_field_begin(&mut self, _name: &str, field_type: TType, id: i16) {
        self.buf.push(field_type as u8);
        self.write_i16(id);
    }

    fn write_field_end(&mut self) {}

    fn write_field_stop(&mut self) {
        self.buf.push(TType::Stop as u8);
    }

    fn write_list_begin(&mut self, elem_type: TType, size: usize) {
        self.buf.push(elem_type as u8);
        self.write_i32(size as i32);
    }

    fn write_list_end(&mut self) {}

    fn write_set_begin(&mut self, elem_type: TType, size: usize) {
        self.write_list_begin(elem_type, size);
    }

    fn write_set_end(&mut self) {}

    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize) {
        self.buf.push(key_type as u8);
        self.buf.push(value_type as u8);
        self.write_i32(size as i32);
    }

    fn write_map_end(&mut self) {}

    fn write_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    fn write_byte(&mut self, value: i8) {
        self.buf.push(value as u8);
    }

    fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn write_double(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn write_string(&mut self, value: &str) {
        self.write_i32(value.len() as i32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        self.buf
    }
}

pub struct BinaryReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.bytes.len() {
            return Err(CodecError::Incomplete);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }
}

impl ProtocolReader for BinaryReader<'_> {
    fn read_message_begin(&mut self) -> Result<MessageHeader, CodecError> {
        let first = self.read_i32()?;
        if first < 0 {
            let version = first as u32 & VERSION_MASK;
            if version != VERSION_1 {
                return Err(CodecError::Malformed(format!(
                    "bad binary protocol version {version:#x}"
                )));
            }
            let message_type = MessageType::from_wire((first & 0xff) as u8)?;
            let name = self.read_string()?;
            let seq_id = self.read_i32()?;
            Ok(MessageHeader {
                name,
                message_type,
                seq_id,
            })
        } else {
            // Unversioned header: name length came first.
            let name = String::from_utf8_lossy(self.take(first as usize)?).into_owned();
            let message_type = MessageType::from_wire(self.take_u8()?)?;
            let seq_id = self.read_i32()?;
            Ok(MessageHeader {
                name,
                message_type,
                seq_id,
            })
        }
    }

    fn read_message_end(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn read_struct_end(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn read_field_begin(&mut self) -> Result<Option<(TType, i16)>, CodecError> {
        let field_type = TType::from_wire(self.take_u8()?)?;
        if field_type == TType::Stop {
            return Ok(None);
        }
        let id = self.read_i16()?;
        Ok(Some((field_type, id)))
    }

    fn read_field_end(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn read_list_begin(&mut self) -> Result<(TType, usize), CodecError> {
        let elem_type = TType::from_wire(self.take_u8()?)?;
        let size = self.read_i32()?;
        if size < 0 {
            return Err(CodecError::Malformed("negative list size".to_string()));
        }
        Ok((elem_type, size as usize))
    }

    fn read_list_end(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn read_set_begin(&mut self) -> Result<(TType, usize), CodecError> {
        self.read_list_begin()
    }

    fn read_set_end(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn read_map_begin(&mut self) -> Result<(TType, TType, usize), CodecError> {
        let key_type = TType::from_wire(self.take_u8()?)?;
        let value_type = TType::from_wire(self.take_u8()?)?;
        let size = self.read_i32()?;
        if size < 0 {
            return Err(CodecError::Malformed("negative map size".to_string()));
        }
        Ok((key_type, value_type, size as usize))
    }

    fn read_map_end(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.take_u8()? != 0)
    }

    fn read_byte(&mut self) -> Result<i8, CodecError> {
        Ok(self.take_u8()? as i8)
    }

    fn read_i16(&mut self) -> Result<i16, CodecError> {
        let bytes = self.take(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_i32(&mut self) -> Result<i32, CodecError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i64(&mut self) -> Result<i64, CodecError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(buf))
    }

    fn read_double(&mut self) -> Result<f64, CodecError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_be_bytes(buf))
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::Malformed("negative string length".to_string()));
        }
        Ok(String::from_utf8_lossy(self.take(len as usize)?).into_owned())
    }

    fn position(&self) -> usize {
        self.pos
    }
}
