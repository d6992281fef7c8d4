//! Binary FIT container codec.
//!
//! Decoding resolves definition messages into typed [`Message`]s; encoding
//! always writes little-endian definitions, a 14-byte header and both CRCs.

use thiserror::Error;
use tracing::debug;

use super::crc;
use super::message::{BaseType, DeveloperField, Field, Message, RawMessage, TIMESTAMP_FIELD};

const HEADER_SIZE: u8 = 14;
const LEGACY_HEADER_SIZE: u8 = 12;
const SIGNATURE: &[u8; 4] = b".FIT";
const LOCAL_TYPES: usize = 16;

const COMPRESSED_HEADER: u8 = 0x80;
const DEFINITION_HEADER: u8 = 0x40;
const DEVELOPER_DATA_FLAG: u8 = 0x20;

pub const DEFAULT_PROTOCOL_VERSION: u8 = 0x20;
pub const DEFAULT_PROFILE_VERSION: u16 = 2132;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("stream too short for a FIT header ({len} bytes)")]
    HeaderTooShort { len: usize },

    #[error("invalid FIT header size {0}")]
    InvalidHeaderSize(u8),

    #[error("missing .FIT signature")]
    BadSignature,

    #[error("header CRC mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    HeaderCrcMismatch { expected: u16, computed: u16 },

    #[error("header declares {declared} data bytes but only {available} are present")]
    Truncated { declared: usize, available: usize },

    #[error("file CRC mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    CrcMismatch { expected: u16, computed: u16 },

    #[error("unexpected end of record data at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("data message at offset {offset} references undefined local type {local}")]
    UndefinedLocalType { local: u8, offset: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("field {number} of message {global} is {len} bytes, limit is 255")]
    FieldTooLarge { global: u16, number: u8, len: usize },

    #[error("message {global} has {count} fields, limit is 255")]
    TooManyFields { global: u16, count: usize },

    #[error("record data of {len} bytes exceeds the FIT size limit")]
    StreamTooLarge { len: usize },
}

/// A decoded FIT file: header versions plus the data messages in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitFile {
    pub protocol_version: u8,
    pub profile_version: u16,
    pub messages: Vec<Message>,
}

impl FitFile {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            profile_version: DEFAULT_PROFILE_VERSION,
            messages,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < usize::from(LEGACY_HEADER_SIZE) {
            return Err(DecodeError::HeaderTooShort { len: bytes.len() });
        }

        let header_size = bytes[0];
        if header_size != HEADER_SIZE && header_size != LEGACY_HEADER_SIZE {
            return Err(DecodeError::InvalidHeaderSize(header_size));
        }
        let header_len = usize::from(header_size);
        if bytes.len() < header_len {
            return Err(DecodeError::HeaderTooShort { len: bytes.len() });
        }
        if &bytes[8..12] != SIGNATURE {
            return Err(DecodeError::BadSignature);
        }

        let protocol_version = bytes[1];
        let profile_version = u16::from_le_bytes([bytes[2], bytes[3]]);
        let data_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

        if header_size == HEADER_SIZE {
            let expected = u16::from_le_bytes([bytes[12], bytes[13]]);
            // Writers are allowed to leave the header CRC as zero.
            if expected != 0 {
                let computed = crc::checksum(&bytes[..12]);
                if expected != computed {
                    return Err(DecodeError::HeaderCrcMismatch { expected, computed });
                }
            }
        }

        let records_end = header_len + data_size;
        let file_end = records_end + 2;
        if bytes.len() < file_end {
            return Err(DecodeError::Truncated {
                declared: data_size,
                available: bytes.len().saturating_sub(header_len + 2),
            });
        }

        let expected = u16::from_le_bytes([bytes[records_end], bytes[records_end + 1]]);
        let computed = crc::checksum(&bytes[..records_end]);
        if expected != computed {
            return Err(DecodeError::CrcMismatch { expected, computed });
        }

        if bytes.len() > file_end {
            debug!(
                trailing = bytes.len() - file_end,
                "ignoring bytes after FIT file CRC"
            );
        }

        let messages = decode_records(&bytes[header_len..records_end], header_len)?;

        Ok(Self {
            protocol_version,
            profile_version,
            messages,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut records = Vec::new();
        let mut encoder = RecordEncoder::default();
        for message in &self.messages {
            encoder.write(message.as_raw(), &mut records)?;
        }

        let data_size = u32::try_from(records.len()).map_err(|_| EncodeError::StreamTooLarge {
            len: records.len(),
        })?;

        let mut out = Vec::with_capacity(records.len() + usize::from(HEADER_SIZE) + 2);
        out.push(HEADER_SIZE);
        out.push(self.protocol_version);
        out.extend_from_slice(&self.profile_version.to_le_bytes());
        out.extend_from_slice(&data_size.to_le_bytes());
        out.extend_from_slice(SIGNATURE);
        let header_crc = crc::checksum(&out);
        out.extend_from_slice(&header_crc.to_le_bytes());

        out.extend_from_slice(&records);
        let file_crc = crc::checksum(&out);
        out.extend_from_slice(&file_crc.to_le_bytes());

        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FieldDef {
    number: u8,
    size: u8,
    base_type: BaseType,
}

#[derive(Debug, Clone)]
struct DeveloperFieldDef {
    number: u8,
    size: u8,
    developer_index: u8,
}

#[derive(Debug, Clone)]
struct Definition {
    big_endian: bool,
    global: u16,
    fields: Vec<FieldDef>,
    developer_fields: Vec<DeveloperFieldDef>,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    base_offset: usize,
}

impl<'a> Cursor<'a> {
    fn offset(&self) -> usize {
        self.base_offset + self.pos
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(DecodeError::UnexpectedEof {
                offset: self.offset(),
            });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }
}

fn decode_records(buf: &[u8], base_offset: usize) -> Result<Vec<Message>, DecodeError> {
    let mut cursor = Cursor {
        buf,
        pos: 0,
        base_offset,
    };
    let mut definitions: [Option<Definition>; LOCAL_TYPES] = Default::default();
    let mut last_timestamp: Option<u32> = None;
    let mut messages = Vec::new();

    while !cursor.is_empty() {
        let offset = cursor.offset();
        let header = cursor.u8()?;

        if header & COMPRESSED_HEADER != 0 {
            let local = (header >> 5) & 0x03;
            let definition = definitions[usize::from(local)]
                .as_ref()
                .ok_or(DecodeError::UndefinedLocalType { local, offset })?;
            let mut raw = read_data(&mut cursor, definition)?;

            if let Some(last) = last_timestamp {
                let timestamp = expand_timestamp(last, header & 0x1F);
                if raw.field(TIMESTAMP_FIELD).is_none() {
                    raw.fields.push(Field::from_integer(
                        TIMESTAMP_FIELD,
                        BaseType::UINT32,
                        i64::from(timestamp),
                    ));
                }
                last_timestamp = Some(timestamp);
            }
            messages.push(Message::from_raw(raw));
        } else if header & DEFINITION_HEADER != 0 {
            let local = header & 0x0F;
            let definition = read_definition(&mut cursor, header & DEVELOPER_DATA_FLAG != 0)?;
            definitions[usize::from(local)] = Some(definition);
        } else {
            let local = header & 0x0F;
            let definition = definitions[usize::from(local)]
                .as_ref()
                .ok_or(DecodeError::UndefinedLocalType { local, offset })?;
            let raw = read_data(&mut cursor, definition)?;

            if let Some(timestamp) = raw.integer(TIMESTAMP_FIELD) {
                last_timestamp = u32::try_from(timestamp).ok();
            }
            messages.push(Message::from_raw(raw));
        }
    }

    Ok(messages)
}

fn read_definition(cursor: &mut Cursor<'_>, developer: bool) -> Result<Definition, DecodeError> {
    let _reserved = cursor.u8()?;
    let big_endian = cursor.u8()? == 1;
    let global_bytes = cursor.take(2)?;
    let global = if big_endian {
        u16::from_be_bytes([global_bytes[0], global_bytes[1]])
    } else {
        u16::from_le_bytes([global_bytes[0], global_bytes[1]])
    };

    let field_count = cursor.u8()?;
    let mut fields = Vec::with_capacity(usize::from(field_count));
    for _ in 0..field_count {
        let b = cursor.take(3)?;
        fields.push(FieldDef {
            number: b[0],
            size: b[1],
            base_type: BaseType(b[2]),
        });
    }

    let mut developer_fields = Vec::new();
    if developer {
        let count = cursor.u8()?;
        for _ in 0..count {
            let b = cursor.take(3)?;
            developer_fields.push(DeveloperFieldDef {
                number: b[0],
                size: b[1],
                developer_index: b[2],
            });
        }
    }

    Ok(Definition {
        big_endian,
        global,
        fields,
        developer_fields,
    })
}

fn read_data(cursor: &mut Cursor<'_>, definition: &Definition) -> Result<RawMessage, DecodeError> {
    let mut raw = RawMessage::new(definition.global);

    for def in &definition.fields {
        let mut data = cursor.take(usize::from(def.size))?.to_vec();
        if definition.big_endian {
            swap_elements(&mut data, def.base_type.size());
        }
        raw.fields.push(Field::new(def.number, def.base_type, data));
    }

    for def in &definition.developer_fields {
        let data = cursor.take(usize::from(def.size))?.to_vec();
        raw.developer_fields.push(DeveloperField {
            number: def.number,
            developer_index: def.developer_index,
            data,
        });
    }

    Ok(raw)
}

/// Convert each element of a big-endian field to little-endian in place.
fn swap_elements(data: &mut [u8], element_size: usize) {
    if element_size > 1 && data.len() % element_size == 0 {
        for chunk in data.chunks_mut(element_size) {
            chunk.reverse();
        }
    }
}

/// Rebuild an absolute timestamp from the 5-bit offset of a compressed header.
fn expand_timestamp(last: u32, offset: u8) -> u32 {
    let offset = u32::from(offset);
    let mut timestamp = (last & !0x1F).wrapping_add(offset);
    if offset < (last & 0x1F) {
        timestamp = timestamp.wrapping_add(0x20);
    }
    timestamp
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct Layout {
    global: u16,
    fields: Vec<(u8, u8, u8)>,
    developer_fields: Vec<(u8, u8, u8)>,
}

impl Layout {
    fn of(raw: &RawMessage) -> Result<Self, EncodeError> {
        let count = raw.fields.len().max(raw.developer_fields.len());
        if count > usize::from(u8::MAX) {
            return Err(EncodeError::TooManyFields {
                global: raw.global,
                count,
            });
        }

        let size_of = |number: u8, len: usize| {
            u8::try_from(len).map_err(|_| EncodeError::FieldTooLarge {
                global: raw.global,
                number,
                len,
            })
        };

        let fields = raw
            .fields
            .iter()
            .map(|f| Ok((f.number, size_of(f.number, f.data.len())?, f.base_type.0)))
            .collect::<Result<Vec<_>, EncodeError>>()?;
        let developer_fields = raw
            .developer_fields
            .iter()
            .map(|f| Ok((f.number, size_of(f.number, f.data.len())?, f.developer_index)))
            .collect::<Result<Vec<_>, EncodeError>>()?;

        Ok(Self {
            global: raw.global,
            fields,
            developer_fields,
        })
    }

    fn write_definition(&self, local: u8, out: &mut Vec<u8>) {
        let mut header = DEFINITION_HEADER | local;
        if !self.developer_fields.is_empty() {
            header |= DEVELOPER_DATA_FLAG;
        }
        out.push(header);
        out.push(0); // reserved
        out.push(0); // little-endian
        out.extend_from_slice(&self.global.to_le_bytes());
        out.push(self.fields.len() as u8);
        for &(number, size, base_type) in &self.fields {
            out.extend_from_slice(&[number, size, base_type]);
        }
        if !self.developer_fields.is_empty() {
            out.push(self.developer_fields.len() as u8);
            for &(number, size, index) in &self.developer_fields {
                out.extend_from_slice(&[number, size, index]);
            }
        }
    }
}

/// Assigns local message types, emitting a new definition only when a
/// message's layout is not already bound to a slot.
#[derive(Default)]
struct RecordEncoder {
    slots: [Option<Layout>; LOCAL_TYPES],
    next_slot: usize,
}

impl RecordEncoder {
    fn write(&mut self, raw: &RawMessage, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let layout = Layout::of(raw)?;

        let local = match self.slots.iter().position(|s| s.as_ref() == Some(&layout)) {
            Some(index) => index,
            None => {
                let index = self.next_slot;
                self.next_slot = (index + 1) % LOCAL_TYPES;
                layout.write_definition(index as u8, out);
                self.slots[index] = Some(layout);
                index
            }
        };

        out.push(local as u8);
        for field in &raw.fields {
            out.extend_from_slice(&field.data);
        }
        for field in &raw.developer_fields {
            out.extend_from_slice(&field.data);
        }
        Ok(())
    }
}
