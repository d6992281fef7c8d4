use std::fmt;

/// Global message numbers from the FIT profile that the transform cares about.
pub mod mesg_num {
    pub const SESSION: u16 = 18;
    pub const LAP: u16 = 19;
    pub const RECORD: u16 = 20;
    pub const FILE_CREATOR: u16 = 49;
}

/// Field numbers inside `record` messages.
pub mod record_field {
    pub const HEART_RATE: u8 = 3;
    pub const CADENCE: u8 = 4;
    pub const POWER: u8 = 7;
    pub const TEMPERATURE: u8 = 13;
}

/// Field numbers inside `session` messages.
pub mod session_field {
    pub const AVG_HEART_RATE: u8 = 16;
    pub const AVG_CADENCE: u8 = 18;
    pub const AVG_POWER: u8 = 20;
}

/// Field number carrying the message timestamp in every FIT message.
pub const TIMESTAMP_FIELD: u8 = 253;

/// FIT base type byte as it appears in a field definition.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaseType(pub u8);

impl BaseType {
    pub const ENUM: Self = Self(0x00);
    pub const SINT8: Self = Self(0x01);
    pub const UINT8: Self = Self(0x02);
    pub const SINT16: Self = Self(0x83);
    pub const UINT16: Self = Self(0x84);
    pub const SINT32: Self = Self(0x85);
    pub const UINT32: Self = Self(0x86);
    pub const STRING: Self = Self(0x07);
    pub const FLOAT32: Self = Self(0x88);
    pub const FLOAT64: Self = Self(0x89);
    pub const UINT8Z: Self = Self(0x0A);
    pub const UINT16Z: Self = Self(0x8B);
    pub const UINT32Z: Self = Self(0x8C);
    pub const BYTE: Self = Self(0x0D);
    pub const SINT64: Self = Self(0x8E);
    pub const UINT64: Self = Self(0x8F);
    pub const UINT64Z: Self = Self(0x90);

    fn number(self) -> u8 {
        self.0 & 0x1F
    }

    /// Size in bytes of one element of this type.
    pub fn size(self) -> usize {
        match self.number() {
            0x03 | 0x04 | 0x0B => 2,
            0x05 | 0x06 | 0x08 | 0x0C => 4,
            0x09 | 0x0E | 0x0F | 0x10 => 8,
            _ => 1,
        }
    }

    fn is_signed(self) -> bool {
        matches!(self.number(), 0x01 | 0x03 | 0x05 | 0x0E)
    }

    fn is_integer(self) -> bool {
        !matches!(self.number(), 0x07 | 0x08 | 0x09)
    }

    /// Raw little-endian bit pattern the profile reserves for "no value".
    fn invalid_raw(self) -> u64 {
        match self.number() {
            0x00 | 0x02 | 0x0D => 0xFF,
            0x01 => 0x7F,
            0x03 => 0x7FFF,
            0x04 => 0xFFFF,
            0x05 => 0x7FFF_FFFF,
            0x06 | 0x08 => 0xFFFF_FFFF,
            0x0E => 0x7FFF_FFFF_FFFF_FFFF,
            0x09 | 0x0F => u64::MAX,
            _ => 0,
        }
    }

    /// Largest value that can be stored without colliding with the invalid sentinel.
    pub fn max_valid(self) -> i64 {
        match self.number() {
            0x00 | 0x02 | 0x0D => 0xFE,
            0x0A => 0xFF,
            0x01 => 0x7E,
            0x03 => 0x7FFE,
            0x04 => 0xFFFE,
            0x0B => 0xFFFF,
            0x05 => 0x7FFF_FFFE,
            0x06 => 0xFFFF_FFFE,
            0x0C => 0xFFFF_FFFF,
            _ => i64::MAX - 1,
        }
    }
}

impl fmt::Debug for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BaseType({:#04x})", self.0)
    }
}

/// A single field value. `data` is always stored little-endian, regardless of
/// the architecture of the definition it was decoded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub number: u8,
    pub base_type: BaseType,
    pub data: Vec<u8>,
}

impl Field {
    pub fn new(number: u8, base_type: BaseType, data: Vec<u8>) -> Self {
        Self {
            number,
            base_type,
            data,
        }
    }

    /// Build a scalar integer field, truncating `value` to the base type's width.
    pub fn from_integer(number: u8, base_type: BaseType, value: i64) -> Self {
        let size = base_type.size();
        let data = value.to_le_bytes()[..size].to_vec();
        Self::new(number, base_type, data)
    }

    /// Scalar integer value, or `None` for arrays, floats, strings and the
    /// invalid sentinel.
    pub fn integer(&self) -> Option<i64> {
        let size = self.base_type.size();
        if !self.base_type.is_integer() || self.data.len() != size {
            return None;
        }

        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(&self.data);
        let raw = u64::from_le_bytes(buf);
        if raw == self.base_type.invalid_raw() {
            return None;
        }

        if self.base_type.is_signed() {
            let shift = 64 - (size as u32) * 8;
            Some(((raw << shift) as i64) >> shift)
        } else {
            Some(raw as i64)
        }
    }
}

/// Developer-defined field, carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeveloperField {
    pub number: u8,
    pub developer_index: u8,
    pub data: Vec<u8>,
}

/// An untyped FIT data message: global number plus its fields in definition order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub global: u16,
    pub fields: Vec<Field>,
    pub developer_fields: Vec<DeveloperField>,
}

impl RawMessage {
    pub fn new(global: u16) -> Self {
        Self {
            global,
            fields: Vec::new(),
            developer_fields: Vec::new(),
        }
    }

    pub fn field(&self, number: u8) -> Option<&Field> {
        self.fields.iter().find(|f| f.number == number)
    }

    pub fn integer(&self, number: u8) -> Option<i64> {
        self.field(number).and_then(Field::integer)
    }

    /// Replace the field with the same number, or append it.
    pub fn set_field(&mut self, field: Field) {
        match self.fields.iter_mut().find(|f| f.number == field.number) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    pub fn remove_field(&mut self, number: u8) -> Option<Field> {
        let index = self.fields.iter().position(|f| f.number == number)?;
        Some(self.fields.remove(index))
    }

    /// Store an integer, reusing the existing field's base type when present.
    fn set_integer(&mut self, number: u8, default_type: BaseType, value: i64) {
        let base_type = self
            .field(number)
            .map(|f| f.base_type)
            .filter(|t| t.is_integer())
            .unwrap_or(default_type);
        let clamped = value.clamp(0, base_type.max_valid());
        self.set_field(Field::from_integer(number, base_type, clamped));
    }
}

/// Closed set of message kinds the record-stream transform distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Creator(RawMessage),
    Lap(RawMessage),
    Sample(Sample),
    SessionSummary(SessionSummary),
    Other(RawMessage),
}

impl Message {
    pub fn from_raw(raw: RawMessage) -> Self {
        match raw.global {
            mesg_num::FILE_CREATOR => Self::Creator(raw),
            mesg_num::LAP => Self::Lap(raw),
            mesg_num::RECORD => Self::Sample(Sample { raw }),
            mesg_num::SESSION => Self::SessionSummary(SessionSummary { raw }),
            _ => Self::Other(raw),
        }
    }

    pub fn as_raw(&self) -> &RawMessage {
        match self {
            Self::Creator(raw) | Self::Lap(raw) | Self::Other(raw) => raw,
            Self::Sample(sample) => &sample.raw,
            Self::SessionSummary(summary) => &summary.raw,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Creator(_) => "creator",
            Self::Lap(_) => "lap",
            Self::Sample(_) => "sample",
            Self::SessionSummary(_) => "session_summary",
            Self::Other(_) => "other",
        }
    }
}

/// A per-interval `record` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    raw: RawMessage,
}

impl Default for Sample {
    fn default() -> Self {
        Self::new()
    }
}

impl Sample {
    pub fn new() -> Self {
        Self {
            raw: RawMessage::new(mesg_num::RECORD),
        }
    }

    pub fn raw(&self) -> &RawMessage {
        &self.raw
    }

    pub fn cadence(&self) -> Option<u8> {
        self.raw
            .integer(record_field::CADENCE)
            .and_then(|v| u8::try_from(v).ok())
    }

    pub fn power(&self) -> Option<u16> {
        self.raw
            .integer(record_field::POWER)
            .and_then(|v| u16::try_from(v).ok())
    }

    pub fn heart_rate(&self) -> Option<u8> {
        self.raw
            .integer(record_field::HEART_RATE)
            .and_then(|v| u8::try_from(v).ok())
    }

    pub fn temperature(&self) -> Option<i8> {
        self.raw
            .integer(record_field::TEMPERATURE)
            .and_then(|v| i8::try_from(v).ok())
    }

    /// Whether a temperature field is defined, including one holding the invalid sentinel.
    pub fn has_temperature_field(&self) -> bool {
        self.raw.field(record_field::TEMPERATURE).is_some()
    }

    /// Drop the temperature field. Returns `true` if one was present.
    pub fn remove_temperature(&mut self) -> bool {
        self.raw.remove_field(record_field::TEMPERATURE).is_some()
    }

    pub fn with_cadence(mut self, cadence: u8) -> Self {
        self.raw
            .set_integer(record_field::CADENCE, BaseType::UINT8, cadence.into());
        self
    }

    pub fn with_power(mut self, power: u16) -> Self {
        self.raw
            .set_integer(record_field::POWER, BaseType::UINT16, power.into());
        self
    }

    pub fn with_heart_rate(mut self, heart_rate: u8) -> Self {
        self.raw
            .set_integer(record_field::HEART_RATE, BaseType::UINT8, heart_rate.into());
        self
    }

    pub fn with_temperature(mut self, celsius: i8) -> Self {
        self.raw.set_field(Field::from_integer(
            record_field::TEMPERATURE,
            BaseType::SINT8,
            celsius.into(),
        ));
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.raw.set_field(field);
        self
    }
}

/// A `session` message closing an activity or lap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    raw: RawMessage,
}

impl Default for SessionSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSummary {
    pub fn new() -> Self {
        Self {
            raw: RawMessage::new(mesg_num::SESSION),
        }
    }

    pub fn raw(&self) -> &RawMessage {
        &self.raw
    }

    pub fn avg_cadence(&self) -> Option<u8> {
        self.raw
            .integer(session_field::AVG_CADENCE)
            .and_then(|v| u8::try_from(v).ok())
    }

    pub fn avg_power(&self) -> Option<u16> {
        self.raw
            .integer(session_field::AVG_POWER)
            .and_then(|v| u16::try_from(v).ok())
    }

    pub fn avg_heart_rate(&self) -> Option<u8> {
        self.raw
            .integer(session_field::AVG_HEART_RATE)
            .and_then(|v| u8::try_from(v).ok())
    }

    pub fn set_avg_cadence(&mut self, value: i64) {
        self.raw
            .set_integer(session_field::AVG_CADENCE, BaseType::UINT8, value);
    }

    pub fn set_avg_power(&mut self, value: i64) {
        self.raw
            .set_integer(session_field::AVG_POWER, BaseType::UINT16, value);
    }

    pub fn set_avg_heart_rate(&mut self, value: i64) {
        self.raw
            .set_integer(session_field::AVG_HEART_RATE, BaseType::UINT8, value);
    }

    pub fn with_avg_cadence(mut self, value: u8) -> Self {
        self.set_avg_cadence(value.into());
        self
    }

    pub fn with_avg_power(mut self, value: u16) -> Self {
        self.set_avg_power(value.into());
        self
    }

    pub fn with_avg_heart_rate(mut self, value: u8) -> Self {
        self.set_avg_heart_rate(value.into());
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.raw.set_field(field);
        self
    }
}
