//! Raw packets and the per-version shape tables used to read and rewrite them
//! by field name.

use crate::codec::{
    ensure_remaining, read_string, read_uuid, read_varint, write_string, write_uuid, write_varint,
    CodecError, MAX_STRING_LEN,
};
use crate::pipeline::Frame;
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use uuid::Uuid;

/// Which way a packet travels relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server (serverbound).
    Inbound,
    /// Server to client (clientbound).
    Outbound,
}

/// Wire encoding of one packet field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    VarInt,
    String,
    Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    VarInt(i32),
    String(String),
    Uuid(Uuid),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Byte(_) => FieldKind::Byte,
            FieldValue::Short(_) => FieldKind::Short,
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::Long(_) => FieldKind::Long,
            FieldValue::Float(_) => FieldKind::Float,
            FieldValue::Double(_) => FieldKind::Double,
            FieldValue::VarInt(_) => FieldKind::VarInt,
            FieldValue::String(_) => FieldKind::String,
            FieldValue::Uuid(_) => FieldKind::Uuid,
        }
    }

    /// Any integer kind widened to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldValue::Byte(v) => Some(v as i64),
            FieldValue::Short(v) => Some(v as i64),
            FieldValue::Int(v) | FieldValue::VarInt(v) => Some(v as i64),
            FieldValue::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            FieldValue::Float(v) => Some(v as f64),
            FieldValue::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            FieldValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match *self {
            FieldValue::Uuid(u) => Some(u),
            _ => None,
        }
    }

    fn read<B: Buf>(kind: FieldKind, buf: &mut B) -> Result<FieldValue, CodecError> {
        let value = match kind {
            FieldKind::Bool => {
                ensure_remaining(buf, 1)?;
                FieldValue::Bool(buf.get_u8() != 0)
            }
            FieldKind::Byte => {
                ensure_remaining(buf, 1)?;
                FieldValue::Byte(buf.get_i8())
            }
            FieldKind::Short => {
                ensure_remaining(buf, 2)?;
                FieldValue::Short(buf.get_i16())
            }
            FieldKind::Int => {
                ensure_remaining(buf, 4)?;
                FieldValue::Int(buf.get_i32())
            }
            FieldKind::Long => {
                ensure_remaining(buf, 8)?;
                FieldValue::Long(buf.get_i64())
            }
            FieldKind::Float => {
                ensure_remaining(buf, 4)?;
                FieldValue::Float(buf.get_f32())
            }
            FieldKind::Double => {
                ensure_remaining(buf, 8)?;
                FieldValue::Double(buf.get_f64())
            }
            FieldKind::VarInt => FieldValue::VarInt(read_varint(buf)?),
            FieldKind::String => FieldValue::String(read_string(buf, MAX_STRING_LEN)?),
            FieldKind::Uuid => FieldValue::Uuid(read_uuid(buf)?),
        };
        Ok(value)
    }

    fn write<B: BufMut>(&self, buf: &mut B) {
        match self {
            FieldValue::Bool(v) => buf.put_u8(*v as u8),
            FieldValue::Byte(v) => buf.put_i8(*v),
            FieldValue::Short(v) => buf.put_i16(*v),
            FieldValue::Int(v) => buf.put_i32(*v),
            FieldValue::Long(v) => buf.put_i64(*v),
            FieldValue::Float(v) => buf.put_f32(*v),
            FieldValue::Double(v) => buf.put_f64(*v),
            FieldValue::VarInt(v) => write_varint(buf, *v),
            FieldValue::String(s) => write_string(buf, s),
            FieldValue::Uuid(u) => write_uuid(buf, u),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Long(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<Uuid> for FieldValue {
    fn from(v: Uuid) -> Self {
        FieldValue::Uuid(v)
    }
}

/// A named field at a fixed position in a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

pub const fn field(name: &'static str, kind: FieldKind) -> FieldDef {
    FieldDef { name, kind }
}

/// The version-independent name of a packet plus its leading fields in wire order.
/// Bytes after the last described field are carried through untouched.
#[derive(Debug, PartialEq, Eq)]
pub struct PacketShape {
    pub name: &'static str,
    pub fields: &'static [FieldDef],
}

impl PacketShape {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// The packets one protocol version recognizes, by direction and id.
#[derive(Debug)]
pub struct ShapeTable {
    inbound: &'static [(i32, &'static PacketShape)],
    outbound: &'static [(i32, &'static PacketShape)],
}

impl ShapeTable {
    pub const fn new(
        inbound: &'static [(i32, &'static PacketShape)],
        outbound: &'static [(i32, &'static PacketShape)],
    ) -> Self {
        Self { inbound, outbound }
    }

    fn entries(&self, direction: Direction) -> &'static [(i32, &'static PacketShape)] {
        match direction {
            Direction::Inbound => self.inbound,
            Direction::Outbound => self.outbound,
        }
    }

    pub fn lookup(&self, direction: Direction, id: i32) -> Option<&'static PacketShape> {
        self.entries(direction)
            .iter()
            .find(|(shape_id, _)| *shape_id == id)
            .map(|(_, shape)| *shape)
    }

    pub fn find(&self, direction: Direction, name: &str) -> Option<(i32, &'static PacketShape)> {
        self.entries(direction)
            .iter()
            .find(|(_, shape)| shape.name == name)
            .copied()
    }

    /// Attach the matching shape (if any) to a raw frame.
    pub fn classify(&self, direction: Direction, frame: Frame) -> Packet {
        let shape = self.lookup(direction, frame.id);
        Packet::new(frame, shape)
    }

    /// Encode a packet by shape name. Every described field needs a value.
    pub fn build(
        &self,
        direction: Direction,
        name: &str,
        values: &[(&str, FieldValue)],
    ) -> Result<Packet, FieldError> {
        let (id, shape) = self
            .find(direction, name)
            .ok_or_else(|| FieldError::UnknownShape(name.to_string()))?;

        if let Some((unknown, _)) = values.iter().find(|(n, _)| shape.field(n).is_none()) {
            return Err(FieldError::UnknownField {
                shape: shape.name,
                field: unknown.to_string(),
            });
        }

        let mut payload = BytesMut::new();
        for def in shape.fields {
            let value = values
                .iter()
                .find(|(n, _)| *n == def.name)
                .map(|(_, v)| v)
                .ok_or(FieldError::MissingValue {
                    shape: shape.name,
                    field: def.name,
                })?;
            check_kind(shape, def, value)?;
            value.write(&mut payload);
        }

        Ok(Packet {
            id,
            shape: Some(shape),
            payload,
        })
    }
}

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("Packet 0x{0:02X} has no known shape")]
    Shapeless(i32),
    #[error("No packet shape named '{0}'")]
    UnknownShape(String),
    #[error("{shape} has no field '{field}'")]
    UnknownField { shape: &'static str, field: String },
    #[error("{shape} needs a value for '{field}'")]
    MissingValue {
        shape: &'static str,
        field: &'static str,
    },
    #[error("{shape}.{field} is {expected:?}, got {actual:?}")]
    KindMismatch {
        shape: &'static str,
        field: &'static str,
        expected: FieldKind,
        actual: FieldKind,
    },
    #[error("Malformed payload: {0}")]
    Codec(#[from] CodecError),
}

fn check_kind(
    shape: &'static PacketShape,
    def: &FieldDef,
    value: &FieldValue,
) -> Result<(), FieldError> {
    if value.kind() == def.kind {
        Ok(())
    } else {
        Err(FieldError::KindMismatch {
            shape: shape.name,
            field: def.name,
            expected: def.kind,
            actual: value.kind(),
        })
    }
}

/// A raw protocol message with an optional shape for named-field access.
/// Field values are decoded on demand; the payload bytes stay authoritative.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    id: i32,
    shape: Option<&'static PacketShape>,
    payload: BytesMut,
}

impl Packet {
    pub fn new(frame: Frame, shape: Option<&'static PacketShape>) -> Self {
        Self {
            id: frame.id,
            shape,
            payload: frame.payload,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn shape(&self) -> Option<&'static PacketShape> {
        self.shape
    }

    /// Shape name, or `"Unknown"` for packets the active version does not describe.
    pub fn name(&self) -> &'static str {
        self.shape.map_or("Unknown", |s| s.name)
    }

    pub fn is(&self, name: &str) -> bool {
        self.shape.is_some_and(|s| s.name == name)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replace the whole payload. Field access keeps using the current shape.
    pub fn replace_payload(&mut self, payload: BytesMut) {
        self.payload = payload;
    }

    pub fn into_frame(self) -> Frame {
        Frame::new(self.id, self.payload)
    }

    /// Decode one field by name.
    pub fn get(&self, name: &str) -> Result<FieldValue, FieldError> {
        let shape = self.shape.ok_or(FieldError::Shapeless(self.id))?;
        let mut cursor = &self.payload[..];
        for def in shape.fields {
            let value = FieldValue::read(def.kind, &mut cursor)?;
            if def.name == name {
                return Ok(value);
            }
        }
        Err(FieldError::UnknownField {
            shape: shape.name,
            field: name.to_string(),
        })
    }

    /// Like [`Packet::get`], discarding the reason a field could not be read.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.get(name).ok()
    }

    /// Decode every described field, in wire order.
    pub fn fields(&self) -> Result<Vec<(&'static str, FieldValue)>, FieldError> {
        let shape = self.shape.ok_or(FieldError::Shapeless(self.id))?;
        let mut cursor = &self.payload[..];
        shape
            .fields
            .iter()
            .map(|def| Ok((def.name, FieldValue::read(def.kind, &mut cursor)?)))
            .collect()
    }

    /// Overwrite one field, re-encoding the payload. Trailing undescribed bytes are kept.
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<(), FieldError> {
        let shape = self.shape.ok_or(FieldError::Shapeless(self.id))?;
        let def = shape.field(name).ok_or_else(|| FieldError::UnknownField {
            shape: shape.name,
            field: name.to_string(),
        })?;
        check_kind(shape, def, &value)?;

        let mut cursor = &self.payload[..];
        let mut values = Vec::with_capacity(shape.fields.len());
        for def in shape.fields {
            values.push(FieldValue::read(def.kind, &mut cursor)?);
        }
        let tail = cursor;

        let mut payload = BytesMut::with_capacity(self.payload.len());
        for (def, current) in shape.fields.iter().zip(values.iter()) {
            if def.name == name {
                value.write(&mut payload);
            } else {
                current.write(&mut payload);
            }
        }
        payload.extend_from_slice(tail);

        self.payload = payload;
        Ok(())
    }
}
