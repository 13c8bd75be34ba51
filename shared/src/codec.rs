//! Fixed-layout binary message codec
//!
//! Every message is `{type:u8, seq:i32, object_id:u16}` followed by the
//! fields of its type, little-endian, with no padding and no delimiters.
//! Each type has exactly one valid encoded length, which is how a stream of
//! concatenated messages is split back apart. Field order and width are the
//! wire contract; [`ByteWriter`] and [`ByteReader`] are the only code that
//! touches raw bytes.

use crate::math::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes taken by `{type, seq, object_id}`.
pub const HEADER_LEN: usize = 1 + 4 + 2;

const VEC3_LEN: usize = 12;
const QUAT_LEN: usize = 16;
const COLOR_LEN: usize = 4;

/// RGBA, one byte per channel.
pub type Color = [u8; 4];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("buffer overrun: need {needed} bytes at offset {offset}, {available} available")]
    Overrun {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("unknown message type tag {0}")]
    UnknownType(u8),
    #[error("{kind:?} expects {expected} bytes, got {actual}")]
    LengthMismatch {
        kind: MessageType,
        expected: usize,
        actual: usize,
    },
    #[error("invalid value {value} for field `{field}`")]
    InvalidValue { field: &'static str, value: u8 },
    #[error("record expects {expected} bytes, got {actual}")]
    RecordLength { expected: usize, actual: usize },
    #[error("empty buffer")]
    Empty,
    #[error("non-finite float at offset {offset}")]
    NonFinite { offset: usize },
}

/// Writes fixed-width little-endian fields into a caller-owned buffer.
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn take(&mut self, len: usize) -> Result<&mut [u8], CodecError> {
        let available = self.buf.len() - self.offset;
        if len > available {
            return Err(CodecError::Overrun {
                offset: self.offset,
                needed: len,
                available,
            });
        }
        let start = self.offset;
        self.offset += len;
        Ok(&mut self.buf[start..start + len])
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.take(1)?[0] = value;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.write_u8(u8::from(value))
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.take(2)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), CodecError> {
        self.take(4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<(), CodecError> {
        self.take(4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_vec3(&mut self, v: Vec3) -> Result<(), CodecError> {
        self.write_f32(v.x)?;
        self.write_f32(v.y)?;
        self.write_f32(v.z)
    }

    pub fn write_quat(&mut self, q: Quat) -> Result<(), CodecError> {
        self.write_f32(q.x)?;
        self.write_f32(q.y)?;
        self.write_f32(q.z)?;
        self.write_f32(q.w)
    }

    pub fn write_color(&mut self, c: Color) -> Result<(), CodecError> {
        self.take(COLOR_LEN)?.copy_from_slice(&c);
        Ok(())
    }
}

/// Reads fixed-width little-endian fields, advancing a single offset.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let available = self.remaining();
        if N > available {
            return Err(CodecError::Overrun {
                offset: self.offset,
                needed: N,
                available,
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.offset..self.offset + N]);
        self.offset += N;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    /// Reads a float, refusing NaN and infinities.
    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        let offset = self.offset;
        let value = f32::from_le_bytes(self.take()?);
        if !value.is_finite() {
            return Err(CodecError::NonFinite { offset });
        }
        Ok(value)
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, CodecError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_quat(&mut self) -> Result<Quat, CodecError> {
        Ok(Quat::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    pub fn read_color(&mut self) -> Result<Color, CodecError> {
        self.take()
    }
}

/// Per-axis gizmo highlight bits carried in full-state messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GizmoFlags(pub u8);

impl GizmoFlags {
    pub const NONE: GizmoFlags = GizmoFlags(0);
    pub const X_AXIS: GizmoFlags = GizmoFlags(1 << 0);
    pub const Y_AXIS: GizmoFlags = GizmoFlags(1 << 1);
    pub const Z_AXIS: GizmoFlags = GizmoFlags(1 << 2);
    pub const X_RING: GizmoFlags = GizmoFlags(1 << 3);
    pub const Y_RING: GizmoFlags = GizmoFlags(1 << 4);
    pub const Z_RING: GizmoFlags = GizmoFlags(1 << 5);

    pub fn contains(&self, other: GizmoFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// What a controller does to the entity it grabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Attachment {
    #[default]
    None,
    Grab,
    Delete,
    Duplicate,
}

impl Attachment {
    /// Next mode in the Grab → Delete → Duplicate cycle. Never yields `None`.
    pub fn next(self) -> Attachment {
        match self {
            Attachment::None | Attachment::Duplicate => Attachment::Grab,
            Attachment::Grab => Attachment::Delete,
            Attachment::Delete => Attachment::Duplicate,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Attachment::None => 0,
            Attachment::Grab => 1,
            Attachment::Delete => 2,
            Attachment::Duplicate => 3,
        }
    }

    pub fn from_u8(value: u8) -> Result<Attachment, CodecError> {
        match value {
            0 => Ok(Attachment::None),
            1 => Ok(Attachment::Grab),
            2 => Ok(Attachment::Delete),
            3 => Ok(Attachment::Duplicate),
            _ => Err(CodecError::InvalidValue {
                field: "attachment",
                value,
            }),
        }
    }
}

/// Type tag of a message, in catalogue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Position,
    PositionRotation,
    PositionRotationScaleModel,
    PositionRotationScaleVisibleTintModel,
    PositionRotationVelocityColor,
    Segment,
    SimulationTime,
    ControllerAttachment,
    Removed,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        match self {
            MessageType::Position => 1,
            MessageType::PositionRotation => 2,
            MessageType::PositionRotationScaleModel => 3,
            MessageType::PositionRotationScaleVisibleTintModel => 4,
            MessageType::PositionRotationVelocityColor => 5,
            MessageType::Segment => 6,
            MessageType::SimulationTime => 7,
            MessageType::ControllerAttachment => 8,
            MessageType::Removed => 9,
        }
    }

    pub fn from_tag(tag: u8) -> Result<MessageType, CodecError> {
        Ok(match tag {
            1 => MessageType::Position,
            2 => MessageType::PositionRotation,
            3 => MessageType::PositionRotationScaleModel,
            4 => MessageType::PositionRotationScaleVisibleTintModel,
            5 => MessageType::PositionRotationVelocityColor,
            6 => MessageType::Segment,
            7 => MessageType::SimulationTime,
            8 => MessageType::ControllerAttachment,
            9 => MessageType::Removed,
            other => return Err(CodecError::UnknownType(other)),
        })
    }

    /// The one valid encoded length of this type, header included.
    pub fn encoded_len(self) -> usize {
        HEADER_LEN
            + match self {
                MessageType::Position => VEC3_LEN,
                MessageType::PositionRotation => VEC3_LEN + QUAT_LEN,
                MessageType::PositionRotationScaleModel => VEC3_LEN + QUAT_LEN + VEC3_LEN + 2,
                MessageType::PositionRotationScaleVisibleTintModel => {
                    VEC3_LEN + QUAT_LEN + VEC3_LEN + 1 + COLOR_LEN + 1 + 2
                }
                MessageType::PositionRotationVelocityColor => {
                    VEC3_LEN + QUAT_LEN + VEC3_LEN + COLOR_LEN
                }
                MessageType::Segment => VEC3_LEN + VEC3_LEN + COLOR_LEN,
                MessageType::SimulationTime => 4,
                MessageType::ControllerAttachment => 2,
                MessageType::Removed => 0,
            }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Body {
    Position {
        position: Vec3,
    },
    PositionRotation {
        position: Vec3,
        rotation: Quat,
    },
    PositionRotationScaleModel {
        position: Vec3,
        rotation: Quat,
        scale: Vec3,
        model: u16,
    },
    PositionRotationScaleVisibleTintModel {
        position: Vec3,
        rotation: Quat,
        scale: Vec3,
        visible: bool,
        tint: Color,
        gizmo: GizmoFlags,
        model: u16,
    },
    PositionRotationVelocityColor {
        position: Vec3,
        rotation: Quat,
        velocity: Vec3,
        color: Color,
    },
    Segment {
        start: Vec3,
        end: Vec3,
        color: Color,
    },
    SimulationTime {
        time: f32,
    },
    ControllerAttachment {
        controller: u8,
        attachment: Attachment,
    },
    /// Tombstone notice: the object no longer exists.
    Removed,
}

impl Body {
    pub fn message_type(&self) -> MessageType {
        match self {
            Body::Position { .. } => MessageType::Position,
            Body::PositionRotation { .. } => MessageType::PositionRotation,
            Body::PositionRotationScaleModel { .. } => MessageType::PositionRotationScaleModel,
            Body::PositionRotationScaleVisibleTintModel { .. } => {
                MessageType::PositionRotationScaleVisibleTintModel
            }
            Body::PositionRotationVelocityColor { .. } => {
                MessageType::PositionRotationVelocityColor
            }
            Body::Segment { .. } => MessageType::Segment,
            Body::SimulationTime { .. } => MessageType::SimulationTime,
            Body::ControllerAttachment { .. } => MessageType::ControllerAttachment,
            Body::Removed => MessageType::Removed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Message {
    pub seq: i32,
    pub object_id: u16,
    pub body: Body,
}

impl Message {
    pub fn new(seq: i32, object_id: u16, body: Body) -> Self {
        Self {
            seq,
            object_id,
            body,
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.body.message_type().encoded_len()
    }
}

/// Encodes `msg` at the start of `buf`, returning the number of bytes written.
pub fn encode(msg: &Message, buf: &mut [u8]) -> Result<usize, CodecError> {
    let mut w = ByteWriter::new(buf);
    w.write_u8(msg.body.message_type().tag())?;
    w.write_i32(msg.seq)?;
    w.write_u16(msg.object_id)?;

    match msg.body {
        Body::Position { position } => w.write_vec3(position)?,
        Body::PositionRotation { position, rotation } => {
            w.write_vec3(position)?;
            w.write_quat(rotation)?;
        }
        Body::PositionRotationScaleModel {
            position,
            rotation,
            scale,
            model,
        } => {
            w.write_vec3(position)?;
            w.write_quat(rotation)?;
            w.write_vec3(scale)?;
            w.write_u16(model)?;
        }
        Body::PositionRotationScaleVisibleTintModel {
            position,
            rotation,
            scale,
            visible,
            tint,
            gizmo,
            model,
        } => {
            w.write_vec3(position)?;
            w.write_quat(rotation)?;
            w.write_vec3(scale)?;
            w.write_bool(visible)?;
            w.write_color(tint)?;
            w.write_u8(gizmo.0)?;
            w.write_u16(model)?;
        }
        Body::PositionRotationVelocityColor {
            position,
            rotation,
            velocity,
            color,
        } => {
            w.write_vec3(position)?;
            w.write_quat(rotation)?;
            w.write_vec3(velocity)?;
            w.write_color(color)?;
        }
        Body::Segment { start, end, color } => {
            w.write_vec3(start)?;
            w.write_vec3(end)?;
            w.write_color(color)?;
        }
        Body::SimulationTime { time } => w.write_f32(time)?,
        Body::ControllerAttachment {
            controller,
            attachment,
        } => {
            w.write_u8(controller)?;
            w.write_u8(attachment.to_u8())?;
        }
        Body::Removed => {}
    }

    Ok(w.offset())
}

/// Appends the encoding of `msg` to `out`.
pub fn encode_into(msg: &Message, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + msg.encoded_len(), 0);
    // The buffer was sized from the same table the encoder follows.
    if let Err(e) = encode(msg, &mut out[start..]) {
        log::error!("Encoding {:?} failed: {}", msg.body.message_type(), e);
        out.truncate(start);
    }
}

/// Decodes exactly one message. `bytes` must be precisely the declared
/// length of its type.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    let tag = *bytes.first().ok_or(CodecError::Empty)?;
    let kind = MessageType::from_tag(tag)?;
    let expected = kind.encoded_len();
    if bytes.len() != expected {
        return Err(CodecError::LengthMismatch {
            kind,
            expected,
            actual: bytes.len(),
        });
    }

    let mut r = ByteReader::new(bytes);
    r.read_u8()?;
    let seq = r.read_i32()?;
    let object_id = r.read_u16()?;

    let body = match kind {
        MessageType::Position => Body::Position {
            position: r.read_vec3()?,
        },
        MessageType::PositionRotation => Body::PositionRotation {
            position: r.read_vec3()?,
            rotation: r.read_quat()?,
        },
        MessageType::PositionRotationScaleModel => Body::PositionRotationScaleModel {
            position: r.read_vec3()?,
            rotation: r.read_quat()?,
            scale: r.read_vec3()?,
            model: r.read_u16()?,
        },
        MessageType::PositionRotationScaleVisibleTintModel => {
            Body::PositionRotationScaleVisibleTintModel {
                position: r.read_vec3()?,
                rotation: r.read_quat()?,
                scale: r.read_vec3()?,
                visible: r.read_bool()?,
                tint: r.read_color()?,
                gizmo: GizmoFlags(r.read_u8()?),
                model: r.read_u16()?,
            }
        }
        MessageType::PositionRotationVelocityColor => Body::PositionRotationVelocityColor {
            position: r.read_vec3()?,
            rotation: r.read_quat()?,
            velocity: r.read_vec3()?,
            color: r.read_color()?,
        },
        MessageType::Segment => Body::Segment {
            start: r.read_vec3()?,
            end: r.read_vec3()?,
            color: r.read_color()?,
        },
        MessageType::SimulationTime => Body::SimulationTime {
            time: r.read_f32()?,
        },
        MessageType::ControllerAttachment => Body::ControllerAttachment {
            controller: r.read_u8()?,
            attachment: Attachment::from_u8(r.read_u8()?)?,
        },
        MessageType::Removed => Body::Removed,
    };

    Ok(Message {
        seq,
        object_id,
        body,
    })
}

/// Iterates over a payload of back-to-back messages. Stops after the first
/// error since the stream cannot be resynchronised past a bad tag.
pub struct MessageIter<'a> {
    bytes: &'a [u8],
    failed: bool,
}

pub fn decode_all(bytes: &[u8]) -> MessageIter<'_> {
    MessageIter {
        bytes,
        failed: false,
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<Message, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.bytes.is_empty() {
            return None;
        }

        let result = MessageType::from_tag(self.bytes[0]).and_then(|kind| {
            let len = kind.encoded_len();
            if self.bytes.len() < len {
                return Err(CodecError::LengthMismatch {
                    kind,
                    expected: len,
                    actual: self.bytes.len(),
                });
            }
            let msg = decode(&self.bytes[..len])?;
            self.bytes = &self.bytes[len..];
            Ok(msg)
        });

        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_state() -> Message {
        Message::new(
            41,
            7,
            Body::PositionRotationScaleVisibleTintModel {
                position: Vec3::new(0.25, -1.5, 3.0),
                rotation: Quat::new(0.0, 0.70710677, 0.0, 0.70710677),
                scale: Vec3::splat(0.1),
                visible: true,
                tint: [255, 128, 0, 200],
                gizmo: GizmoFlags::Y_RING,
                model: 3,
            },
        )
    }

    #[test]
    fn test_declared_lengths() {
        assert_eq!(MessageType::Position.encoded_len(), 19);
        assert_eq!(MessageType::PositionRotation.encoded_len(), 35);
        assert_eq!(MessageType::PositionRotationScaleModel.encoded_len(), 49);
        assert_eq!(
            MessageType::PositionRotationScaleVisibleTintModel.encoded_len(),
            55
        );
        assert_eq!(MessageType::PositionRotationVelocityColor.encoded_len(), 51);
        assert_eq!(MessageType::Segment.encoded_len(), 35);
        assert_eq!(MessageType::SimulationTime.encoded_len(), 11);
        assert_eq!(MessageType::ControllerAttachment.encoded_len(), 9);
        assert_eq!(MessageType::Removed.encoded_len(), 7);
    }

    #[test]
    fn test_every_kind_roundtrips_at_declared_length() {
        let rotation = Quat::new(0.0, 0.70710677, 0.0, 0.70710677);
        let bodies = [
            Body::Position {
                position: Vec3::new(1.0, 2.0, 3.0),
            },
            Body::PositionRotation {
                position: Vec3::new(-1.0, 0.5, 0.25),
                rotation,
            },
            Body::PositionRotationScaleModel {
                position: Vec3::new(0.0, 1.0, -2.0),
                rotation,
                scale: Vec3::new(0.1, 0.2, 0.3),
                model: 4,
            },
            full_state().body,
            Body::PositionRotationVelocityColor {
                position: Vec3::new(0.0, 1.6, 0.5),
                rotation,
                velocity: Vec3::new(0.5, 0.0, -0.25),
                color: [10, 20, 30, 255],
            },
            Body::Segment {
                start: Vec3::ZERO,
                end: Vec3::new(0.0, 0.0, 1.0),
                color: [255, 255, 0, 128],
            },
            Body::SimulationTime { time: 12.5 },
            Body::ControllerAttachment {
                controller: 3,
                attachment: Attachment::Duplicate,
            },
            Body::Removed,
        ];

        for (i, body) in bodies.into_iter().enumerate() {
            let msg = Message::new(100 + i as i32, 0xF001, body);
            let kind = body.message_type();
            assert_eq!(kind.tag(), i as u8 + 1);

            let mut bytes = Vec::new();
            encode_into(&msg, &mut bytes);
            assert_eq!(bytes.len(), kind.encoded_len(), "{:?}", kind);
            assert_eq!(msg.encoded_len(), kind.encoded_len());
            assert_eq!(decode(&bytes).unwrap(), msg, "{:?}", kind);
        }
    }

    #[test]
    fn test_decode_rejects_non_finite_floats() {
        let mut bytes = Vec::new();
        encode_into(&full_state(), &mut bytes);
        bytes[7..11].copy_from_slice(&f32::NAN.to_le_bytes());
        assert_eq!(decode(&bytes), Err(CodecError::NonFinite { offset: 7 }));

        let mut bytes = Vec::new();
        encode_into(&Message::new(1, 0, Body::SimulationTime { time: 1.0 }), &mut bytes);
        bytes[7..11].copy_from_slice(&f32::INFINITY.to_le_bytes());
        assert_eq!(decode(&bytes), Err(CodecError::NonFinite { offset: 7 }));
    }

    #[test]
    fn test_field_layout_is_little_endian() {
        let msg = Message::new(
            0x0102_0304,
            0x0506,
            Body::SimulationTime { time: 1.0 },
        );
        let mut buf = [0u8; 11];
        let written = encode(&msg, &mut buf).unwrap();
        assert_eq!(written, 11);
        assert_eq!(buf[0], 7);
        assert_eq!(&buf[1..5], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[5..7], &[0x06, 0x05]);
        assert_eq!(&buf[7..11], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_full_state_roundtrip() {
        let msg = full_state();
        let mut bytes = Vec::new();
        encode_into(&msg, &mut bytes);
        assert_eq!(bytes.len(), 55);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_short_buffer_is_overrun() {
        let mut buf = [0u8; 20];
        let err = encode(&full_state(), &mut buf).unwrap_err();
        assert!(matches!(err, CodecError::Overrun { .. }));
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let mut bytes = Vec::new();
        encode_into(&full_state(), &mut bytes);
        bytes.push(0);
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::LengthMismatch { expected: 55, actual: 56, .. })
        ));
        assert!(matches!(
            decode(&bytes[..30]),
            Err(CodecError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_tag_and_empty() {
        assert_eq!(decode(&[0xEE, 0, 0]), Err(CodecError::UnknownType(0xEE)));
        assert_eq!(decode(&[]), Err(CodecError::Empty));
    }

    #[test]
    fn test_invalid_attachment_value() {
        let mut bytes = Vec::new();
        encode_into(
            &Message::new(
                1,
                0,
                Body::ControllerAttachment {
                    controller: 1,
                    attachment: Attachment::Delete,
                },
            ),
            &mut bytes,
        );
        bytes[8] = 9;
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::InvalidValue { field: "attachment", value: 9 })
        ));
    }

    #[test]
    fn test_decode_all_splits_stream() {
        let mut bytes = Vec::new();
        encode_into(&Message::new(3, 0, Body::SimulationTime { time: 2.5 }), &mut bytes);
        encode_into(&full_state(), &mut bytes);
        encode_into(&Message::new(3, 9, Body::Removed), &mut bytes);

        let msgs: Vec<_> = decode_all(&bytes).collect::<Result<_, _>>().unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1], full_state());
        assert_eq!(msgs[2].body, Body::Removed);
    }

    #[test]
    fn test_decode_all_stops_on_truncation() {
        let mut bytes = Vec::new();
        encode_into(&full_state(), &mut bytes);
        encode_into(&full_state(), &mut bytes);
        bytes.truncate(80);

        let results: Vec<_> = decode_all(&bytes).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn test_attachment_cycle_skips_none() {
        let mut a = Attachment::None;
        let mut seen = Vec::new();
        for _ in 0..4 {
            a = a.next();
            seen.push(a);
        }
        assert_eq!(
            seen,
            vec![
                Attachment::Grab,
                Attachment::Delete,
                Attachment::Duplicate,
                Attachment::Grab
            ]
        );
    }
}
