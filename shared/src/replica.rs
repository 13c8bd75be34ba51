//! Field-level last-writer-wins reconciliation for replicated records
//!
//! Each field remembers the sequence number of the write that last set it.
//! A write is applied only if its sequence number is newer, so duplicated,
//! reordered and resent messages all merge to the same result. Existence is
//! itself a versioned field, which makes create/delete races resolve by
//! sequence number instead of arrival order.

use crate::channel::sequence_greater_than;
use crate::codec::{Attachment, Body, Color, GizmoFlags, Message};
use crate::math::{Quat, Vec3};
use std::collections::HashMap;

/// A value plus the sequence number of the write that set it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Versioned<T> {
    value: T,
    seq: Option<i32>,
}

impl<T: Copy> Versioned<T> {
    /// A field that has never been written; any write will apply.
    pub fn unset(value: T) -> Self {
        Self { value, seq: None }
    }

    pub fn get(&self) -> T {
        self.value
    }

    pub fn seq(&self) -> Option<i32> {
        self.seq
    }

    /// Applies the write if `seq` is newer than the stored one, or if
    /// `force` is set. Returns whether the value was taken.
    pub fn set(&mut self, value: T, seq: i32, force: bool) -> bool {
        let newer = match self.seq {
            None => true,
            Some(current) => sequence_greater_than(seq, current),
        };
        if newer || force {
            self.value = value;
            self.seq = Some(seq);
            true
        } else {
            false
        }
    }
}

/// Client-side mirror of one scene object.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedEntity {
    pub exists: Versioned<bool>,
    pub position: Versioned<Vec3>,
    pub rotation: Versioned<Quat>,
    pub scale: Versioned<Vec3>,
    pub velocity: Versioned<Vec3>,
    pub visible: Versioned<bool>,
    pub tint: Versioned<Color>,
    pub gizmo: Versioned<GizmoFlags>,
    pub model: Versioned<u16>,
}

impl Default for ReplicatedEntity {
    fn default() -> Self {
        Self {
            exists: Versioned::unset(false),
            position: Versioned::unset(Vec3::ZERO),
            rotation: Versioned::unset(Quat::IDENTITY),
            scale: Versioned::unset(Vec3::ONE),
            velocity: Versioned::unset(Vec3::ZERO),
            visible: Versioned::unset(true),
            tint: Versioned::unset([255, 255, 255, 255]),
            gizmo: Versioned::unset(GizmoFlags::NONE),
            model: Versioned::unset(0),
        }
    }
}

impl ReplicatedEntity {
    pub fn is_live(&self) -> bool {
        self.exists.get()
    }
}

/// A line drawn between two points, e.g. a controller and what it holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: Vec3,
    pub end: Vec3,
    pub color: Color,
}

/// Everything a participant mirrors from the authoritative side.
#[derive(Debug, Default)]
pub struct Replica {
    entities: HashMap<u16, ReplicatedEntity>,
    segments: HashMap<u16, Versioned<Option<Segment>>>,
    attachments: HashMap<u8, Versioned<Attachment>>,
    simulation_time: Option<Versioned<f32>>,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one message. Returns true if any field changed.
    pub fn apply(&mut self, msg: &Message, force: bool) -> bool {
        let seq = msg.seq;
        match msg.body {
            Body::Position { position } => {
                let e = self.entity_mut(msg.object_id);
                e.exists.set(true, seq, force) | e.position.set(position, seq, force)
            }
            Body::PositionRotation { position, rotation } => {
                let e = self.entity_mut(msg.object_id);
                e.exists.set(true, seq, force)
                    | e.position.set(position, seq, force)
                    | e.rotation.set(rotation, seq, force)
            }
            Body::PositionRotationScaleModel {
                position,
                rotation,
                scale,
                model,
            } => {
                let e = self.entity_mut(msg.object_id);
                e.exists.set(true, seq, force)
                    | e.position.set(position, seq, force)
                    | e.rotation.set(rotation, seq, force)
                    | e.scale.set(scale, seq, force)
                    | e.model.set(model, seq, force)
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
                let e = self.entity_mut(msg.object_id);
                e.exists.set(true, seq, force)
                    | e.position.set(position, seq, force)
                    | e.rotation.set(rotation, seq, force)
                    | e.scale.set(scale, seq, force)
                    | e.visible.set(visible, seq, force)
                    | e.tint.set(tint, seq, force)
                    | e.gizmo.set(gizmo, seq, force)
                    | e.model.set(model, seq, force)
            }
            Body::PositionRotationVelocityColor {
                position,
                rotation,
                velocity,
                color,
            } => {
                let e = self.entity_mut(msg.object_id);
                e.exists.set(true, seq, force)
                    | e.position.set(position, seq, force)
                    | e.rotation.set(rotation, seq, force)
                    | e.velocity.set(velocity, seq, force)
                    | e.tint.set(color, seq, force)
            }
            Body::Removed => self.entity_mut(msg.object_id).exists.set(false, seq, force),
            Body::Segment { start, end, color } => self
                .segments
                .entry(msg.object_id)
                .or_insert_with(|| Versioned::unset(None))
                .set(Some(Segment { start, end, color }), seq, force),
            Body::SimulationTime { time } => self
                .simulation_time
                .get_or_insert_with(|| Versioned::unset(0.0))
                .set(time, seq, force),
            Body::ControllerAttachment {
                controller,
                attachment,
            } => self
                .attachments
                .entry(controller)
                .or_insert_with(|| Versioned::unset(Attachment::None))
                .set(attachment, seq, force),
        }
    }

    fn entity_mut(&mut self, id: u16) -> &mut ReplicatedEntity {
        self.entities.entry(id).or_default()
    }

    pub fn entity(&self, id: u16) -> Option<&ReplicatedEntity> {
        self.entities.get(&id)
    }

    /// Objects whose latest existence write says they are alive.
    pub fn live_entities(&self) -> impl Iterator<Item = (u16, &ReplicatedEntity)> {
        self.entities
            .iter()
            .filter(|(_, e)| e.is_live())
            .map(|(id, e)| (*id, e))
    }

    pub fn live_count(&self) -> usize {
        self.live_entities().count()
    }

    /// Drops segments not refreshed at or after `seq`; segments are resent
    /// every tick while they exist, so a stale one means it ended.
    pub fn expire_segments(&mut self, seq: i32) {
        self.segments
            .retain(|_, s| s.seq().map_or(false, |written| !sequence_greater_than(seq, written)));
    }

    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        self.segments.values().filter_map(|s| s.get())
    }

    pub fn attachment(&self, controller: u8) -> Option<Attachment> {
        self.attachments.get(&controller).map(|a| a.get())
    }

    pub fn simulation_time(&self) -> Option<f32> {
        self.simulation_time.map(|t| t.get())
    }
}
