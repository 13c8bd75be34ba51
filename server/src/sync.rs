//! Serialises world state into wire messages and packs them into datagrams
//!
//! Every tick the full state is resent: redundancy comes from repetition,
//! and peers merge duplicates with last-writer-wins per field. Bodies are
//! built once per tick and stamped with each peer's own sequence numbers
//! only when framed.

use crate::client_manager::Peer;
use crate::controller::controller_id;
use crate::entity::{Entity, EntityId, EntityStore};
use crate::manipulation::AlterationKind;
use crate::world::WorldState;
use log::debug;
use shared::channel::{FRAME_OVERHEAD, MAX_DATAGRAM};
use shared::{
    encode_frame, encode_into, Body, ChannelError, Color, Message, Pose, ReliableChannel,
    HANDS_PER_AVATAR, TICK_RATE,
};

/// How long a tombstone keeps being announced.
pub const REMOVED_RESEND_TICKS: u64 = 3 * TICK_RATE as u64;

const PAYLOAD_BUDGET: usize = MAX_DATAGRAM - FRAME_OVERHEAD;

const MOVE_SEGMENT: Color = [255, 255, 255, 255];
const DELETE_SEGMENT: Color = [230, 60, 60, 255];
const DUPLICATE_SEGMENT: Color = [80, 220, 120, 255];

/// A message body addressed to one object, not yet stamped with a seq.
pub type Outgoing = (u16, Body);

/// Object ids from here up name peer avatars rather than entities.
pub const AVATAR_OBJECT_BASE: u16 = 0xF000;

/// Wire id of an entity; ids in the avatar range or beyond are not replicated.
pub fn object_id(id: EntityId) -> Option<u16> {
    u16::try_from(id).ok().filter(|wire| *wire < AVATAR_OBJECT_BASE)
}

fn entity_body(entity: &Entity, world: &Pose) -> Body {
    Body::PositionRotationScaleVisibleTintModel {
        position: world.position,
        rotation: world.rotation,
        scale: entity.scale,
        visible: entity.visible,
        tint: entity.tint,
        gizmo: entity.gizmo,
        model: entity.kind.0,
    }
}

fn push_entity(store: &EntityStore, id: EntityId, parent: &Pose, out: &mut Vec<Outgoing>) {
    let (Some(entity), Some(wire_id)) = (store.live(id), object_id(id)) else {
        return;
    };
    let world = entity.pose.apply_offset(parent);
    out.push((wire_id, entity_body(entity, &world)));
    for child in &entity.children {
        push_entity(store, *child, &world, out);
    }
}

/// Messages every peer receives this tick.
pub fn broadcast_bodies(world: &WorldState) -> Vec<Outgoing> {
    let mut out = vec![(
        0,
        Body::SimulationTime {
            time: world.simulation_time,
        },
    )];

    for (_, list) in world.lists.iter() {
        for id in &list.members {
            push_entity(&world.store, *id, &list.offset, &mut out);
        }
    }

    for entity in world.store.iter() {
        let recent = entity
            .deleted_at
            .map_or(false, |at| world.frame.saturating_sub(at) <= REMOVED_RESEND_TICKS);
        if entity.deleted && recent {
            if let Some(wire_id) = object_id(entity.id) {
                out.push((wire_id, Body::Removed));
            }
        }
    }

    for alteration in world.manipulation().alterations() {
        if !alteration.valid {
            continue;
        }
        let (Some(controller), Some(list)) = (
            world.controllers.get(&alteration.controller),
            world.lists.get(alteration.list),
        ) else {
            continue;
        };
        let Some(end) = list.world_pose(&world.store, alteration.entity) else {
            continue;
        };
        let color = match alteration.kind {
            AlterationKind::Move { .. } => MOVE_SEGMENT,
            AlterationKind::Delete => DELETE_SEGMENT,
            AlterationKind::Duplicate { .. } => DUPLICATE_SEGMENT,
        };
        out.push((
            alteration.controller as u16,
            Body::Segment {
                start: controller.pose.position,
                end: end.position,
                color,
            },
        ));
    }

    out
}

/// Headset pose, velocity and color of every active peer.
pub fn avatar_bodies<'a>(peers: impl IntoIterator<Item = &'a Peer>) -> Vec<Outgoing> {
    peers
        .into_iter()
        .filter(|peer| !peer.ignore)
        .filter_map(|peer| {
            let offset = u16::try_from(peer.id).ok()?;
            let wire_id = AVATAR_OBJECT_BASE.checked_add(offset)?;
            Some((
                wire_id,
                Body::PositionRotationVelocityColor {
                    position: peer.headset.position,
                    rotation: peer.headset.rotation,
                    velocity: peer.velocity,
                    color: peer.color,
                },
            ))
        })
        .collect()
}

/// Messages only `peer` receives: the attachment mode of its own hands.
pub fn peer_bodies(world: &WorldState, peer: u32) -> Vec<Outgoing> {
    (0..HANDS_PER_AVATAR)
        .filter_map(|hand| {
            let id = controller_id(peer, hand);
            let controller = world.controllers.get(&id)?;
            Some((
                id as u16,
                Body::ControllerAttachment {
                    controller: hand as u8,
                    attachment: controller.attachment,
                },
            ))
        })
        .collect()
}

/// Packs bodies into as few datagrams as fit, each framed and stamped by
/// `channel`. Messages inside a datagram carry that datagram's seq.
pub fn pack_frames<'a>(
    channel: &mut ReliableChannel,
    bodies: impl IntoIterator<Item = &'a Outgoing>,
) -> Result<Vec<Vec<u8>>, ChannelError> {
    let mut datagrams = Vec::new();
    let mut payload = Vec::with_capacity(PAYLOAD_BUDGET);
    let mut seq = channel.next_seq();

    for (object_id, body) in bodies {
        let mut msg = Message::new(seq, *object_id, *body);
        if !payload.is_empty() && payload.len() + msg.encoded_len() > PAYLOAD_BUDGET {
            let frame = channel.prepare_packet(std::mem::take(&mut payload));
            datagrams.push(encode_frame(&frame)?);
            seq = channel.next_seq();
            msg.seq = seq;
        }
        encode_into(&msg, &mut payload);
    }

    if !payload.is_empty() {
        let frame = channel.prepare_packet(payload);
        datagrams.push(encode_frame(&frame)?);
    }
    if datagrams.len() > 1 {
        debug!("Tick state split into {} datagrams", datagrams.len());
    }
    Ok(datagrams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::PeerInput;
    use shared::{decode_all, decode_frame, AvatarInput, HandInput, Replica, Vec3};

    fn live_entities(world: &WorldState) -> usize {
        world.store.iter().filter(|e| e.is_live()).count()
    }

    #[test]
    fn test_broadcast_covers_every_live_entity() {
        let world = WorldState::initial_state();
        let bodies = broadcast_bodies(&world);
        assert!(matches!(bodies[0].1, Body::SimulationTime { .. }));
        let entities = bodies
            .iter()
            .filter(|(_, b)| matches!(b, Body::PositionRotationScaleVisibleTintModel { .. }))
            .count();
        assert_eq!(entities, live_entities(&world));
    }

    #[test]
    fn test_entities_are_sent_in_world_coordinates() {
        let world = WorldState::initial_state();
        let undo = world.buttons.undo;
        let expected = world.lists.buttons.world_pose(&world.store, undo).unwrap();
        let bodies = broadcast_bodies(&world);
        let (_, body) = bodies.iter().find(|(id, _)| *id == undo as u16).unwrap();
        match body {
            Body::PositionRotationScaleVisibleTintModel { position, .. } => {
                assert_eq!(*position, expected.position)
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_tombstones_are_announced_for_a_while() {
        let mut world = WorldState::initial_state();
        let cube = world.lists.world.members[0];
        world.store.delete(cube, world.frame);

        let removed = |world: &WorldState| {
            broadcast_bodies(world)
                .iter()
                .any(|(id, b)| *id == cube as u16 && *b == Body::Removed)
        };
        assert!(removed(&world));

        world.frame += REMOVED_RESEND_TICKS + 1;
        assert!(!removed(&world));
    }

    #[test]
    fn test_alteration_produces_segment_and_attachment() {
        let mut world = WorldState::initial_state();
        let cube = world.lists.world.members[0];
        let at = world.lists.world.world_pose(&world.store, cube).unwrap().position;

        let mut avatar = AvatarInput::default();
        avatar.hands[0] = HandInput {
            pose: Pose::at(at),
            grab: true,
            action: false,
        };
        avatar.hands[1].pose = Pose::at(Vec3::new(0.0, -5.0, 0.0));
        world.tick(
            &[PeerInput {
                peer: 2,
                avatar: Some(avatar),
                ignore: false,
            }],
            1.0 / TICK_RATE as f32,
        );

        let segments = broadcast_bodies(&world)
            .into_iter()
            .filter(|(_, b)| matches!(b, Body::Segment { .. }))
            .count();
        assert_eq!(segments, 1);
        assert_eq!(peer_bodies(&world, 2).len(), 2);
        assert!(peer_bodies(&world, 3).is_empty());
    }

    #[test]
    fn test_avatar_ids_stay_clear_of_entities() {
        assert_eq!(object_id(12), Some(12));
        assert_eq!(object_id(AVATAR_OBJECT_BASE as u32), None);
        assert_eq!(object_id(70_000), None);

        let peer = Peer::new(3, "127.0.0.1:9000".parse().unwrap(), std::time::Instant::now());
        let bodies = avatar_bodies([&peer]);
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].0, AVATAR_OBJECT_BASE + 3);
        assert!(matches!(bodies[0].1, Body::PositionRotationVelocityColor { .. }));
    }

    #[test]
    fn test_frames_fit_datagram_and_share_seq() {
        let mut world = WorldState::initial_state();
        for i in 0..200 {
            let kind = crate::entity::EntityKind::CUBE;
            let id = world.store.spawn(
                Pose::at(Vec3::new(i as f32, 0.0, 0.0)),
                Vec3::splat(0.1),
                kind.default_tint(),
                kind,
            );
            world.lists.world.push(id);
        }

        let bodies = broadcast_bodies(&world);
        let mut channel = ReliableChannel::new();
        let datagrams = pack_frames(&mut channel, &bodies).unwrap();
        assert!(datagrams.len() > 1);
        assert_eq!(channel.outbox_len(), datagrams.len());

        let mut replica = Replica::new();
        let mut decoded = 0;
        for bytes in &datagrams {
            assert!(bytes.len() <= MAX_DATAGRAM);
            let frame = decode_frame(bytes).unwrap();
            for msg in decode_all(&frame.payload) {
                let msg = msg.unwrap();
                assert_eq!(msg.seq, frame.header.seq);
                replica.apply(&msg, false);
                decoded += 1;
            }
        }
        assert_eq!(decoded, bodies.len());
        assert_eq!(replica.live_count(), live_entities(&world));
    }
}
