//! Client-side mirror of the shared scene

use log::debug;
use shared::{
    decode_all, sequence_greater_than, Attachment, Body, Frame, Message, Replica,
    ReplicatedEntity, Vec3,
};

/// Placeable object models; fixtures and buttons use higher numbers.
const PLACEABLE_MODELS: std::ops::RangeInclusive<u16> = 1..=4;

/// Counters reported by the periodic summary
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SceneSummary {
    pub frames: u64,
    pub messages: u64,
    pub malformed: u64,
    pub live: usize,
    pub segments: usize,
    pub simulation_time: Option<f32>,
}

/// Replicated scene plus the bookkeeping that tells ticks apart
///
/// The server opens every tick with a `SimulationTime` message, so a frame
/// carrying one marks a new tick. Segments are resent every tick while they
/// exist; any segment not refreshed since the previous tick started has
/// ended and is dropped.
#[derive(Debug, Default)]
pub struct ClientScene {
    replica: Replica,
    frames: u64,
    messages: u64,
    malformed: u64,
    tick_start: Option<i32>,
}

impl ClientScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Merges one message into the replica
    pub fn apply_message(&mut self, msg: &Message) -> bool {
        self.messages += 1;
        self.replica.apply(msg, false)
    }

    /// Decodes and merges every message of a received frame
    ///
    /// Decoding stops at the first malformed message; whatever came before
    /// it is kept. Returns the number of messages applied.
    pub fn apply_frame(&mut self, frame: &Frame) -> usize {
        self.frames += 1;
        let mut applied = 0;
        let mut opens_tick = false;

        for msg in decode_all(&frame.payload) {
            match msg {
                Ok(msg) => {
                    opens_tick |= matches!(msg.body, Body::SimulationTime { .. });
                    self.apply_message(&msg);
                    applied += 1;
                }
                Err(e) => {
                    debug!("Dropping rest of frame {}: {}", frame.header.seq, e);
                    self.malformed += 1;
                    break;
                }
            }
        }

        if opens_tick {
            let newest = self
                .tick_start
                .map_or(true, |start| sequence_greater_than(frame.header.seq, start));
            if newest {
                if let Some(previous) = self.tick_start {
                    self.replica.expire_segments(previous);
                }
                self.tick_start = Some(frame.header.seq);
            }
        }
        applied
    }

    /// Closest visible placeable object to `point`
    pub fn nearest_placeable(&self, point: Vec3) -> Option<(u16, Vec3)> {
        self.replica
            .live_entities()
            .filter(|(_, e)| e.visible.get() && PLACEABLE_MODELS.contains(&e.model.get()))
            .map(|(id, e)| (id, e.position.get()))
            .min_by(|(ida, a), (idb, b)| {
                a.distance_squared(point)
                    .total_cmp(&b.distance_squared(point))
                    .then(ida.cmp(idb))
            })
    }

    pub fn entity(&self, id: u16) -> Option<&ReplicatedEntity> {
        self.replica.entity(id)
    }

    /// Attachment mode the server reports for one of our hands
    pub fn attachment(&self, hand: u8) -> Attachment {
        self.replica.attachment(hand).unwrap_or(Attachment::None)
    }

    pub fn summary(&self) -> SceneSummary {
        SceneSummary {
            frames: self.frames,
            messages: self.messages,
            malformed: self.malformed,
            live: self.replica.live_count(),
            segments: self.replica.segments().count(),
            simulation_time: self.replica.simulation_time(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{encode_into, FrameHeader, GizmoFlags, Quat};

    fn entity_body(x: f32, model: u16, visible: bool) -> Body {
        Body::PositionRotationScaleVisibleTintModel {
            position: Vec3::new(x, 1.0, 0.0),
            rotation: Quat::IDENTITY,
            scale: Vec3::splat(0.1),
            visible,
            tint: [200, 200, 200, 255],
            gizmo: GizmoFlags::NONE,
            model,
        }
    }

    fn frame(seq: i32, bodies: &[(u16, Body)]) -> Frame {
        let mut payload = Vec::new();
        for (id, body) in bodies {
            encode_into(&Message::new(seq, *id, *body), &mut payload);
        }
        Frame {
            header: FrameHeader {
                seq,
                ack: 0,
                ack_bits: 0,
            },
            payload,
        }
    }

    fn segment() -> Body {
        Body::Segment {
            start: Vec3::ZERO,
            end: Vec3::X,
            color: [255, 255, 255, 255],
        }
    }

    #[test]
    fn test_apply_frame_counts_messages() {
        let mut scene = ClientScene::new();
        let applied = scene.apply_frame(&frame(
            0,
            &[
                (0, Body::SimulationTime { time: 0.5 }),
                (1, entity_body(0.0, 1, true)),
                (2, entity_body(0.3, 2, true)),
            ],
        ));
        assert_eq!(applied, 3);

        let summary = scene.summary();
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.live, 2);
        assert_eq!(summary.simulation_time, Some(0.5));
    }

    #[test]
    fn test_truncated_frame_keeps_prefix() {
        let mut scene = ClientScene::new();
        let mut f = frame(0, &[(1, entity_body(0.0, 1, true)), (2, entity_body(0.3, 1, true))]);
        f.payload.truncate(f.payload.len() - 3);
        assert_eq!(scene.apply_frame(&f), 1);
        assert_eq!(scene.summary().malformed, 1);
        assert!(scene.entity(1).unwrap().is_live());
        assert!(scene.entity(2).is_none());
    }

    #[test]
    fn test_older_frame_does_not_overwrite() {
        let mut scene = ClientScene::new();
        scene.apply_frame(&frame(5, &[(1, entity_body(0.5, 1, true))]));
        scene.apply_frame(&frame(4, &[(1, entity_body(0.4, 1, true))]));
        assert_eq!(scene.entity(1).unwrap().position.get().x, 0.5);

        scene.apply_frame(&frame(6, &[(1, Body::Removed)]));
        assert_eq!(scene.summary().live, 0);
    }

    #[test]
    fn test_segments_expire_one_tick_after_last_refresh() {
        let mut scene = ClientScene::new();
        let tick = |seq| (0, Body::SimulationTime { time: seq as f32 });

        scene.apply_frame(&frame(0, &[tick(0), (7, segment())]));
        assert_eq!(scene.summary().segments, 1);

        // Refreshed in the next tick: kept.
        scene.apply_frame(&frame(1, &[tick(1), (7, segment())]));
        assert_eq!(scene.summary().segments, 1);

        // Not refreshed: survives until the following tick opens.
        scene.apply_frame(&frame(2, &[tick(2)]));
        assert_eq!(scene.summary().segments, 1);
        scene.apply_frame(&frame(3, &[tick(3)]));
        assert_eq!(scene.summary().segments, 0);
    }

    #[test]
    fn test_nearest_placeable_skips_fixtures_and_hidden() {
        let mut scene = ClientScene::new();
        scene.apply_frame(&frame(
            0,
            &[
                (1, entity_body(0.0, 12, true)),
                (2, entity_body(0.1, 1, false)),
                (3, entity_body(0.5, 3, true)),
                (4, entity_body(-0.6, 2, true)),
            ],
        ));
        let (id, at) = scene.nearest_placeable(Vec3::new(0.0, 1.0, 0.0)).unwrap();
        assert_eq!(id, 3);
        assert_eq!(at.x, 0.5);
    }

    #[test]
    fn test_attachment_defaults_to_none() {
        let mut scene = ClientScene::new();
        assert_eq!(scene.attachment(0), Attachment::None);
        scene.apply_frame(&frame(
            0,
            &[(
                1 << 1,
                Body::ControllerAttachment {
                    controller: 1,
                    attachment: Attachment::None.next(),
                },
            )],
        ));
        assert_eq!(scene.attachment(1), Attachment::None.next());
    }
}
