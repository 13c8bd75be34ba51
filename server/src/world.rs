//! The authoritative world and its per-tick pipeline
//!
//! [`WorldState`] owns every entity, list, rule and controller. One call to
//! [`WorldState::tick`] runs the stages strictly in order: peer input intake,
//! clock and appliance buttons, manipulation, rule authoring, timed rule
//! replay. Serialising the result for peers lives in [`crate::sync`].

use crate::controller::{controller_id, Controller, ControllerId};
use crate::entity::{spheres_overlap, EntityId, EntityKind, EntityList, EntityStore, ListId, ListSet};
use crate::manipulation::{ManipulationContext, ManipulationEngine};
use crate::rules::{observe, Observed, RuleEngine};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shared::{AvatarInput, GizmoFlags, Pose, Quat, Vec3, HANDS_PER_AVATAR, TICK_RATE};
use std::collections::{BTreeMap, HashSet};

/// Where staged rule previews float relative to the appliance.
const STAGING_LIFT: Vec3 = Vec3::new(0.0, 0.6, 0.0);
/// Ticks between dropped-frame reports.
const DROP_REPORT_INTERVAL: u64 = TICK_RATE as u64;

/// One peer's contribution to a tick.
#[derive(Debug, Clone, Copy)]
pub struct PeerInput {
    pub peer: u32,
    /// Latest unapplied avatar sample, if one arrived since the last tick.
    pub avatar: Option<AvatarInput>,
    /// Stale peers keep their controllers but take no part in interaction.
    pub ignore: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutput {
    pub frame: u64,
    pub committed: usize,
    pub replayed: usize,
}

/// Entity ids of the appliance's control buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplianceButtons {
    pub undo: EntityId,
    pub redo: EntityId,
    pub clear: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ButtonPress {
    Clock,
    Undo,
    Redo,
    Clear,
}

/// Sent/dropped broadcast bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub sent: u64,
    pub dropped: u64,
    dropped_since_report: u64,
    last_report_frame: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorldState {
    pub frame: u64,
    pub simulation_time: f32,
    pub playing: bool,
    /// Seconds of simulation time between rule replays.
    pub rule_step: f32,
    step_accumulator: f32,
    pub store: EntityStore,
    pub lists: ListSet,
    pub rules: RuleEngine,
    pub appliance: EntityId,
    pub clock: EntityId,
    pub buttons: ApplianceButtons,
    #[serde(skip)]
    pub controllers: BTreeMap<ControllerId, Controller>,
    #[serde(skip)]
    manipulation: ManipulationEngine,
    #[serde(skip)]
    pub stats: FrameStats,
}

impl WorldState {
    /// Hard-coded starting scene: a few world objects, the appliance and
    /// clock fixtures, one shelf template per placeable kind and the
    /// appliance buttons.
    pub fn initial_state() -> Self {
        let mut store = EntityStore::new();
        let mut lists = ListSet::default();

        let appliance_pose = Pose::at(Vec3::new(0.0, 1.0, -0.6));
        let appliance = spawn_default(&mut store, &mut lists.fixtures, EntityKind::APPLIANCE, appliance_pose);
        let clock = spawn_default(
            &mut store,
            &mut lists.fixtures,
            EntityKind::CLOCK,
            Pose::at(Vec3::new(0.6, 1.2, -0.6)),
        );

        for (kind, x) in [
            (EntityKind::CUBE, -0.3),
            (EntityKind::CUBE, -0.1),
            (EntityKind::SPHERE, 0.1),
            (EntityKind::CYLINDER, 0.3),
        ] {
            spawn_default(&mut store, &mut lists.world, kind, Pose::at(Vec3::new(x, 1.0, 0.0)));
        }

        lists.shelf = EntityList::with_offset(Pose::new(
            Vec3::new(-1.0, 1.0, -0.3),
            Quat::from_axis_angle(Vec3::Y, std::f32::consts::FRAC_PI_2),
        ));
        for (i, kind) in EntityKind::PLACEABLE.into_iter().enumerate() {
            let at = Pose::at(Vec3::new(i as f32 * 0.15 - 0.225, 0.0, 0.0));
            spawn_default(&mut store, &mut lists.shelf, kind, at);
        }

        lists.buttons = EntityList::with_offset(appliance_pose);
        let mut button = |x: f32| {
            spawn_default(
                &mut store,
                &mut lists.buttons,
                EntityKind::BUTTON,
                Pose::at(Vec3::new(x, -0.2, 0.3)),
            )
        };
        let buttons = ApplianceButtons {
            undo: button(-0.12),
            redo: button(0.0),
            clear: button(0.12),
        };

        info!(
            "Initial scene: {} entities, appliance {}, clock {}",
            store.len(),
            appliance,
            clock
        );

        Self {
            frame: 0,
            simulation_time: 0.0,
            playing: true,
            rule_step: 1.0,
            step_accumulator: 0.0,
            store,
            lists,
            rules: RuleEngine::new(Pose::at(appliance_pose.position + STAGING_LIFT)),
            appliance,
            clock,
            buttons,
            controllers: BTreeMap::new(),
            manipulation: ManipulationEngine::new(),
            stats: FrameStats::default(),
        }
    }

    /// World pose of a fixture.
    pub fn fixture_pose(&self, id: EntityId) -> Option<Pose> {
        self.lists.fixtures.world_pose(&self.store, id)
    }

    pub fn manipulation(&self) -> &ManipulationEngine {
        &self.manipulation
    }

    /// Controllers of one peer, in hand order.
    pub fn peer_controllers(&self, peer: u32) -> impl Iterator<Item = &Controller> {
        (0..HANDS_PER_AVATAR).filter_map(move |hand| self.controllers.get(&controller_id(peer, hand)))
    }

    /// Forgets a peer's controllers and abandons their alterations.
    pub fn remove_peer(&mut self, peer: u32) {
        for hand in 0..HANDS_PER_AVATAR {
            let id = controller_id(peer, hand);
            if self.controllers.remove(&id).is_some() {
                self.manipulation.drop_controller(id, &mut self.store);
            }
        }
        info!("Removed controllers of peer {}", peer);
    }

    /// Runs one simulation step of `dt` seconds.
    pub fn tick(&mut self, inputs: &[PeerInput], dt: f32) -> TickOutput {
        self.frame += 1;
        self.apply_inputs(inputs);

        self.process_buttons();

        let commits = {
            let mut ctx = ManipulationContext {
                store: &mut self.store,
                lists: &mut self.lists,
                active_rule: self.rules.active_staging(),
                frame: self.frame,
            };
            self.manipulation.update(self.controllers.values_mut(), &mut ctx)
        };
        let mut committed = 0;
        for commit in commits {
            if self.rules.record(commit) {
                committed += 1;
            }
        }

        let in_appliance = self.observe_appliance();
        self.rules.author(&in_appliance, &mut self.store, &mut self.lists);

        let mut replayed = 0;
        if self.playing {
            self.simulation_time += dt;
            self.step_accumulator += dt;
            if self.step_accumulator >= self.rule_step {
                self.step_accumulator %= self.rule_step.max(f32::EPSILON);
                let excluded: HashSet<EntityId> = in_appliance.iter().map(|o| o.id).collect();
                replayed = self.rules.replay(
                    ListId::World,
                    &excluded,
                    &mut self.store,
                    &mut self.lists,
                    self.frame,
                );
                if replayed > 0 {
                    debug!("Frame {}: replayed {} rule actions", self.frame, replayed);
                }
            }
        }

        TickOutput {
            frame: self.frame,
            committed,
            replayed,
        }
    }

    fn apply_inputs(&mut self, inputs: &[PeerInput]) {
        for input in inputs {
            for hand in 0..HANDS_PER_AVATAR {
                let id = controller_id(input.peer, hand);
                let controller = self.controllers.entry(id).or_insert_with(|| {
                    debug!("New controller {} for peer {}", id, input.peer);
                    Controller::new(id)
                });
                match &input.avatar {
                    Some(avatar) => controller.apply_input(&avatar.hands[hand]),
                    None => controller.hold(),
                }
                controller.ignore = input.ignore;
            }
        }
    }

    /// Clock and appliance buttons consume the grab edge that hit them.
    fn process_buttons(&mut self) {
        let mut presses = Vec::new();
        for controller in self.controllers.values_mut() {
            if controller.ignore || !controller.grab.rising() {
                continue;
            }
            if let Some(press) = pressed_fixture(
                controller,
                &self.store,
                &self.lists,
                self.clock,
                &self.buttons,
            ) {
                controller.grab.consume();
                presses.push((controller.id, press));
            }
        }

        for (controller, press) in presses {
            let frame = self.frame;
            let changed = match press {
                ButtonPress::Clock => {
                    self.playing = !self.playing;
                    true
                }
                ButtonPress::Undo => self.rules.undo(&mut self.store, &mut self.lists, frame),
                ButtonPress::Redo => self.rules.redo(&mut self.store, &mut self.lists, frame),
                ButtonPress::Clear => self.rules.clear(&mut self.store, &mut self.lists, frame),
            };
            info!(
                "Controller {} pressed {:?} (changed: {}, playing: {})",
                controller, press, changed, self.playing
            );
        }
    }

    /// Visible world entities overlapping the appliance that nobody holds.
    fn observe_appliance(&self) -> Vec<Observed> {
        let Some(appliance) = self.store.live(self.appliance) else {
            return Vec::new();
        };
        let (Some(pose), Some(radius)) = (self.fixture_pose(self.appliance), appliance.radius()) else {
            return Vec::new();
        };
        let held: HashSet<EntityId> = self.manipulation.held_entities().collect();

        observe(&self.lists.world, &self.store)
            .into_iter()
            .filter(|o| !held.contains(&o.id))
            .filter(|o| self.store.get(o.id).map_or(false, |e| e.visible))
            .filter(|o| spheres_overlap(pose.position, radius, o.position, o.radius))
            .collect()
    }

    /// Records a broadcast that went out.
    pub fn note_frame_sent(&mut self) {
        self.stats.sent += 1;
    }

    /// Records a broadcast skipped because the previous one was still
    /// flushing; logs the backlog at most once per interval.
    pub fn note_frame_dropped(&mut self) {
        self.stats.dropped += 1;
        self.stats.dropped_since_report += 1;
        if self.frame.saturating_sub(self.stats.last_report_frame) >= DROP_REPORT_INTERVAL {
            warn!(
                "Dropped {} broadcast frames in the last {} ticks ({} total)",
                self.stats.dropped_since_report,
                self.frame - self.stats.last_report_frame,
                self.stats.dropped
            );
            self.stats.dropped_since_report = 0;
            self.stats.last_report_frame = self.frame;
        }
    }

    /// Restores transient state after a snapshot load.
    pub fn reset_transient(&mut self) {
        self.controllers.clear();
        self.manipulation = ManipulationEngine::new();
        self.stats = FrameStats::default();
        for entity in self.store.iter_mut() {
            entity.gizmo = GizmoFlags::NONE;
        }
    }
}

fn spawn_default(store: &mut EntityStore, list: &mut EntityList, kind: EntityKind, pose: Pose) -> EntityId {
    let id = store.spawn(pose, Vec3::splat(0.1), kind.default_tint(), kind);
    list.push(id);
    id
}

fn pressed_fixture(
    controller: &Controller,
    store: &EntityStore,
    lists: &ListSet,
    clock: EntityId,
    buttons: &ApplianceButtons,
) -> Option<ButtonPress> {
    let touches = |list: &EntityList, id: EntityId| {
        let (Some(entity), Some(pose)) = (store.live(id), list.world_pose(store, id)) else {
            return false;
        };
        entity.radius().map_or(false, |r| {
            spheres_overlap(controller.pose.position, controller.radius, pose.position, r)
        })
    };

    if touches(&lists.fixtures, clock) {
        return Some(ButtonPress::Clock);
    }
    [
        (buttons.undo, ButtonPress::Undo),
        (buttons.redo, ButtonPress::Redo),
        (buttons.clear, ButtonPress::Clear),
    ]
    .into_iter()
    .find(|(id, _)| touches(&lists.buttons, *id))
    .map(|(_, press)| press)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::HandInput;

    const DT: f32 = 1.0 / TICK_RATE as f32;

    fn hand_at(position: Vec3, grab: bool) -> PeerInput {
        let mut avatar = AvatarInput::default();
        avatar.hands[0] = HandInput {
            pose: Pose::at(position),
            grab,
            action: false,
        };
        avatar.hands[1].pose = Pose::at(Vec3::new(0.0, -5.0, 0.0));
        PeerInput {
            peer: 1,
            avatar: Some(avatar),
            ignore: false,
        }
    }

    fn idle() -> PeerInput {
        PeerInput {
            peer: 1,
            avatar: None,
            ignore: false,
        }
    }

    fn world_pos(world: &WorldState, id: EntityId) -> Vec3 {
        world.lists.world.world_pose(&world.store, id).unwrap().position
    }

    #[test]
    fn test_initial_scene() {
        let world = WorldState::initial_state();
        assert_eq!(world.lists.world.members.len(), 4);
        assert_eq!(world.lists.shelf.members.len(), EntityKind::PLACEABLE.len());
        assert_eq!(world.lists.buttons.members.len(), 3);
        assert_eq!(world.lists.fixtures.members.len(), 2);
        assert!(world.playing);
        assert!(world.rules.current.is_none());
        assert_eq!(world.store.get(world.appliance).unwrap().kind, EntityKind::APPLIANCE);
    }

    #[test]
    fn test_grab_and_drag_world_entity() {
        let mut world = WorldState::initial_state();
        let cube = world.lists.world.members[0];
        let start = world_pos(&world, cube);

        world.tick(&[hand_at(start, true)], DT);
        let controller = controller_id(1, 0);
        assert_eq!(world.manipulation().alteration_for(controller).unwrap().entity, cube);

        let target = start + Vec3::new(0.0, 0.3, 0.4);
        for step in 1..=10 {
            let t = step as f32 / 10.0;
            world.tick(&[hand_at(start + (target - start) * t, true)], DT);
        }
        let out = world.tick(&[hand_at(target, false)], DT);

        assert_eq!(out.committed, 0);
        assert!(world.manipulation().alterations().is_empty());
        let end = world_pos(&world, cube);
        assert_approx_eq!(end.y, target.y, 1e-4);
        assert_approx_eq!(end.z, target.z, 1e-4);
    }

    #[test]
    fn test_clock_press_toggles_playing_without_grabbing() {
        let mut world = WorldState::initial_state();
        let clock = world.fixture_pose(world.clock).unwrap().position;

        world.tick(&[hand_at(clock, true)], DT);
        assert!(!world.playing);
        assert!(world.manipulation().alterations().is_empty());

        let time = world.simulation_time;
        world.tick(&[hand_at(clock, true)], DT);
        assert!(!world.playing);
        assert_eq!(world.simulation_time, time);

        world.tick(&[hand_at(clock, false)], DT);
        world.tick(&[hand_at(clock, true)], DT);
        assert!(world.playing);
    }

    #[test]
    fn test_demonstrated_rule_replays_on_world() {
        let mut world = WorldState::initial_state();
        let appliance = world.fixture_pose(world.appliance).unwrap().position;
        let demo_cube = world.lists.world.members[0];
        let other_cube = world.lists.world.members[1];
        let sphere = world.lists.world.members[2];
        world.store.get_mut(demo_cube).unwrap().pose = Pose::at(appliance);

        world.tick(&[idle()], DT);
        assert_eq!(world.rules.rules.len(), 1);
        let staging = world.rules.active_staging().unwrap();
        let staged = world.lists.get(staging).unwrap().members[0];
        let staged_at = world.lists.get(staging).unwrap().world_pose(&world.store, staged).unwrap().position;
        assert!(world.store.get(staged).unwrap().visible);

        world.tick(&[hand_at(staged_at, true)], DT);
        world.tick(&[hand_at(staged_at + Vec3::new(0.2, 0.0, 0.0), true)], DT);
        let out = world.tick(&[hand_at(staged_at + Vec3::new(0.2, 0.0, 0.0), false)], DT);
        assert_eq!(out.committed, 1);
        assert_eq!(world.rules.current_rule().unwrap().cursor, 1);

        let before = world_pos(&world, other_cube);
        let sphere_before = world_pos(&world, sphere);
        let mut replayed = 0;
        for _ in 0..100 {
            replayed += world.tick(&[idle()], DT).replayed;
        }
        assert_eq!(replayed, 1);
        assert_approx_eq!(world_pos(&world, other_cube).x, before.x + 0.2, 1e-4);
        assert_approx_eq!(world_pos(&world, sphere).x, sphere_before.x, 1e-6);
        assert_approx_eq!(world_pos(&world, demo_cube).x, appliance.x, 1e-6);
    }

    #[test]
    fn test_undo_button_rewinds_current_rule() {
        let mut world = WorldState::initial_state();
        let appliance = world.fixture_pose(world.appliance).unwrap().position;
        let demo_cube = world.lists.world.members[0];
        world.store.get_mut(demo_cube).unwrap().pose = Pose::at(appliance);
        world.tick(&[idle()], DT);

        let staging = world.rules.active_staging().unwrap();
        let staged = world.lists.get(staging).unwrap().members[0];
        let at = world.lists.get(staging).unwrap().world_pose(&world.store, staged).unwrap().position;
        world.tick(&[hand_at(at, true)], DT);
        world.tick(&[hand_at(at + Vec3::new(0.0, 0.1, 0.0), false)], DT);
        assert_eq!(world.rules.current_rule().unwrap().cursor, 1);

        let undo = world.lists.buttons.world_pose(&world.store, world.buttons.undo).unwrap().position;
        world.tick(&[hand_at(undo, true)], DT);
        assert_eq!(world.rules.current_rule().unwrap().cursor, 0);
        let list = world.lists.get(staging).unwrap();
        let rebuilt = list.live(&world.store).next().unwrap();
        assert_approx_eq!(list.to_world(&rebuilt.pose).position.y, at.y, 1e-5);
    }

    #[test]
    fn test_remove_peer_drops_controllers() {
        let mut world = WorldState::initial_state();
        let cube = world.lists.world.members[0];
        world.tick(&[hand_at(world_pos(&world, cube), true)], DT);
        assert_eq!(world.peer_controllers(1).count(), 2);

        world.remove_peer(1);
        assert_eq!(world.peer_controllers(1).count(), 0);
        assert!(world.manipulation().alterations().is_empty());
    }

    #[test]
    fn test_ignored_peer_cannot_grab() {
        let mut world = WorldState::initial_state();
        let cube = world.lists.world.members[0];
        let mut input = hand_at(world_pos(&world, cube), true);
        input.ignore = true;
        world.tick(&[input], DT);
        assert!(world.manipulation().alterations().is_empty());
    }

    #[test]
    fn test_dropped_frames_are_counted() {
        let mut world = WorldState::initial_state();
        world.note_frame_sent();
        world.note_frame_dropped();
        world.note_frame_dropped();
        assert_eq!(world.stats.sent, 1);
        assert_eq!(world.stats.dropped, 2);
    }
}
