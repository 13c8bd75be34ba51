//! Controller-driven manipulation of entities
//!
//! Each controller is either idle or owns exactly one [`Alteration`], an
//! in-progress edit of one entity. A grab-button press while the controller
//! overlaps an eligible entity starts one; the entity then tracks the
//! controller (optionally constrained to one gizmo axis or ring) until the
//! button is released, at which point the alteration becomes a replayable
//! [`Action`]. Actions are only kept when the edited entity belongs to the
//! staging list of the rule currently being demonstrated.

use crate::controller::{Controller, ControllerId};
use crate::entity::{EntityId, EntityKind, EntityStore, ListId, ListSet};
use crate::spatial::SpatialHash;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use shared::{Attachment, GizmoFlags, Pose, Quat, Vec3};

/// Distance from the entity centre to an axis handle tip.
pub const GIZMO_AXIS_LENGTH: f32 = 0.12;
/// Radius of the rotation rings.
pub const GIZMO_RING_RADIUS: f32 = 0.09;
/// How close the controller must be to a handle to pick it.
pub const GIZMO_HIT_RADIUS: f32 = 0.02;

const HASH_CELL_SIZE: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn unit(self) -> Vec3 {
        match self {
            Axis::X => Vec3::X,
            Axis::Y => Vec3::Y,
            Axis::Z => Vec3::Z,
        }
    }
}

/// How a Move alteration maps controller motion onto the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Full 6-DoF follow.
    Free,
    /// Translation along one entity-local axis only.
    Axis(Axis),
    /// Rotation in the plane orthogonal to one entity-local axis only.
    Ring(Axis),
}

impl Constraint {
    pub fn gizmo_flags(self) -> GizmoFlags {
        match self {
            Constraint::Free => GizmoFlags::NONE,
            Constraint::Axis(Axis::X) => GizmoFlags::X_AXIS,
            Constraint::Axis(Axis::Y) => GizmoFlags::Y_AXIS,
            Constraint::Axis(Axis::Z) => GizmoFlags::Z_AXIS,
            Constraint::Ring(Axis::X) => GizmoFlags::X_RING,
            Constraint::Ring(Axis::Y) => GizmoFlags::Y_RING,
            Constraint::Ring(Axis::Z) => GizmoFlags::Z_RING,
        }
    }
}

/// Picks the gizmo handle under `point`, axis tips before rings.
pub fn hit_test_gizmo(entity_world: &Pose, point: Vec3) -> Constraint {
    let local = entity_world
        .rotation
        .conjugate()
        .rotate(point - entity_world.position);
    let hit_sq = GIZMO_HIT_RADIUS * GIZMO_HIT_RADIUS;

    for axis in Axis::ALL {
        if local.distance_squared(axis.unit() * GIZMO_AXIS_LENGTH) < hit_sq {
            return Constraint::Axis(axis);
        }
    }

    for axis in Axis::ALL {
        let u = axis.unit();
        let along = local.dot(u);
        let radial = local.project_on_plane(u).length() - GIZMO_RING_RADIUS;
        if radial * radial + along * along < hit_sq {
            return Constraint::Ring(axis);
        }
    }

    Constraint::Free
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlterationKind {
    Move { constraint: Constraint },
    /// Re-poses a fresh clone of `source`.
    Duplicate { source: EntityId },
    Delete,
}

/// In-progress, controller-owned edit of one entity.
#[derive(Debug, Clone)]
pub struct Alteration {
    pub controller: ControllerId,
    pub list: ListId,
    pub entity: EntityId,
    pub kind: AlterationKind,
    /// Entity pose in the controller's frame at grab time.
    pub grab_offset: Pose,
    pub grab_controller: Pose,
    pub start_world: Pose,
    /// Local pose the recorded delta is measured from (the source's pose for
    /// duplicates).
    pub start_local: Pose,
    /// Index of the edited (or duplicated) entity within its list.
    pub slot: usize,
    pub slot_kind: EntityKind,
    /// Cleared when another alteration claims the same entity.
    pub valid: bool,
}

/// Durable, replayable record of a finished alteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type")]
pub enum Action {
    MoveBy { delta: Pose },
    Duplicate { delta: Pose },
    Delete,
}

/// Staged entity an action was demonstrated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub index: usize,
    pub kind: EntityKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordedAction {
    pub target: Slot,
    pub action: Action,
}

/// An action committed against the active rule's staging list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Commit {
    pub list: ListId,
    pub action: RecordedAction,
}

/// What the engine may touch during one update.
pub struct ManipulationContext<'a> {
    pub store: &'a mut EntityStore,
    pub lists: &'a mut ListSet,
    /// Staging list of the rule currently being demonstrated.
    pub active_rule: Option<ListId>,
    pub frame: u64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    order: usize,
    list: ListId,
    entity: EntityId,
    radius: f32,
    world: Pose,
}

#[derive(Debug)]
pub struct ManipulationEngine {
    alterations: Vec<Alteration>,
    hash: SpatialHash<Candidate>,
    max_radius: f32,
}

impl Default for ManipulationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ManipulationEngine {
    pub fn new() -> Self {
        Self {
            alterations: Vec::new(),
            hash: SpatialHash::new(HASH_CELL_SIZE),
            max_radius: 0.0,
        }
    }

    pub fn alterations(&self) -> &[Alteration] {
        &self.alterations
    }

    pub fn alteration_for(&self, controller: ControllerId) -> Option<&Alteration> {
        self.alterations.iter().find(|a| a.controller == controller)
    }

    /// Entities currently held by some controller.
    pub fn held_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.alterations.iter().filter(|a| a.valid).map(|a| a.entity)
    }

    /// Discards a controller's alteration without recording anything.
    pub fn drop_controller(&mut self, controller: ControllerId, store: &mut EntityStore) {
        if let Some(index) = self.index_of(controller) {
            let alteration = self.alterations.remove(index);
            self.clear_gizmo(&alteration, store);
        }
    }

    fn index_of(&self, controller: ControllerId) -> Option<usize> {
        self.alterations
            .iter()
            .position(|a| a.controller == controller)
    }

    /// Runs one tick of the per-controller state machine and returns the
    /// actions committed to the active rule.
    pub fn update<'c>(
        &mut self,
        controllers: impl IntoIterator<Item = &'c mut Controller>,
        ctx: &mut ManipulationContext<'_>,
    ) -> Vec<Commit> {
        self.rebuild_hash(ctx);

        let mut commits = Vec::new();
        for controller in controllers {
            if controller.ignore {
                self.drop_controller(controller.id, ctx.store);
                continue;
            }

            if controller.cycle_attachment() {
                debug!(
                    "Controller {} attachment -> {:?}",
                    controller.id, controller.attachment
                );
            }

            if let Some(index) = self.index_of(controller.id) {
                if let Some(commit) = self.continue_alteration(index, controller, ctx) {
                    commits.push(commit);
                }
            } else if controller.grab.rising() && controller.attachment != Attachment::None {
                self.begin(controller, ctx);
            }
        }
        commits
    }

    fn continue_alteration(
        &mut self,
        index: usize,
        controller: &Controller,
        ctx: &mut ManipulationContext<'_>,
    ) -> Option<Commit> {
        let alteration = &self.alterations[index];

        if !alteration.valid || ctx.store.live(alteration.entity).is_none() {
            let stale = self.alterations.remove(index);
            debug!(
                "Controller {} lost entity {}",
                stale.controller, stale.entity
            );
            if !self.alterations.iter().any(|a| a.entity == stale.entity) {
                self.clear_gizmo(&stale, ctx.store);
            }
            return None;
        }

        if !controller.grab.current {
            let finished = self.alterations.remove(index);
            return self.commit(finished, ctx);
        }

        self.track(index, controller, ctx);
        None
    }

    fn rebuild_hash(&mut self, ctx: &ManipulationContext<'_>) {
        self.hash.clear();
        self.max_radius = 0.0;

        let mut searchable = vec![ListId::World];
        searchable.extend(ctx.active_rule);
        searchable.push(ListId::Shelf);

        let mut order = 0;
        for list_id in searchable {
            let Some(list) = ctx.lists.get(list_id) else {
                continue;
            };
            for entity in list.live(ctx.store) {
                let Some(radius) = entity.radius() else {
                    continue;
                };
                if !entity.visible {
                    continue;
                }
                let world = list.to_world(&entity.pose);
                self.hash.insert(
                    world.position,
                    Candidate {
                        order,
                        list: list_id,
                        entity: entity.id,
                        radius,
                        world,
                    },
                );
                self.max_radius = self.max_radius.max(radius);
                order += 1;
            }
        }
    }

    /// Nearest overlapping entity by squared distance, ties broken by scan order.
    fn nearest(&self, controller: &Controller, allow_shelf: bool) -> Option<Candidate> {
        let center = controller.pose.position;
        self.hash
            .query(center, controller.radius + self.max_radius)
            .into_iter()
            .map(|(position, candidate)| (center.distance_squared(position), candidate))
            .filter(|(dist_sq, candidate)| {
                let reach = controller.radius + candidate.radius;
                *dist_sq < reach * reach && (allow_shelf || candidate.list != ListId::Shelf)
            })
            .min_by(|(da, a), (db, b)| da.total_cmp(db).then(a.order.cmp(&b.order)))
            .map(|(_, candidate)| candidate)
    }

    fn begin(&mut self, controller: &Controller, ctx: &mut ManipulationContext<'_>) {
        let allow_shelf = controller.attachment != Attachment::Delete;
        let Some(hit) = self.nearest(controller, allow_shelf) else {
            return;
        };

        // Shelf items are templates: touching one pulls a copy into the world.
        let (list, entity, source_local) = if hit.list == ListId::Shelf {
            let Some(copy) = ctx.store.clone_entity(hit.entity) else {
                return;
            };
            let local = ctx.lists.world.to_local(&hit.world);
            if let Some(e) = ctx.store.get_mut(copy) {
                e.pose = local;
                e.visible = true;
            }
            ctx.lists.world.push(copy);
            info!(
                "Controller {} took template {} as entity {}",
                controller.id, hit.entity, copy
            );
            (ListId::World, copy, local)
        } else {
            let Some(e) = ctx.store.get(hit.entity) else {
                return;
            };
            (hit.list, hit.entity, e.pose)
        };

        let (kind, target) = match controller.attachment {
            Attachment::Grab | Attachment::None => {
                let constraint = if hit.list == ListId::Shelf {
                    Constraint::Free
                } else {
                    hit_test_gizmo(&hit.world, controller.pose.position)
                };
                (AlterationKind::Move { constraint }, entity)
            }
            Attachment::Delete => (AlterationKind::Delete, entity),
            Attachment::Duplicate if hit.list == ListId::Shelf => {
                // The copy pulled from the shelf is already the duplicate.
                (
                    AlterationKind::Move {
                        constraint: Constraint::Free,
                    },
                    entity,
                )
            }
            Attachment::Duplicate => {
                let Some(copy) = ctx.store.clone_entity(entity) else {
                    return;
                };
                if let Some(list) = ctx.lists.get_mut(list) {
                    list.push(copy);
                }
                (AlterationKind::Duplicate { source: entity }, copy)
            }
        };

        let Some(list_ref) = ctx.lists.get(list) else {
            return;
        };
        let slot = list_ref.slot_of(entity).unwrap_or(0);
        let Some(target_entity) = ctx.store.get(target) else {
            return;
        };
        let slot_kind = target_entity.kind;
        let start_world = list_ref.to_world(&target_entity.pose);

        // Last claim wins: an older alteration of the same entity is dropped.
        for other in self.alterations.iter_mut().filter(|a| a.entity == target) {
            info!(
                "Controller {} takes entity {} from controller {}",
                controller.id, target, other.controller
            );
            other.valid = false;
        }

        if let AlterationKind::Move { constraint } = kind {
            if let Some(e) = ctx.store.get_mut(target) {
                e.gizmo = constraint.gizmo_flags();
            }
        }

        debug!(
            "Controller {} begins {:?} on entity {} in {:?}",
            controller.id, kind, target, list
        );
        self.alterations.push(Alteration {
            controller: controller.id,
            list,
            entity: target,
            kind,
            grab_offset: start_world.apply_inverse_offset(&controller.pose),
            grab_controller: controller.pose,
            start_world,
            start_local: source_local,
            slot,
            slot_kind,
            valid: true,
        });
    }

    fn track(&mut self, index: usize, controller: &Controller, ctx: &mut ManipulationContext<'_>) {
        let alteration = &self.alterations[index];
        let target_world = match alteration.kind {
            AlterationKind::Delete => return,
            AlterationKind::Duplicate { .. } => alteration.grab_offset.apply_offset(&controller.pose),
            AlterationKind::Move { constraint } => {
                constrained_pose(alteration, constraint, &controller.pose)
            }
        };

        let Some(list) = ctx.lists.get(alteration.list) else {
            return;
        };
        let local = list.to_local(&target_world);
        if let Some(e) = ctx.store.get_mut(alteration.entity) {
            e.pose = local;
        }
    }

    fn commit(&mut self, alteration: Alteration, ctx: &mut ManipulationContext<'_>) -> Option<Commit> {
        self.clear_gizmo(&alteration, ctx.store);

        let end_local = ctx.store.get(alteration.entity)?.pose;
        let action = match alteration.kind {
            AlterationKind::Move { .. } => Action::MoveBy {
                delta: end_local.delta_from(&alteration.start_local),
            },
            AlterationKind::Duplicate { .. } => Action::Duplicate {
                delta: end_local.delta_from(&alteration.start_local),
            },
            AlterationKind::Delete => {
                ctx.store.delete(alteration.entity, ctx.frame);
                Action::Delete
            }
        };
        debug!(
            "Controller {} released entity {}: {:?}",
            alteration.controller, alteration.entity, action
        );

        if Some(alteration.list) != ctx.active_rule {
            return None;
        }
        Some(Commit {
            list: alteration.list,
            action: RecordedAction {
                target: Slot {
                    index: alteration.slot,
                    kind: alteration.slot_kind,
                },
                action,
            },
        })
    }

    fn clear_gizmo(&self, alteration: &Alteration, store: &mut EntityStore) {
        if let Some(e) = store.get_mut(alteration.entity) {
            e.gizmo = GizmoFlags::NONE;
        }
    }
}

fn constrained_pose(alteration: &Alteration, constraint: Constraint, controller: &Pose) -> Pose {
    let start = alteration.start_world;
    match constraint {
        Constraint::Free => alteration.grab_offset.apply_offset(controller),
        Constraint::Axis(axis) => {
            let dir = start.rotation.rotate(axis.unit());
            let moved = controller.position - alteration.grab_controller.position;
            Pose::new(start.position + dir * moved.dot(dir), start.rotation)
        }
        Constraint::Ring(axis) => {
            let normal = start.rotation.rotate(axis.unit());
            let from = (alteration.grab_controller.position - start.position).project_on_plane(normal);
            let to = (controller.position - start.position).project_on_plane(normal);
            let turn = Quat::rotation_between(from, to);
            Pose::new(start.position, (turn * start.rotation).normalize())
        }
    }
}
