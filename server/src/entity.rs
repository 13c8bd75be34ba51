//! Entity records, the id-addressed arena that owns them, and the lists
//! that group them under a shared parent-relative offset.
//!
//! Ids are indices into the arena and are never reused. Deleting an entity
//! only sets its tombstone, so rule and manipulation code holding an id can
//! never end up pointing at a different object.

use crate::sync::AVATAR_OBJECT_BASE;
use log::warn;
use serde::{Deserialize, Serialize};
use shared::{Color, GizmoFlags, Pose, Vec3};

pub type EntityId = u32;

/// Model/object type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKind(pub u16);

impl EntityKind {
    pub const CUBE: EntityKind = EntityKind(1);
    pub const SPHERE: EntityKind = EntityKind(2);
    pub const CYLINDER: EntityKind = EntityKind(3);
    pub const CONE: EntityKind = EntityKind(4);
    pub const BUTTON: EntityKind = EntityKind(10);
    pub const CLOCK: EntityKind = EntityKind(11);
    pub const APPLIANCE: EntityKind = EntityKind(12);

    /// Kinds that can be placed on the template shelf and manipulated.
    pub const PLACEABLE: [EntityKind; 4] = [
        EntityKind::CUBE,
        EntityKind::SPHERE,
        EntityKind::CYLINDER,
        EntityKind::CONE,
    ];

    pub fn default_radius(self) -> f32 {
        match self {
            EntityKind::BUTTON => 0.03,
            EntityKind::CLOCK => 0.08,
            EntityKind::APPLIANCE => 0.25,
            _ => 0.05,
        }
    }

    pub fn default_tint(self) -> Color {
        match self {
            EntityKind::CUBE => [220, 80, 60, 255],
            EntityKind::SPHERE => [70, 130, 220, 255],
            EntityKind::CYLINDER => [90, 190, 100, 255],
            EntityKind::CONE => [230, 190, 60, 255],
            EntityKind::APPLIANCE => [160, 160, 170, 96],
            _ => [200, 200, 200, 255],
        }
    }
}

/// Interaction volume, centred on the entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type")]
pub enum Volume {
    None,
    Sphere { radius: f32 },
}

impl Volume {
    pub fn radius(&self) -> Option<f32> {
        match self {
            Volume::None => None,
            Volume::Sphere { radius } => Some(*radius),
        }
    }
}

/// Sum-of-radii overlap test between two spheres.
pub fn spheres_overlap(a: Vec3, radius_a: f32, b: Vec3, radius_b: f32) -> bool {
    let reach = radius_a + radius_b;
    a.distance_squared(b) < reach * reach
}

pub fn point_in_sphere(point: Vec3, center: Vec3, radius: f32) -> bool {
    point.distance_squared(center) < radius * radius
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Pose relative to the owning list's offset (or to the parent entity).
    pub pose: Pose,
    pub scale: Vec3,
    pub tint: Color,
    pub visible: bool,
    pub deleted: bool,
    /// Frame the tombstone was set on.
    pub deleted_at: Option<u64>,
    pub gizmo: GizmoFlags,
    pub volume: Volume,
    pub children: Vec<EntityId>,
}

impl Entity {
    /// Eligible for spatial queries, interaction and outgoing sync.
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    pub fn radius(&self) -> Option<f32> {
        self.volume.radius()
    }
}

/// Arena owning every entity ever created.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EntityStore {
    entities: Vec<Entity>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next spawn or clone will receive.
    fn next_id(&self) -> EntityId {
        let id = self.entities.len() as EntityId;
        if id == EntityId::from(AVATAR_OBJECT_BASE) {
            warn!(
                "Entity ids reached {:#x}; newer entities will not be replicated",
                AVATAR_OBJECT_BASE
            );
        }
        id
    }

    pub fn spawn(&mut self, pose: Pose, scale: Vec3, tint: Color, kind: EntityKind) -> EntityId {
        let id = self.next_id();
        self.entities.push(Entity {
            id,
            kind,
            pose,
            scale,
            tint,
            visible: true,
            deleted: false,
            deleted_at: None,
            gizmo: GizmoFlags::NONE,
            volume: Volume::Sphere {
                radius: kind.default_radius(),
            },
            children: Vec::new(),
        });
        id
    }

    /// Deep copy under a fresh id. Children are cloned recursively; transient
    /// state (gizmo highlight) is not carried over.
    pub fn clone_entity(&mut self, id: EntityId) -> Option<EntityId> {
        let source = self.get(id)?.clone();
        let children: Vec<EntityId> = source
            .children
            .iter()
            .filter_map(|child| self.clone_entity(*child))
            .collect();

        let new_id = self.next_id();
        self.entities.push(Entity {
            id: new_id,
            gizmo: GizmoFlags::NONE,
            children,
            ..source
        });
        Some(new_id)
    }

    /// Tombstones the entity and its children. The id stays allocated.
    pub fn delete(&mut self, id: EntityId, frame: u64) {
        let children = match self.get_mut(id) {
            Some(entity) if !entity.deleted => {
                entity.deleted = true;
                entity.deleted_at = Some(frame);
                entity.gizmo = GizmoFlags::NONE;
                entity.children.clone()
            }
            _ => return,
        };
        for child in children {
            self.delete(child, frame);
        }
    }

    pub fn add_child(&mut self, parent: EntityId, child: EntityId) {
        if let Some(entity) = self.get_mut(parent) {
            entity.children.push(child);
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id as usize)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id as usize)
    }

    /// The entity, unless it is tombstoned.
    pub fn live(&self, id: EntityId) -> Option<&Entity> {
        self.get(id).filter(|e| e.is_live())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.iter_mut()
    }
}

/// Names every list the world keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "_type")]
pub enum ListId {
    World,
    Shelf,
    Buttons,
    Fixtures,
    Rule { index: usize },
}

/// Ordered entity ids sharing one parent-relative offset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityList {
    pub offset: Pose,
    pub members: Vec<EntityId>,
}

impl EntityList {
    pub fn with_offset(offset: Pose) -> Self {
        Self {
            offset,
            members: Vec::new(),
        }
    }

    pub fn push(&mut self, id: EntityId) {
        self.members.push(id);
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.members.contains(&id)
    }

    /// Position of `id` in the list, used as its slot index.
    pub fn slot_of(&self, id: EntityId) -> Option<usize> {
        self.members.iter().position(|m| *m == id)
    }

    pub fn to_world(&self, local: &Pose) -> Pose {
        local.apply_offset(&self.offset)
    }

    pub fn to_local(&self, world: &Pose) -> Pose {
        world.apply_inverse_offset(&self.offset)
    }

    /// World pose of a member.
    pub fn world_pose(&self, store: &EntityStore, id: EntityId) -> Option<Pose> {
        store.get(id).map(|e| self.to_world(&e.pose))
    }

    /// Members that are not tombstoned, in list order.
    pub fn live<'a>(&'a self, store: &'a EntityStore) -> impl Iterator<Item = &'a Entity> + 'a {
        self.members.iter().filter_map(move |id| store.live(*id))
    }

    pub fn set_visible(&self, store: &mut EntityStore, visible: bool) {
        for id in &self.members {
            if let Some(entity) = store.get_mut(*id) {
                entity.visible = visible;
            }
        }
    }
}

/// All lists of the world, addressed by [`ListId`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSet {
    pub world: EntityList,
    pub shelf: EntityList,
    pub buttons: EntityList,
    pub fixtures: EntityList,
    pub rules: Vec<EntityList>,
}

impl ListSet {
    pub fn get(&self, id: ListId) -> Option<&EntityList> {
        match id {
            ListId::World => Some(&self.world),
            ListId::Shelf => Some(&self.shelf),
            ListId::Buttons => Some(&self.buttons),
            ListId::Fixtures => Some(&self.fixtures),
            ListId::Rule { index } => self.rules.get(index),
        }
    }

    pub fn get_mut(&mut self, id: ListId) -> Option<&mut EntityList> {
        match id {
            ListId::World => Some(&mut self.world),
            ListId::Shelf => Some(&mut self.shelf),
            ListId::Buttons => Some(&mut self.buttons),
            ListId::Fixtures => Some(&mut self.fixtures),
            ListId::Rule { index } => self.rules.get_mut(index),
        }
    }

    /// Every list paired with its id, rule lists last.
    pub fn iter(&self) -> impl Iterator<Item = (ListId, &EntityList)> {
        [
            (ListId::World, &self.world),
            (ListId::Shelf, &self.shelf),
            (ListId::Buttons, &self.buttons),
            (ListId::Fixtures, &self.fixtures),
        ]
        .into_iter()
        .chain(
            self.rules
                .iter()
                .enumerate()
                .map(|(index, list)| (ListId::Rule { index }, list)),
        )
    }
}
