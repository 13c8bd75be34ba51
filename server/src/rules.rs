//! Demonstration-learned rules
//!
//! A rule is authored by placing objects in the appliance: the observed
//! configuration becomes a set of conditions, and manipulations performed on
//! the rule's staged copies are recorded as actions. Whenever the world later
//! contains a configuration satisfying the conditions, the actions are
//! replayed against the matching entities.
//!
//! Entities inside a rule are addressed by slot index (their position in the
//! staging list) and resolved against live entities at replay time.

use crate::entity::{
    spheres_overlap, EntityId, EntityKind, EntityList, EntityStore, ListId, ListSet, Volume,
};
use crate::manipulation::{Action, Commit, RecordedAction};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shared::{Color, Pose, Quat, Vec3};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_type")]
pub enum Condition {
    /// One entity of this kind must exist.
    Present { kind: EntityKind },
    /// One entity of each kind must overlap the other.
    Intersect { a: EntityKind, b: EntityKind },
}

/// Order-independent combination of two kinds.
pub fn canonical_pair_hash(a: EntityKind, b: EntityKind) -> u32 {
    ((a.0.max(b.0) as u32) << 16) ^ (a.0.min(b.0) as u32)
}

/// A live entity as seen by the matcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observed {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec3,
    pub rotation: Quat,
    pub radius: f32,
}

impl Observed {
    fn overlaps(&self, other: &Observed) -> bool {
        spheres_overlap(self.position, self.radius, other.position, other.radius)
    }
}

/// Conditions describing `observed` exactly: one Present per entity and one
/// Intersect per overlapping pair.
pub fn synthesize_conditions(observed: &[Observed]) -> Vec<Condition> {
    let mut conditions: Vec<Condition> = observed
        .iter()
        .map(|o| Condition::Present { kind: o.kind })
        .collect();

    for (i, a) in observed.iter().enumerate() {
        for b in &observed[i + 1..] {
            if a.overlaps(b) {
                conditions.push(Condition::Intersect { a: a.kind, b: b.kind });
            }
        }
    }
    conditions
}

/// Exact multiset match of `observed` against `conditions`.
pub fn matches(conditions: &[Condition], observed: &[Observed]) -> bool {
    let mut present: HashMap<EntityKind, i32> = HashMap::new();
    let mut intersect: HashMap<u32, i32> = HashMap::new();
    for condition in conditions {
        match *condition {
            Condition::Present { kind } => *present.entry(kind).or_default() += 1,
            Condition::Intersect { a, b } => {
                *intersect.entry(canonical_pair_hash(a, b)).or_default() += 1
            }
        }
    }

    for o in observed {
        match present.get_mut(&o.kind) {
            Some(count) if *count > 0 => *count -= 1,
            _ => return false,
        }
    }

    for (i, a) in observed.iter().enumerate() {
        for b in &observed[i + 1..] {
            if !a.overlaps(b) {
                continue;
            }
            match intersect.get_mut(&canonical_pair_hash(a.kind, b.kind)) {
                Some(count) if *count > 0 => *count -= 1,
                _ => return false,
            }
        }
    }

    present.values().all(|c| *c == 0) && intersect.values().all(|c| *c == 0)
}

/// Condition layouts the replayer knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleShape {
    Single { kind: EntityKind },
    Pair { a: EntityKind, b: EntityKind },
    Unsupported,
}

impl RuleShape {
    pub fn of(conditions: &[Condition]) -> RuleShape {
        let mut present = Vec::new();
        let mut intersect = Vec::new();
        for condition in conditions {
            match *condition {
                Condition::Present { kind } => present.push(kind),
                Condition::Intersect { a, b } => intersect.push((a, b)),
            }
        }

        match (present.as_slice(), intersect.as_slice()) {
            ([kind], []) => RuleShape::Single { kind: *kind },
            ([p, q], [(a, b)])
                if canonical_pair_hash(*p, *q) == canonical_pair_hash(*a, *b) =>
            {
                RuleShape::Pair { a: *p, b: *q }
            }
            _ => RuleShape::Unsupported,
        }
    }
}

/// One entity of the configuration a rule was synthesised from, with its
/// pose normalised against the first entity. Children keep their
/// parent-relative poses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedEntity {
    pub kind: EntityKind,
    pub pose: Pose,
    pub scale: Vec3,
    pub tint: Color,
    pub volume: Volume,
    #[serde(default)]
    pub children: Vec<SeedEntity>,
}

impl SeedEntity {
    /// Copies a live entity and its live children, placing the root at `pose`.
    pub fn capture(store: &EntityStore, id: EntityId, pose: Pose) -> Option<SeedEntity> {
        let entity = store.live(id)?;
        let children = entity
            .children
            .iter()
            .filter_map(|child| {
                let local = store.live(*child)?.pose;
                SeedEntity::capture(store, *child, local)
            })
            .collect();
        Some(SeedEntity {
            kind: entity.kind,
            pose,
            scale: entity.scale,
            tint: entity.tint,
            volume: entity.volume,
            children,
        })
    }

    /// Spawns a fresh copy of this tree and returns the root's id.
    pub fn spawn(&self, store: &mut EntityStore) -> EntityId {
        let id = store.spawn(self.pose, self.scale, self.tint, self.kind);
        let children: Vec<EntityId> = self.children.iter().map(|c| c.spawn(store)).collect();
        if let Some(entity) = store.get_mut(id) {
            entity.volume = self.volume;
            entity.children = children;
        }
        id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub conditions: Vec<Condition>,
    pub actions: Vec<RecordedAction>,
    /// Number of actions currently in effect; the rest are redoable.
    pub cursor: usize,
    pub seed: Vec<SeedEntity>,
    pub staging: ListId,
    #[serde(skip)]
    warned: bool,
}

impl Rule {
    pub fn new(conditions: Vec<Condition>, seed: Vec<SeedEntity>, staging: ListId) -> Self {
        Self {
            conditions,
            actions: Vec::new(),
            cursor: 0,
            seed,
            staging,
            warned: false,
        }
    }

    pub fn shape(&self) -> RuleShape {
        RuleShape::of(&self.conditions)
    }

    pub fn active_actions(&self) -> &[RecordedAction] {
        &self.actions[..self.cursor.min(self.actions.len())]
    }

    /// Appends after the cursor, discarding anything previously undone.
    pub fn record(&mut self, action: RecordedAction) {
        self.actions.truncate(self.cursor);
        self.actions.push(action);
        self.cursor = self.actions.len();
    }

    pub fn undo(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        true
    }

    pub fn redo(&mut self) -> bool {
        if self.cursor >= self.actions.len() {
            return false;
        }
        self.cursor += 1;
        true
    }

    pub fn clear(&mut self) -> bool {
        let had_actions = !self.actions.is_empty();
        self.actions.clear();
        self.cursor = 0;
        had_actions
    }
}

/// Applies one action to `target`, a member of `list`. Returns the entity
/// created by a duplicate.
pub fn apply_action(
    store: &mut EntityStore,
    list: &mut EntityList,
    target: EntityId,
    action: &Action,
    frame: u64,
) -> Option<EntityId> {
    match action {
        Action::MoveBy { delta } => {
            let entity = store.get_mut(target).filter(|e| e.is_live())?;
            entity.pose = entity.pose.apply_delta(delta);
            None
        }
        Action::Duplicate { delta } => {
            let pose = store.live(target)?.pose.apply_delta(delta);
            let copy = store.clone_entity(target)?;
            if let Some(entity) = store.get_mut(copy) {
                entity.pose = pose;
            }
            list.push(copy);
            Some(copy)
        }
        Action::Delete => {
            store.delete(target, frame);
            None
        }
    }
}

/// Runs `actions` with slots bound to `slots`; duplicates take the next slot.
fn apply_actions(
    store: &mut EntityStore,
    list: &mut EntityList,
    mut slots: Vec<EntityId>,
    actions: &[RecordedAction],
    frame: u64,
) -> usize {
    let mut applied = 0;
    for recorded in actions {
        let Some(target) = slots.get(recorded.target.index).copied() else {
            continue;
        };
        if store.live(target).map(|e| e.kind) != Some(recorded.target.kind) {
            continue;
        }
        if let Some(copy) = apply_action(store, list, target, &recorded.action, frame) {
            slots.push(copy);
        }
        applied += 1;
    }
    applied
}

/// Owns every rule, tracks which one is being demonstrated, and replays
/// them against the world.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleEngine {
    pub rules: Vec<Rule>,
    pub current: Option<usize>,
    /// Offset of newly created staging lists.
    pub staging_offset: Pose,
}

impl RuleEngine {
    pub fn new(staging_offset: Pose) -> Self {
        Self {
            rules: Vec::new(),
            current: None,
            staging_offset,
        }
    }

    pub fn current_rule(&self) -> Option<&Rule> {
        self.current.and_then(|i| self.rules.get(i))
    }

    /// Staging list of the rule being demonstrated.
    pub fn active_staging(&self) -> Option<ListId> {
        self.current_rule().map(|r| r.staging)
    }

    /// Makes the rule matching `observed` current, creating one if none
    /// matches. An empty configuration clears the current rule.
    pub fn author(&mut self, observed: &[Observed], store: &mut EntityStore, lists: &mut ListSet) {
        if observed.is_empty() {
            self.set_current(None, store, lists);
            return;
        }

        if let Some(index) = self
            .rules
            .iter()
            .position(|rule| matches(&rule.conditions, observed))
        {
            self.set_current(Some(index), store, lists);
            return;
        }

        let index = self.synthesize(observed, store, lists);
        self.set_current(Some(index), store, lists);
    }

    fn synthesize(&mut self, observed: &[Observed], store: &mut EntityStore, lists: &mut ListSet) -> usize {
        let anchor = observed[0].position;
        let seed: Vec<SeedEntity> = observed
            .iter()
            .filter_map(|o| {
                SeedEntity::capture(store, o.id, Pose::new(o.position - anchor, o.rotation))
            })
            .collect();

        let mut staging = EntityList::with_offset(self.staging_offset);
        spawn_seed(&seed, store, &mut staging);
        staging.set_visible(store, false);
        lists.rules.push(staging);
        let list_id = ListId::Rule {
            index: lists.rules.len() - 1,
        };

        let conditions = synthesize_conditions(observed);
        info!(
            "New rule {} from {} entities: {:?}",
            self.rules.len(),
            observed.len(),
            conditions
        );
        self.rules.push(Rule::new(conditions, seed, list_id));
        self.rules.len() - 1
    }

    /// Hides the previous rule's staged entities and shows the new one's.
    pub fn set_current(&mut self, index: Option<usize>, store: &mut EntityStore, lists: &ListSet) {
        if index == self.current {
            return;
        }
        if let Some(list) = self.active_staging().and_then(|id| lists.get(id)) {
            list.set_visible(store, false);
        }
        self.current = index.filter(|i| *i < self.rules.len());
        if let Some(list) = self.active_staging().and_then(|id| lists.get(id)) {
            list.set_visible(store, true);
        }
        debug!("Current rule is now {:?}", self.current);
    }

    /// Appends a committed action to the rule whose staging list it touched.
    pub fn record(&mut self, commit: Commit) -> bool {
        let Some(rule) = self.current.and_then(|i| self.rules.get_mut(i)) else {
            return false;
        };
        if rule.staging != commit.list {
            return false;
        }
        rule.record(commit.action);
        true
    }

    pub fn undo(&mut self, store: &mut EntityStore, lists: &mut ListSet, frame: u64) -> bool {
        self.edit_current(store, lists, frame, Rule::undo)
    }

    pub fn redo(&mut self, store: &mut EntityStore, lists: &mut ListSet, frame: u64) -> bool {
        self.edit_current(store, lists, frame, Rule::redo)
    }

    pub fn clear(&mut self, store: &mut EntityStore, lists: &mut ListSet, frame: u64) -> bool {
        self.edit_current(store, lists, frame, Rule::clear)
    }

    fn edit_current(
        &mut self,
        store: &mut EntityStore,
        lists: &mut ListSet,
        frame: u64,
        edit: fn(&mut Rule) -> bool,
    ) -> bool {
        let Some(rule) = self.current.and_then(|i| self.rules.get_mut(i)) else {
            return false;
        };
        if !edit(rule) {
            return false;
        }
        rebuild_staging(rule, store, lists, frame);
        true
    }

    /// Replays every rule once against `target`, skipping `excluded` ids.
    /// Returns the number of actions applied.
    pub fn replay(
        &mut self,
        target: ListId,
        excluded: &HashSet<EntityId>,
        store: &mut EntityStore,
        lists: &mut ListSet,
        frame: u64,
    ) -> usize {
        let mut applied = 0;
        for (index, rule) in self.rules.iter_mut().enumerate() {
            if rule.cursor == 0 {
                continue;
            }
            let Some(list) = lists.get_mut(target) else {
                return applied;
            };
            let live: Vec<Observed> = observe(list, store)
                .into_iter()
                .filter(|o| !excluded.contains(&o.id))
                .collect();

            match rule.shape() {
                RuleShape::Single { kind } => {
                    for o in live.iter().filter(|o| o.kind == kind) {
                        applied += apply_actions(store, list, vec![o.id], rule.active_actions(), frame);
                    }
                }
                RuleShape::Pair { a, b } => {
                    let hash = canonical_pair_hash(a, b);
                    let first_kind = rule.seed.first().map(|s| s.kind).unwrap_or(a);
                    for (i, x) in live.iter().enumerate() {
                        for y in &live[i + 1..] {
                            if canonical_pair_hash(x.kind, y.kind) != hash || !x.overlaps(y) {
                                continue;
                            }
                            // Slot 0 takes the seed's first kind; equal kinds bind in scan order.
                            let slots = if x.kind == first_kind {
                                vec![x.id, y.id]
                            } else {
                                vec![y.id, x.id]
                            };
                            applied += apply_actions(store, list, slots, rule.active_actions(), frame);
                        }
                    }
                }
                RuleShape::Unsupported => {
                    if !rule.warned {
                        warn!(
                            "Rule {} has an unsupported condition shape {:?}; it will not be replayed",
                            index, rule.conditions
                        );
                        rule.warned = true;
                    }
                }
            }
        }
        applied
    }
}

/// Live entities of `list` with interaction volumes, in world coordinates.
pub fn observe(list: &EntityList, store: &EntityStore) -> Vec<Observed> {
    list.live(store)
        .filter_map(|e| {
            let world = list.to_world(&e.pose);
            Some(Observed {
                id: e.id,
                kind: e.kind,
                position: world.position,
                rotation: world.rotation,
                radius: e.radius()?,
            })
        })
        .collect()
}

fn spawn_seed(seed: &[SeedEntity], store: &mut EntityStore, list: &mut EntityList) {
    for s in seed {
        let id = s.spawn(store);
        list.push(id);
    }
}

/// Resets the staging list to the seed and re-applies the active actions.
fn rebuild_staging(rule: &Rule, store: &mut EntityStore, lists: &mut ListSet, frame: u64) {
    let Some(list) = lists.get_mut(rule.staging) else {
        return;
    };
    for id in std::mem::take(&mut list.members) {
        store.delete(id, frame);
    }
    spawn_seed(&rule.seed, store, list);
    let slots = list.members.clone();
    apply_actions(store, list, slots, rule.active_actions(), frame);
    debug!(
        "Rebuilt staging {:?} with {} of {} actions",
        rule.staging,
        rule.cursor,
        rule.actions.len()
    );
}
