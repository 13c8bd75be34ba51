//! Best-effort persistence of the world as a tagged JSON tree
//!
//! Every object in the tree names its type in a `_type` field, and the
//! save time is stored as a `Date` object, so the file can be read back
//! without knowing its shape in advance.

use crate::world::WorldState;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_type")]
pub enum Stamp {
    Date { millis: u64 },
}

impl Stamp {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis();
        Stamp::Date {
            millis: millis.min(u64::MAX as u128) as u64,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "_type")]
enum SnapshotRef<'a> {
    Snapshot { saved_at: Stamp, state: &'a WorldState },
}

#[derive(Deserialize)]
#[serde(tag = "_type")]
enum SnapshotOwned {
    Snapshot { saved_at: Stamp, state: WorldState },
}

pub fn to_json(state: &WorldState) -> Result<String, SnapshotError> {
    let doc = SnapshotRef::Snapshot {
        saved_at: Stamp::now(),
        state,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Parses a snapshot, returning the state and when it was saved.
pub fn from_json(json: &str) -> Result<(WorldState, Stamp), SnapshotError> {
    let SnapshotOwned::Snapshot {
        saved_at,
        mut state,
    } = serde_json::from_str(json)?;
    state.reset_transient();
    Ok((state, saved_at))
}

/// Writes next to `path` first and renames, so a crash mid-write leaves the
/// previous snapshot intact.
pub fn save(state: &WorldState, path: &Path) -> Result<(), SnapshotError> {
    let json = to_json(state)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    info!(
        "Saved snapshot of frame {} ({} entities) to {}",
        state.frame,
        state.store.len(),
        path.display()
    );
    Ok(())
}

pub fn load(path: &Path) -> Result<WorldState, SnapshotError> {
    let json = fs::read_to_string(path)?;
    let (state, saved_at) = from_json(&json)?;
    let Stamp::Date { millis } = saved_at;
    info!(
        "Loaded snapshot from {} saved at {} ms ({} entities, {} rules)",
        path.display(),
        millis,
        state.store.len(),
        state.rules.rules.len()
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ListId;
    use crate::manipulation::{Action, RecordedAction, Slot};
    use crate::rules::{Condition, Rule};
    use shared::{Pose, Vec3};

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_json_is_tagged() {
        let state = WorldState::initial_state();
        let json = to_json(&state).unwrap();
        assert!(json.contains("\"_type\": \"Snapshot\""));
        assert!(json.contains("\"_type\": \"Date\""));
        assert!(json.contains("\"_type\": \"Sphere\""));
    }

    #[test]
    fn test_save_and_load() {
        let mut state = WorldState::initial_state();
        state.frame = 1234;
        state.playing = false;
        let cube = state.lists.world.members[0];
        state.store.delete(cube, 1200);

        let mut rule = Rule::new(
            vec![Condition::Present {
                kind: crate::entity::EntityKind::CUBE,
            }],
            Vec::new(),
            ListId::Rule { index: 0 },
        );
        rule.record(RecordedAction {
            target: Slot {
                index: 0,
                kind: crate::entity::EntityKind::CUBE,
            },
            action: Action::MoveBy {
                delta: Pose::at(Vec3::new(0.1, 0.0, 0.0)),
            },
        });
        state.rules.rules.push(rule);

        let path = temp_path("snapshot-roundtrip");
        save(&state, &path).unwrap();
        let loaded = load(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded.frame, 1234);
        assert!(!loaded.playing);
        assert_eq!(loaded.store.len(), state.store.len());
        assert!(loaded.store.get(cube).unwrap().deleted);
        assert_eq!(loaded.lists.world.members, state.lists.world.members);
        assert_eq!(loaded.rules.rules.len(), 1);
        assert_eq!(loaded.rules.rules[0].actions, state.rules.rules[0].actions);
        assert!(loaded.controllers.is_empty());
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            load(&temp_path("snapshot-missing")),
            Err(SnapshotError::Io(_))
        ));
        assert!(matches!(from_json("{\"_type\":\"Nope\"}"), Err(SnapshotError::Json(_))));
    }
}
