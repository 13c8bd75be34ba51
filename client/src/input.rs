//! Scripted tracked-device input
//!
//! A headless participant has no headset, so its avatar samples come from a
//! small script instead: either standing still, or repeatedly reaching for
//! the nearest object, grabbing it, dragging it sideways and letting go.

use crate::game::ClientScene;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{AvatarInput, HandInput, Pose, Vec3};
use std::fmt;
use std::str::FromStr;

/// Per-axis noise added to every tracked pose, in metres.
pub const JITTER: f32 = 0.002;

const HEADSET: Vec3 = Vec3::new(0.0, 1.6, 0.5);
const LEFT_REST: Vec3 = Vec3::new(-0.25, 1.1, 0.3);
const RIGHT_REST: Vec3 = Vec3::new(0.25, 1.1, 0.3);
const DRAG: Vec3 = Vec3::new(0.15, 0.0, 0.0);

// Phase lengths of one reach cycle, in ticks.
const REACH_TICKS: u64 = 60;
const DRAG_TICKS: u64 = 90;
const RETURN_TICKS: u64 = 60;
const PAUSE_TICKS: u64 = 30;
const CYCLE_TICKS: u64 = REACH_TICKS + DRAG_TICKS + 1 + RETURN_TICKS + PAUSE_TICKS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Hands at rest, buttons up
    Idle,
    /// Reach, grab, drag, release, return, forever
    Reach,
}

impl FromStr for Script {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(Script::Idle),
            "reach" => Ok(Script::Reach),
            other => Err(format!("unknown script '{}', expected idle or reach", other)),
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Script::Idle => write!(f, "idle"),
            Script::Reach => write!(f, "reach"),
        }
    }
}

/// Where the right hand is within the reach cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    Reach { t: f32 },
    Drag { t: f32 },
    Release,
    Return { t: f32 },
    Pause,
}

impl Phase {
    fn at(tick: u64) -> Phase {
        let mut step = tick % CYCLE_TICKS;
        if step < REACH_TICKS {
            return Phase::Reach {
                t: step as f32 / REACH_TICKS as f32,
            };
        }
        step -= REACH_TICKS;
        if step < DRAG_TICKS {
            return Phase::Drag {
                t: step as f32 / DRAG_TICKS as f32,
            };
        }
        step -= DRAG_TICKS;
        if step == 0 {
            return Phase::Release;
        }
        step -= 1;
        if step < RETURN_TICKS {
            return Phase::Return {
                t: step as f32 / RETURN_TICKS as f32,
            };
        }
        Phase::Pause
    }
}

fn lerp(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

/// Produces one avatar sample per tick
#[derive(Debug)]
pub struct InputScript {
    script: Script,
    rng: StdRng,
    tick: u64,
    cycle: u64,
    target: Option<Vec3>,
}

impl InputScript {
    pub fn new(script: Script, seed: u64) -> Self {
        Self {
            script,
            rng: StdRng::seed_from_u64(seed),
            tick: 0,
            cycle: 0,
            target: None,
        }
    }

    pub fn script(&self) -> Script {
        self.script
    }

    /// Object position the current cycle reaches for, once one was chosen.
    pub fn target(&self) -> Option<Vec3> {
        self.target
    }

    pub fn phase(&self) -> Phase {
        Phase::at(self.tick)
    }

    /// Advances the script one tick and returns the sample to send.
    ///
    /// The reach target is picked from `scene` at the start of each cycle;
    /// until the first object is replicated the right hand stays at rest.
    pub fn next_sample(&mut self, scene: &ClientScene) -> AvatarInput {
        let sample = match self.script {
            Script::Idle => self.pose_hands(RIGHT_REST, false),
            Script::Reach => self.reach_sample(scene),
        };
        self.tick += 1;
        sample
    }

    fn reach_sample(&mut self, scene: &ClientScene) -> AvatarInput {
        let phase = self.phase();
        if self.tick % CYCLE_TICKS == 0 {
            self.cycle = self.tick / CYCLE_TICKS;
            self.target = scene.nearest_placeable(RIGHT_REST).map(|(_, at)| at);
        }
        let Some(target) = self.target else {
            return self.pose_hands(RIGHT_REST, false);
        };

        // Alternate direction so the object oscillates instead of drifting.
        let drag = if self.cycle % 2 == 0 { DRAG } else { -DRAG };
        let dropped_at = target + drag;
        let (hand, grab) = match phase {
            Phase::Reach { t } => (lerp(RIGHT_REST, target, t), false),
            Phase::Drag { t } => (lerp(target, dropped_at, t), true),
            Phase::Release => (dropped_at, false),
            Phase::Return { t } => (lerp(dropped_at, RIGHT_REST, t), false),
            Phase::Pause => (RIGHT_REST, false),
        };
        self.pose_hands(hand, grab)
    }

    fn pose_hands(&mut self, right: Vec3, grab: bool) -> AvatarInput {
        let headset = Pose::at(HEADSET + self.jitter());
        let left = HandInput {
            pose: Pose::at(LEFT_REST + self.jitter()),
            grab: false,
            action: false,
        };
        let right = HandInput {
            pose: Pose::at(right + self.jitter()),
            grab,
            action: false,
        };
        AvatarInput {
            headset,
            hands: [left, right],
        }
    }

    fn jitter(&mut self) -> Vec3 {
        Vec3::new(
            self.rng.gen_range(-JITTER..=JITTER),
            self.rng.gen_range(-JITTER..=JITTER),
            self.rng.gen_range(-JITTER..=JITTER),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{Body, Message, Quat};

    fn scene_with_cube(at: Vec3) -> ClientScene {
        let mut scene = ClientScene::new();
        scene.apply_message(&Message::new(
            1,
            4,
            Body::PositionRotationScaleVisibleTintModel {
                position: at,
                rotation: Quat::IDENTITY,
                scale: Vec3::splat(0.1),
                visible: true,
                tint: [255, 255, 255, 255],
                gizmo: shared::GizmoFlags::NONE,
                model: 1,
            },
        ));
        scene
    }

    #[test]
    fn test_parse_script() {
        assert_eq!("idle".parse::<Script>(), Ok(Script::Idle));
        assert_eq!("Reach".parse::<Script>(), Ok(Script::Reach));
        assert!("dance".parse::<Script>().is_err());
        assert_eq!(Script::Reach.to_string(), "reach");
    }

    #[test]
    fn test_idle_never_grabs() {
        let scene = scene_with_cube(Vec3::new(0.0, 1.0, 0.0));
        let mut script = InputScript::new(Script::Idle, 7);
        for _ in 0..CYCLE_TICKS {
            let sample = script.next_sample(&scene);
            assert!(!sample.hands[0].grab && !sample.hands[1].grab);
            assert!(sample.hands[1].pose.position.distance_squared(RIGHT_REST) < 1e-4);
        }
    }

    #[test]
    fn test_reach_cycle_grabs_target_then_releases() {
        let cube = Vec3::new(0.1, 1.0, 0.0);
        let scene = scene_with_cube(cube);
        let mut script = InputScript::new(Script::Reach, 7);

        let samples: Vec<AvatarInput> = (0..CYCLE_TICKS).map(|_| script.next_sample(&scene)).collect();
        assert_eq!(script.target(), Some(cube));

        let first_grab = samples.iter().position(|s| s.hands[1].grab).unwrap();
        assert_eq!(first_grab as u64, REACH_TICKS);
        let at_grab = samples[first_grab].hands[1].pose.position;
        assert_approx_eq!(at_grab.x, cube.x, 0.01);
        assert_approx_eq!(at_grab.y, cube.y, 0.01);

        let grabbed = samples.iter().filter(|s| s.hands[1].grab).count();
        assert_eq!(grabbed as u64, DRAG_TICKS);
        assert!(!samples.last().unwrap().hands[1].grab);
    }

    #[test]
    fn test_reach_waits_for_scene() {
        let mut script = InputScript::new(Script::Reach, 1);
        let empty = ClientScene::new();
        for _ in 0..CYCLE_TICKS {
            assert!(!script.next_sample(&empty).hands[1].grab);
        }
        assert!(script.target().is_none());
    }

    #[test]
    fn test_same_seed_same_samples() {
        let scene = scene_with_cube(Vec3::new(0.0, 1.0, 0.0));
        let mut a = InputScript::new(Script::Reach, 42);
        let mut b = InputScript::new(Script::Reach, 42);
        for _ in 0..20 {
            assert_eq!(a.next_sample(&scene), b.next_sample(&scene));
        }
    }

    #[test]
    fn test_phase_boundaries() {
        assert_eq!(Phase::at(0), Phase::Reach { t: 0.0 });
        assert_eq!(Phase::at(REACH_TICKS), Phase::Drag { t: 0.0 });
        assert_eq!(Phase::at(REACH_TICKS + DRAG_TICKS), Phase::Release);
        assert_eq!(Phase::at(CYCLE_TICKS - 1), Phase::Pause);
        assert_eq!(Phase::at(CYCLE_TICKS), Phase::Reach { t: 0.0 });
    }
}
