//! Vector, quaternion and pose math for the shared scene
//!
//! Every nested coordinate frame in the system (world lists, appliance
//! buttons, staged rule previews, controller-relative grab offsets) goes
//! through [`Pose::apply_offset`] and [`Pose::apply_inverse_offset`]. The
//! convention is rotate-then-translate everywhere.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

const EPSILON: f32 = 1.0e-6;

/// Represents a vector in 3D space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);
    pub const ONE: Vec3 = Vec3::new(1.0, 1.0, 1.0);
    pub const X: Vec3 = Vec3::new(1.0, 0.0, 0.0);
    pub const Y: Vec3 = Vec3::new(0.0, 1.0, 0.0);
    pub const Z: Vec3 = Vec3::new(0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn splat(v: f32) -> Self {
        Self::new(v, v, v)
    }

    pub fn dot(&self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length_squared(&self) -> f32 {
        self.dot(*self)
    }

    /// Returns the magnitude of the vector.
    pub fn length(&self) -> f32 {
        self.length_squared().sqrt()
    }

    pub fn distance_squared(&self, other: Vec3) -> f32 {
        (*self - other).length_squared()
    }

    /// Returns the normalized vector, or zero for a degenerate input.
    pub fn normalize(&self) -> Vec3 {
        let mag = self.length();
        if mag < EPSILON {
            Vec3::ZERO
        } else {
            *self * (1.0 / mag)
        }
    }

    /// Removes the component along `normal` (which must be unit length).
    pub fn project_on_plane(&self, normal: Vec3) -> Vec3 {
        *self - normal * self.dot(normal)
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Vec3) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;
    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

/// Unit quaternion, stored `x, y, z, w` (the same order it travels on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Quat::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// `axis` must be unit length.
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let (s, c) = (angle * 0.5).sin_cos();
        Quat::new(axis.x * s, axis.y * s, axis.z * s, c)
    }

    /// Shortest-arc rotation taking direction `from` onto direction `to`.
    /// Degenerate (zero-length) inputs yield the identity.
    pub fn rotation_between(from: Vec3, to: Vec3) -> Self {
        let a = from.normalize();
        let b = to.normalize();
        if a == Vec3::ZERO || b == Vec3::ZERO {
            return Quat::IDENTITY;
        }

        let d = a.dot(b);
        if d >= 1.0 - EPSILON {
            return Quat::IDENTITY;
        }
        if d <= -1.0 + EPSILON {
            // Opposite directions: rotate half a turn about any perpendicular.
            let mut axis = Vec3::X.cross(a);
            if axis.length_squared() < EPSILON {
                axis = Vec3::Y.cross(a);
            }
            return Quat::from_axis_angle(axis.normalize(), std::f32::consts::PI);
        }

        let c = a.cross(b);
        Quat::new(c.x, c.y, c.z, 1.0 + d).normalize()
    }

    pub fn conjugate(&self) -> Quat {
        Quat::new(-self.x, -self.y, -self.z, self.w)
    }

    pub fn dot(&self, other: Quat) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    pub fn normalize(&self) -> Quat {
        let mag = self.dot(*self).sqrt();
        if mag < EPSILON {
            Quat::IDENTITY
        } else {
            let inv = 1.0 / mag;
            Quat::new(self.x * inv, self.y * inv, self.z * inv, self.w * inv)
        }
    }

    pub fn rotate(&self, v: Vec3) -> Vec3 {
        // v' = v + 2w(q x v) + 2 q x (q x v)
        let q = Vec3::new(self.x, self.y, self.z);
        let t = q.cross(v) * 2.0;
        v + t * self.w + q.cross(t)
    }

    /// True when both quaternions describe the same rotation within `tolerance`.
    pub fn approx_eq(&self, other: Quat, tolerance: f32) -> bool {
        (1.0 - self.dot(other).abs()) <= tolerance
    }
}

impl Mul for Quat {
    type Output = Quat;
    fn mul(self, rhs: Quat) -> Quat {
        Quat::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }
}

/// Position plus orientation. Also used as a parent-relative offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn at(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }

    /// Expresses a pose given relative to `offset` in the offset's parent frame.
    pub fn apply_offset(&self, offset: &Pose) -> Pose {
        Pose {
            position: offset.rotation.rotate(self.position) + offset.position,
            rotation: (offset.rotation * self.rotation).normalize(),
        }
    }

    /// Exact inverse of [`Pose::apply_offset`] for the same `offset`.
    pub fn apply_inverse_offset(&self, offset: &Pose) -> Pose {
        let inverse = offset.rotation.conjugate();
        Pose {
            position: inverse.rotate(self.position - offset.position),
            rotation: (inverse * self.rotation).normalize(),
        }
    }

    /// Delta that takes `from` onto `self`: translation difference and
    /// `self.rotation * from.rotation⁻¹`.
    pub fn delta_from(&self, from: &Pose) -> Pose {
        Pose {
            position: self.position - from.position,
            rotation: (self.rotation * from.rotation.conjugate()).normalize(),
        }
    }

    /// Applies a delta produced by [`Pose::delta_from`].
    pub fn apply_delta(&self, delta: &Pose) -> Pose {
        Pose {
            position: self.position + delta.position,
            rotation: (delta.rotation * self.rotation).normalize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn assert_vec_eq(a: Vec3, b: Vec3) {
        assert_approx_eq!(a.x, b.x, 1e-4);
        assert_approx_eq!(a.y, b.y, 1e-4);
        assert_approx_eq!(a.z, b.z, 1e-4);
    }

    #[test]
    fn test_rotate_quarter_turn() {
        let q = Quat::from_axis_angle(Vec3::Y, std::f32::consts::FRAC_PI_2);
        assert_vec_eq(q.rotate(Vec3::X), Vec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn test_offset_roundtrip() {
        let offsets = [
            Pose::IDENTITY,
            Pose::new(
                Vec3::new(1.0, -2.0, 0.5),
                Quat::from_axis_angle(Vec3::new(1.0, 1.0, 0.0).normalize(), 1.2),
            ),
            Pose::new(
                Vec3::new(-0.3, 0.9, 4.0),
                Quat::from_axis_angle(Vec3::Z, -2.7),
            ),
        ];
        let poses = [
            Pose::at(Vec3::new(0.0, 0.5, 0.0)),
            Pose::new(
                Vec3::new(3.0, 1.0, -1.0),
                Quat::from_axis_angle(Vec3::X, 0.4),
            ),
        ];

        for offset in &offsets {
            for pose in &poses {
                let back = pose.apply_offset(offset).apply_inverse_offset(offset);
                assert_vec_eq(back.position, pose.position);
                assert!(back.rotation.approx_eq(pose.rotation, 1e-5));
            }
        }
    }

    #[test]
    fn test_offset_rotates_then_translates() {
        let offset = Pose::new(
            Vec3::new(10.0, 0.0, 0.0),
            Quat::from_axis_angle(Vec3::Z, std::f32::consts::FRAC_PI_2),
        );
        let child = Pose::at(Vec3::X);
        let world = child.apply_offset(&offset);
        assert_vec_eq(world.position, Vec3::new(10.0, 1.0, 0.0));
    }

    #[test]
    fn test_rotation_between() {
        let q = Quat::rotation_between(Vec3::X, Vec3::Y);
        assert_vec_eq(q.rotate(Vec3::X), Vec3::Y);

        let opposite = Quat::rotation_between(Vec3::Z, -Vec3::Z);
        assert_vec_eq(opposite.rotate(Vec3::Z), -Vec3::Z);

        assert_eq!(Quat::rotation_between(Vec3::ZERO, Vec3::X), Quat::IDENTITY);
    }

    #[test]
    fn test_delta_roundtrip() {
        let start = Pose::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_axis_angle(Vec3::Y, 0.3));
        let end = Pose::new(Vec3::new(-1.0, 2.5, 0.0), Quat::from_axis_angle(Vec3::X, 1.1));
        let delta = end.delta_from(&start);
        let replayed = start.apply_delta(&delta);
        assert_vec_eq(replayed.position, end.position);
        assert!(replayed.rotation.approx_eq(end.rotation, 1e-5));
    }
}
