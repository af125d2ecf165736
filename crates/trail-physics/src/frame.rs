//! Orientation frames packed into a single texel
//!
//! A frame is stored as two unit vectors, the normal in `xy` and the binormal
//! in `zw`, each octahedral-encoded. The tangent is `cross(normal, binormal)`.
//! The WGSL kernels and the trail shader use the same encoding.

use crate::constants::FRAME_EPSILON;
use crate::texel::Texel;
use glam::{Vec2, Vec3};

/// Orthonormal orientation of one trail segment
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frame {
    pub normal: Vec3,
    pub binormal: Vec3,
}

impl Frame {
    /// Normal = +Y, binormal = +Z, tangent = +X
    pub const IDENTITY: Self = Self {
        normal: Vec3::Y,
        binormal: Vec3::Z,
    };

    pub fn tangent(&self) -> Vec3 {
        self.normal.cross(self.binormal)
    }

    pub fn pack(&self) -> Texel {
        let n = encode_unit(self.normal);
        let b = encode_unit(self.binormal);
        [n.x, n.y, b.x, b.y]
    }

    pub fn unpack(texel: Texel) -> Self {
        Self {
            normal: decode_unit(Vec2::new(texel[0], texel[1])),
            binormal: decode_unit(Vec2::new(texel[2], texel[3])),
        }
    }

    /// Rebuild the frame so its tangent follows `direction`, keeping the
    /// normal as close as possible to the previous one.
    ///
    /// Returns `self` unchanged when `direction` is too short or parallel to
    /// the previous normal.
    pub fn reorthonormalize(&self, direction: Vec3) -> Self {
        if direction.length_squared() < FRAME_EPSILON * FRAME_EPSILON {
            return *self;
        }
        let tangent = direction.normalize();
        let binormal = tangent.cross(self.normal);
        if binormal.length_squared() < FRAME_EPSILON {
            return *self;
        }
        let binormal = binormal.normalize();
        let normal = binormal.cross(tangent).normalize();
        Self { normal, binormal }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::IDENTITY
    }
}

fn sign_not_zero(v: f32) -> f32 {
    if v >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Octahedral encoding of a unit vector into [-1, 1]^2
pub fn encode_unit(v: Vec3) -> Vec2 {
    let l1 = v.x.abs() + v.y.abs() + v.z.abs();
    if l1 <= 0.0 {
        return Vec2::ZERO;
    }
    let p = v / l1;
    if p.z >= 0.0 {
        Vec2::new(p.x, p.y)
    } else {
        Vec2::new(
            (1.0 - p.y.abs()) * sign_not_zero(p.x),
            (1.0 - p.x.abs()) * sign_not_zero(p.y),
        )
    }
}

pub fn decode_unit(e: Vec2) -> Vec3 {
    let mut v = Vec3::new(e.x, e.y, 1.0 - e.x.abs() - e.y.abs());
    let t = (-v.z).max(0.0);
    v.x += if v.x >= 0.0 { -t } else { t };
    v.y += if v.y >= 0.0 { -t } else { t };
    v.normalize()
}
