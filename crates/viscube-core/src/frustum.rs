//! Frustum plane extraction and sphere culling.
//!
//! Planes are extracted from a combined `proj * view` matrix with the
//! Gribb–Hartmann method, using the 0..1 NDC depth range of wgpu. Used by
//! the capture pass when per-face culling is enabled.

use glam::{Mat4, Vec3, Vec4};

use crate::error::{CoreError, Result};

/// A plane in Hessian normal form; points with non-negative signed distance
/// are on the visible side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal pointing into the frustum.
    pub normal: Vec3,
    /// Offset term: distance(p) = normal · p + d.
    pub d: f32,
}

impl Plane {
    /// Builds a normalized plane from raw `(a, b, c, d)` coefficients.
    fn from_coefficients(v: Vec4) -> Result<Self> {
        let normal = v.truncate();
        let length = normal.length();
        if !length.is_finite() || length < 1e-8 {
            return Err(CoreError::DegenerateFrustum);
        }
        Ok(Self {
            normal: normal / length,
            d: v.w / length,
        })
    }

    /// Signed distance from `point` to the plane.
    #[must_use]
    pub fn distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }
}

/// A world-space bounding sphere around one occluder draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    /// Sphere centre in world space.
    pub center: Vec3,
    /// Sphere radius.
    pub radius: f32,
}

/// The six planes of a view frustum, in left/right/bottom/top/near/far order.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    /// The bounding planes, normals pointing inwards.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// True when any part of `sphere` lies inside the frustum.
    ///
    /// A sphere straddling a plane counts as visible.
    #[must_use]
    pub fn contains_sphere(&self, sphere: BoundingSphere) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance(sphere.center) >= -sphere.radius)
    }

    /// True when `point` lies inside the frustum.
    #[must_use]
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|plane| plane.distance(point) >= 0.0)
    }
}

/// Extracts the six frustum planes from a combined `proj * view` matrix.
///
/// Fails with [`CoreError::DegenerateFrustum`] when the matrix collapses a
/// plane normal, e.g. for a non-finite or rank-deficient view-projection.
pub fn frustum_planes(view_proj: Mat4) -> Result<Frustum> {
    let row = |i: usize| {
        Vec4::new(
            view_proj.x_axis[i],
            view_proj.y_axis[i],
            view_proj.z_axis[i],
            view_proj.w_axis[i],
        )
    };
    let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

    let planes = [
        Plane::from_coefficients(r3 + r0)?, // left
        Plane::from_coefficients(r3 - r0)?, // right
        Plane::from_coefficients(r3 + r1)?, // bottom
        Plane::from_coefficients(r3 - r1)?, // top
        Plane::from_coefficients(r2)?,      // near (z_ndc >= 0)
        Plane::from_coefficients(r3 - r2)?, // far
    ];

    Ok(Frustum { planes })
}
