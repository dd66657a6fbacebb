//! Cube face orientation table and per-face view/projection matrices.
//!
//! Faces are laid out left-to-right in the atlas in a fixed order: the four
//! yaw faces (+Z, +X, -Z, -X) first, then up (+Y) and down (-Y) when six
//! slices are enabled. The table is constant; viewer-dependent state is
//! recomputed from it every frame.

use std::sync::LazyLock;

use glam::{Mat4, Quat, Vec3};

use crate::error::{CoreError, Result};
use crate::settings::SliceCount;

/// Maximum number of cube faces in the atlas.
pub const MAX_FACES: usize = 6;

/// Near plane of the fixed per-face capture projection.
pub const CAPTURE_NEAR_PLANE: f32 = 0.001;

/// Far plane of the fixed per-face capture projection.
pub const CAPTURE_FAR_PLANE: f32 = 100.0;

/// Yaw/pitch angles (degrees, axis) for each face, forward = rotation * +Z.
const FACE_ANGLES: [(f32, Vec3); MAX_FACES] = [
    (0.0, Vec3::Y),    // +Z
    (90.0, Vec3::Y),   // +X
    (180.0, Vec3::Y),  // -Z
    (270.0, Vec3::Y),  // -X
    (-90.0, Vec3::X),  // +Y
    (90.0, Vec3::X),   // -Y
];

/// The constant orientation table, built from [`FACE_ANGLES`] on first use.
static FACE_ROTATIONS: LazyLock<[Quat; MAX_FACES]> = LazyLock::new(|| {
    FACE_ANGLES.map(|(degrees, axis)| Quat::from_axis_angle(axis, degrees.to_radians()))
});

/// Returns the orientation of face `index`.
pub fn face_rotation(index: usize) -> Result<Quat> {
    FACE_ROTATIONS
        .get(index)
        .copied()
        .ok_or(CoreError::FaceIndexOutOfRange {
            index,
            count: MAX_FACES,
        })
}

/// Returns the orientations of every face for the given slice count, in
/// atlas order, as a view into the constant table.
pub fn face_rotations(count: SliceCount) -> &'static [Quat] {
    &FACE_ROTATIONS[..count.as_usize()]
}

/// Returns the world-space forward direction captured by face `index`.
pub fn face_forward(index: usize) -> Result<Vec3> {
    Ok(face_rotation(index)? * Vec3::Z)
}

/// Builds the view matrix for face `index` of a cube centred on `viewer`.
///
/// The camera-to-world transform is translate(viewer) ∘ rotate(face) ∘
/// scale(1, 1, -1); the mirror on Z flips the rotated forward axis onto the
/// projection's look direction. The view matrix is its inverse.
pub fn face_view_matrix(viewer: Vec3, index: usize) -> Result<Mat4> {
    let rotation = face_rotation(index)?;
    let camera_to_world =
        Mat4::from_scale_rotation_translation(Vec3::new(1.0, 1.0, -1.0), rotation, viewer);
    Ok(camera_to_world.inverse())
}

/// The fixed 90° square perspective projection shared by all cube faces.
pub fn capture_projection() -> Mat4 {
    Mat4::perspective_rh(
        90.0_f32.to_radians(),
        1.0,
        CAPTURE_NEAR_PLANE,
        CAPTURE_FAR_PLANE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SliceCount;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_table_lengths() {
        assert_eq!(face_rotations(SliceCount::Four).len(), 4);
        assert_eq!(face_rotations(SliceCount::Six).len(), 6);
    }

    #[test]
    fn test_rotation_slice_views_constant_table() {
        // Both slice counts borrow prefixes of the same precomputed table.
        let four = face_rotations(SliceCount::Four);
        let six = face_rotations(SliceCount::Six);
        assert!(std::ptr::eq(four.as_ptr(), six.as_ptr()));
        for (i, rotation) in six.iter().enumerate() {
            assert_eq!(*rotation, face_rotation(i).unwrap());
        }
    }

    #[test]
    fn test_face_forwards() {
        let expected = [
            Vec3::Z,
            Vec3::X,
            Vec3::NEG_Z,
            Vec3::NEG_X,
            Vec3::Y,
            Vec3::NEG_Y,
        ];
        for (i, want) in expected.iter().enumerate() {
            let forward = face_forward(i).unwrap();
            assert!(
                (forward - *want).length() < EPS,
                "face {i}: got {forward:?}, want {want:?}"
            );
        }
    }

    #[test]
    fn test_opposing_face_pairs() {
        // Faces 0/2 and 1/3 look in exactly opposite directions.
        for (a, b) in [(0, 2), (1, 3)] {
            let fa = face_forward(a).unwrap();
            let fb = face_forward(b).unwrap();
            assert!(
                (fa.dot(fb) + 1.0).abs() < EPS,
                "faces {a}/{b} are not opposed"
            );
        }
    }

    #[test]
    fn test_out_of_range_face() {
        assert!(face_rotation(6).is_err());
        assert!(face_forward(17).is_err());
    }

    #[test]
    fn test_view_matrix_looks_along_face_forward() {
        let viewer = Vec3::new(3.0, -1.0, 2.0);
        for i in 0..MAX_FACES {
            let view = face_view_matrix(viewer, i).unwrap();
            // A point ahead of the face ends up in front of the camera
            // (negative Z in right-handed view space).
            let ahead = viewer + face_forward(i).unwrap() * 10.0;
            let in_view = view.transform_point3(ahead);
            assert!(
                (in_view.z + 10.0).abs() < 1e-3 && in_view.truncate().length() < 1e-3,
                "face {i}: forward point maps to {in_view:?}"
            );
            // The viewer itself sits at the view-space origin.
            assert!(view.transform_point3(viewer).length() < 1e-4);
        }
    }

    #[test]
    fn test_capture_projection_bounds() {
        let proj = capture_projection();
        // 90° FOV, aspect 1: a point at 45° from the axis lands on the NDC edge.
        let edge = proj.project_point3(Vec3::new(1.0, 0.0, -1.0));
        assert!((edge.x - 1.0).abs() < 1e-4);
        // Far-plane point projects to NDC depth 1 (wgpu convention).
        let far = proj.project_point3(Vec3::new(0.0, 0.0, -CAPTURE_FAR_PLANE));
        assert!((far.z - 1.0).abs() < 1e-3);
    }
}
