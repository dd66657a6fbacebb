//! Empirical guard-angle and depth-bias math for the cube capture pass.
//!
//! Adjacent cube faces leave visible seams unless each face is captured with
//! a little extra field of view. The required margin is roughly proportional
//! to the inverse of the slice resolution; since only a fixed set of
//! resolutions is supported, tabulated empirical values are used instead of
//! the analytic guard-angle formula.

/// Default guard angle when the resolution falls outside the tabulated range.
const DEFAULT_FOV_BIAS: f32 = 4.0;

/// Filter kernel radius used to widen the bias when filtered sampling is on
/// (matches a 5x5 kernel).
const FILTER_KERNEL_RADIUS: f32 = 2.5;

/// Returns the extra field-of-view margin, in degrees, to apply to a 90°
/// cube face so adjacent slices overlap instead of leaving seams.
///
/// The value is a step function of the slice resolution. `filtering` adds a
/// second empirical offset to account for multi-texel sampling kernels.
/// Resolutions of 8 or below are a policy warning: the default bias is
/// returned unchanged and a diagnostic is logged.
pub fn frustum_fov_bias_degrees(slice_resolution: u32, filtering: bool) -> f32 {
    let mut fov_bias = DEFAULT_FOV_BIAS;

    if slice_resolution <= 8 {
        log::warn!(
            "slice resolution {slice_resolution} too low for seam correction, \
             increase the atlas resolution"
        );
    } else if slice_resolution <= 16 {
        fov_bias = 43.0;
    } else if slice_resolution <= 32 {
        fov_bias = 18.55;
    } else if slice_resolution <= 64 {
        fov_bias = 8.63;
    } else if slice_resolution <= 128 {
        fov_bias = 4.13;
    } else if slice_resolution <= 256 {
        fov_bias = 2.03;
    } else if slice_resolution <= 512 {
        fov_bias = 1.00;
    } else if slice_resolution <= 1024 {
        fov_bias = 0.50;
    }

    if filtering {
        if slice_resolution <= 16 {
            log::warn!(
                "slice resolution {slice_resolution} too low for filtered sampling, \
                 increase the atlas resolution or disable filtering"
            );
        } else if slice_resolution <= 32 {
            fov_bias += 9.35;
        } else if slice_resolution <= 64 {
            fov_bias += 4.07;
        } else if slice_resolution <= 128 {
            fov_bias += 1.77;
        } else if slice_resolution <= 256 {
            fov_bias += 0.85;
        } else if slice_resolution <= 512 {
            fov_bias += 0.39;
        } else if slice_resolution <= 1024 {
            fov_bias += 0.17;
        }
    }

    fov_bias
}

/// Computes the shadow-style depth bias applied while capturing occluders.
///
/// The frustum half-width is approximated as if the projection were
/// orthographic at the far end of the capture range, which gives a
/// world-space texel size; the bias is that texel size scaled by
/// `bias_offset` (negated so geometry is pushed towards the viewer). When
/// `filtering` is on the bias is widened by the sampling kernel radius.
///
/// This is a pure function of its inputs and needs no GPU context.
pub fn depth_bias(bias_offset: f32, range: f32, slice_resolution: u32, filtering: bool) -> f32 {
    let fov_bias = frustum_fov_bias_degrees(slice_resolution, filtering);
    let cube_face_angle = 90.0 + fov_bias;
    // Half-width (world units) of the capture frustum's far plane.
    let frustum_half_width = (cube_face_angle * 0.5).to_radians().tan() * range;

    let texel_size = frustum_half_width / slice_resolution as f32;
    let mut bias = -bias_offset * texel_size;

    if filtering {
        bias *= FILTER_KERNEL_RADIUS;
    }

    bias
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RESOLUTIONS: [u32; 4] = [128, 256, 512, 1024];

    #[test]
    fn test_fov_bias_monotone_non_increasing() {
        for filtering in [false, true] {
            let mut prev = f32::INFINITY;
            for res in RESOLUTIONS {
                let bias = frustum_fov_bias_degrees(res, filtering);
                assert!(
                    bias <= prev,
                    "bias must not increase with resolution (res {res}, filtering {filtering})"
                );
                prev = bias;
            }
        }
    }

    #[test]
    fn test_filtering_never_reduces_bias() {
        for res in [16, 32, 64, 128, 256, 512, 1024] {
            let hard = frustum_fov_bias_degrees(res, false);
            let soft = frustum_fov_bias_degrees(res, true);
            assert!(soft >= hard, "filtered bias must dominate at res {res}");
        }
    }

    #[test]
    fn test_tiny_resolution_returns_default() {
        assert!((frustum_fov_bias_degrees(8, false) - 4.0).abs() < f32::EPSILON);
        assert!((frustum_fov_bias_degrees(1, false) - 4.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_tabulated_values() {
        assert!((frustum_fov_bias_degrees(512, false) - 1.0).abs() < 1e-6);
        assert!((frustum_fov_bias_degrees(1024, false) - 0.5).abs() < 1e-6);
        assert!((frustum_fov_bias_degrees(512, true) - 1.39).abs() < 1e-6);
    }

    #[test]
    fn test_depth_bias_sign() {
        // Positive offset pushes depth towards the viewer (negative bias).
        assert!(depth_bias(1.0, 10.0, 512, false) < 0.0);
        assert!(depth_bias(-1.0, 10.0, 512, false) > 0.0);
    }

    #[test]
    fn test_filtering_scales_by_kernel_radius() {
        // Same table entry for 512 with/without filtering differs, so compare
        // against the recomputed expectation instead of a plain ratio.
        let filtered = depth_bias(1.0, 10.0, 512, true);
        let fov = frustum_fov_bias_degrees(512, true);
        let half_width = ((90.0 + fov) * 0.5_f32).to_radians().tan() * 10.0;
        let expected = -(half_width / 512.0) * 2.5;
        assert!((filtered - expected).abs() < 1e-6);
    }

    proptest! {
        /// depth_bias is linear in bias_offset: f(2k) == 2 f(k).
        #[test]
        fn prop_depth_bias_linear_in_offset(
            offset in -16.0f32..16.0,
            range in 0.1f32..100.0,
            res_idx in 0usize..4,
            filtering in proptest::bool::ANY,
        ) {
            let res = RESOLUTIONS[res_idx];
            let single = depth_bias(offset, range, res, filtering);
            let double = depth_bias(2.0 * offset, range, res, filtering);
            prop_assert!((double - 2.0 * single).abs() <= 1e-4 * single.abs().max(1.0));
        }

        /// Larger resolution at fixed inputs never increases the magnitude.
        #[test]
        fn prop_depth_bias_shrinks_with_resolution(
            offset in 0.01f32..16.0,
            range in 0.1f32..100.0,
        ) {
            let mut prev = f32::INFINITY;
            for res in RESOLUTIONS {
                let magnitude = depth_bias(offset, range, res, false).abs();
                prop_assert!(magnitude <= prev);
                prev = magnitude;
            }
        }
    }
}
