//! Portal placement: surface validation and pose search.
//!
//! The search logic is parameterized over closures for the physics queries
//! (corner probe rays and oriented-box overlap tests), so it can be exercised
//! without a physics world. The systems in the parent module supply closures
//! backed by [`bevy_rapier3d::plugin::RapierContext`].

use bevy::prelude::*;

/// Half extents of the portal rectangle.
pub const PORTAL_HALF_WIDTH: f32 = 0.5;
pub const PORTAL_HALF_HEIGHT: f32 = 1.0;
/// Half depth of the oriented box used for overlap checks against world
/// geometry.
pub const OVERLAP_HALF_DEPTH: f32 = 0.05;

/// Offset of the portal plane along the surface normal, to prevent Z fighting.
pub const SURFACE_OFFSET: f32 = 0.01;

/// Corner probes start this far above the surface and cast down along the
/// negated normal.
pub const PROBE_CLEARANCE: f32 = 0.1;
pub const PROBE_LENGTH: f32 = 0.2;

/// Ring search used to resolve overlaps: sample count and radius.
pub const RING_SAMPLES: u32 = 16;
pub const RING_RADIUS: f32 = 0.5;

/// Directional search used when the ring-adjusted pose still fails surface
/// validation or the pairwise distance check.
pub const SCAN_STEP: f32 = 0.1;
pub const MAX_SHIFT: f32 = 2.0;

/// Minimum distance between the two portals: 0.6 times the larger portal
/// dimension (the height, 2 * PORTAL_HALF_HEIGHT).
pub const MIN_PAIR_DISTANCE: f32 = PORTAL_HALF_HEIGHT * 2. * 0.6;

/// A ray hit on portalable geometry, fed into the placement search.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceHit {
    pub point: Vec3,
    pub normal: Vec3,
}

/// Orientation of a portal sitting flush on a surface with the given outward
/// normal. The portal's `forward()` axis equals the normal, which is the
/// basis all signed-distance math derives its plane normal from.
pub fn surface_rotation(normal: Vec3) -> Quat {
    // A floor or ceiling normal is parallel to the default up reference.
    let up = if normal.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    Transform::IDENTITY.looking_at(normal, up).rotation
}

/// The four corners of the portal rectangle in the surface plane.
pub fn footprint_corners(point: Vec3, normal: Vec3) -> [Vec3; 4] {
    let rotation = surface_rotation(normal);
    let right = rotation * Vec3::X * PORTAL_HALF_WIDTH;
    let up = rotation * Vec3::Y * PORTAL_HALF_HEIGHT;
    [
        point + up + right,
        point + up - right,
        point - up + right,
        point - up - right,
    ]
}

/// True if every corner of the portal footprint projects onto portalable
/// surface. `probe` casts a ray of length [`PROBE_LENGTH`] from the given
/// origin along the given direction and reports whether it hit a
/// portal-surface collider. Any corner failing is a normal outcome, not an
/// error.
pub fn footprint_fits(
    point: Vec3,
    normal: Vec3,
    mut probe: impl FnMut(Vec3, Vec3) -> bool,
) -> bool {
    footprint_corners(point, normal)
        .into_iter()
        .all(|corner| probe(corner + normal * PROBE_CLEARANCE, -normal))
}

/// Resolve overlaps with world geometry: accept the requested point if the
/// portal box is clear there, otherwise scan a fixed-radius ring of evenly
/// spaced samples rotated into the surface plane and accept the first clear
/// one. `blocked` runs the oriented-box overlap test at a candidate center
/// (already offset off the surface).
pub fn auto_adjust(
    origin: Vec3,
    normal: Vec3,
    mut blocked: impl FnMut(Vec3) -> bool,
) -> Option<Vec3> {
    if !blocked(origin + normal * SURFACE_OFFSET) {
        return Some(origin);
    }
    let rotation = surface_rotation(normal);
    for i in 0..RING_SAMPLES {
        let angle = std::f32::consts::TAU * i as f32 / RING_SAMPLES as f32;
        let local = Vec3::new(angle.cos(), angle.sin(), 0.) * RING_RADIUS;
        let candidate = origin + rotation * local;
        if !blocked(candidate + normal * SURFACE_OFFSET) {
            return Some(candidate);
        }
    }
    None
}

/// The in-plane axis the directional search scans along: toward/away from the
/// paired portal, picking the plane axis (right or up) with the larger offset
/// component. Falls back to the plane's right axis when no pair exists.
pub fn preferred_shift_axis(origin: Vec3, normal: Vec3, other_portal: Option<Vec3>) -> Vec3 {
    let rotation = surface_rotation(normal);
    let right = rotation * Vec3::X;
    let up = rotation * Vec3::Y;
    let Some(other) = other_portal else { return right };
    let to_self = origin - other;
    let horizontal = to_self.dot(right);
    let vertical = to_self.dot(up);
    if horizontal.abs() > vertical.abs() {
        if horizontal >= 0. {
            right
        } else {
            -right
        }
    } else if vertical >= 0. {
        up
    } else {
        -up
    }
}

/// Directional search: step outward along the preferred axis (both ways, the
/// biased direction first) until `valid` accepts a candidate, up to
/// [`MAX_SHIFT`]. Returns `None` when the scan is exhausted.
pub fn find_nearby_valid_spot(
    origin: Vec3,
    normal: Vec3,
    other_portal: Option<Vec3>,
    mut valid: impl FnMut(Vec3) -> bool,
) -> Option<Vec3> {
    let axis = preferred_shift_axis(origin, normal, other_portal);
    let steps = (MAX_SHIFT / SCAN_STEP).round() as u32;
    for dir in [axis, -axis] {
        for step in 1..=steps {
            let candidate = origin + dir * (SCAN_STEP * step as f32);
            if valid(candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

pub fn too_close_to_other(point: Vec3, other: Vec3) -> bool {
    point.distance(other) < MIN_PAIR_DISTANCE
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    #[test]
    fn surface_rotation_forward_is_the_normal() {
        for normal in [Vec3::Z, Vec3::NEG_Z, Vec3::X, Vec3::Y, Vec3::NEG_Y] {
            let rotation = surface_rotation(normal);
            let forward = rotation * Vec3::NEG_Z;
            assert!(
                forward.distance(normal) < EPS,
                "forward {forward} != normal {normal}"
            );
        }
    }

    #[test]
    fn footprint_corners_lie_in_the_surface_plane() {
        let point = Vec3::new(1., 2., -3.);
        let normal = Vec3::new(1., 0., 1.).normalize();
        for corner in footprint_corners(point, normal) {
            assert!((corner - point).dot(normal).abs() < EPS);
            // Corners sit at the rectangle's half-diagonal from the center.
            let half_diagonal =
                (PORTAL_HALF_WIDTH * PORTAL_HALF_WIDTH + PORTAL_HALF_HEIGHT * PORTAL_HALF_HEIGHT).sqrt();
            assert!((corner.distance(point) - half_diagonal).abs() < EPS);
        }
    }

    #[test]
    fn footprint_fits_requires_all_four_corners() {
        let point = Vec3::ZERO;
        let normal = Vec3::Z;
        let mut probes = 0;
        assert!(footprint_fits(point, normal, |origin, dir| {
            probes += 1;
            assert!(dir.distance(-normal) < EPS);
            assert!((origin.z - PROBE_CLEARANCE).abs() < EPS);
            true
        }));
        assert_eq!(probes, 4);

        // One corner off the surface fails the whole footprint.
        let mut calls = 0;
        assert!(!footprint_fits(point, normal, |_, _| {
            calls += 1;
            calls != 3
        }));
    }

    #[test]
    fn auto_adjust_accepts_unobstructed_pose_directly() {
        let origin = Vec3::new(0.5, 1., 0.);
        let mut checks = 0;
        let result = auto_adjust(origin, Vec3::Z, |center| {
            checks += 1;
            assert!((center.z - SURFACE_OFFSET).abs() < EPS);
            false
        });
        assert_eq!(result, Some(origin));
        assert_eq!(checks, 1);
    }

    #[test]
    fn auto_adjust_relocates_to_a_clear_ring_sample() {
        let origin = Vec3::ZERO;
        let normal = Vec3::Z;
        // Only candidates below the origin are clear.
        let result = auto_adjust(origin, normal, |center| center.y > -0.2).unwrap();
        assert!(result.y < 0.);
        assert!((result.distance(origin) - RING_RADIUS).abs() < EPS);
        assert!(result.dot(normal).abs() < EPS, "sample left the plane");
    }

    #[test]
    fn auto_adjust_exhaustion_checks_every_sample_once() {
        let mut checks = 0;
        let result = auto_adjust(Vec3::ZERO, Vec3::Z, |_| {
            checks += 1;
            true
        });
        assert_eq!(result, None);
        assert_eq!(checks, 1 + RING_SAMPLES);
    }

    #[test]
    fn preferred_axis_points_away_from_the_other_portal() {
        let normal = Vec3::Z;
        let origin = Vec3::new(0., 1., 0.);
        // Pair mostly offset horizontally.
        let other = Vec3::new(3., 1.5, 0.);
        let axis = preferred_shift_axis(origin, normal, Some(other));
        assert!(axis.dot(origin - other) > 0.);
        assert!(axis.y.abs() < EPS);
        // Pair mostly offset vertically.
        let other = Vec3::new(0.5, 4., 0.);
        let axis = preferred_shift_axis(origin, normal, Some(other));
        assert!(axis.dot(origin - other) > 0.);
        assert!(axis.x.abs() < EPS);
    }

    #[test]
    fn directional_scan_finds_the_first_valid_offset() {
        let origin = Vec3::ZERO;
        let normal = Vec3::Z;
        let other = Some(Vec3::new(2., 0., 0.));
        let axis = preferred_shift_axis(origin, normal, other);
        let spot = find_nearby_valid_spot(origin, normal, other, |candidate| {
            candidate.distance(origin) >= 0.45
        })
        .unwrap();
        // First accepted step along the biased direction, within scan bounds.
        assert!((spot.distance(origin) - 0.5).abs() < EPS);
        assert!(spot.distance(origin) <= MAX_SHIFT + EPS);
        assert!((spot - origin).normalize().distance(axis) < EPS);
    }

    #[test]
    fn directional_scan_tries_both_directions() {
        let origin = Vec3::ZERO;
        let normal = Vec3::Z;
        let other = Some(Vec3::new(2., 0., 0.));
        let axis = preferred_shift_axis(origin, normal, other);
        // Only candidates opposite the biased direction are valid.
        let spot = find_nearby_valid_spot(origin, normal, other, |candidate| {
            (candidate - origin).dot(axis) < 0.
        })
        .unwrap();
        assert!((spot - origin).dot(axis) < 0.);
    }

    #[test]
    fn exhausted_scan_returns_none() {
        let mut calls = 0;
        let result = find_nearby_valid_spot(Vec3::ZERO, Vec3::Z, None, |_| {
            calls += 1;
            false
        });
        assert_eq!(result, None);
        // 20 steps of 0.1 up to 2.0, in both directions.
        assert_eq!(calls, 40);
    }

    #[test]
    fn pair_distance_threshold_is_sixty_percent_of_the_larger_dimension() {
        assert!((MIN_PAIR_DISTANCE - 1.2).abs() < EPS);
        assert!(too_close_to_other(Vec3::ZERO, Vec3::X * 1.1));
        assert!(!too_close_to_other(Vec3::ZERO, Vec3::X * 1.3));
    }
}
