//! Teleport resolution for crossing events.
//!
//! Position is remapped from the entry portal's local frame into the exit
//! portal's, and orientation is reflected across the portal plane (the plane
//! normal is the local Z axis of both portal frames). The body only receives
//! the yaw component; the fully pitched view rotation goes to the view
//! controller so first-person look state stays synchronized.

use bevy::prelude::*;
use bevy_rapier3d::prelude::Velocity;

use super::{crossing::PortalTraveler, Portal, PortalCrossing};
use crate::plugins::first_person_controller::FirstPersonController;

/// Re-trigger debounce window, in seconds.
pub const TELEPORT_COOLDOWN: f32 = 0.1;
/// Offset along the exit portal's forward axis, clearing the exit sensor
/// volume immediately.
pub const EXIT_CLEARANCE: f32 = 0.4;

/// Express a world position in the entry frame and reapply it in the exit
/// frame.
pub fn remap_position(entry: &Transform, exit: &Transform, world: Vec3) -> Vec3 {
    let local = entry.rotation.inverse() * (world - entry.translation);
    exit.translation + exit.rotation * local
}

/// Reflect a world direction across the portal plane on the way from the
/// entry frame to the exit frame: into entry-local coordinates, negate the
/// depth component, out through the exit rotation.
pub fn reflect_through(entry_rotation: Quat, exit_rotation: Quat, world_dir: Vec3) -> Vec3 {
    let mut local = entry_rotation.inverse() * world_dir;
    local.z = -local.z;
    exit_rotation * local
}

/// Rotation looking along `forward` with the given up reference, the
/// look-at construction applied to a reflected forward/up pair.
pub fn look_rotation(forward: Vec3, up: Vec3) -> Quat {
    let back = -forward.normalize();
    let mut right = up.cross(back);
    if right.length_squared() < 1e-6 {
        // Up reference parallel to forward, pick another.
        right = Vec3::Y.cross(back);
        if right.length_squared() < 1e-6 {
            right = Vec3::X;
        }
    }
    let right = right.normalize();
    let up = back.cross(right);
    Quat::from_mat3(&Mat3::from_cols(right, up, back))
}

/// The yaw component of a rotation, keeping a grounded body's feet facing
/// the movement direction.
pub fn yaw_only(rotation: Quat) -> Quat {
    let (yaw, _pitch, _roll) = rotation.to_euler(EulerRot::YXZ);
    Quat::from_rotation_y(yaw)
}

/// Full reflected world rotation for a view with the given world axes.
pub fn reflected_view_rotation(
    entry: &Transform,
    exit: &Transform,
    view_forward: Vec3,
    view_up: Vec3,
) -> Quat {
    look_rotation(
        reflect_through(entry.rotation, exit.rotation, view_forward),
        reflect_through(entry.rotation, exit.rotation, view_up),
    )
}

pub(super) fn teleport_travelers(
    mut crossings: EventReader<PortalCrossing>,
    portals: Query<(&Portal, &Transform), Without<PortalTraveler>>,
    mut travelers: Query<
        (
            &mut Transform,
            &mut PortalTraveler,
            Option<&mut Velocity>,
            Option<&mut FirstPersonController>,
        ),
        Without<Portal>,
    >,
    views: Query<&GlobalTransform, (Without<Portal>, Without<PortalTraveler>)>,
    time: Res<Time>,
) {
    let now = time.elapsed_seconds();
    for crossing in crossings.iter() {
        let Ok((mut transform, mut traveler, velocity, controller)) =
            travelers.get_mut(crossing.traveler)
        else {
            continue;
        };
        if traveler.cooldown_active(now) {
            continue;
        }
        let Ok((entry_portal, entry)) = portals.get(crossing.portal) else {
            continue;
        };
        // No-op until both portals are placed.
        let Some((exit_portal, exit)) = entry_portal
            .linked
            .and_then(|linked| portals.get(linked).ok())
        else {
            continue;
        };
        let entry = *entry;
        let exit = *exit;

        transform.translation =
            remap_position(&entry, &exit, transform.translation) + exit.forward() * EXIT_CLEARANCE;

        let view_axes = traveler
            .view
            .and_then(|view| views.get(view).ok())
            .map(|view| (view.forward(), view.up()));
        let full_rotation = match view_axes {
            Some((forward, up)) => reflected_view_rotation(&entry, &exit, forward, up),
            None => {
                // No registered view, derive the yaw from the body axes with
                // the same reflection math.
                debug!(
                    "traveler {:?} has no view reference, yaw-only teleport",
                    crossing.traveler
                );
                reflected_view_rotation(&entry, &exit, transform.forward(), transform.up())
            }
        };
        transform.rotation = yaw_only(full_rotation);
        if let Some(mut controller) = controller {
            controller.set_absolute_view(full_rotation);
        }

        // Momentum follows the same plane reflection.
        if let Some(mut velocity) = velocity {
            velocity.linvel = reflect_through(entry.rotation, exit.rotation, velocity.linvel);
            velocity.angvel = reflect_through(entry.rotation, exit.rotation, velocity.angvel);
        }

        info!(
            "teleported traveler {:?} from portal {:?} to portal {:?}",
            crossing.traveler, entry_portal.id, exit_portal.id
        );
        traveler.note_teleport(now);
        // Re-enter detection as if freshly arrived in the exit volume: the
        // sensor events (or the occupancy probe) repopulate the sample state
        // next tick, and the cooldown blocks an immediate re-trigger cascade.
        traveler.end_occupancy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::portal::placement::surface_rotation;

    const EPS: f32 = 1e-4;

    fn portal_on_wall(point: Vec3, normal: Vec3) -> Transform {
        Transform::from_translation(point).with_rotation(surface_rotation(normal))
    }

    #[test]
    fn remap_round_trip_restores_the_position() {
        let entry = portal_on_wall(Vec3::new(0., 1., -5.), Vec3::Z);
        let exit = portal_on_wall(Vec3::new(7., 2., 3.), Vec3::X);
        let start = Vec3::new(0.3, 1.4, -4.2);
        let there = remap_position(&entry, &exit, start);
        let back = remap_position(&exit, &entry, there);
        assert!(back.distance(start) < EPS);
    }

    #[test]
    fn remap_preserves_offsets_in_the_portal_frame() {
        let entry = portal_on_wall(Vec3::new(0., 1., -5.), Vec3::Z);
        let exit = portal_on_wall(Vec3::new(7., 2., 3.), Vec3::X);
        // A point one unit in front of the entry ends up one unit in front of
        // the exit.
        let start = entry.translation + entry.forward();
        let mapped = remap_position(&entry, &exit, start);
        assert!(mapped.distance(exit.translation + exit.forward()) < EPS);
    }

    #[test]
    fn reflection_turns_an_approach_into_a_departure() {
        let entry = portal_on_wall(Vec3::new(0., 1., -5.), Vec3::Z);
        let exit = portal_on_wall(Vec3::new(7., 2., 3.), Vec3::X);
        // Walking into the entry portal, against its outward normal.
        let incoming = -entry.forward();
        let outgoing = reflect_through(entry.rotation, exit.rotation, incoming);
        assert!(outgoing.distance(exit.forward()) < EPS);
    }

    #[test]
    fn reflection_round_trip_restores_the_orientation() {
        let entry = portal_on_wall(Vec3::new(0., 1., -5.), Vec3::new(0., 0., 1.));
        let exit = portal_on_wall(Vec3::new(7., 2., 3.), Vec3::new(1., 0., 1.).normalize());
        let original = Quat::from_euler(EulerRot::YXZ, 0.7, -0.3, 0.);
        let forward = original * Vec3::NEG_Z;
        let up = original * Vec3::Y;
        let through = reflected_view_rotation(&entry, &exit, forward, up);
        let back = reflected_view_rotation(
            &exit,
            &entry,
            through * Vec3::NEG_Z,
            through * Vec3::Y,
        );
        assert!((back * Vec3::NEG_Z).distance(forward) < EPS);
        assert!((back * Vec3::Y).distance(up) < EPS);
    }

    #[test]
    fn look_rotation_matches_the_requested_axes() {
        assert!(look_rotation(Vec3::NEG_Z, Vec3::Y)
            .angle_between(Quat::IDENTITY)
            .abs()
            < EPS);
        let rotation = look_rotation(Vec3::X, Vec3::Y);
        assert!((rotation * Vec3::NEG_Z).distance(Vec3::X) < EPS);
        assert!((rotation * Vec3::Y).distance(Vec3::Y) < EPS);
    }

    #[test]
    fn yaw_only_strips_pitch_and_roll() {
        let rotation = Quat::from_euler(EulerRot::YXZ, 1.1, 0.4, 0.2);
        let yaw = yaw_only(rotation);
        assert!(yaw.angle_between(Quat::from_rotation_y(1.1)) < EPS);
        // A grounded body stays upright.
        assert!((yaw * Vec3::Y).distance(Vec3::Y) < EPS);
    }
}
