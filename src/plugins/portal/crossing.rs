//! Plane-crossing detection for portal travelers.
//!
//! Per physics tick, a traveler occupying a portal's sensor volume samples the
//! signed clearance of its capsule end spheres against the portal plane. A
//! strictly-positive to non-positive transition between consecutive ticks is
//! a crossing. Occupancy is driven by collision events, with a sphere-overlap
//! probe as a fallback for dropped enter events.

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use super::{Portal, PortalCrossing};
use crate::plugins::physics::*;

/// Collision filters applied to a traveler while it overlaps a portal, so the
/// body can pass through the wall behind the portal.
const IN_PORTAL_FILTERS: Group = PLAYER_GROUP
    .union(PROPS_GROUP)
    .union(PORTAL_GROUP);

/// Capsule shape of a traveler's collision volume, registered explicitly at
/// construction. `center` is in the traveler's local frame, `height` is the
/// full end-to-end height along the local up axis.
#[derive(Debug, Clone, Copy)]
pub struct CapsuleDescriptor {
    pub center: Vec3,
    pub height: f32,
    pub radius: f32,
}

/// A body whose portal crossings are detected and resolved.
///
/// Travelers without a capsule descriptor fall back to a single sample at the
/// body center with zero radius.
#[derive(Debug, Component)]
pub struct PortalTraveler {
    pub capsule: Option<CapsuleDescriptor>,
    /// The view whose world orientation seeds the teleport reflection,
    /// registered at construction rather than discovered in the hierarchy.
    pub view: Option<Entity>,
    current_portal: Option<Entity>,
    last_signed: [f32; 2],
    last_teleport: f32,
}

impl Default for PortalTraveler {
    fn default() -> Self {
        PortalTraveler {
            capsule: None,
            view: None,
            current_portal: None,
            last_signed: [f32::INFINITY; 2],
            last_teleport: f32::NEG_INFINITY,
        }
    }
}

impl PortalTraveler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capsule(mut self, capsule: CapsuleDescriptor) -> Self {
        self.capsule = Some(capsule);
        self
    }

    pub fn with_view(mut self, view: Entity) -> Self {
        self.view = Some(view);
        self
    }

    pub fn occupied_portal(&self) -> Option<Entity> {
        self.current_portal
    }

    /// Begin occupancy of a portal and seed the sample state. Returns true
    /// when a sample is already at or behind the plane, the immediate-entry
    /// case for bodies fast enough to skip the sensor boundary.
    pub fn begin_occupancy(&mut self, portal: Entity, samples: [f32; 2]) -> bool {
        self.current_portal = Some(portal);
        self.last_signed = samples;
        samples[0] <= 0. || samples[1] <= 0.
    }

    /// Record this tick's samples; true exactly when either sample moved from
    /// strictly positive to zero-or-negative since the previous tick.
    pub fn observe(&mut self, samples: [f32; 2]) -> bool {
        let crossing = crossed(self.last_signed[0], samples[0])
            || crossed(self.last_signed[1], samples[1]);
        self.last_signed = samples;
        crossing
    }

    pub fn end_occupancy(&mut self) {
        self.current_portal = None;
        self.last_signed = [f32::INFINITY; 2];
    }

    pub fn note_teleport(&mut self, now: f32) {
        self.last_teleport = now;
    }

    pub fn cooldown_active(&self, now: f32) -> bool {
        now - self.last_teleport < super::teleport::TELEPORT_COOLDOWN
    }
}

pub fn crossed(previous: f32, current: f32) -> bool {
    previous > 0. && current <= 0.
}

/// Half length of the capsule's inner segment. Degenerate capsules (radius at
/// least half the height) clamp to zero and collapse to single-point
/// sampling.
pub fn half_segment(capsule: &CapsuleDescriptor) -> f32 {
    (capsule.height / 2. - capsule.radius).max(0.)
}

/// World positions of the two end-sphere centers, offset from the capsule
/// center along the body's up axis.
pub fn capsule_sample_points(transform: &Transform, capsule: &CapsuleDescriptor) -> [Vec3; 2] {
    let axis = transform.up();
    let center = transform.translation + transform.rotation * capsule.center;
    let offset = axis * half_segment(capsule);
    [center + offset, center - offset]
}

/// Signed clearance of a sample sphere against the portal plane: positive in
/// front, non-positive at or behind.
pub fn signed_clearance(normal: Vec3, sample: Vec3, plane_point: Vec3, radius: f32) -> f32 {
    normal.dot(sample - plane_point) - radius
}

/// Radius of the fallback occupancy probe, derived from the traveler's
/// bounds and widened slightly so it reliably overlaps sensor volumes.
pub fn occupancy_probe_radius(capsule: Option<&CapsuleDescriptor>) -> f32 {
    match capsule {
        Some(c) => c.radius.max(0.3).max(c.height * 0.25) + 0.1,
        None => 0.6,
    }
}

/// Current signed clearances of a traveler against a portal. Plane points are
/// per-sample closest points on the portal's sensor collider, falling back to
/// the portal origin when the query finds nothing.
fn sample_clearances(
    rapier: &RapierContext,
    portal_entity: Entity,
    portal_transform: &GlobalTransform,
    traveler_transform: &GlobalTransform,
    capsule: Option<&CapsuleDescriptor>,
) -> [f32; 2] {
    let normal = portal_transform.forward();
    let (samples, radius) = match capsule {
        Some(capsule) => (
            capsule_sample_points(&traveler_transform.compute_transform(), capsule),
            capsule.radius,
        ),
        // Bounding-volume center fallback: one duplicated sample.
        None => ([traveler_transform.translation(); 2], 0.),
    };
    let only_this_portal = |entity: Entity| entity == portal_entity;
    let filter = QueryFilter::default().predicate(&only_this_portal);
    samples.map(|sample| {
        let plane_point = rapier
            .project_point(sample, true, filter)
            .map(|(_, projection)| projection.point)
            .unwrap_or_else(|| portal_transform.translation());
        signed_clearance(normal, sample, plane_point, radius)
    })
}

fn adopt_portal(
    rapier: &RapierContext,
    traveler_entity: Entity,
    traveler: &mut PortalTraveler,
    groups: &mut CollisionGroups,
    traveler_transform: &GlobalTransform,
    portal_entity: Entity,
    portal: &Portal,
    portal_transform: &GlobalTransform,
    now: f32,
    crossings: &mut EventWriter<PortalCrossing>,
) {
    let samples = sample_clearances(
        rapier,
        portal_entity,
        portal_transform,
        traveler_transform,
        traveler.capsule.as_ref(),
    );
    let immediate = traveler.begin_occupancy(portal_entity, samples);
    groups.filters = IN_PORTAL_FILTERS;
    debug!(
        "traveler {:?} entered portal {:?}, clearances {:?}",
        traveler_entity, portal.id, samples
    );
    if immediate && portal.linked.is_some() && !traveler.cooldown_active(now) {
        crossings.send(PortalCrossing {
            traveler: traveler_entity,
            portal: portal_entity,
        });
    }
}

/// Primary occupancy path: portal sensor enter/exit collision events.
pub(super) fn track_portal_occupancy(
    mut collisions: EventReader<CollisionEvent>,
    portals: Query<(&Portal, &GlobalTransform)>,
    mut travelers: Query<(&mut PortalTraveler, &mut CollisionGroups, &GlobalTransform)>,
    rapier: Res<RapierContext>,
    time: Res<Time>,
    mut crossings: EventWriter<PortalCrossing>,
) {
    let now = time.elapsed_seconds();
    for collision in collisions.iter() {
        let (&e1, &e2, started) = match collision {
            CollisionEvent::Started(e1, e2, _) => (e1, e2, true),
            CollisionEvent::Stopped(e1, e2, _) => (e1, e2, false),
        };
        let (portal_entity, traveler_entity) = if portals.contains(e1) {
            (e1, e2)
        } else if portals.contains(e2) {
            (e2, e1)
        } else {
            continue;
        };
        let Ok((mut traveler, mut groups, transform)) = travelers.get_mut(traveler_entity) else {
            continue;
        };
        let Ok((portal, portal_transform)) = portals.get(portal_entity) else {
            continue;
        };
        if started {
            adopt_portal(
                &rapier,
                traveler_entity,
                &mut traveler,
                &mut groups,
                transform,
                portal_entity,
                portal,
                portal_transform,
                now,
                &mut crossings,
            );
        } else {
            if traveler.occupied_portal() == Some(portal_entity) {
                traveler.end_occupancy();
                debug!("traveler {:?} left portal {:?}", traveler_entity, portal.id);
            }
            // A teleport may already have cleared occupancy before the exit
            // event arrives; restore filters either way once fully outside.
            if traveler.occupied_portal().is_none() {
                groups.filters = ALL_GROUPS;
            }
        }
    }
}

/// Fallback occupancy path: when no enter event set occupancy, probe a sphere
/// around the traveler for a linked portal's sensor volume. This keeps a
/// dropped enter event from permanently missing a portal; explicit events
/// stay authoritative since the probe only runs while unoccupied.
pub(super) fn heal_missed_occupancy(
    rapier: Res<RapierContext>,
    portals: Query<(&Portal, &GlobalTransform)>,
    mut travelers: Query<(
        Entity,
        &mut PortalTraveler,
        &mut CollisionGroups,
        &GlobalTransform,
    )>,
    time: Res<Time>,
    mut crossings: EventWriter<PortalCrossing>,
) {
    let now = time.elapsed_seconds();
    for (traveler_entity, mut traveler, mut groups, transform) in &mut travelers {
        if traveler.occupied_portal().is_some() {
            continue;
        }
        let radius = occupancy_probe_radius(traveler.capsule.as_ref());
        let probe = Collider::ball(radius);
        let filter = QueryFilter::default()
            .groups(CollisionGroups::new(ALL_GROUPS, PORTAL_GROUP).into());
        let mut found = None;
        rapier.intersections_with_shape(
            transform.translation(),
            Quat::IDENTITY,
            &probe,
            filter,
            |entity| {
                // Only adopt linked portals, an unlinked one cannot teleport.
                match portals.get(entity) {
                    Ok((portal, _)) if portal.active && portal.linked.is_some() => {
                        found = Some(entity);
                        false
                    }
                    _ => true,
                }
            },
        );
        if let Some(portal_entity) = found {
            let Ok((portal, portal_transform)) = portals.get(portal_entity) else {
                continue;
            };
            debug!(
                "occupancy probe adopted portal {:?} for traveler {:?}",
                portal.id, traveler_entity
            );
            adopt_portal(
                &rapier,
                traveler_entity,
                &mut traveler,
                &mut groups,
                transform,
                portal_entity,
                portal,
                portal_transform,
                now,
                &mut crossings,
            );
        }
    }
}

/// Per-tick crossing detection for occupied travelers.
pub(super) fn detect_crossings(
    rapier: Res<RapierContext>,
    portals: Query<(&Portal, &GlobalTransform)>,
    mut travelers: Query<(Entity, &mut PortalTraveler, &GlobalTransform)>,
    time: Res<Time>,
    mut crossings: EventWriter<PortalCrossing>,
) {
    let now = time.elapsed_seconds();
    for (traveler_entity, mut traveler, transform) in &mut travelers {
        let Some(portal_entity) = traveler.occupied_portal() else {
            continue;
        };
        let Ok((portal, portal_transform)) = portals.get(portal_entity) else {
            continue;
        };
        // A lone portal is a valid transient state, not an error.
        if !portal.active || portal.linked.is_none() || traveler.cooldown_active(now) {
            continue;
        }
        let samples = sample_clearances(
            &rapier,
            portal_entity,
            portal_transform,
            transform,
            traveler.capsule.as_ref(),
        );
        if traveler.observe(samples) {
            debug!(
                "traveler {:?} crossed portal {:?} plane, clearances {:?}",
                traveler_entity, portal.id, samples
            );
            crossings.send(PortalCrossing {
                traveler: traveler_entity,
                portal: portal_entity,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    fn capsule(height: f32, radius: f32) -> CapsuleDescriptor {
        CapsuleDescriptor {
            center: Vec3::ZERO,
            height,
            radius,
        }
    }

    #[test]
    fn crossing_requires_strictly_positive_to_non_positive() {
        assert!(crossed(0.3, -0.05));
        assert!(crossed(0.1, 0.));
        assert!(!crossed(0.3, 0.2));
        assert!(!crossed(0., -0.1));
        assert!(!crossed(-0.2, -0.3));
        assert!(!crossed(-0.1, 0.4));
    }

    #[test]
    fn degenerate_capsule_collapses_to_single_point() {
        assert!((half_segment(&capsule(1.8, 0.4)) - 0.5).abs() < EPS);
        assert_eq!(half_segment(&capsule(0.8, 0.5)), 0.);
        let points =
            capsule_sample_points(&Transform::from_xyz(1., 2., 3.), &capsule(0.8, 0.5));
        assert!(points[0].distance(points[1]) < EPS);
    }

    #[test]
    fn sample_points_follow_the_body_up_axis() {
        let transform = Transform::from_xyz(0., 1., 0.)
            .with_rotation(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let [top, bottom] = capsule_sample_points(&transform, &capsule(1.8, 0.4));
        // Body tipped on its side: up axis is now world -X.
        assert!(top.distance(Vec3::new(-0.5, 1., 0.)) < EPS);
        assert!(bottom.distance(Vec3::new(0.5, 1., 0.)) < EPS);
    }

    #[test]
    fn signed_clearance_subtracts_the_sample_radius() {
        let normal = Vec3::Z;
        let plane_point = Vec3::ZERO;
        assert!((signed_clearance(normal, Vec3::Z * 1., plane_point, 0.4) - 0.6).abs() < EPS);
        assert!(signed_clearance(normal, Vec3::Z * 0.3, plane_point, 0.4) < 0.);
    }

    #[test]
    fn immediate_entry_fires_when_a_sample_starts_behind() {
        let mut traveler = PortalTraveler::new();
        assert!(traveler.begin_occupancy(Entity::from_raw(1), [0.5, -0.1]));
        let mut traveler = PortalTraveler::new();
        assert!(!traveler.begin_occupancy(Entity::from_raw(1), [0.5, 0.1]));
    }

    #[test]
    fn crossing_fires_exactly_once_for_one_pass() {
        let mut traveler = PortalTraveler::new();
        assert!(!traveler.begin_occupancy(Entity::from_raw(1), [0.3, 0.2]));
        assert!(traveler.observe([-0.05, 0.1]));
        // The teleport stamps the cooldown; oscillation near zero within the
        // window is debounced by the caller checking it.
        traveler.note_teleport(10.0);
        assert!(traveler.cooldown_active(10.05));
        assert!(!traveler.cooldown_active(10.2));
    }

    #[test]
    fn end_occupancy_resets_sample_state() {
        let mut traveler = PortalTraveler::new();
        traveler.begin_occupancy(Entity::from_raw(1), [0.3, 0.2]);
        traveler.end_occupancy();
        assert_eq!(traveler.occupied_portal(), None);
        // Fresh occupancy does not inherit the old samples.
        assert!(!traveler.begin_occupancy(Entity::from_raw(2), [0.4, 0.4]));
        assert!(!traveler.observe([0.4, 0.4]));
    }

    #[test]
    fn probe_radius_covers_the_capsule_bounds() {
        assert!((occupancy_probe_radius(Some(&capsule(1.8, 0.4))) - 0.55).abs() < EPS);
        assert!((occupancy_probe_radius(Some(&capsule(0.4, 0.1))) - 0.4).abs() < EPS);
        assert!((occupancy_probe_radius(None) - 0.6).abs() < EPS);
    }
}
