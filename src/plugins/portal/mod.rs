//! The portal subsystem: placement, crossing detection and teleportation.
//!
//! Placement feeds the plane transforms that crossing detection and the
//! teleport transform consume. Portal-view rendering is an external
//! collaborator driven by the [`PortalPlaced`] event stream.

use bevy::{prelude::*, transform::TransformSystem};
use bevy_prototype_debug_lines::DebugLines;
use bevy_rapier3d::prelude::*;
use leafwing_input_manager::prelude::ActionState;

pub mod crossing;
pub mod placement;
pub mod teleport;

use placement::*;

use super::{
    first_person_controller::{FirstPersonCamera, FirstPersonController},
    input::Actions,
    physics::*,
};

/// Maximum range of the portal gun raycast.
const MAX_FIRE_DISTANCE: f32 = 100.;
/// Half depth of the portal sensor volume, extending to both sides of the
/// plane so a crossing body stays inside it while it passes.
const SENSOR_HALF_DEPTH: f32 = 0.3;

#[derive(Debug)]
pub struct PortalPlugin;

/// The two portal identities. At most one live instance exists per identity;
/// placing again repositions the pooled instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortalId {
    Primary,
    Secondary,
}

impl PortalId {
    pub const ALL: [PortalId; 2] = [PortalId::Primary, PortalId::Secondary];

    pub fn other(self) -> Self {
        match self {
            PortalId::Primary => PortalId::Secondary,
            PortalId::Secondary => PortalId::Primary,
        }
    }

    fn index(self) -> usize {
        match self {
            PortalId::Primary => 0,
            PortalId::Secondary => 1,
        }
    }

    fn fire_action(self) -> Actions {
        match self {
            PortalId::Primary => Actions::FirePrimaryPortal,
            PortalId::Secondary => Actions::FireSecondaryPortal,
        }
    }
}

/// A placed portal instance. `linked` is kept symmetric by
/// [`relink_portals`]: either both instances reference each other or a lone
/// instance references nothing.
#[derive(Debug, Component)]
pub struct Portal {
    pub id: PortalId,
    pub active: bool,
    pub linked: Option<Entity>,
}

/// Marker for geometry portals may be placed on.
#[derive(Debug, Default, Component)]
pub struct PortalSurface;

/// Pooled portal instances, one slot per identity. Held as a resource and
/// handed to systems through their parameters; nothing reaches for it
/// globally.
#[derive(Debug, Default, Resource)]
pub struct PortalRegistry {
    instances: [Option<Entity>; 2],
}

impl PortalRegistry {
    pub fn get(&self, id: PortalId) -> Option<Entity> {
        self.instances[id.index()]
    }

    fn set(&mut self, id: PortalId, entity: Entity) {
        self.instances[id.index()] = Some(entity);
    }
}

/// A validated placement request, from the shooter to the registry.
#[derive(Debug)]
pub struct PlacePortalRequest {
    pub id: PortalId,
    pub hit: SurfaceHit,
}

/// Emitted whenever a portal instance is placed or repositioned. This is the
/// interface the rendering collaborator consumes.
#[derive(Debug)]
pub struct PortalPlaced {
    pub id: PortalId,
    pub portal: Entity,
}

/// A traveler's collision volume crossed the occupied portal's plane.
#[derive(Debug)]
pub struct PortalCrossing {
    pub traveler: Entity,
    pub portal: Entity,
}

#[derive(Debug, SystemLabel)]
pub enum PortalLabels {
    ShootPortals,
    PlacePortals,
    LinkPortals,
    TrackOccupancy,
    HealOccupancy,
    DetectCrossings,
    TeleportTravelers,
}

#[derive(Debug, Resource)]
struct PortalAssets {
    mesh: Handle<Mesh>,
    materials: [Handle<StandardMaterial>; 2],
}

impl Plugin for PortalPlugin {
    fn build(&self, app: &mut App) {
        app.add_event::<PlacePortalRequest>()
            .add_event::<PortalPlaced>()
            .add_event::<PortalCrossing>()
            .init_resource::<PortalRegistry>()
            .add_startup_system(load_portal_assets)
            .add_system(shoot_portals.label(PortalLabels::ShootPortals))
            .add_system(
                place_portals
                    .label(PortalLabels::PlacePortals)
                    .after(PortalLabels::ShootPortals),
            )
            .add_system(
                relink_portals
                    .label(PortalLabels::LinkPortals)
                    .after(PortalLabels::PlacePortals),
            )
            // Crossing detection and teleportation run on the physics clock:
            // after the Rapier writeback and transform propagation, before
            // rendering sees the frame.
            .add_system_to_stage(
                CoreStage::PostUpdate,
                crossing::track_portal_occupancy
                    .label(PortalLabels::TrackOccupancy)
                    .after(TransformSystem::TransformPropagate),
            )
            .add_system_to_stage(
                CoreStage::PostUpdate,
                crossing::heal_missed_occupancy
                    .label(PortalLabels::HealOccupancy)
                    .after(PortalLabels::TrackOccupancy),
            )
            .add_system_to_stage(
                CoreStage::PostUpdate,
                crossing::detect_crossings
                    .label(PortalLabels::DetectCrossings)
                    .after(PortalLabels::HealOccupancy),
            )
            .add_system_to_stage(
                CoreStage::PostUpdate,
                teleport::teleport_travelers
                    .label(PortalLabels::TeleportTravelers)
                    .after(PortalLabels::DetectCrossings),
            );
    }
}

fn load_portal_assets(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    let mesh = meshes.add(
        shape::Quad {
            size: Vec2::new(PORTAL_HALF_WIDTH * 2., PORTAL_HALF_HEIGHT * 2.),
            flip: false,
        }
        .into(),
    );
    let materials = [
        materials.add(StandardMaterial {
            base_color: Color::rgb(0.2, 0.5, 1.0),
            unlit: true,
            ..default()
        }),
        materials.add(StandardMaterial {
            base_color: Color::rgb(1.0, 0.55, 0.1),
            unlit: true,
            ..default()
        }),
    ];
    commands.insert_resource(PortalAssets { mesh, materials });
}

/// Position of the active paired portal, if any.
fn other_portal_position(
    registry: &PortalRegistry,
    portals: &Query<(&Portal, &Transform)>,
    id: PortalId,
) -> Option<Vec3> {
    let entity = registry.get(id.other())?;
    let (portal, transform) = portals.get(entity).ok()?;
    portal.active.then_some(transform.translation)
}

/// Raycast from the view and validate a placement pose on the hit surface:
/// the whole footprint must sit on portalable surface and keep its distance
/// from the paired portal, shifting along the preferred in-plane axis when
/// the direct pose fails. Valid poses become [`PlacePortalRequest`]s.
fn shoot_portals(
    camera_query: Query<&GlobalTransform, With<FirstPersonCamera>>,
    shooter_query: Query<&ActionState<Actions>, With<FirstPersonController>>,
    surfaces: Query<(), With<PortalSurface>>,
    portals: Query<(&Portal, &Transform)>,
    registry: Res<PortalRegistry>,
    rapier: Res<RapierContext>,
    mut lines: ResMut<DebugLines>,
    mut requests: EventWriter<PlacePortalRequest>,
) {
    let (Ok(camera), Ok(actions)) = (camera_query.get_single(), shooter_query.get_single())
    else {
        return;
    };
    for id in PortalId::ALL {
        if !actions.just_pressed(id.fire_action()) {
            continue;
        }
        let Some((entity, intersection)) = rapier.cast_ray_and_get_normal(
            camera.translation(),
            camera.forward(),
            MAX_FIRE_DISTANCE,
            true,
            QueryFilter::only_fixed(),
        ) else {
            continue;
        };
        if !surfaces.contains(entity) {
            debug!("portal shot hit non-portalable geometry");
            continue;
        }
        let hit = SurfaceHit {
            point: intersection.point,
            normal: intersection.normal,
        };
        let other = other_portal_position(&registry, &portals, id);

        let probe_filter = QueryFilter::only_fixed()
            .groups(CollisionGroups::new(ALL_GROUPS, PORTAL_SURFACE_GROUP).into());
        let mut probe = |origin: Vec3, dir: Vec3| {
            let ok = rapier
                .cast_ray(origin, dir, PROBE_LENGTH, true, probe_filter)
                .map_or(false, |(hit_entity, _)| surfaces.contains(hit_entity));
            let color = if ok { Color::GREEN } else { Color::RED };
            lines.line_colored(origin, origin + dir * PROBE_LENGTH, 1., color);
            ok
        };

        let direct_ok = footprint_fits(hit.point, hit.normal, &mut probe)
            && other.map_or(true, |o| !too_close_to_other(hit.point, o));
        let point = if direct_ok {
            Some(hit.point)
        } else {
            find_nearby_valid_spot(hit.point, hit.normal, other, |candidate| {
                footprint_fits(candidate, hit.normal, &mut probe)
                    && other.map_or(true, |o| !too_close_to_other(candidate, o))
            })
        };
        match point {
            Some(point) => requests.send(PlacePortalRequest {
                id,
                hit: SurfaceHit { point, ..hit },
            }),
            None => warn!("no valid {:?} portal spot found nearby", id),
        }
    }
}

/// Resolve overlaps for requested poses and apply them to the pooled
/// instances: reuse (or lazily spawn) the identity's instance, overwrite its
/// transform, reactivate it. A request with no clear pose is dropped without
/// touching registry state.
fn place_portals(
    mut commands: Commands,
    mut requests: EventReader<PlacePortalRequest>,
    mut registry: ResMut<PortalRegistry>,
    mut portals: Query<(&mut Portal, &mut Transform, &mut Visibility)>,
    rapier: Res<RapierContext>,
    assets: Res<PortalAssets>,
    mut placed: EventWriter<PortalPlaced>,
) {
    for request in requests.iter() {
        let SurfaceHit { point, normal } = request.hit;
        let rotation = surface_rotation(normal);
        let overlap_shape =
            Collider::cuboid(PORTAL_HALF_WIDTH, PORTAL_HALF_HEIGHT, OVERLAP_HALF_DEPTH);
        // Everything except portalable surface blocks placement, as does any
        // other collider; sensors (the portals themselves) do not.
        let overlap_filter = QueryFilter::default()
            .exclude_sensors()
            .groups(
                CollisionGroups::new(ALL_GROUPS, ALL_GROUPS.difference(PORTAL_SURFACE_GROUP))
                    .into(),
            );
        let Some(point) = auto_adjust(point, normal, |center| {
            rapier
                .intersection_with_shape(center, rotation, &overlap_shape, overlap_filter)
                .is_some()
        }) else {
            info!(
                "no space for {:?} portal at {}, even after auto-adjust",
                request.id, point
            );
            continue;
        };

        let pose = Transform::from_translation(point + normal * SURFACE_OFFSET)
            .with_rotation(rotation);
        let entity = match registry.get(request.id) {
            Some(entity) => {
                if let Ok((mut portal, mut transform, mut visibility)) = portals.get_mut(entity) {
                    *transform = pose;
                    portal.active = true;
                    visibility.is_visible = true;
                }
                entity
            }
            None => spawn_portal_instance(&mut commands, request.id, pose, &assets),
        };
        registry.set(request.id, entity);
        info!("placed {:?} portal at {}", request.id, pose.translation);
        placed.send(PortalPlaced {
            id: request.id,
            portal: entity,
        });
    }
}

fn spawn_portal_instance(
    commands: &mut Commands,
    id: PortalId,
    pose: Transform,
    assets: &PortalAssets,
) -> Entity {
    commands
        .spawn((
            PbrBundle {
                mesh: assets.mesh.clone(),
                material: assets.materials[id.index()].clone(),
                transform: pose,
                ..default()
            },
            Portal {
                id,
                active: true,
                linked: None,
            },
            Name::from(format!("{:?} portal", id)),
            Collider::cuboid(PORTAL_HALF_WIDTH, PORTAL_HALF_HEIGHT, SENSOR_HALF_DEPTH),
            Sensor,
            ActiveEvents::COLLISION_EVENTS,
            CollisionGroups::new(PORTAL_GROUP, PLAYER_GROUP | PROPS_GROUP),
        ))
        .id()
}

/// Repair the symmetric link whenever both identities have an instance.
/// Idempotent; a lone portal keeps a null link.
fn relink_portals(registry: Res<PortalRegistry>, mut portals: Query<&mut Portal>) {
    let (Some(primary), Some(secondary)) = (
        registry.get(PortalId::Primary),
        registry.get(PortalId::Secondary),
    ) else {
        return;
    };
    if let Ok([mut a, mut b]) = portals.get_many_mut([primary, secondary]) {
        if a.linked != Some(secondary) {
            a.linked = Some(secondary);
        }
        if b.linked != Some(primary) {
            b.linked = Some(primary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_portal(world: &mut World, id: PortalId) -> Entity {
        world
            .spawn(Portal {
                id,
                active: true,
                linked: None,
            })
            .id()
    }

    fn run_relink(world: &mut World) {
        let mut stage = SystemStage::single(relink_portals);
        stage.run(world);
    }

    #[test]
    fn lone_portal_stays_unlinked() {
        let mut world = World::new();
        let primary = spawn_portal(&mut world, PortalId::Primary);
        let mut registry = PortalRegistry::default();
        registry.set(PortalId::Primary, primary);
        world.insert_resource(registry);

        run_relink(&mut world);
        assert_eq!(world.get::<Portal>(primary).unwrap().linked, None);
    }

    #[test]
    fn linking_is_symmetric_after_any_placement_order() {
        let mut world = World::new();
        let primary = spawn_portal(&mut world, PortalId::Primary);
        let secondary = spawn_portal(&mut world, PortalId::Secondary);
        let mut registry = PortalRegistry::default();
        registry.set(PortalId::Primary, primary);
        registry.set(PortalId::Secondary, secondary);
        world.insert_resource(registry);

        run_relink(&mut world);
        assert_eq!(world.get::<Portal>(primary).unwrap().linked, Some(secondary));
        assert_eq!(world.get::<Portal>(secondary).unwrap().linked, Some(primary));

        // Repositioning (another relink pass) keeps the invariant.
        run_relink(&mut world);
        assert_eq!(world.get::<Portal>(primary).unwrap().linked, Some(secondary));
        assert_eq!(world.get::<Portal>(secondary).unwrap().linked, Some(primary));
    }

    #[test]
    fn identities_are_mutually_other() {
        assert_eq!(PortalId::Primary.other(), PortalId::Secondary);
        assert_eq!(PortalId::Secondary.other(), PortalId::Primary);
    }
}
