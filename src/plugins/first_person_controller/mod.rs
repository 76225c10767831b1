//! This module contains the first person controller plugin.
//!
//! The controller accumulates look angles from the aim input (yaw on the
//! body, pitch on the camera anchor) and exposes one capability to the portal
//! core: [`FirstPersonController::set_absolute_view`], which overrides the
//! accumulated angles with an absolute world orientation after a teleport.

use bevy::{prelude::*, render::camera::Projection};
use bevy_rapier3d::prelude::*;
use euclid::Angle;
use leafwing_input_manager::prelude::*;

use crate::plugins::{
    input::{default_input_map, Actions},
    physics::*,
    portal::crossing::{CapsuleDescriptor, PortalTraveler},
};

#[derive(Debug)]
/// First person controller plugin, which registers the required systems to
/// use the first person controller also provided by this module.
pub struct FirstPersonControllerPlugin;

impl Plugin for FirstPersonControllerPlugin {
    fn build(&self, app: &mut App) {
        app.add_system(spawn_controller.label(FirstPersonLabels::SpawnControllers))
            .add_system(process_controller_inputs.label(FirstPersonLabels::ProcessInputs));
    }
}

#[derive(Debug, SystemLabel)]
/// Labels for the first person controller systems.
pub enum FirstPersonLabels {
    SpawnControllers,
    ProcessInputs,
}

#[derive(Debug, Component)]
/// First person controller component.
pub struct FirstPersonController {
    pub theta: Angle<f32>,
    pub phi: Angle<f32>,
    pub camera_anchor: Entity,
}

impl FirstPersonController {
    /// Set the controlled view's absolute world orientation, overriding the
    /// accumulated look angles. The body yaw is applied separately by the
    /// caller; this keeps the camera pitch in sync with it.
    pub fn set_absolute_view(&mut self, rotation: Quat) {
        let (yaw, pitch, _roll) = rotation.to_euler(EulerRot::YXZ);
        self.theta = Angle::radians(yaw);
        // The camera anchor applies -phi around X.
        self.phi = Angle::radians(-pitch);
    }
}

#[derive(Debug, Default, Component)]
/// Marker for first person cameras.
pub struct FirstPersonCamera;

#[derive(Debug, Component, Default)]
pub struct FirstPersonControllerSpawner {}

#[derive(Debug, Bundle, Default)]
pub struct FirstPersonControllerBundle {
    #[bundle]
    pub spatial: SpatialBundle,
    pub spawner: FirstPersonControllerSpawner,
}

const PLAYER_HEIGHT: f32 = 1.8;
const PLAYER_RADIUS: f32 = 0.4;
const EYE_HEIGHT: f32 = 1.25;

fn spawn_controller(
    mut commands: Commands,
    spawners_query: Query<(&FirstPersonControllerSpawner, Entity)>,
) {
    for (_spawner, id) in &spawners_query {
        const CAMERA_OFFSET: Vec3 = Vec3::new(0., EYE_HEIGHT - PLAYER_HEIGHT / 2., 0.);

        let camera_anchor = commands
            .spawn(SpatialBundle::from(Transform::from_translation(
                CAMERA_OFFSET,
            )))
            .insert(Name::from("Camera anchor"))
            .id();

        let camera = commands
            .spawn(Camera3dBundle {
                projection: Projection::Perspective(PerspectiveProjection {
                    fov: std::f32::consts::FRAC_PI_4,
                    aspect_ratio: 16. / 9.,
                    near: 0.1,
                    far: 1000.,
                }),
                ..default()
            })
            .insert((Name::from("Player camera"), FirstPersonCamera))
            .id();

        commands.entity(camera_anchor).push_children(&[camera]);

        commands
            .entity(id)
            .insert(InputManagerBundle {
                action_state: ActionState::default(),
                input_map: default_input_map(),
            })
            .insert((
                RigidBody::Dynamic,
                Collider::capsule_y(PLAYER_HEIGHT / 2. - PLAYER_RADIUS, PLAYER_RADIUS),
                LockedAxes::ROTATION_LOCKED_X | LockedAxes::ROTATION_LOCKED_Z,
                Velocity::default(),
                Ccd { enabled: true }, // Prevent clipping when going fast
                ActiveEvents::COLLISION_EVENTS,
                Name::from("Player"),
                CollisionGroups::new(PLAYER_GROUP, ALL_GROUPS),
                // The traveler registers its collision volume and view
                // reference here, instead of being discovered by walking the
                // hierarchy.
                PortalTraveler::new()
                    .with_capsule(CapsuleDescriptor {
                        center: Vec3::ZERO,
                        height: PLAYER_HEIGHT,
                        radius: PLAYER_RADIUS,
                    })
                    .with_view(camera),
            ))
            .add_child(camera_anchor)
            .insert(FirstPersonController {
                theta: Angle::zero(),
                phi: Angle::zero(),
                camera_anchor,
            });

        commands.entity(id).remove::<FirstPersonControllerSpawner>();
    }
}

const PLAYER_SPEED: f32 = 3.;
const MOUSE_SENSITIVITY: f32 = 0.004;
const MOUSE_ANGVEL_MULTIPLIER: f32 = -75.;
const SPRINT_MULTIPLIER: f32 = 2.;

fn process_controller_inputs(
    mut player_query: Query<(
        &ActionState<Actions>,
        &mut FirstPersonController,
        &mut Velocity,
        &Transform,
    )>,
    mut camera_query: Query<&mut Transform, Without<FirstPersonController>>,
) {
    for (input_state, mut controller, mut velocity, transform) in &mut player_query {
        let mut new_velocities = Vec3::ZERO;

        // Process movement on the forward axis
        let forward = transform.forward();
        match (
            input_state.pressed(Actions::Forward),
            input_state.pressed(Actions::Backwards),
            input_state.pressed(Actions::Sprint),
        ) {
            (true, false, sprint) => {
                let k = if sprint { SPRINT_MULTIPLIER } else { 1. };
                new_velocities.x = PLAYER_SPEED * k * forward.x;
                new_velocities.z = PLAYER_SPEED * k * forward.z;
            }
            (false, true, sprint) => {
                let k = if sprint { SPRINT_MULTIPLIER } else { 1. };
                new_velocities.x = -PLAYER_SPEED * k * forward.x;
                new_velocities.z = -PLAYER_SPEED * k * forward.z;
            }
            _ => {}
        }

        // Process movement on the lateral axis
        let left = transform.left();
        match (
            input_state.pressed(Actions::StrafeLeft),
            input_state.pressed(Actions::StrafeRight),
            input_state.pressed(Actions::Sprint),
        ) {
            (true, false, sprint) => {
                let k = if sprint { SPRINT_MULTIPLIER } else { 1. };
                new_velocities.x += PLAYER_SPEED * k * left.x;
                new_velocities.z += PLAYER_SPEED * k * left.z;
            }
            (false, true, sprint) => {
                let k = if sprint { SPRINT_MULTIPLIER } else { 1. };
                new_velocities.x += -PLAYER_SPEED * k * left.x;
                new_velocities.z += -PLAYER_SPEED * k * left.z;
            }
            _ => {}
        }

        // Vertical velocity stays under gravity's control.
        new_velocities.y = velocity.linvel.y;
        velocity.linvel = new_velocities;

        // Mouse rotation is split: yaw goes to the body root, pitch to the
        // camera anchor so the root stays vertically neutral.
        if let Some(mouse_movement) = input_state.axis_pair(Actions::Aim) {
            controller.theta += Angle::radians(mouse_movement.x()) * MOUSE_SENSITIVITY;
            controller.phi += Angle::radians(mouse_movement.y() * MOUSE_SENSITIVITY);
            controller.phi.radians = controller
                .phi
                .radians
                .clamp(-std::f32::consts::FRAC_PI_2, std::f32::consts::FRAC_PI_2);

            velocity.angvel.y = mouse_movement.x() * MOUSE_SENSITIVITY * MOUSE_ANGVEL_MULTIPLIER;
        } else {
            velocity.angvel.y = 0.;
        }

        // Applied even when the mouse is idle, so an absolute view set by a
        // teleport is picked up on the next pass.
        if let Ok(mut camera_transform) = camera_query.get_mut(controller.camera_anchor) {
            camera_transform.rotation = Quat::from_axis_angle(Vec3::X, -controller.phi.radians);
        }
    }
}
