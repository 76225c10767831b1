use std::f32::consts::*;

use crate::{plugins::*, util::scenes::make_test_chamber};

use bevy::{prelude::*, window::WindowPlugin};
use bevy_rapier3d::prelude::*;

use first_person_controller::FirstPersonControllerBundle;
use physics::{ALL_GROUPS, PROPS_GROUP};
use portal::crossing::PortalTraveler;

#[derive(Debug)]
/// Main game plugin, responsible for loading the other game plugins and bootstrapping the game.
pub struct GamePlugin;

impl Plugin for GamePlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(DefaultPlugins.set(WindowPlugin {
            window: WindowDescriptor {
                title: "Lost Portal v0.1".to_string(),
                width: 1280.,
                height: 720.,
                ..default()
            },
            ..default()
        }));

        #[cfg(feature = "devel")]
        {
            app.add_plugins(debug::DeveloperPlugins);
        }

        app.add_plugin(RapierPhysicsPlugin::<NoUserData>::default());
        app.add_plugin(bevy_prototype_debug_lines::DebugLinesPlugin::default());
        app.add_plugin(physics::PhysicsPlugin);
        app.add_plugin(input::InputPlugin);
        app.add_plugin(first_person_controller::FirstPersonControllerPlugin);
        app.add_plugin(portal::PortalPlugin);

        app.add_startup_system(setup);
    }
}

/// Perform game initialization
fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    make_test_chamber(&mut commands, &mut meshes, &mut materials, 20., 3.);

    // Light
    commands.spawn(DirectionalLightBundle {
        directional_light: DirectionalLight {
            color: Color::ANTIQUE_WHITE,
            illuminance: 20_000.,
            shadows_enabled: true,
            ..default()
        },
        transform: Transform {
            translation: Vec3::Y * 5.,
            rotation: Quat::from_euler(EulerRot::YXZ, FRAC_PI_4, FRAC_PI_4, 0.),
            scale: Vec3::ONE,
        },
        ..default()
    });

    // Spawn player
    commands.spawn(FirstPersonControllerBundle {
        spatial: SpatialBundle::from(Transform::from_xyz(0., 1.5, 5.)),
        ..default()
    });

    // A dynamic crate that can travel through portals too; no capsule, so it
    // exercises the single-sample fallback.
    commands.spawn((
        PbrBundle {
            mesh: meshes.add(shape::Cube { size: 0.5 }.into()),
            material: materials.add(StandardMaterial::from(Color::BEIGE)),
            transform: Transform::from_xyz(2., 1., 2.),
            ..default()
        },
        Name::from("Crate"),
        RigidBody::Dynamic,
        Collider::cuboid(0.25, 0.25, 0.25),
        Velocity::default(),
        ActiveEvents::COLLISION_EVENTS,
        CollisionGroups::new(PROPS_GROUP, ALL_GROUPS),
        PortalTraveler::new(),
    ));
}
