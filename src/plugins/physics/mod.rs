use bevy::prelude::*;
use bevy_rapier3d::prelude::{Group, RapierConfiguration, TimestepMode};

pub const WALLS_GROUP: Group = Group::GROUP_1;
pub const PROPS_GROUP: Group = Group::GROUP_2;
pub const PORTAL_GROUP: Group = Group::GROUP_3;
pub const PLAYER_GROUP: Group = Group::GROUP_4;
/// Surfaces portals may be placed on. Portalable geometry lives in this group
/// only, so box-overlap queries can mask it out the way the original layer
/// mask did.
pub const PORTAL_SURFACE_GROUP: Group = Group::GROUP_5;
pub const GROUND_GROUP: Group = Group::GROUP_6;
pub const ALL_GROUPS: Group = Group::ALL;

pub struct PhysicsPlugin;

impl Plugin for PhysicsPlugin {
    fn build(&self, app: &mut App) {
        app.add_startup_system(configure_rapier);
    }
}

fn configure_rapier(mut config: ResMut<RapierConfiguration>) {
    // Crossing detection compares signed distances between consecutive ticks,
    // so the physics clock is fixed-rate while the frame clock stays variable.
    // Extra substeps because them portals can go fast.
    config.timestep_mode = TimestepMode::Fixed {
        dt: 1. / 64.,
        substeps: 4,
    }
}
