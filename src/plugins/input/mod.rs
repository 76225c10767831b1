use bevy::{prelude::*, window::CursorGrabMode};
use leafwing_input_manager::prelude::*;

#[derive(Debug)]
pub struct InputPlugin;

impl Plugin for InputPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugin(InputManagerPlugin::<Actions>::default())
            .add_startup_system(grab_cursor_on_start)
            .add_system(toggle_mouse_capture);
    }
}

#[derive(Actionlike, PartialEq, Eq, Clone, Copy, Hash, Debug)]
pub enum Actions {
    Forward,
    Backwards,
    StrafeLeft,
    StrafeRight,
    Sprint,
    Aim,
    FirePrimaryPortal,
    FireSecondaryPortal,
    Interact,
}

pub fn default_input_map() -> InputMap<Actions> {
    let mut map = InputMap::default();
    map.insert(KeyCode::W, Actions::Forward)
        .insert(KeyCode::S, Actions::Backwards)
        .insert(KeyCode::A, Actions::StrafeLeft)
        .insert(KeyCode::D, Actions::StrafeRight)
        .insert(KeyCode::LShift, Actions::Sprint)
        .insert(DualAxis::mouse_motion(), Actions::Aim)
        .insert(MouseButton::Left, Actions::FirePrimaryPortal)
        .insert(MouseButton::Right, Actions::FireSecondaryPortal)
        .insert(KeyCode::E, Actions::Interact);
    map
}

fn grab_cursor_on_start(mut windows: ResMut<Windows>) {
    if let Some(window) = windows.get_primary_mut() {
        window.set_cursor_visibility(false);
        window.set_cursor_grab_mode(CursorGrabMode::Locked);
    }
}

fn toggle_mouse_capture(mut windows: ResMut<Windows>, tab_input: Res<Input<KeyCode>>) {
    if let Some(window) = windows.get_primary_mut() {
        let locked = window.cursor_grab_mode() == CursorGrabMode::Locked;
        if tab_input.just_pressed(KeyCode::Tab) {
            window.set_cursor_visibility(locked);
            window.set_cursor_grab_mode(if locked {
                CursorGrabMode::None
            } else {
                CursorGrabMode::Locked
            });
        }
    }
}
