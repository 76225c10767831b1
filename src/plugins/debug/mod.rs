use bevy::app::{PluginGroup, PluginGroupBuilder};

#[derive(Debug)]
/// Development plugins intended for debug builds use.
pub struct DeveloperPlugins;

impl PluginGroup for DeveloperPlugins {
    fn build(self) -> PluginGroupBuilder {
        PluginGroupBuilder::start::<Self>().add(bevy_editor_pls::prelude::EditorPlugin)
    }
}
