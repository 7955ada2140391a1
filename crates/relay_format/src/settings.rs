//! Scene-wide render settings carried in every stream header block

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// Environment lighting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    pub ambient_color: [f32; 3],
    pub mist: f32,
    /// Image entity used as the environment map
    pub environment_map: Option<EntityId>,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            ambient_color: [0.0; 3],
            mist: 0.0,
            environment_map: None,
        }
    }
}

/// Bloom post effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloomSettings {
    pub threshold: f32,
    pub intensity: f32,
    pub size: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            intensity: 1.0,
            size: 4.0,
        }
    }
}

/// Final screen-space effects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostProcessSettings {
    pub pixellate_divider: f32,
    pub vignette_size: f32,
    pub vignette_power: f32,
    pub aberration_strength: f32,
    pub scanline_strength: f32,
    pub scanline_frequency: f32,
    pub scanline_offset: f32,
}

impl Default for PostProcessSettings {
    fn default() -> Self {
        Self {
            pixellate_divider: 0.0,
            vignette_size: 1.0,
            vignette_power: 1.6,
            aberration_strength: 0.1,
            scanline_strength: 0.0,
            scanline_frequency: 20.0,
            scanline_offset: 0.0,
        }
    }
}

/// Scene-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSettings {
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_rate: f32,
    pub frame_start: u32,
    pub frame_end: u32,
    pub active_camera: Option<EntityId>,
    pub environment: EnvironmentSettings,
    pub bloom: BloomSettings,
    pub post_process: PostProcessSettings,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            frame_width: 1920,
            frame_height: 1080,
            frame_rate: 60.0,
            frame_start: 0,
            frame_end: 250,
            active_camera: None,
            environment: EnvironmentSettings::default(),
            bloom: BloomSettings::default(),
            post_process: PostProcessSettings::default(),
        }
    }
}
