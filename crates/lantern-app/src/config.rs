// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use lantern_render_vk::PresentMode;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
    #[serde(default)]
    pub assets: AssetsCfg,
    #[serde(default)]
    pub lights: LightsCfg,
    #[serde(default)]
    pub camera: CameraCfg,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "lantern".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    Fifo,
    #[default]
    Mailbox,
    Immediate,
}

impl From<PresentModeCfg> for PresentMode {
    fn from(mode: PresentModeCfg) -> Self {
        match mode {
            PresentModeCfg::Fifo => PresentMode::Fifo,
            PresentModeCfg::Mailbox => PresentMode::Mailbox,
            PresentModeCfg::Immediate => PresentMode::Immediate,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub present_mode: PresentModeCfg,
    /// rgb + intensity.
    pub ambient_light: [f32; 4],
    pub validation: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            clear_color: [0.01, 0.01, 0.01, 1.0],
            present_mode: PresentModeCfg::Mailbox,
            ambient_light: [1.0, 1.0, 1.0, 0.02],
            validation: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AssetsCfg {
    /// Directory of `.spv` files; the shaders built into the binary when unset.
    pub shader_dir: Option<PathBuf>,
    pub models: Vec<ModelCfg>,
}

impl Default for AssetsCfg {
    fn default() -> Self {
        Self {
            shader_dir: None,
            models: vec![
                ModelCfg {
                    path: PathBuf::from("models/cube.obj"),
                    translation: [0.0, 0.0, 0.0],
                    scale: [0.5, 0.5, 0.5],
                    ..Default::default()
                },
                ModelCfg {
                    path: PathBuf::from("models/quad.obj"),
                    translation: [0.0, 0.5, 0.0],
                    scale: [3.0, 1.0, 3.0],
                    ..Default::default()
                },
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelCfg {
    pub path: PathBuf,
    pub translation: [f32; 3],
    /// Radians about x, y, z.
    pub rotation: [f32; 3],
    pub scale: [f32; 3],
    pub color: [f32; 3],
}

impl Default for ModelCfg {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            translation: [0.0; 3],
            rotation: [0.0; 3],
            scale: [1.0; 3],
            color: [1.0; 3],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LightsCfg {
    pub colors: Vec<[f32; 3]>,
    pub radius: f32,
    pub intensity: f32,
    pub orbit_radius: f32,
    /// Radians per second about the vertical axis.
    pub orbit_speed: f32,
    /// Y of the ring; negative is up.
    pub height: f32,
}

impl Default for LightsCfg {
    fn default() -> Self {
        Self {
            colors: vec![
                [1.0, 0.1, 0.1],
                [0.1, 0.1, 1.0],
                [0.1, 1.0, 0.1],
                [1.0, 1.0, 0.1],
                [0.1, 1.0, 1.0],
                [1.0, 1.0, 1.0],
            ],
            radius: 0.1,
            intensity: 0.2,
            orbit_radius: 1.4,
            orbit_speed: 0.5,
            height: -1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct CameraCfg {
    pub position: [f32; 3],
    pub target: [f32; 3],
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub move_speed: f32,
    pub look_speed: f32,
}

impl Default for CameraCfg {
    fn default() -> Self {
        Self {
            position: [0.0, -1.0, -2.5],
            target: [0.0, 0.0, 0.0],
            fov_degrees: 50.0,
            near: 0.1,
            far: 100.0,
            move_speed: 3.0,
            look_speed: 1.5,
        }
    }
}

pub fn parse_cfg(s: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(s)
}

/// Reads `path`, falling back to defaults when the file is missing or
/// does not parse.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match parse_cfg(&s) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("invalid config {}: {e}; using defaults", path.display());
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("no config at {}; using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("cannot read config {}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Mailbox);
        assert_eq!(cfg.lights.colors.len(), 6);
        assert_eq!(cfg.camera.fov_degrees, 50.0);
        assert_eq!(cfg.assets.models.len(), 2);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_cfg(
            r#"
            [render]
            present_mode = "fifo"

            [[assets.models]]
            path = "models/vase.obj"
            scale = [3.0, 1.5, 3.0]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Fifo);
        assert_eq!(cfg.render.clear_color, [0.01, 0.01, 0.01, 1.0]);
        assert_eq!(cfg.assets.shader_dir, None);
        assert_eq!(cfg.assets.models.len(), 1);
        assert_eq!(cfg.assets.models[0].color, [1.0; 3]);
    }

    #[test]
    fn shader_dir_overrides_embedded_shaders() {
        let cfg = parse_cfg("[assets]\nshader_dir = \"build/spv\"\n").unwrap();
        assert_eq!(cfg.assets.shader_dir, Some(PathBuf::from("build/spv")));
        assert_eq!(cfg.assets.models.len(), 2);
    }

    #[test]
    fn unknown_present_mode_is_an_error() {
        assert!(parse_cfg("[render]\npresent_mode = \"vsync\"\n").is_err());
    }

    #[test]
    fn missing_file_falls_back() {
        let cfg = load_cfg(Path::new("definitely/not/here.toml"));
        assert_eq!(cfg.window.title, "lantern");
    }

    #[test]
    fn present_mode_maps_to_backend() {
        assert_eq!(PresentMode::from(PresentModeCfg::Immediate), PresentMode::Immediate);
        assert_eq!(PresentMode::from(PresentModeCfg::default()), PresentMode::Mailbox);
    }
}
