// SPDX-License-Identifier: CEPL-1.0
//! SPIR-V for the render systems, either compiled into the binary from
//! `shaders/` or read from a directory at startup.

use std::fs::File;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use lantern_render::RenderError;

macro_rules! embedded {
    ($($name:literal),* $(,)?) => {
        &[$(($name, include_bytes!(concat!(env!("OUT_DIR"), "/", $name, ".spv")) as &[u8])),*]
    };
}

const EMBEDDED: &[(&str, &[u8])] = embedded![
    "simple_shader.vert",
    "simple_shader.frag",
    "point_light.vert",
    "point_light.frag",
];

/// Where a render system finds its shader pair.
#[derive(Clone, Copy, Debug)]
pub enum ShaderSource<'a> {
    /// Compiled by the build script.
    Embedded,
    /// `<dir>/<name>.spv`, read when the pipeline is created.
    Dir(&'a Path),
}

impl ShaderSource<'_> {
    /// Loads `name` (for example `simple_shader.vert`) as SPIR-V words.
    pub fn load(self, name: &str) -> Result<Vec<u32>, RenderError> {
        match self {
            ShaderSource::Dir(dir) => read_shader(&dir.join(format!("{name}.spv"))),
            ShaderSource::Embedded => {
                let path = PathBuf::from(format!("<embedded>/{name}.spv"));
                let Some(&(_, bytes)) = EMBEDDED.iter().find(|(n, _)| *n == name) else {
                    return Err(RenderError::ShaderRead {
                        path,
                        source: io::ErrorKind::NotFound.into(),
                    });
                };
                ash::util::read_spv(&mut Cursor::new(bytes))
                    .map_err(|source| RenderError::ShaderRead { path, source })
            }
        }
    }
}

pub(crate) fn read_shader(path: &Path) -> Result<Vec<u32>, RenderError> {
    let shader_read = |source| RenderError::ShaderRead {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(shader_read)?;
    ash::util::read_spv(&mut file).map_err(shader_read)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn embedded_shaders_are_spirv() {
        for (name, _) in EMBEDDED {
            let words = ShaderSource::Embedded.load(name).unwrap();
            assert_eq!(words[0], SPIRV_MAGIC, "{name}");
        }
    }

    #[test]
    fn unknown_embedded_shader_is_a_read_error() {
        let err = ShaderSource::Embedded.load("bloom.frag").unwrap_err();
        assert!(matches!(err, RenderError::ShaderRead { .. }));
        assert!(err.to_string().contains("bloom.frag.spv"));
    }

    #[test]
    fn unreadable_shader_names_the_file() {
        let err = ShaderSource::Dir(Path::new("shaders"))
            .load("missing.vert")
            .unwrap_err();
        assert!(err.to_string().contains("missing.vert.spv"));
    }
}
