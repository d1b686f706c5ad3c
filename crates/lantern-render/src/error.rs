// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use thiserror::Error;

/// Fatal renderer errors. None of these are retried: they indicate a
/// programming, configuration or asset problem.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("cannot create pipeline: no pipeline layout provided")]
    MissingPipelineLayout,

    #[error("cannot create pipeline: no render pass provided")]
    MissingRenderPass,

    #[error("swapchain image or depth format changed across recreation")]
    SwapchainFormatChanged,

    #[error("descriptor pool exhausted")]
    DescriptorPoolExhausted,

    #[error("failed to read shader `{}`", path.display())]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open mesh `{}`", path.display())]
    MeshOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load mesh `{}`", path.display())]
    MeshLoad {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    #[error("mesh needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),

    #[error("no suitable physical device/queue family")]
    NoSuitableDevice,

    #[error("no memory type matches filter {type_filter:#b} with {properties}")]
    NoSuitableMemoryType { type_filter: u32, properties: String },

    #[error("none of the candidate formats is supported")]
    NoSupportedFormat,

    #[error("buffer is already mapped")]
    AlreadyMapped,

    #[error("buffer is not mapped")]
    NotMapped,

    #[error("{len} bytes at offset {offset} exceed buffer size {size}")]
    OutOfBounds { len: u64, offset: u64, size: u64 },
}
