// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader};
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::RenderError;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    fn bits(&self) -> [u32; 11] {
        let f = bytemuck::cast_ref::<Vertex, [f32; 11]>(self);
        f.map(f32::to_bits)
    }
}

// Bitwise identity, so dedup never merges -0.0 with 0.0 or trips over NaN.
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// CPU-side geometry ready for upload. Indices may be empty, in which case
/// the mesh is drawn non-indexed.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Result<Self, RenderError> {
        if vertices.len() < 3 {
            return Err(RenderError::TooFewVertices(vertices.len()));
        }
        Ok(Self { vertices, indices })
    }

    pub fn load_obj(path: impl AsRef<Path>) -> Result<Self, RenderError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| RenderError::MeshOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let data = Self::from_obj_reader(&mut BufReader::new(file)).map_err(|source| {
            RenderError::MeshLoad {
                path: path.to_path_buf(),
                source,
            }
        })?;
        tracing::info!(
            path = %path.display(),
            vertices = data.vertices.len(),
            indices = data.indices.len(),
            "mesh loaded"
        );
        Ok(data)
    }

    /// Parses OBJ text, triangulating faces and merging identical
    /// position/color/normal/uv combinations into one indexed vertex.
    /// Materials are ignored.
    pub fn from_obj_reader(reader: &mut impl BufRead) -> Result<Self, tobj::LoadError> {
        let (models, _) = tobj::load_obj_buf(
            reader,
            &tobj::LoadOptions {
                single_index: false,
                triangulate: true,
                ..Default::default()
            },
            |_| Ok(Default::default()),
        )?;

        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let mut unique: HashMap<Vertex, u32> = HashMap::new();

        for model in &models {
            let mesh = &model.mesh;
            for (i, &pos) in mesh.indices.iter().enumerate() {
                let p = 3 * pos as usize;
                let mut vertex = Vertex {
                    position: Vec3::from_slice(&mesh.positions[p..p + 3]),
                    color: Vec3::ONE,
                    ..Default::default()
                };
                if mesh.vertex_color.len() >= p + 3 {
                    vertex.color = Vec3::from_slice(&mesh.vertex_color[p..p + 3]);
                }
                if let Some(&n) = mesh.normal_indices.get(i) {
                    let n = 3 * n as usize;
                    vertex.normal = Vec3::from_slice(&mesh.normals[n..n + 3]);
                }
                if let Some(&t) = mesh.texcoord_indices.get(i) {
                    let t = 2 * t as usize;
                    vertex.uv = Vec2::from_slice(&mesh.texcoords[t..t + 2]);
                }

                let index = *unique.entry(vertex).or_insert_with(|| {
                    vertices.push(vertex);
                    (vertices.len() - 1) as u32
                });
                indices.push(index);
            }
        }

        Ok(Self { vertices, indices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const QUAD: &str = "\
v -1 0 -1
v 1 0 -1
v 1 0 1
v -1 0 1
vn 0 -1 0
f 1//1 2//1 3//1
f 1//1 3//1 4//1
";

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 44);
        assert_eq!(std::mem::offset_of!(Vertex, normal), 24);
        assert_eq!(std::mem::offset_of!(Vertex, uv), 36);
    }

    #[test]
    fn shared_corners_are_deduplicated() {
        let data = MeshData::from_obj_reader(&mut Cursor::new(QUAD)).unwrap();
        assert_eq!(data.vertices.len(), 4);
        assert_eq!(data.indices, vec![0, 1, 2, 0, 2, 3]);
        assert!(data.vertices.iter().all(|v| v.normal == Vec3::new(0.0, -1.0, 0.0)));
        assert!(data.vertices.iter().all(|v| v.color == Vec3::ONE));
    }

    #[test]
    fn quads_are_triangulated() {
        let src = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let data = MeshData::from_obj_reader(&mut Cursor::new(src)).unwrap();
        assert_eq!(data.vertices.len(), 4);
        assert_eq!(data.indices.len(), 6);
    }

    #[test]
    fn differing_normals_split_a_position() {
        let src = "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 0 0 1\nvn 0 0 1\nvn 1 0 0\n\
                   f 1//1 2//1 3//1\nf 1//2 3//2 4//2\n";
        let data = MeshData::from_obj_reader(&mut Cursor::new(src)).unwrap();
        assert_eq!(data.vertices.len(), 6);
    }

    #[test]
    fn vertex_colors_are_read() {
        let src = "v 0 0 0 1 0 0\nv 1 0 0 0 1 0\nv 0 1 0 0 0 1\nf 1 2 3\n";
        let data = MeshData::from_obj_reader(&mut Cursor::new(src)).unwrap();
        assert_eq!(data.vertices[1].color, Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn fewer_than_three_vertices_is_rejected() {
        let err = MeshData::new(vec![Vertex::default(); 2], vec![]).unwrap_err();
        assert!(matches!(err, RenderError::TooFewVertices(2)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = MeshData::load_obj("does/not/exist.obj").unwrap_err();
        assert!(err.to_string().contains("does/not/exist.obj"));
    }

    #[test]
    fn open_failure_keeps_io_kind() {
        let err = MeshData::load_obj("does/not/exist.obj").unwrap_err();
        let RenderError::MeshOpen { source, .. } = &err else {
            panic!("expected MeshOpen, got {err:?}");
        };
        assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        let chained = std::error::Error::source(&err).unwrap();
        assert!(chained.downcast_ref::<std::io::Error>().is_some());
    }
}
