use anyhow::{bail, Result};
use glam::{vec3, Vec3};

use crate::primitives::{AABB, AABB_STRIDE};

// Minimum AABB thickness; flat triangles get half the pad on each side.
const FLAT_EPS: f32 = 1e-5;

/// Triangle-soup accumulator on the rendering-pipeline side of the buffer
/// boundary. Vertices are stored at stride 4 ([x, y, z, pad]).
#[derive(Default, Clone)]
pub struct Geometry {
    pub vertices: Vec<f32>, // [x, y, z, pad]
    pub indices: Vec<u32>,  // [i0, i1, i2]
}

impl Geometry {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_vertex(&mut self, v: Vec3) -> u32 {
        let index = (self.vertices.len() / 4) as u32;
        self.vertices.extend_from_slice(&[v.x, v.y, v.z, 0.0]);
        index
    }

    pub fn add_triangle(&mut self, v0: Vec3, v1: Vec3, v2: Vec3) {
        let i0 = self.push_vertex(v0);
        let i1 = self.push_vertex(v1);
        let i2 = self.push_vertex(v2);
        self.indices.extend_from_slice(&[i0, i1, i2]);
    }

    pub fn tri_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// The stride-9 primitive buffer the builder consumes.
    pub fn aabb_array(&self) -> Result<Vec<f32>> {
        triangle_aabb_array(&self.vertices, &self.indices)
    }
}

/// Build the stride-9 primitive AABB buffer for an indexed triangle soup.
/// Triangle k covers indices [3k, 3k+3); its record is its (padded) bounding
/// box followed by the box center as the supplied centroid.
pub fn triangle_aabb_array(vertices: &[f32], indices: &[u32]) -> Result<Vec<f32>> {
    if vertices.len() % 4 != 0 {
        bail!(
            "vertex buffer length {} is not a multiple of 4",
            vertices.len()
        );
    }
    if indices.len() % 3 != 0 {
        bail!("index count {} is not a multiple of 3", indices.len());
    }

    let vertex_count = vertices.len() / 4;
    let tri_count = indices.len() / 3;
    let mut data = Vec::with_capacity(tri_count * AABB_STRIDE);

    for t in 0..tri_count {
        let fetch = |corner: usize| -> Result<Vec3> {
            let idx = indices[t * 3 + corner] as usize;
            if idx >= vertex_count {
                bail!("triangle {t} references vertex {idx} outside buffer of {vertex_count}");
            }
            let b = idx * 4;
            Ok(vec3(vertices[b], vertices[b + 1], vertices[b + 2]))
        };
        let mut bounds = AABB::empty();
        bounds.grow(fetch(0)?);
        bounds.grow(fetch(1)?);
        bounds.grow(fetch(2)?);

        let size = bounds.max - bounds.min;
        let pad = vec3(
            if size.x < FLAT_EPS { FLAT_EPS } else { 0.0 },
            if size.y < FLAT_EPS { FLAT_EPS } else { 0.0 },
            if size.z < FLAT_EPS { FLAT_EPS } else { 0.0 },
        );
        bounds.min -= pad * 0.5;
        bounds.max += pad * 0.5;
        let centroid = bounds.center();

        data.extend_from_slice(&[
            bounds.min.x,
            bounds.min.y,
            bounds.min.z,
            bounds.max.x,
            bounds.max.y,
            bounds.max.z,
            centroid.x,
            centroid.y,
            centroid.z,
        ]);
    }

    Ok(data)
}
