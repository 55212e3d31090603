// src/lib.rs
use wasm_bindgen::prelude::*;

use crate::bvh::BvhBuilder;
use crate::primitives::AabbDataset;

pub mod bvh;
pub mod geometry;
pub mod primitives;

#[wasm_bindgen(start)]
pub fn init_hooks() {
    console_error_panic_hook::set_once();
    #[cfg(target_arch = "wasm32")]
    let _ = console_log::init_with_level(log::Level::Info);
}

/// Owns the two GPU transfer buffers: the caller-supplied primitive AABB
/// buffer (stride 9) and the packed flat BVH tree (stride 12). JS reads both
/// through the ptr/len pairs and uploads them as storage buffers for the
/// traversal shader.
#[wasm_bindgen]
#[derive(Debug)]
pub struct AccelerationStructure {
    aabb_data: Vec<f32>,
    tree_data: Vec<f32>,
    node_count: usize,
    primitive_count: usize,
}

#[wasm_bindgen]
impl AccelerationStructure {
    #[wasm_bindgen(constructor)]
    pub fn new(aabb_array: Vec<f32>) -> Result<AccelerationStructure, JsError> {
        Self::build(aabb_array).map_err(|e| JsError::new(&e.to_string()))
    }

    /// Convenience path for triangle soups: computes the stride-9 buffer
    /// first, then builds over it.
    pub fn from_triangles(
        vertices: Vec<f32>,
        indices: Vec<u32>,
    ) -> Result<AccelerationStructure, JsError> {
        let aabb_array = geometry::triangle_aabb_array(&vertices, &indices)
            .map_err(|e| JsError::new(&e.to_string()))?;
        Self::build(aabb_array).map_err(|e| JsError::new(&e.to_string()))
    }

    // Pointers
    pub fn aabb_ptr(&self) -> *const f32 {
        self.aabb_data.as_ptr()
    }
    pub fn aabb_len(&self) -> usize {
        self.aabb_data.len()
    }
    pub fn tree_ptr(&self) -> *const f32 {
        self.tree_data.as_ptr()
    }
    pub fn tree_len(&self) -> usize {
        self.tree_data.len()
    }
    pub fn node_count(&self) -> usize {
        self.node_count
    }
    pub fn primitive_count(&self) -> usize {
        self.primitive_count
    }
}

impl AccelerationStructure {
    fn build(aabb_array: Vec<f32>) -> anyhow::Result<AccelerationStructure> {
        let dataset = AabbDataset::new(&aabb_array)?;
        let primitive_count = dataset.len();
        let work_list: Vec<u32> = (0..primitive_count as u32).collect();

        let mut builder = BvhBuilder::new();
        let nodes = builder.build(&work_list, &dataset)?;
        let tree_data = bvh::pack_nodes(nodes);
        let node_count = nodes.len();

        Ok(AccelerationStructure {
            aabb_data: aabb_array,
            tree_data,
            node_count,
            primitive_count,
        })
    }
}
