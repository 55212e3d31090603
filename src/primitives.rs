// src/primitives.rs
use anyhow::{bail, Result};
use glam::{vec3, Vec3};

/// Floats per primitive record: [minX,minY,minZ,maxX,maxY,maxZ,cx,cy,cz].
pub const AABB_STRIDE: usize = 9;

// --- AABB ---
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AABB {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for AABB {
    fn default() -> Self {
        Self::empty()
    }
}

impl AABB {
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn grow(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn union(&self, other: &AABB) -> AABB {
        AABB {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    // Comparison-only SAH scale; no factor 2
    pub fn surface_area(&self) -> f32 {
        let d = self.max - self.min;
        if d.x < 0.0 || d.y < 0.0 || d.z < 0.0 {
            0.0
        } else {
            d.x * d.y + d.y * d.z + d.z * d.x
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

// --- Primitive AABB dataset ---

/// Read-only view over the caller-supplied primitive buffer.
///
/// Primitive identity is purely positional: record k lives at offset
/// `AABB_STRIDE * k` and is never moved by the builder. Centroids are read
/// as stored, never recomputed from the corners.
#[derive(Clone, Copy, Debug)]
pub struct AabbDataset<'a> {
    data: &'a [f32],
}

impl<'a> AabbDataset<'a> {
    pub fn new(data: &'a [f32]) -> Result<Self> {
        if data.len() % AABB_STRIDE != 0 {
            bail!(
                "AABB buffer length {} is not a multiple of stride {}",
                data.len(),
                AABB_STRIDE
            );
        }
        for (k, rec) in data.chunks_exact(AABB_STRIDE).enumerate() {
            if rec.iter().any(|v| !v.is_finite()) {
                bail!("primitive {k}: non-finite bound or centroid");
            }
            if rec[0] > rec[3] || rec[1] > rec[4] || rec[2] > rec[5] {
                bail!("primitive {k}: min corner exceeds max corner");
            }
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len() / AABB_STRIDE
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn aabb(&self, k: usize) -> AABB {
        let base = AABB_STRIDE * k;
        AABB {
            min: vec3(self.data[base], self.data[base + 1], self.data[base + 2]),
            max: vec3(self.data[base + 3], self.data[base + 4], self.data[base + 5]),
        }
    }

    pub fn centroid(&self, k: usize) -> Vec3 {
        let base = AABB_STRIDE * k;
        vec3(
            self.data[base + 6],
            self.data[base + 7],
            self.data[base + 8],
        )
    }
}
