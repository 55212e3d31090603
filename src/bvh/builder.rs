// src/bvh/builder.rs
use anyhow::{bail, Result};
use glam::Vec3;

use super::{BvhNode, NodeKind, INVALID_NODE};
use crate::primitives::{AabbDataset, AABB};

/// Iterative flat-BVH builder.
///
/// One instance owns the growing tree plus the per-depth work-list slots and
/// the parent-id stack that together reproduce a left-first depth-first
/// recursive build without native recursion: auxiliary memory scales with
/// tree depth instead of call-stack frames, and the output is a flat node
/// array instead of a pointer tree. `build` resets everything, so an
/// instance can be reused across scene loads; `&mut self` rules out two
/// concurrent builds on the same instance.
pub struct BvhBuilder {
    tree: Vec<BvhNode>,
    left_lists: Vec<Option<Vec<u32>>>,
    right_lists: Vec<Option<Vec<u32>>>,
    parent_ids: Vec<u32>,
}

impl Default for BvhBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BvhBuilder {
    pub fn new() -> Self {
        Self {
            tree: Vec::new(),
            left_lists: Vec::new(),
            right_lists: Vec::new(),
            parent_ids: Vec::new(),
        }
    }

    /// Build the full tree over `work_list`, depth first, left branches
    /// before right branches. Node 0 is the root; every node's id is its
    /// position in the returned slice.
    pub fn build(&mut self, work_list: &[u32], aabbs: &AabbDataset<'_>) -> Result<&[BvhNode]> {
        self.tree.clear();
        self.left_lists.clear();
        self.right_lists.clear();
        self.parent_ids.clear();

        for &k in work_list {
            if k as usize >= aabbs.len() {
                bail!(
                    "work list references primitive {k} outside dataset of {}",
                    aabbs.len()
                );
            }
        }

        // Root step; no parent, so nothing gets backpatched.
        let split = self.create_node(work_list, aabbs, None, true);
        self.stash(0, split);

        // Go down left branches until exhausted, then ascend back up right branches.
        let mut sp: isize = 0;
        while sp >= 0 {
            let depth = sp as usize;
            if let Some(list) = Self::take_slot(&mut self.left_lists, depth) {
                // The owner of a pending left list is always the most recently
                // appended node: nothing is appended between the stash and here.
                let owner = (self.tree.len() - 1) as u32;
                self.parent_ids.push(owner);
                sp += 1;
                let split = self.create_node(&list, aabbs, Some(owner), true);
                self.stash(sp as usize, split);
            } else if let Some(list) = Self::take_slot(&mut self.right_lists, depth) {
                let parent = self.parent_ids.pop();
                sp += 1;
                let split = self.create_node(&list, aabbs, parent, false);
                self.stash(sp as usize, split);
            } else {
                // Both slots at this depth are resolved.
                sp -= 1;
            }
        }

        log::info!(
            "BVH build: {} primitives -> {} nodes",
            work_list.len(),
            self.tree.len()
        );
        Ok(&self.tree)
    }

    pub fn tree(&self) -> &[BvhNode] {
        &self.tree
    }

    /// Append the node(s) for one work list. A right branch backpatches its
    /// parent's right-child link to the first node it appends. Returns the
    /// deferred left/right child work lists when the list had to be split,
    /// `None` when the step fully resolved to leaves.
    fn create_node(
        &mut self,
        work_list: &[u32],
        aabbs: &AabbDataset<'_>,
        parent: Option<u32>,
        is_left_branch: bool,
    ) -> Option<(Vec<u32>, Vec<u32>)> {
        match work_list {
            [] => None,
            &[k] => {
                let id = self.push_node(
                    aabbs.aabb(k as usize),
                    parent,
                    NodeKind::Leaf { primitive: k },
                );
                if !is_left_branch {
                    self.patch_right_child(parent, id);
                }
                None
            }
            &[k0, k1] => {
                let bounds = aabbs.aabb(k0 as usize).union(&aabbs.aabb(k1 as usize));
                let id = self.tree.len() as u32;
                // Both leaves land directly behind this node, so the child
                // ids are known up front and no work lists are deferred.
                self.push_node(
                    bounds,
                    parent,
                    NodeKind::Inner {
                        left: id + 1,
                        right: id + 2,
                    },
                );
                if !is_left_branch {
                    self.patch_right_child(parent, id);
                }
                self.push_node(
                    aabbs.aabb(k0 as usize),
                    Some(id),
                    NodeKind::Leaf { primitive: k0 },
                );
                self.push_node(
                    aabbs.aabb(k1 as usize),
                    Some(id),
                    NodeKind::Leaf { primitive: k1 },
                );
                None
            }
            _ => {
                let mut bounds = AABB::empty();
                let mut centroid_sum = Vec3::ZERO;
                for &k in work_list {
                    bounds = bounds.union(&aabbs.aabb(k as usize));
                    centroid_sum += aabbs.centroid(k as usize);
                }
                let centroid_mean = centroid_sum / work_list.len() as f32;

                let id = self.tree.len() as u32;
                // The left child is built next; the right child id stays
                // unknown until the whole left subtree is done.
                self.push_node(
                    bounds,
                    parent,
                    NodeKind::Inner {
                        left: id + 1,
                        right: INVALID_NODE,
                    },
                );
                if !is_left_branch {
                    self.patch_right_child(parent, id);
                }

                Some(Self::split_work_list(work_list, aabbs, &bounds, centroid_mean))
            }
        }
    }

    /// SAH axis search plus partition.
    ///
    /// Each axis is scored by partitioning centroids against the mean
    /// centroid; the minimum is seeded with the no-split cost, and only a
    /// strictly lower cost replaces the incumbent, so ties keep the earliest
    /// axis in X,Y,Z order. When no axis yields an acceptable split, list
    /// positions alternate between the sides, which keeps both non-empty for
    /// any spatial distribution.
    fn split_work_list(
        work_list: &[u32],
        aabbs: &AabbDataset<'_>,
        bounds: &AABB,
        centroid_mean: Vec3,
    ) -> (Vec<u32>, Vec<u32>) {
        let mut min_cost = bounds.surface_area() * work_list.len() as f32;
        let mut best: Option<(usize, f32)> = None;

        for axis in 0..3 {
            let test_split = centroid_mean[axis];
            let mut left_bounds = AABB::empty();
            let mut right_bounds = AABB::empty();
            let mut count_left = 0u32;
            let mut count_right = 0u32;

            for &k in work_list {
                if aabbs.centroid(k as usize)[axis] < test_split {
                    left_bounds = left_bounds.union(&aabbs.aabb(k as usize));
                    count_left += 1;
                } else {
                    right_bounds = right_bounds.union(&aabbs.aabb(k as usize));
                    count_right += 1;
                }
            }

            // A side with zero primitives is no partition at all.
            if count_left < 1 || count_right < 1 {
                continue;
            }

            let cost = left_bounds.surface_area() * count_left as f32
                + right_bounds.surface_area() * count_right as f32;
            if cost < min_cost {
                min_cost = cost;
                best = Some((axis, test_split));
            }
        }

        let mut left = Vec::new();
        let mut right = Vec::new();
        match best {
            Some((axis, split)) => {
                // Same `<` rule as the search pass, so the counts match.
                for &k in work_list {
                    if aabbs.centroid(k as usize)[axis] < split {
                        left.push(k);
                    } else {
                        right.push(k);
                    }
                }
            }
            None => {
                log::debug!(
                    "no beneficial SAH split for {} primitives, alternating positions",
                    work_list.len()
                );
                for (i, &k) in work_list.iter().enumerate() {
                    if i % 2 == 0 {
                        left.push(k);
                    } else {
                        right.push(k);
                    }
                }
            }
        }
        (left, right)
    }

    fn stash(&mut self, depth: usize, split: Option<(Vec<u32>, Vec<u32>)>) {
        let Some((left, right)) = split else { return };
        if self.left_lists.len() <= depth {
            self.left_lists.resize_with(depth + 1, || None);
            self.right_lists.resize_with(depth + 1, || None);
        }
        self.left_lists[depth] = Some(left);
        self.right_lists[depth] = Some(right);
    }

    fn take_slot(slots: &mut [Option<Vec<u32>>], depth: usize) -> Option<Vec<u32>> {
        slots.get_mut(depth).and_then(Option::take)
    }

    fn push_node(&mut self, bounds: AABB, parent: Option<u32>, kind: NodeKind) -> u32 {
        let id = self.tree.len() as u32;
        self.tree.push(BvhNode {
            bounds,
            parent,
            kind,
        });
        id
    }

    /// A right branch fills in its parent's missing link now that the first
    /// node of the branch has an id.
    fn patch_right_child(&mut self, parent: Option<u32>, child: u32) {
        let Some(p) = parent else { return };
        if let NodeKind::Inner { right, .. } = &mut self.tree[p as usize].kind {
            debug_assert_eq!(*right, INVALID_NODE);
            *right = child;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    fn record(min: [f32; 3], max: [f32; 3]) -> [f32; 9] {
        record_with_centroid(
            min,
            max,
            [
                (min[0] + max[0]) * 0.5,
                (min[1] + max[1]) * 0.5,
                (min[2] + max[2]) * 0.5,
            ],
        )
    }

    fn record_with_centroid(min: [f32; 3], max: [f32; 3], c: [f32; 3]) -> [f32; 9] {
        [
            min[0], min[1], min[2], max[0], max[1], max[2], c[0], c[1], c[2],
        ]
    }

    fn flatten(records: &[[f32; 9]]) -> Vec<f32> {
        records.iter().flatten().copied().collect()
    }

    fn build(records: &[[f32; 9]]) -> Vec<BvhNode> {
        let data = flatten(records);
        let dataset = AabbDataset::new(&data).unwrap();
        let work_list: Vec<u32> = (0..records.len() as u32).collect();
        let mut builder = BvhBuilder::new();
        builder.build(&work_list, &dataset).unwrap().to_vec()
    }

    fn leaves_under(nodes: &[BvhNode], root: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            match nodes[idx as usize].kind {
                NodeKind::Leaf { primitive } => out.push(primitive),
                NodeKind::Inner { left, right } => {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
        out.sort_unstable();
        out
    }

    #[test]
    fn single_primitive_builds_a_leaf_root() {
        let nodes = build(&[record([0.0, 0.0, 0.0], [1.0, 1.0, 1.0])]);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].parent, None);
        assert_eq!(nodes[0].kind, NodeKind::Leaf { primitive: 0 });
        assert_eq!(nodes[0].bounds.min, vec3(0.0, 0.0, 0.0));
        assert_eq!(nodes[0].bounds.max, vec3(1.0, 1.0, 1.0));
    }

    #[test]
    fn two_primitives_build_one_inner_and_two_leaves() {
        let nodes = build(&[
            record([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]),
            record([2.0, 0.0, 0.0], [3.0, 1.0, 1.0]),
        ]);
        assert_eq!(nodes.len(), 3);

        assert_eq!(nodes[0].parent, None);
        assert_eq!(nodes[0].kind, NodeKind::Inner { left: 1, right: 2 });
        assert_eq!(nodes[0].bounds.min, vec3(0.0, 0.0, 0.0));
        assert_eq!(nodes[0].bounds.max, vec3(3.0, 1.0, 1.0));

        assert_eq!(nodes[1].parent, Some(0));
        assert_eq!(nodes[1].kind, NodeKind::Leaf { primitive: 0 });
        assert_eq!(nodes[2].parent, Some(0));
        assert_eq!(nodes[2].kind, NodeKind::Leaf { primitive: 1 });
    }

    #[test]
    fn shared_centroids_fall_back_to_alternating_split() {
        // Five disjoint boxes along X whose supplied centroids all coincide,
        // so every axis partition collapses to one side.
        let records: Vec<[f32; 9]> = (0..5)
            .map(|k| {
                let x = 2.0 * k as f32;
                record_with_centroid([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0], [0.0, 0.0, 0.0])
            })
            .collect();
        let nodes = build(&records);
        assert_eq!(nodes.len(), 9);

        // Even list positions go left, odd go right, at every level.
        let NodeKind::Inner { left, right } = nodes[0].kind else {
            panic!("root must be inner");
        };
        assert_eq!(leaves_under(&nodes, left), vec![0, 2, 4]);
        assert_eq!(leaves_under(&nodes, right), vec![1, 3]);

        // Exact shape: the left subtree alternates again into {0,4} and {2}.
        assert_eq!(nodes[0].kind, NodeKind::Inner { left: 1, right: 6 });
        assert_eq!(nodes[1].kind, NodeKind::Inner { left: 2, right: 5 });
        assert_eq!(nodes[2].kind, NodeKind::Inner { left: 3, right: 4 });
        assert_eq!(nodes[3].kind, NodeKind::Leaf { primitive: 0 });
        assert_eq!(nodes[4].kind, NodeKind::Leaf { primitive: 4 });
        assert_eq!(nodes[5].kind, NodeKind::Leaf { primitive: 2 });
        assert_eq!(nodes[6].kind, NodeKind::Inner { left: 7, right: 8 });
        assert_eq!(nodes[7].kind, NodeKind::Leaf { primitive: 1 });
        assert_eq!(nodes[8].kind, NodeKind::Leaf { primitive: 3 });
    }

    #[test]
    fn sah_split_separates_clusters_along_x() {
        let mut records = Vec::new();
        for i in 0..3 {
            let x = i as f32;
            records.push(record([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0]));
        }
        for i in 0..3 {
            let x = 100.0 + i as f32;
            records.push(record([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0]));
        }
        let nodes = build(&records);
        assert_eq!(nodes.len(), 11);

        let NodeKind::Inner { left, right } = nodes[0].kind else {
            panic!("root must be inner");
        };
        assert_eq!(leaves_under(&nodes, left), vec![0, 1, 2]);
        assert_eq!(leaves_under(&nodes, right), vec![3, 4, 5]);
    }

    #[test]
    fn empty_work_list_is_a_no_op() {
        let dataset = AabbDataset::new(&[]).unwrap();
        let mut builder = BvhBuilder::new();
        let nodes = builder.build(&[], &dataset).unwrap();
        assert!(nodes.is_empty());
    }

    #[test]
    fn out_of_range_primitive_is_rejected() {
        let data = flatten(&[record([0.0, 0.0, 0.0], [1.0, 1.0, 1.0])]);
        let dataset = AabbDataset::new(&data).unwrap();
        let mut builder = BvhBuilder::new();
        let err = builder.build(&[0, 1], &dataset).unwrap_err();
        assert!(err.to_string().contains("outside dataset"));
        // Nothing was appended before the rejection.
        assert!(builder.tree().is_empty());
    }

    #[test]
    fn size_two_lists_keep_work_list_order() {
        // The k0/k1 order of the work list decides left/right, not geometry.
        let data = flatten(&[
            record([4.0, 0.0, 0.0], [5.0, 1.0, 1.0]),
            record([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]),
        ]);
        let dataset = AabbDataset::new(&data).unwrap();
        let mut builder = BvhBuilder::new();
        let nodes = builder.build(&[0, 1], &dataset).unwrap();
        assert_eq!(nodes[1].kind, NodeKind::Leaf { primitive: 0 });
        assert_eq!(nodes[2].kind, NodeKind::Leaf { primitive: 1 });
    }
}
