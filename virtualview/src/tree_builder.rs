use alloc::vec::Vec;

use crate::GroupDescriptor;
use crate::scheduler::TimeSlice;
use crate::tree::{GroupNode, Tree};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildStep {
    Done,
    Yielded,
}

/// Grows and shrinks the structural tree to match data source counts.
///
/// Slots are created in chunks: the chunk size starts at `initial`, doubles after every chunk,
/// and is capped at `max`. The builder checks the time slice between chunks.
#[derive(Clone, Debug)]
pub struct TreeBuilder {
    initial: usize,
    max: usize,
    chunk: usize,
}

impl TreeBuilder {
    pub fn new(initial: usize, max: usize) -> Self {
        let initial = initial.max(1);
        Self {
            initial,
            max: max.max(initial),
            chunk: initial,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk
    }

    /// Drops every node and targets `groups`. Slots are created by subsequent [`Self::step`]s.
    pub fn rebuild(&mut self, tree: &mut Tree, groups: &[GroupDescriptor]) {
        vdebug!(groups = groups.len(), "TreeBuilder::rebuild");
        tree.clear();
        for desc in groups {
            let node = tree.new_group(desc);
            tree.groups_mut().push(node);
        }
        self.chunk = self.initial;
    }

    /// Reconciles the tree against new group sizes without a full rebuild.
    ///
    /// Returns the first item index whose slot binding may have changed, or `None` when the
    /// structure is unchanged. Flat containers before that boundary are untouched and kept
    /// containers are truncated in place; blocked containers from the first changed group on
    /// are recreated.
    pub fn reconcile(&mut self, tree: &mut Tree, groups: &[GroupDescriptor]) -> Option<usize> {
        let first_changed = first_changed_group(tree.groups(), groups)?;
        let boundary = boundary_index(tree.groups(), groups, first_changed);
        vdebug!(first_changed, boundary, "TreeBuilder::reconcile");

        let blocked = tree.block_capacity().is_some();
        let by_key = tree.index_by_key();
        let mut old: Vec<Option<GroupNode>> = core::mem::take(tree.groups_mut())
            .into_iter()
            .map(Some)
            .collect();

        let mut next = Vec::with_capacity(groups.len());
        for (i, desc) in groups.iter().enumerate() {
            if i < first_changed {
                if let Some(node) = old.get_mut(i).and_then(Option::take) {
                    next.push(node);
                    continue;
                }
            }
            let reused = if blocked {
                None
            } else {
                by_key
                    .get(&desc.key)
                    .and_then(|&at| old.get_mut(at))
                    .and_then(Option::take)
            };
            let node = match reused {
                Some(mut node) => {
                    node.start_index = desc.start_index;
                    node.count = desc.count;
                    node.items.truncate(desc.count);
                    node
                }
                None => tree.new_group(desc),
            };
            next.push(node);
        }
        *tree.groups_mut() = next;
        Some(boundary)
    }

    /// Creates slots for incomplete groups, one chunk at a time, until the tree is complete or
    /// the slice runs out.
    pub fn step(&mut self, tree: &mut Tree, slice: &TimeSlice<'_>) -> BuildStep {
        loop {
            let mut budget = self.chunk;
            let mut created = 0usize;
            let group_count = tree.group_count();
            for g in 0..group_count {
                let missing = {
                    let node = &tree.groups()[g];
                    node.count.saturating_sub(node.built())
                };
                let take = missing.min(budget);
                for _ in 0..take {
                    let slot = tree.alloc_slot();
                    tree.groups_mut()[g].items.push(slot);
                }
                budget -= take;
                created += take;
                if budget == 0 {
                    break;
                }
            }
            vtrace!(created, chunk = self.chunk, "TreeBuilder::step chunk");
            self.chunk = self.chunk.saturating_mul(2).min(self.max);

            if tree.is_complete() {
                return BuildStep::Done;
            }
            if slice.should_yield() {
                return BuildStep::Yielded;
            }
        }
    }
}

fn first_changed_group(old: &[GroupNode], new: &[GroupDescriptor]) -> Option<usize> {
    let common = old.len().min(new.len());
    let first = (0..common).find(|&i| {
        let (o, n) = (&old[i], &new[i]);
        o.key != n.key || o.start_index != n.start_index || o.count != n.count
    });
    match first {
        Some(i) => Some(i),
        None if old.len() != new.len() => Some(common),
        None => None,
    }
}

fn boundary_index(old: &[GroupNode], new: &[GroupDescriptor], group: usize) -> usize {
    match (old.get(group), new.get(group)) {
        (Some(o), Some(n)) if o.key == n.key && o.start_index == n.start_index => {
            n.start_index + o.count.min(n.count)
        }
        (Some(o), Some(n)) => o.start_index.min(n.start_index),
        (Some(o), None) => o.start_index,
        (None, Some(n)) => n.start_index,
        (None, None) => 0,
    }
}
