use alloc::vec::Vec;

use crate::GroupDescriptor;
use crate::key::KeyIndexMap;

pub type GroupKey = u64;

/// Stable identity of a structural slot. Survives reconciliation as long as the slot is kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotId(pub u64);

/// Position of a slot inside the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRef {
    pub group: usize,
    /// Block inside a blocked container; always 0 for flat containers.
    pub block: usize,
    pub position: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub slots: Vec<SlotId>,
}

#[derive(Clone, Debug)]
pub enum ItemsContainer {
    Flat(Vec<SlotId>),
    Blocked { capacity: usize, blocks: Vec<Block> },
}

impl ItemsContainer {
    pub(crate) fn new(block_capacity: Option<usize>) -> Self {
        match block_capacity {
            Some(capacity) => Self::Blocked {
                capacity: capacity.max(1),
                blocks: Vec::new(),
            },
            None => Self::Flat(Vec::new()),
        }
    }

    /// Number of slots built so far.
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(slots) => slots.len(),
            Self::Blocked { blocks, .. } => blocks.iter().map(|b| b.slots.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, position: usize) -> Option<(usize, SlotId)> {
        match self {
            Self::Flat(slots) => slots.get(position).map(|&s| (0, s)),
            Self::Blocked { capacity, blocks } => {
                let block = position / capacity;
                let slot = *blocks.get(block)?.slots.get(position % capacity)?;
                Some((block, slot))
            }
        }
    }

    pub(crate) fn push(&mut self, slot: SlotId) {
        match self {
            Self::Flat(slots) => slots.push(slot),
            Self::Blocked { capacity, blocks } => {
                if blocks.last().is_none_or(|b| b.slots.len() >= *capacity) {
                    blocks.push(Block {
                        slots: Vec::with_capacity(*capacity),
                    });
                }
                if let Some(block) = blocks.last_mut() {
                    block.slots.push(slot);
                }
            }
        }
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        match self {
            Self::Flat(slots) => slots.truncate(len),
            Self::Blocked { capacity, blocks } => {
                let full = len / *capacity;
                let rest = len % *capacity;
                blocks.truncate(full + usize::from(rest > 0));
                if rest > 0 {
                    if let Some(block) = blocks.last_mut() {
                        block.slots.truncate(rest);
                    }
                }
            }
        }
    }
}

/// A group node: a contiguous run of items with an optional header slot.
#[derive(Clone, Debug)]
pub struct GroupNode {
    pub key: GroupKey,
    pub start_index: usize,
    /// Target item count, as reported by the data source.
    pub count: usize,
    /// Main-axis offset, copied from the layout after each pass.
    pub offset: u64,
    pub header: Option<SlotId>,
    pub items: ItemsContainer,
}

impl GroupNode {
    pub fn built(&self) -> usize {
        self.items.len()
    }

    pub fn is_complete(&self) -> bool {
        self.items.len() >= self.count
    }
}

/// Read-only view of the tree handed to layout strategies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeSnapshot {
    pub groups: Vec<GroupSnapshot>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupSnapshot {
    pub key: GroupKey,
    pub start_index: usize,
    /// Built slots; layout only positions items that have a slot.
    pub count: usize,
}

impl TreeSnapshot {
    pub fn item_count(&self) -> usize {
        self.groups.last().map_or(0, |g| g.start_index + g.count)
    }
}

/// Structural tree: groups → items containers → optional blocks → slots.
#[derive(Clone, Debug)]
pub struct Tree {
    groups: Vec<GroupNode>,
    block_capacity: Option<usize>,
    groups_enabled: bool,
    next_slot: u64,
}

impl Tree {
    pub fn new(block_capacity: Option<usize>, groups_enabled: bool) -> Self {
        Self {
            groups: Vec::new(),
            block_capacity,
            groups_enabled,
            next_slot: 0,
        }
    }

    pub fn groups(&self) -> &[GroupNode] {
        &self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn block_capacity(&self) -> Option<usize> {
        self.block_capacity
    }

    /// Total target item count.
    pub fn item_count(&self) -> usize {
        self.groups.last().map_or(0, |g| g.start_index + g.count)
    }

    pub fn built_count(&self) -> usize {
        self.groups.iter().map(GroupNode::built).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.groups.iter().all(GroupNode::is_complete)
    }

    pub(crate) fn alloc_slot(&mut self) -> SlotId {
        self.next_slot += 1;
        SlotId(self.next_slot)
    }

    pub(crate) fn groups_mut(&mut self) -> &mut Vec<GroupNode> {
        &mut self.groups
    }

    pub(crate) fn clear(&mut self) {
        self.groups.clear();
    }

    pub(crate) fn new_group(&mut self, desc: &GroupDescriptor) -> GroupNode {
        let header = self.groups_enabled.then(|| self.alloc_slot());
        GroupNode {
            key: desc.key,
            start_index: desc.start_index,
            count: desc.count,
            offset: 0,
            header,
            items: ItemsContainer::new(self.block_capacity),
        }
    }

    pub fn group_of(&self, index: usize) -> Option<usize> {
        let g = self.groups.partition_point(|g| g.start_index <= index);
        let g = g.checked_sub(1)?;
        let group = &self.groups[g];
        (index < group.start_index + group.count).then_some(g)
    }

    pub fn slot_ref(&self, index: usize) -> Option<SlotRef> {
        let group = self.group_of(index)?;
        let node = &self.groups[group];
        let position = index - node.start_index;
        let (block, _) = node.items.get(position)?;
        Some(SlotRef {
            group,
            block,
            position,
        })
    }

    pub fn slot_id(&self, index: usize) -> Option<SlotId> {
        let group = self.group_of(index)?;
        let node = &self.groups[group];
        node.items
            .get(index - node.start_index)
            .map(|(_, slot)| slot)
    }

    pub fn header_slot(&self, group: usize) -> Option<SlotId> {
        self.groups.get(group)?.header
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            groups: self
                .groups
                .iter()
                .map(|g| GroupSnapshot {
                    key: g.key,
                    start_index: g.start_index,
                    count: g.built().min(g.count),
                })
                .collect(),
        }
    }

    pub(crate) fn index_by_key(&self) -> KeyIndexMap {
        let mut map = KeyIndexMap::default();
        for (i, g) in self.groups.iter().enumerate() {
            map.insert(g.key, i);
        }
        map
    }
}
