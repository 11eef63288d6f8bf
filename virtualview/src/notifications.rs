use alloc::vec::Vec;

use crate::ModifiedElement;

/// A change reported by the data source. Indices refer to the collection as it is at the moment
/// the notification is delivered, after every earlier notification in the batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Notification {
    Changed { index: usize },
    Inserted { index: usize },
    Removed { index: usize },
    Moved { from: usize, to: usize },
    CountChanged { count: usize },
    Reload,
}

/// The net effect of a closed batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub count: usize,
    pub delta: isize,
    pub modified: Vec<ModifiedElement>,
    /// The data source asked for a full rebuild.
    pub reload: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Tracked {
    old: Option<usize>,
    current: Option<usize>,
    changed: bool,
}

/// Folds an ordered stream of notifications into one old → new mapping.
///
/// Only touched elements are tracked; untouched ones are located by counting around them.
#[derive(Clone, Debug, Default)]
pub struct NotificationBatch {
    count_before: usize,
    count: usize,
    count_override: Option<usize>,
    tracked: Vec<Tracked>,
    reload: bool,
}

impl NotificationBatch {
    pub fn new(count_before: usize) -> Self {
        Self {
            count_before,
            count: count_before,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty() && self.count_override.is_none() && !self.reload
    }

    pub fn push(&mut self, notification: Notification) {
        vtrace!(?notification, "NotificationBatch::push");
        match notification {
            Notification::Changed { index } => {
                let at = self.resolve(index);
                self.tracked[at].changed = true;
            }
            Notification::Inserted { index } => {
                self.open_gap(index);
                self.tracked.push(Tracked {
                    old: None,
                    current: Some(index),
                    changed: false,
                });
                self.count += 1;
            }
            Notification::Removed { index } => {
                let at = self.resolve(index);
                self.close_gap(index);
                if self.tracked[at].old.is_none() {
                    self.tracked.swap_remove(at);
                } else {
                    self.tracked[at].current = None;
                }
                self.count = self.count.saturating_sub(1);
            }
            Notification::Moved { from, to } => {
                if from == to {
                    return;
                }
                let at = self.resolve(from);
                self.tracked[at].current = None;
                self.close_gap(from);
                self.open_gap(to);
                self.tracked[at].current = Some(to);
            }
            Notification::CountChanged { count } => self.count_override = Some(count),
            Notification::Reload => self.reload = true,
        }
    }

    /// Closes the batch.
    pub fn finish(self) -> BatchSummary {
        let count = self.count_override.unwrap_or(self.count);
        let mut modified: Vec<ModifiedElement> = self
            .tracked
            .iter()
            .map(|t| ModifiedElement {
                old_index: t.old,
                new_index: t.current,
                changed: t.changed,
            })
            .collect();
        modified.sort_by_key(|m| (m.new_index.or(m.old_index), m.old_index));
        BatchSummary {
            count,
            delta: count as isize - self.count_before as isize,
            modified,
            reload: self.reload,
        }
    }

    /// Index into `tracked` of the element currently at `index`, tracking it if needed.
    fn resolve(&mut self, index: usize) -> usize {
        if let Some(at) = self.tracked.iter().position(|t| t.current == Some(index)) {
            return at;
        }
        let filled_before = self
            .tracked
            .iter()
            .filter(|t| t.current.is_some_and(|c| c < index))
            .count();
        let mut old = index - filled_before;
        let mut vacated: Vec<usize> = self.tracked.iter().filter_map(|t| t.old).collect();
        vacated.sort_unstable();
        for v in vacated {
            if v <= old {
                old += 1;
            } else {
                break;
            }
        }
        self.tracked.push(Tracked {
            old: Some(old),
            current: Some(index),
            changed: false,
        });
        self.tracked.len() - 1
    }

    fn open_gap(&mut self, index: usize) {
        for t in &mut self.tracked {
            if let Some(c) = t.current.as_mut() {
                if *c >= index {
                    *c += 1;
                }
            }
        }
    }

    fn close_gap(&mut self, index: usize) {
        for t in &mut self.tracked {
            if let Some(c) = t.current.as_mut() {
                if *c > index {
                    *c -= 1;
                }
            }
        }
    }
}
