//! Cooperative priority scheduling.
//!
//! Work is described by plain values (`W`), not closures: the owner pops a job, runs it against
//! its own state, and gets back a [`JobStep`] saying whether a continuation must be requeued.
//! Long loops check a [`TimeSlice`] and yield when the frame budget is spent.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// Scheduling tiers, highest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Priority {
    Max,
    High,
    Normal,
    BelowNormal,
    Idle,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Max,
        Priority::High,
        Priority::Normal,
        Priority::BelowNormal,
        Priority::Idle,
    ];

    fn tier(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

/// What a job asks the scheduler to do after one step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStep<W> {
    Done,
    /// Requeue the continuation at the front of its tier.
    Yield(W),
    /// Requeue the continuation, but not before the next frame.
    NextFrame(W),
}

/// Frame budget checked by cooperative loops.
pub struct TimeSlice<'a> {
    clock: &'a dyn Fn() -> u64,
    deadline_ms: u64,
}

impl<'a> TimeSlice<'a> {
    pub fn new(clock: &'a dyn Fn() -> u64, deadline_ms: u64) -> Self {
        Self { clock, deadline_ms }
    }

    pub fn should_yield(&self) -> bool {
        (self.clock)() >= self.deadline_ms
    }
}

#[derive(Debug)]
struct Job<W> {
    id: JobId,
    work: W,
}

/// A popped job, ready to run.
#[derive(Debug)]
pub struct Scheduled<W> {
    pub id: JobId,
    pub priority: Priority,
    pub work: W,
}

#[derive(Debug)]
pub struct Scheduler<W> {
    tiers: [VecDeque<Job<W>>; 5],
    parked: Vec<(Priority, Job<W>)>,
    next_id: u64,
}

impl<W> Default for Scheduler<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> Scheduler<W> {
    pub fn new() -> Self {
        Self {
            tiers: Default::default(),
            parked: Vec::new(),
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> JobId {
        self.next_id += 1;
        JobId(self.next_id)
    }

    pub fn schedule(&mut self, priority: Priority, work: W) -> JobId {
        let id = self.next_id();
        self.tiers[priority.tier()].push_back(Job { id, work });
        id
    }

    /// Reinserts a continuation ahead of its tier's other jobs.
    pub fn resume(&mut self, id: JobId, priority: Priority, work: W) {
        self.tiers[priority.tier()].push_front(Job { id, work });
    }

    /// Holds a continuation until [`Scheduler::start_frame`].
    pub fn park(&mut self, id: JobId, priority: Priority, work: W) {
        self.parked.push((priority, Job { id, work }));
    }

    /// Releases parked continuations. Call once at the start of every frame.
    pub fn start_frame(&mut self) {
        for (priority, job) in self.parked.drain(..) {
            self.tiers[priority.tier()].push_back(job);
        }
    }

    pub fn pop(&mut self) -> Option<Scheduled<W>> {
        self.pop_matching(|_| true)
    }

    /// Pops the highest-priority job accepted by `runnable`. Rejected jobs stay queued in place.
    pub fn pop_matching(&mut self, mut runnable: impl FnMut(&W) -> bool) -> Option<Scheduled<W>> {
        for priority in Priority::ALL {
            let tier = &mut self.tiers[priority.tier()];
            if let Some(at) = tier.iter().position(|job| runnable(&job.work)) {
                let job = tier.remove(at)?;
                return Some(Scheduled {
                    id: job.id,
                    priority,
                    work: job.work,
                });
            }
        }
        None
    }

    /// Drops every queued or parked job whose work is rejected by `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&W) -> bool) {
        for tier in &mut self.tiers {
            tier.retain(|job| keep(&job.work));
        }
        self.parked.retain(|(_, job)| keep(&job.work));
    }

    pub fn cancel(&mut self, id: JobId) -> bool {
        for tier in &mut self.tiers {
            if let Some(at) = tier.iter().position(|job| job.id == id) {
                tier.remove(at);
                return true;
            }
        }
        if let Some(at) = self.parked.iter().position(|(_, job)| job.id == id) {
            self.parked.remove(at);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum::<usize>() + self.parked.len()
    }

    pub fn is_idle(&self) -> bool {
        self.len() == 0
    }

    pub fn any(&self, mut f: impl FnMut(&W) -> bool) -> bool {
        self.tiers.iter().flatten().any(|job| f(&job.work))
            || self.parked.iter().any(|(_, job)| f(&job.work))
    }
}
