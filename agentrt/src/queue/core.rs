//! The WFQ priority queue (C1).
//!
//! Ordering, most-urgent first: priority tier, then deadline (earlier
//! first), then enqueue time (FIFO), then estimated duration (SRT
//! tie-break). A global virtual-time clock advances to the virtual finish
//! time of whichever entry is dequeued, which is what lets [`Self::promote_starving_tasks`]
//! and WFQ interleave tenants of unequal weight fairly.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use tracing::debug;

use crate::domain::{Priority, Task};

use super::config::QueueConfig;

#[derive(Debug, Clone)]
struct QueueEntry(Task);

fn deadline_rank(task: &Task) -> u64 {
    task.deadline_ms.unwrap_or(u64::MAX)
}

impl Eq for QueueEntry {}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| deadline_rank(&other.0).cmp(&deadline_rank(&self.0)))
            .then_with(|| other.0.enqueued_at_ms.cmp(&self.0.enqueued_at_ms))
            .then_with(|| other.0.estimated_duration_ms.cmp(&self.0.estimated_duration_ms))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub len: usize,
    pub by_priority: HashMap<Priority, usize>,
    pub virtual_time: f64,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub total_promotions: u64,
}

/// Single-mutex-owned priority queue. Callers needing concurrent access
/// wrap this in `tokio::sync::Mutex`; the queue itself holds no lock.
pub struct PriorityQueue {
    config: QueueConfig,
    heap: BinaryHeap<QueueEntry>,
    virtual_time: f64,
    total_enqueued: u64,
    total_dequeued: u64,
    total_promotions: u64,
}

impl PriorityQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            heap: BinaryHeap::new(),
            virtual_time: 0.0,
            total_enqueued: 0,
            total_dequeued: 0,
            total_promotions: 0,
        }
    }

    pub fn enqueue(&mut self, mut task: Task) -> Task {
        task.virtual_start_time = self.virtual_time.max(task.virtual_start_time);
        task.recompute_virtual_finish();
        self.total_enqueued += 1;
        let out = task.clone();
        self.heap.push(QueueEntry(task));
        debug!(id = %out.id, priority = %out.priority, "PriorityQueue::enqueue: accepted task");
        out
    }

    pub fn dequeue(&mut self) -> Option<Task> {
        let entry = self.heap.pop()?;
        self.virtual_time = self.virtual_time.max(entry.0.virtual_finish_time);
        self.total_dequeued += 1;
        Some(entry.0)
    }

    pub fn peek(&self) -> Option<&Task> {
        self.heap.peek().map(|e| &e.0)
    }

    /// O(n): rebuilds the heap without `id`. Returns the removed task, if any.
    pub fn remove(&mut self, id: &str) -> Option<Task> {
        let mut removed = None;
        let remaining: Vec<QueueEntry> = self
            .heap
            .drain()
            .filter_map(|e| {
                if removed.is_none() && e.0.id == id {
                    removed = Some(e.0.clone());
                    None
                } else {
                    Some(e)
                }
            })
            .collect();
        self.heap = remaining.into_iter().collect();
        removed
    }

    /// Marks that `id` was passed over this tick (e.g. by the admission
    /// controller's tenant anti-monopoly rule), bumping its skip count.
    pub fn mark_skipped(&mut self, id: &str) {
        let mut entries: Vec<QueueEntry> = self.heap.drain().collect();
        for e in entries.iter_mut() {
            if e.0.id == id {
                e.0.skip_count += 1;
            }
        }
        self.heap = entries.into_iter().collect();
    }

    /// Promotes every entry that has starved (waited past the threshold, or
    /// been skipped past the max skip count) one priority tier. Each entry
    /// is promoted at most once per call.
    pub fn promote_starving_tasks(&mut self, now_ms: u64) -> u64 {
        let mut promoted = 0u64;
        let entries: Vec<QueueEntry> = self.heap.drain().collect();
        let rebuilt: Vec<QueueEntry> = entries
            .into_iter()
            .map(|mut e| {
                let waited = now_ms.saturating_sub(e.0.enqueued_at_ms);
                let starved = waited > self.config.starvation_threshold_ms || e.0.skip_count > self.config.max_skip_count;
                let already_considered_this_tick = e.0.last_considered_ms == Some(now_ms);
                if starved && !already_considered_this_tick {
                    if let Some(next) = e.0.priority.promote() {
                        e.0.priority = next;
                        e.0.skip_count = 0;
                        promoted += 1;
                    }
                }
                e.0.last_considered_ms = Some(now_ms);
                e
            })
            .collect();
        self.heap = rebuilt.into_iter().collect();
        self.total_promotions += promoted;
        if promoted > 0 {
            debug!(promoted, "PriorityQueue::promote_starving_tasks: promoted entries");
        }
        promoted
    }

    pub fn get_stats(&self) -> QueueStats {
        let mut by_priority = HashMap::new();
        for e in self.heap.iter() {
            *by_priority.entry(e.0.priority).or_insert(0) += 1;
        }
        QueueStats {
            len: self.heap.len(),
            by_priority,
            virtual_time: self.virtual_time,
            total_enqueued: self.total_enqueued,
            total_dequeued: self.total_dequeued,
            total_promotions: self.total_promotions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, priority: Priority, enqueued_at_ms: u64) -> Task {
        Task::new(id, "read_file", priority, "tenantA", enqueued_at_ms, None)
    }

    #[test]
    fn dequeue_on_empty_returns_none() {
        let mut q = PriorityQueue::new(QueueConfig::default());
        assert!(q.dequeue().is_none());
        assert!(q.peek().is_none());
    }

    #[test]
    fn higher_priority_dequeues_first() {
        let mut q = PriorityQueue::new(QueueConfig::default());
        q.enqueue(task("low", Priority::Low, 0));
        q.enqueue(task("critical", Priority::Critical, 1));
        assert_eq!(q.dequeue().unwrap().id, "critical");
        assert_eq!(q.dequeue().unwrap().id, "low");
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut q = PriorityQueue::new(QueueConfig::default());
        q.enqueue(task("first", Priority::Normal, 0));
        q.enqueue(task("second", Priority::Normal, 1));
        assert_eq!(q.dequeue().unwrap().id, "first");
        assert_eq!(q.dequeue().unwrap().id, "second");
    }

    #[test]
    fn earlier_deadline_wins_within_same_priority() {
        let mut q = PriorityQueue::new(QueueConfig::default());
        let mut urgent = task("urgent", Priority::Normal, 0);
        urgent.deadline_ms = Some(100);
        let mut lax = task("lax", Priority::Normal, 0);
        lax.deadline_ms = Some(500);
        q.enqueue(lax);
        q.enqueue(urgent);
        assert_eq!(q.dequeue().unwrap().id, "urgent");
    }

    #[test]
    fn remove_missing_id_returns_none() {
        let mut q = PriorityQueue::new(QueueConfig::default());
        q.enqueue(task("a", Priority::Normal, 0));
        assert!(q.remove("nope").is_none());
        assert_eq!(q.get_stats().len, 1);
    }

    #[test]
    fn remove_present_id_shrinks_queue() {
        let mut q = PriorityQueue::new(QueueConfig::default());
        q.enqueue(task("a", Priority::Normal, 0));
        q.enqueue(task("b", Priority::Normal, 1));
        assert_eq!(q.remove("a").unwrap().id, "a");
        assert_eq!(q.get_stats().len, 1);
        assert_eq!(q.dequeue().unwrap().id, "b");
    }

    #[test]
    fn promote_starving_tasks_is_one_shot_per_call() {
        let mut config = QueueConfig::default();
        config.starvation_threshold_ms = 100;
        let mut q = PriorityQueue::new(config);
        q.enqueue(task("stuck", Priority::Background, 0));
        let promoted_first = q.promote_starving_tasks(1_000);
        assert_eq!(promoted_first, 1);
        // Same tick (same `now`): already considered, must not double-promote.
        let promoted_second = q.promote_starving_tasks(1_000);
        assert_eq!(promoted_second, 0);
        assert_eq!(q.peek().unwrap().priority, Priority::Low);
        // A later tick may starve it further.
        let promoted_third = q.promote_starving_tasks(2_000);
        assert_eq!(promoted_third, 1);
        assert_eq!(q.peek().unwrap().priority, Priority::Normal);
    }

    #[test]
    fn virtual_time_advances_to_dequeued_finish_time() {
        let mut q = PriorityQueue::new(QueueConfig::default());
        q.enqueue(task("a", Priority::Critical, 0));
        assert_eq!(q.get_stats().virtual_time, 0.0);
        q.dequeue();
        assert!(q.get_stats().virtual_time > 0.0);
    }
}
