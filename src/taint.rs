//! Deferred-mutation queue: the concurrency backbone of the core.
//!
//! Producer threads enqueue *taints* (deferred actions against the world
//! state) from any context. The simulation tick is the single consumer: it
//! swaps the pending list under the lock and runs the drained actions in
//! enqueue order, so actions enqueued while a flush is executing land in the
//! next flush, never the current one.

use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::mem;

use crate::error::Result;
use crate::utils::allocator::ObjectId;

pub type TaintAction<Ctx> = Box<dyn FnOnce(&mut Ctx) -> Result<()> + Send>;

struct TaintEntry<Ctx> {
    tag: &'static str,
    action: TaintAction<Ctx>,
}

/// Thread-safe, single-flush deferred-callback queue, generic over the
/// context the actions mutate so it can be exercised without a world.
pub struct TaintQueue<Ctx> {
    pending: Mutex<Vec<TaintEntry<Ctx>>>,
    /// Latest-wins settle operations keyed per (tag, object); run after the
    /// regular taints of a frame, before the native step.
    post: Mutex<HashMap<(&'static str, ObjectId), TaintAction<Ctx>>>,
}

impl<Ctx> Default for TaintQueue<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx> TaintQueue<Ctx> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            post: Mutex::new(HashMap::new()),
        }
    }

    /// Appends a deferred action. Callable from any thread; returns
    /// immediately. Ordering is strictly by enqueue sequence.
    pub fn enqueue<F>(&self, tag: &'static str, action: F)
    where
        F: FnOnce(&mut Ctx) -> Result<()> + Send + 'static,
    {
        self.pending.lock().push(TaintEntry {
            tag,
            action: Box::new(action),
        });
    }

    /// Records an idempotent settle operation for an object. A later call
    /// with the same (tag, object) supersedes the earlier one.
    pub fn enqueue_post<F>(&self, tag: &'static str, object: ObjectId, action: F)
    where
        F: FnOnce(&mut Ctx) -> Result<()> + Send + 'static,
    {
        self.post.lock().insert((tag, object), Box::new(action));
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drains and executes every pending taint in enqueue order. Only ever
    /// called from the simulation tick. A failing action is logged and
    /// skipped; the rest of the frame's taints still run.
    pub fn flush(&self, ctx: &mut Ctx) {
        let drained = mem::take(&mut *self.pending.lock());
        for entry in drained {
            if let Err(err) = (entry.action)(ctx) {
                warn!("taint '{}' failed: {err}", entry.tag);
            }
        }
    }

    /// Runs the settle operations recorded since the last flush.
    pub fn flush_post(&self, ctx: &mut Ctx) {
        let drained = mem::take(&mut *self.post.lock());
        for ((tag, _), action) in drained {
            if let Err(err) = action(ctx) {
                warn!("post-taint '{tag}' failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PhysicsError;
    use std::sync::Arc;

    #[test]
    fn flush_runs_in_enqueue_order() {
        let queue: TaintQueue<Vec<u32>> = TaintQueue::new();
        for n in 0..8u32 {
            queue.enqueue("seq", move |log| {
                log.push(n);
                Ok(())
            });
        }

        let mut log = Vec::new();
        queue.flush(&mut log);
        assert_eq!(log, (0..8).collect::<Vec<_>>());
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn failing_action_does_not_abort_frame() {
        let queue: TaintQueue<Vec<u32>> = TaintQueue::new();
        queue.enqueue("ok", |log| {
            log.push(1);
            Ok(())
        });
        queue.enqueue("bad", |_| Err(PhysicsError::InvalidInput("boom".into())));
        queue.enqueue("ok", |log| {
            log.push(2);
            Ok(())
        });

        let mut log = Vec::new();
        queue.flush(&mut log);
        assert_eq!(log, vec![1, 2]);
    }

    #[test]
    fn enqueue_during_flush_defers_to_next_flush() {
        let queue: Arc<TaintQueue<Vec<&'static str>>> = Arc::new(TaintQueue::new());
        let inner = Arc::clone(&queue);
        queue.enqueue("outer", move |log| {
            log.push("outer");
            inner.enqueue("inner", |log| {
                log.push("inner");
                Ok(())
            });
            Ok(())
        });

        let mut log = Vec::new();
        queue.flush(&mut log);
        assert_eq!(log, vec!["outer"]);

        queue.flush(&mut log);
        assert_eq!(log, vec!["outer", "inner"]);
    }

    #[test]
    fn post_taints_collapse_latest_wins() {
        let queue: TaintQueue<Vec<u32>> = TaintQueue::new();
        let id = ObjectId::new(1, 0);
        queue.enqueue_post("settle", id, |log| {
            log.push(1);
            Ok(())
        });
        queue.enqueue_post("settle", id, |log| {
            log.push(2);
            Ok(())
        });

        let mut log = Vec::new();
        queue.flush_post(&mut log);
        assert_eq!(log, vec![2]);
    }
}
