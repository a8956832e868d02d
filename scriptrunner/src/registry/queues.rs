//! Staged run queues.
//!
//! Each queue is a FIFO of run ids guarded by its own mutex, held only for
//! the duration of a single queue operation. Cancellation is the one
//! exception to FIFO order: [`RunQueues::promote`] moves a run to the front.

use crate::run::RunId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;

/// The staged queues a run can sit on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Submitted with `auto_run = false`; waits for `compile_script`.
    PendingPrepare,
    /// Drained by the compiler worker.
    Prepare,
    /// Compiled with `auto_run = false`; waits for `run_compiled_script`.
    PendingRun,
    /// Drained by the executor worker.
    ReadyRun,
}

impl QueueKind {
    pub const ALL: [QueueKind; 4] = [
        Self::PendingPrepare,
        Self::Prepare,
        Self::PendingRun,
        Self::ReadyRun,
    ];

    /// Queue a canceled run is promoted into so a worker finalizes it.
    pub fn cancel_target(&self) -> QueueKind {
        match self {
            Self::PendingPrepare | Self::Prepare => Self::Prepare,
            Self::PendingRun | Self::ReadyRun => Self::ReadyRun,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPrepare => "pending-prepare",
            Self::Prepare => "prepare",
            Self::PendingRun => "pending-run",
            Self::ReadyRun => "ready-run",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four staged queues.
#[derive(Debug, Default)]
pub struct RunQueues {
    pending_prepare: Mutex<VecDeque<RunId>>,
    prepare: Mutex<VecDeque<RunId>>,
    pending_run: Mutex<VecDeque<RunId>>,
    ready_run: Mutex<VecDeque<RunId>>,
}

impl RunQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, kind: QueueKind) -> &Mutex<VecDeque<RunId>> {
        match kind {
            QueueKind::PendingPrepare => &self.pending_prepare,
            QueueKind::Prepare => &self.prepare,
            QueueKind::PendingRun => &self.pending_run,
            QueueKind::ReadyRun => &self.ready_run,
        }
    }

    pub fn push_back(&self, kind: QueueKind, id: RunId) {
        self.queue(kind).lock().push_back(id);
    }

    pub fn push_front(&self, kind: QueueKind, id: RunId) {
        self.queue(kind).lock().push_front(id);
    }

    pub fn pop_front(&self, kind: QueueKind) -> Option<RunId> {
        self.queue(kind).lock().pop_front()
    }

    /// Removes `id` from `kind`. Returns false if it was not there.
    pub fn remove(&self, kind: QueueKind, id: RunId) -> bool {
        let mut queue = self.queue(kind).lock();
        match queue.iter().position(|queued| *queued == id) {
            Some(index) => {
                queue.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, kind: QueueKind, id: RunId) -> bool {
        self.queue(kind).lock().contains(&id)
    }

    /// First queue holding `id`, if any.
    pub fn locate(&self, id: RunId) -> Option<QueueKind> {
        QueueKind::ALL
            .into_iter()
            .find(|kind| self.contains(*kind, id))
    }

    /// Moves `id` from `from` to the back of `to`. Returns false if `id` was
    /// not waiting in `from`.
    pub fn transfer(&self, from: QueueKind, to: QueueKind, id: RunId) -> bool {
        if !self.remove(from, id) {
            return false;
        }
        self.push_back(to, id);
        true
    }

    /// Moves `id` to the front of the queue its cancellation is handled on.
    ///
    /// Returns the queue it now heads, or `None` if it was not queued.
    pub fn promote(&self, id: RunId) -> Option<QueueKind> {
        let current = self.locate(id)?;
        let target = current.cancel_target();
        if !self.remove(current, id) {
            // Dequeued by a worker in the meantime.
            return None;
        }
        self.push_front(target, id);
        Some(target)
    }

    /// Ordered copy of one queue.
    pub fn snapshot(&self, kind: QueueKind) -> Vec<RunId> {
        self.queue(kind).lock().iter().copied().collect()
    }

    pub fn len(&self, kind: QueueKind) -> usize {
        self.queue(kind).lock().len()
    }

    /// Runs waiting on the worker-drained queues.
    pub fn active_len(&self) -> usize {
        self.len(QueueKind::Prepare) + self.len(QueueKind::ReadyRun)
    }

    /// Empties every queue, returning the ids in queue order.
    pub fn drain_all(&self) -> Vec<RunId> {
        QueueKind::ALL
            .into_iter()
            .flat_map(|kind| self.queue(kind).lock().drain(..).collect::<Vec<_>>())
            .collect()
    }
}
