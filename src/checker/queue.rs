use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};

use crate::domain::{CheckableUrl, RecordId};

/// One unit of queued work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckTask {
    /// Check the fields of a record, starting at `next_field`
    Record { record_id: RecordId, next_field: usize },
    /// Recheck a single failing URL
    Url(CheckableUrl),
}

impl CheckTask {
    pub fn record(record_id: RecordId) -> Self {
        CheckTask::Record {
            record_id,
            next_field: 0,
        }
    }

    pub fn record_id(&self) -> RecordId {
        match self {
            CheckTask::Record { record_id, .. } => *record_id,
            CheckTask::Url(key) => key.record_id,
        }
    }
}

#[derive(Debug, Default)]
struct Tasks {
    waiting: VecDeque<CheckTask>,
    running: Vec<CheckTask>,
}

/// FIFO of checks; a task stays outstanding from queuing until its run finishes
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<Tasks>,
}

/// A task taken off the queue, counted as running until dropped
#[derive(Debug)]
pub struct RunningTask<'a> {
    queue: &'a TaskQueue,
    task: CheckTask,
}

impl RunningTask<'_> {
    pub fn task(&self) -> &CheckTask {
        &self.task
    }
}

impl Drop for RunningTask<'_> {
    fn drop(&mut self) {
        let mut tasks = self.queue.lock();
        if let Some(pos) = tasks.running.iter().position(|t| *t == self.task) {
            tasks.running.swap_remove(pos);
        }
    }
}

impl TaskQueue {
    fn lock(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn extend(&self, tasks: impl IntoIterator<Item = CheckTask>) {
        self.lock().waiting.extend(tasks);
    }

    pub fn push_back(&self, task: CheckTask) {
        self.lock().waiting.push_back(task);
    }

    /// Queue a record ahead of everything else
    ///
    /// Refused while a check of the record is waiting or any task of the record is running.
    /// Waiting URL rechecks of the record are dropped, the record check covers them.
    pub fn push_record_front(&self, record_id: RecordId) -> bool {
        let mut tasks = self.lock();
        let outstanding = tasks.running.iter().any(|t| t.record_id() == record_id)
            || tasks
                .waiting
                .iter()
                .any(|t| matches!(t, CheckTask::Record { record_id: id, .. } if *id == record_id));
        if outstanding {
            return false;
        }

        tasks.waiting.retain(|t| t.record_id() != record_id);
        tasks.waiting.push_front(CheckTask::record(record_id));
        true
    }

    /// Take the task at the head of the queue
    pub fn start(&self) -> Option<RunningTask<'_>> {
        let mut tasks = self.lock();
        let task = tasks.waiting.pop_front()?;
        tasks.running.push(task.clone());

        Some(RunningTask { queue: self, task })
    }

    /// Waiting plus running tasks
    pub fn len(&self) -> usize {
        let tasks = self.lock();
        tasks.waiting.len() + tasks.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn manual_record_checks_jump_the_queue_once() {
        let queue = TaskQueue::default();
        queue.extend([
            CheckTask::record(1),
            CheckTask::Url(CheckableUrl::new(2, 1, "http://a.example")),
        ]);

        assert!(queue.push_record_front(3));
        assert!(!queue.push_record_front(3));
        assert!(!queue.push_record_front(1));
        assert_eq!(queue.len(), 3);

        let order: Vec<RecordId> = std::iter::from_fn(|| queue.start().map(|t| t.task().record_id()))
            .collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn running_tasks_stay_outstanding() {
        let queue = TaskQueue::default();
        queue.extend([CheckTask::record(1)]);

        let running = queue.start().unwrap();
        assert_eq!(running.task(), &CheckTask::record(1));
        assert_eq!(queue.len(), 1);
        assert!(!queue.push_record_front(1));

        drop(running);
        assert!(queue.is_empty());
        assert!(queue.push_record_front(1));
    }

    #[test]
    fn manual_check_replaces_waiting_url_rechecks() {
        let queue = TaskQueue::default();
        queue.extend([
            CheckTask::Url(CheckableUrl::new(4, 1, "http://a.example/x")),
            CheckTask::Url(CheckableUrl::new(5, 1, "http://b.example/y")),
            CheckTask::Url(CheckableUrl::new(4, 2, "http://a.example/z")),
        ]);

        assert!(queue.push_record_front(4));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.start().unwrap().task(), &CheckTask::record(4));
        assert_eq!(queue.start().unwrap().task().record_id(), 5);
    }
}
