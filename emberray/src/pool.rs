//! Bounded worker pool for loader tasks.
//!
//! Tasks are collected first and run together on rayon's thread pool, so the
//! caller can borrow disjoint records into the tasks and join them all with
//! one call. Decoding runs in parallel; device access inside each task is
//! serialized by the manager's device mutex.

/// A batch of queued tasks tied to the `'scope` of the data they borrow.
#[derive(Default)]
pub struct TaskPool<'scope> {
    tasks: Vec<Box<dyn FnOnce() + Send + 'scope>>,
}

impl<'scope> TaskPool<'scope> {
    pub fn new() -> Self {
        TaskPool { tasks: Vec::new() }
    }

    /// Queue a task. Nothing runs until [`TaskPool::wait_work`].
    pub fn push<F>(&mut self, task: F)
    where
        F: FnOnce() + Send + 'scope,
    {
        self.tasks.push(Box::new(task));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run all queued tasks to completion on the rayon pool.
    pub fn wait_work(self) {
        if self.tasks.is_empty() {
            return;
        }
        rayon::scope(|scope| {
            for task in self.tasks {
                scope.spawn(move |_| task());
            }
        });
    }
}
