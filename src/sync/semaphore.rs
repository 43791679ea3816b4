//! Counting semaphores with a FIFO wait roster.
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::roster::Roster;
use crate::scheduler::{Location, Scheduler};
use crate::task::{Task, TaskId};

/// The handle of a semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreId(usize);

impl From<usize> for SemaphoreId {
    fn from(id: usize) -> Self {
        Self(id)
    }
}

impl From<SemaphoreId> for usize {
    fn from(id: SemaphoreId) -> usize {
        id.0
    }
}

/// A counting semaphore. A negative counter is the number of tasks waiting
/// in its roster.
#[derive(Debug)]
pub struct Semaphore {
    counter: i64,
    waiters: Roster,
}

impl Semaphore {
    #[must_use]
    pub fn new(initial: i64) -> Self {
        Self {
            counter: initial,
            waiters: Roster::new(),
        }
    }

    #[must_use]
    pub const fn counter(&self) -> i64 {
        self.counter
    }

    pub(crate) fn waiters(&self) -> &Roster {
        &self.waiters
    }

    pub(crate) fn waiters_mut(&mut self) -> &mut Roster {
        &mut self.waiters
    }
}

/// The outcome of a down operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// The semaphore was available.
    Acquired,

    /// The caller was moved to the wait roster and released the processor.
    Blocked,
}

impl Scheduler {
    /// Decrement the counter of a semaphore on behalf of `task`. If the
    /// counter becomes negative, the task joins the end of the wait roster.
    ///
    /// # Errors
    /// Fails if the semaphore does not exist or was destroyed.
    pub fn semaphore_down(&mut self, semaphore: SemaphoreId, task: TaskId) -> Result<Acquire> {
        let counter = {
            let semaphore = self.semaphores.get_mut(semaphore)?;
            semaphore.counter -= 1;
            semaphore.counter
        };

        if counter >= 0 {
            return Ok(Acquire::Acquired);
        }

        self.relocate(task, Location::Waiting(semaphore));
        if self.current() == Some(task) {
            self.release_current();
        }
        Ok(Acquire::Blocked)
    }

    /// Increment the counter of a semaphore. If tasks were waiting, the
    /// first one is made ready. Returns the task woken up, if any.
    ///
    /// # Errors
    /// Fails if the semaphore does not exist or was destroyed.
    pub fn semaphore_up(&mut self, semaphore: SemaphoreId) -> Result<Option<TaskId>> {
        let waiter = {
            let semaphore = self.semaphores.get_mut(semaphore)?;
            semaphore.counter += 1;
            semaphore.waiters.iter().next().map(Task::id)
        };

        if let Some(id) = waiter {
            self.relocate(id, Location::Ready);
        }
        Ok(waiter)
    }

    /// Destroy a semaphore. Every task waiting on it is made ready, in wait
    /// order. Returns the number of tasks woken up.
    ///
    /// # Errors
    /// Fails if the semaphore does not exist or was already destroyed.
    pub fn semaphore_destroy(&mut self, semaphore: SemaphoreId) -> Result<usize> {
        let mut destroyed = self.semaphores.destroy(semaphore)?;
        let mut woken = 0;
        while let Some(task) = destroyed.waiters.pop_front() {
            task.interrupt();
            self.attach(task, Location::Ready);
            woken += 1;
        }
        Ok(woken)
    }
}

impl Kernel {
    /// Create a semaphore with the given initial counter.
    pub fn sem_create(&self, initial: i64) -> SemaphoreId {
        self.checkpoint();
        let id = self.lock().semaphores.insert(Semaphore::new(initial));
        log::debug!("Semaphore {} created with counter {initial}", usize::from(id));
        id
    }

    /// Take a unit from the semaphore, blocking until one is available. A
    /// caller woken up by [`Kernel::sem_up`] owns its unit even if the
    /// semaphore is destroyed before the caller runs again.
    ///
    /// # Errors
    /// Fails with [`crate::Error::InvalidHandle`] if the semaphore does not exist,
    /// and with [`crate::Error::Destroyed`] if it was destroyed, including while the
    /// caller was blocked on it.
    pub fn sem_down(&self, semaphore: SemaphoreId) -> Result<()> {
        self.checkpoint();
        let id = self.caller();
        let acquire = {
            let _guard = self.disable_preemption();
            self.lock().semaphore_down(semaphore, id)?
        };

        if acquire == Acquire::Blocked {
            self.switch_out(id);
            let interrupted = self.lock().task(id).is_some_and(Task::take_interrupted);
            if interrupted {
                return Err(Error::Destroyed);
            }
        }
        Ok(())
    }

    /// Give a unit back to the semaphore, waking up the first waiter.
    ///
    /// # Errors
    /// Fails with [`crate::Error::InvalidHandle`] if the semaphore does not exist,
    /// and with [`crate::Error::Destroyed`] if it was destroyed.
    pub fn sem_up(&self, semaphore: SemaphoreId) -> Result<()> {
        self.checkpoint();
        let _guard = self.disable_preemption();
        self.lock().semaphore_up(semaphore)?;
        Ok(())
    }

    /// Destroy the semaphore. Tasks blocked on it are woken up and their
    /// pending down fails with [`crate::Error::Destroyed`].
    ///
    /// # Errors
    /// Fails with [`crate::Error::InvalidHandle`] if the semaphore does not exist,
    /// and with [`crate::Error::Destroyed`] if it was already destroyed.
    pub fn sem_destroy(&self, semaphore: SemaphoreId) -> Result<()> {
        self.checkpoint();
        let _guard = self.disable_preemption();
        let woken = self.lock().semaphore_destroy(semaphore)?;
        log::debug!(
            "Semaphore {} destroyed, {woken} tasks woken up",
            usize::from(semaphore)
        );
        Ok(())
    }

    /// The current counter of the semaphore.
    ///
    /// # Errors
    /// Fails if the semaphore does not exist or was destroyed.
    pub fn sem_value(&self, semaphore: SemaphoreId) -> Result<i64> {
        self.checkpoint();
        self.lock().semaphores.get(semaphore).map(Semaphore::counter)
    }
}
