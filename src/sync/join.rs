use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::scheduler::{Location, Scheduler};
use crate::task::{Task, TaskId};

impl Scheduler {
    /// Suspend `task` until `target` terminates.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] if `target` does not exist or is the
    /// task itself, and [`Error::AlreadyTerminated`] if `target` is dead.
    pub fn suspend_on(&mut self, task: TaskId, target: TaskId) -> Result<()> {
        if task == target {
            return Err(Error::InvalidHandle);
        }
        match self.location(target) {
            None => return Err(Error::InvalidHandle),
            Some(Location::Dead) => return Err(Error::AlreadyTerminated),
            Some(_) => {}
        }

        let mut joiner = self.detach(task).ok_or(Error::InvalidHandle)?;
        joiner.set_waited_task(Some(target));
        self.attach(joiner, Location::Suspended);
        if self.current() == Some(task) {
            self.release_current();
        }
        Ok(())
    }

    /// Make ready every task joining `dead`, in suspension order. Returns the
    /// number of tasks woken up.
    pub fn wake_joiners(&mut self, dead: TaskId) -> usize {
        let joiners = self
            .suspended
            .drain_where(|task| task.waited_task() == Some(dead));

        let woken = joiners.len();
        for mut task in joiners {
            task.set_waited_task(None);
            self.attach(task, Location::Ready);
        }
        woken
    }
}

impl Kernel {
    /// Wait for `task` to terminate and return its exit code. Any number of
    /// tasks may join the same task.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] if the task does not exist or is the
    /// calling task, and [`Error::AlreadyTerminated`] if it had already
    /// terminated when the call was made.
    pub fn join(&self, task: TaskId) -> Result<i32> {
        self.checkpoint();
        let id = self.caller();
        {
            let _guard = self.disable_preemption();
            self.lock().suspend_on(id, task)?;
        }

        self.switch_out(id);
        self.lock()
            .task(task)
            .and_then(Task::exit_code)
            .ok_or(Error::InvalidHandle)
    }
}
