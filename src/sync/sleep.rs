use crate::kernel::Kernel;
use crate::scheduler::{Location, Scheduler};
use crate::task::{Nap, TaskId};
use crate::time::Instant;
use core::time::Duration;

impl Scheduler {
    /// Put `task` to sleep for `nap`. Returns false if the task does not
    /// exist.
    pub fn fall_asleep(&mut self, task: TaskId, nap: Nap) -> bool {
        let Some(mut sleeper) = self.detach(task) else {
            return false;
        };

        sleeper.set_nap(Some(nap));
        self.attach(sleeper, Location::Sleeping);
        if self.current() == Some(task) {
            self.release_current();
        }
        true
    }

    /// Make ready every sleeping task whose deadline is reached at `now`, in
    /// sleeping roster order. Returns the number of tasks woken up.
    pub fn wake_sleepers(&mut self, now: Instant) -> usize {
        let awake = self
            .sleeping
            .drain_where(|task| task.nap().is_none_or(|nap| nap.deadline() <= now));

        let woken = awake.len();
        for mut task in awake {
            log::trace!("Task {} woken up at {} ms", task.id(), now.as_millis());
            task.set_nap(None);
            self.attach(task, Location::Ready);
        }
        woken
    }

    /// The earliest deadline among the sleeping tasks.
    #[must_use]
    pub fn next_wake_up(&self) -> Option<Instant> {
        self.sleeping
            .iter()
            .filter_map(|task| task.nap())
            .map(|nap| nap.deadline())
            .min()
    }
}

impl Kernel {
    /// Suspend the calling task for at least `duration`. The task becomes
    /// ready again at the first scheduling decision made once the deadline is
    /// reached, so the clock may read more than the deadline when it resumes.
    /// A zero duration only yields the processor.
    pub fn sleep(&self, duration: Duration) {
        self.checkpoint();
        let id = self.caller();
        {
            let _guard = self.disable_preemption();
            let nap = Nap {
                start: self.now(),
                duration,
            };
            self.lock().fall_asleep(id, nap);
        }
        self.switch_out(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::thread::Context;
    use crate::task::{State, Task};

    fn admit(scheduler: &mut Scheduler) -> TaskId {
        let id = scheduler.allocate_id();
        scheduler.admit(Box::new(Task::new(id, Context::detached(), Instant::BOOT)));
        id
    }

    fn nap(start: u64, duration: u64) -> Nap {
        Nap {
            start: Instant::from_millis(start),
            duration: Duration::from_millis(duration),
        }
    }

    #[test]
    fn test_sleepers_wake_at_their_deadline() {
        let mut scheduler = Scheduler::new();
        let a = admit(&mut scheduler);
        let b = admit(&mut scheduler);
        scheduler.set_current(a);

        assert!(scheduler.fall_asleep(a, nap(0, 30)));
        assert!(scheduler.fall_asleep(b, nap(5, 10)));
        assert_eq!(scheduler.current(), None);
        assert_eq!(scheduler.task(a).unwrap().state(), State::Sleeping);
        assert_eq!(scheduler.next_wake_up(), Some(Instant::from_millis(15)));

        assert_eq!(scheduler.wake_sleepers(Instant::from_millis(14)), 0);
        assert_eq!(scheduler.wake_sleepers(Instant::from_millis(15)), 1);
        assert_eq!(scheduler.location(b), Some(Location::Ready));
        assert_eq!(scheduler.task(b).unwrap().nap(), None);
        assert_eq!(scheduler.next_wake_up(), Some(Instant::from_millis(30)));

        assert_eq!(scheduler.wake_sleepers(Instant::from_millis(100)), 1);
        assert!(scheduler.sleeping.is_empty());
        assert_eq!(scheduler.next_wake_up(), None);
    }

    #[test]
    fn test_zero_duration_wakes_immediately() {
        let mut scheduler = Scheduler::new();
        let a = admit(&mut scheduler);

        scheduler.fall_asleep(a, nap(7, 0));
        assert_eq!(scheduler.wake_sleepers(Instant::from_millis(7)), 1);
        assert_eq!(scheduler.location(a), Some(Location::Ready));
    }

    #[test]
    fn test_unknown_task_cannot_sleep() {
        let mut scheduler = Scheduler::new();
        assert!(!scheduler.fall_asleep(TaskId::from(9), nap(0, 1)));
        assert!(scheduler.sleeping.is_empty());
    }
}
