//! The dispatcher: the loop that picks the next task and hands it the
//! processor. It runs on the thread that booted the kernel.
use super::{Scheduler, aging};
use crate::arch::thread;
use crate::kernel::{Kernel, Tick};
use crate::task::TaskId;
use crate::time::Instant;
use core::sync::atomic::Ordering;
use crossbeam::sync::Unparker;

impl Kernel {
    /// Run tasks until none of them can ever run again.
    pub(crate) fn dispatch(&self) {
        log::debug!("Dispatcher started");

        loop {
            let mut scheduler = self.lock();
            scheduler.wake_sleepers(self.now());

            if let Some((id, unparker)) = self.launch(&mut scheduler) {
                drop(scheduler);
                log::trace!("Dispatching task {id}");
                unparker.unpark();

                thread::suspend_until(|| self.lock().current().is_none());
                let retired = {
                    let mut scheduler = self.lock();
                    scheduler.count_dispatcher_activation();
                    scheduler.retire(id)
                };

                // The task terminated: its thread is about to return.
                if let Some(mut context) = retired {
                    context.reclaim();
                }
            } else if let Some(deadline) = scheduler.next_wake_up() {
                drop(scheduler);
                self.idle_until(deadline);
            } else {
                break;
            }
        }

        log::debug!("Dispatcher terminated");
    }

    /// Select the next task and make it the running one. Returns the handle
    /// resuming its context.
    fn launch(&self, scheduler: &mut Scheduler) -> Option<(TaskId, Unparker)> {
        let id = aging::select(&scheduler.ready)?;
        let task = scheduler.ready.get(id)?;
        task.arm_quantum(self.config().quantum);
        let unparker = task.context().unparker().clone();

        scheduler.set_current(id);
        self.inner.preempt_pending.store(false, Ordering::Release);
        Some((id, unparker))
    }

    /// Wait for the next sleeper to wake up.
    fn idle_until(&self, deadline: Instant) {
        match self.config().tick {
            Tick::Periodic(interval) => thread::idle(interval),
            Tick::Manual => {
                log::trace!("Idle, moving the clock to {} ms", deadline.as_millis());
                self.inner.clock.advance_to(deadline);
            }
        }
    }
}
