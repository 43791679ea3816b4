//! Blocking primitives: semaphores, sleeping and joining, and the critical
//! sections that keep the kernel from preempting a task while it updates
//! shared state.
use crate::kernel::Kernel;
use core::sync::atomic::{AtomicBool, Ordering};

pub mod join;
pub mod semaphore;
pub mod sleep;

/// Keeps preemption disabled while alive. The previous setting is restored
/// when the guard is dropped, so guards nest.
#[must_use]
pub struct PreemptionGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl Drop for PreemptionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::Release);
    }
}

impl Kernel {
    /// Disable preemption until the returned guard is dropped. Ticks keep
    /// being counted, but a task whose quantum runs out is only preempted
    /// once preemption is enabled again.
    pub fn disable_preemption(&self) -> PreemptionGuard<'_> {
        let flag = &self.inner.preemption;
        PreemptionGuard {
            flag,
            previous: flag.swap(false, Ordering::AcqRel),
        }
    }

    /// Whether the running task may currently be preempted.
    #[must_use]
    pub fn preemption_enabled(&self) -> bool {
        self.inner.preemption.load(Ordering::Acquire)
    }

    /// Run `section` with preemption disabled.
    ///
    /// The section should not block: the flag is global, so the tasks that
    /// run while the caller is blocked cannot be preempted either.
    pub fn critical<R>(&self, section: impl FnOnce() -> R) -> R {
        let _guard = self.disable_preemption();
        section()
    }
}
