//! Execution contexts.
//!
//! Every task runs on its own host thread, which owns the task stack. Only
//! one context runs at a time: a context hands the processor over by
//! unparking the next one and parking itself until it is chosen again. The
//! parker of a context lives in a thread-local slot of the thread that runs
//! it, and the matching unparker is what the rest of the kernel holds.
use core::cell::RefCell;
use core::time::Duration;
use crossbeam::sync::{Parker, Unparker};
use std::io;
use std::thread::{self, JoinHandle};

thread_local! {
    /// The parker of the execution context running on this thread, if any.
    static PARKER: RefCell<Option<Parker>> = const { RefCell::new(None) };
}

/// The execution context of a task: the thread that owns its stack and the
/// handle used to resume it.
#[derive(Debug)]
pub struct Context {
    /// Used to resume the context after it suspended itself.
    unparker: Unparker,

    /// The thread running the context. Taken when the context is reclaimed.
    thread: Option<JoinHandle<()>>,
}

impl Context {
    /// Create a new execution context with a stack of `stack_size` bytes that
    /// will run `entry`. The context starts running immediately, and `entry`
    /// is expected to suspend itself until the dispatcher selects it.
    ///
    /// # Errors
    /// Returns an error if the host refuses to create the thread, usually
    /// because the stack could not be allocated.
    pub fn create<F>(name: String, stack_size: usize, entry: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        let thread = thread::Builder::new()
            .name(name)
            .stack_size(stack_size)
            .spawn(move || {
                install(parker);
                entry();
            })?;

        Ok(Self {
            unparker,
            thread: Some(thread),
        })
    }

    /// A context that is not backed by any thread. Resuming it does nothing.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            unparker: Parker::new().unparker().clone(),
            thread: None,
        }
    }

    /// Resume the context.
    pub fn resume(&self) {
        self.unparker.unpark();
    }

    /// Return a handle that resumes this context.
    #[must_use]
    pub fn unparker(&self) -> &Unparker {
        &self.unparker
    }

    /// Move the thread backing this context into a new context, leaving
    /// this one detached.
    pub fn split_off(&mut self) -> Context {
        Context {
            unparker: self.unparker.clone(),
            thread: self.thread.take(),
        }
    }

    /// Wait for the thread backing this context to finish and release its
    /// stack. The context must have been told to stop beforehand, otherwise
    /// this blocks forever.
    pub fn reclaim(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("Execution context terminated abnormally");
            }
        }
    }
}

/// The calling thread turned into an execution context, see [`adopt`]. The
/// thread goes back to being a plain thread when this is dropped.
#[derive(Debug)]
pub struct Adoption {
    unparker: Unparker,
}

impl Adoption {
    /// Return a handle that resumes the adopted context.
    #[must_use]
    pub fn unparker(&self) -> &Unparker {
        &self.unparker
    }
}

impl Drop for Adoption {
    fn drop(&mut self) {
        PARKER.with(|slot| slot.borrow_mut().take());
    }
}

/// Turn the calling thread into an execution context. Used by the
/// dispatcher, which runs on the thread that booted the kernel.
#[must_use]
pub fn adopt() -> Adoption {
    let parker = Parker::new();
    let unparker = parker.unparker().clone();
    install(parker);
    Adoption { unparker }
}

/// Suspend the calling context until `resumed` returns true. The condition is
/// checked before suspending and after every wake-up, so spurious and early
/// wake-ups are harmless.
///
/// # Panics
/// Panics if the calling thread is not an execution context (see [`adopt`]
/// and [`Context::create`]).
pub fn suspend_until(mut resumed: impl FnMut() -> bool) {
    PARKER.with(|slot| {
        let slot = slot.borrow();
        let parker = slot.as_ref().expect("Not running in an execution context");
        while !resumed() {
            parker.park();
        }
    });
}

/// Suspend the calling context for at most `timeout`, or until resumed.
///
/// # Panics
/// Panics if the calling thread is not an execution context.
pub fn idle(timeout: Duration) {
    PARKER.with(|slot| {
        let slot = slot.borrow();
        let parker = slot.as_ref().expect("Not running in an execution context");
        parker.park_timeout(timeout);
    });
}

fn install(parker: Parker) {
    PARKER.with(|slot| *slot.borrow_mut() = Some(parker));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_resume_wakes_suspended_context() {
        let adoption = adopt();
        let unparker = adoption.unparker().clone();
        let done = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&done);
        let mut context = Context::create("ctx".into(), 64 * 1024, move || {
            flag.store(true, Ordering::SeqCst);
            unparker.unpark();
        })
        .unwrap();

        suspend_until(|| done.load(Ordering::SeqCst));
        context.reclaim();
        drop(adoption);
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_split_off_moves_the_thread() {
        let mut context = Context::create("ctx".into(), 64 * 1024, || {}).unwrap();
        let mut thread = context.split_off();
        assert!(context.thread.is_none());
        assert!(thread.thread.is_some());

        thread.reclaim();
        context.reclaim();
        assert!(thread.thread.is_none());
    }

    #[test]
    #[should_panic(expected = "Not running in an execution context")]
    fn test_suspend_outside_context_panics() {
        suspend_until(|| false);
    }
}
