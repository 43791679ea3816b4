//! The kernel handle, boot and shutdown, and the task lifecycle.
use crate::arch::{thread, timer};
use crate::error::{BootError, Error, Result};
use crate::scheduler::{Location, Scheduler};
use crate::task::{State, Task, TaskId, TaskReport};
use crate::time::{Clock, Instant};
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use crossbeam::sync::Unparker;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Where the ticks of the kernel clock come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// A timer thread delivers a tick at the given interval.
    Periodic(Duration),

    /// Ticks are only delivered by calls to [`Kernel::tick`]. When every
    /// remaining task sleeps, the dispatcher moves the clock straight to the
    /// earliest deadline instead of waiting for it.
    Manual,
}

/// The runtime configuration of a kernel. The defaults come from the
/// `config` crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// The number of ticks given to a task every time it is dispatched.
    pub quantum: u32,

    /// The stack size of every task, in bytes.
    pub stack_size: usize,

    /// The tick source.
    pub tick: Tick,
}

impl Config {
    /// The default configuration with a manual tick source.
    #[must_use]
    pub fn manual() -> Self {
        Self::default().with_tick(Tick::Manual)
    }

    #[must_use]
    pub const fn with_quantum(mut self, quantum: u32) -> Self {
        self.quantum = quantum;
        self
    }

    #[must_use]
    pub const fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    #[must_use]
    pub const fn with_tick(mut self, tick: Tick) -> Self {
        self.tick = tick;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quantum: config::QUANTUM,
            stack_size: config::STACK_SIZE,
            tick: Tick::Periodic(Duration::from_millis(config::TICK_INTERVAL_MS)),
        }
    }
}

/// What is left of a kernel once every task terminated, or once the
/// remaining ones can never run again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// The diagnostics of every task, ordered by identifier.
    pub tasks: Vec<TaskReport>,

    /// How many times control came back to the dispatcher.
    pub dispatcher_activations: u64,

    /// The kernel clock when the kernel shut down.
    pub uptime: Duration,
}

impl Report {
    /// The diagnostics of a task.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&TaskReport> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// The exit code of a task, if it terminated.
    #[must_use]
    pub fn exit_code(&self, id: TaskId) -> Option<i32> {
        self.task(id)?.exit_code
    }
}

/// The reason a task stack is being unwound by the kernel rather than by a
/// panic of the task body.
#[derive(Debug)]
pub(crate) enum Unwind {
    /// The task called [`Kernel::exit`].
    Exit(i32),

    /// The kernel is shutting down while the task can never run again.
    Halt,
}

pub(crate) struct Inner {
    /// The kernel state.
    pub(crate) scheduler: spin::Mutex<Scheduler>,

    /// The kernel clock, in ticks since boot.
    pub(crate) clock: Clock,

    /// Cleared while a task is inside a critical section.
    pub(crate) preemption: AtomicBool,

    /// Set by the tick handler when the running task exhausted its quantum.
    /// Honoured at the next kernel call of the task.
    pub(crate) preempt_pending: AtomicBool,

    /// Set once the kernel shuts down.
    pub(crate) halted: AtomicBool,

    /// Resumes the dispatcher.
    pub(crate) dispatcher: Unparker,

    pub(crate) config: Config,
}

/// A handle to a running kernel, given to every task body. All the kernel
/// calls go through it.
///
/// Every kernel call starts with a preemption point: a task whose quantum
/// ran out gives the processor back to the dispatcher there, before the call
/// does anything else.
#[derive(Clone)]
pub struct Kernel {
    pub(crate) inner: Arc<Inner>,
}

impl core::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.inner.config)
            .field("now", &self.now())
            .finish_non_exhaustive()
    }
}

/// Boot a kernel on the calling thread and run `main` as its first task. The
/// call returns once every task terminated, or once the tasks left are all
/// blocked forever.
///
/// The calling thread becomes the dispatcher, so this must not be called
/// from inside a task.
///
/// # Errors
/// Fails if the tick source cannot be armed or if the main task cannot be
/// created.
pub fn boot<F>(config: Config, main: F) -> core::result::Result<Report, BootError>
where
    F: FnOnce(&Kernel) -> i32 + Send + 'static,
{
    log::info!(
        "Booting kernel: quantum of {} ticks, {:?} tick source",
        config.quantum,
        config.tick
    );

    let adoption = thread::adopt();
    let kernel = Kernel {
        inner: Arc::new(Inner {
            scheduler: spin::Mutex::new(Scheduler::new()),
            clock: Clock::new(),
            preemption: AtomicBool::new(true),
            preempt_pending: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            dispatcher: adoption.unparker().clone(),
            config,
        }),
    };

    let timer = match config.tick {
        Tick::Periodic(interval) => {
            let handler = kernel.clone();
            let timer =
                timer::arm(interval, move || handler.on_tick()).map_err(BootError::Timer)?;
            Some(timer)
        }
        Tick::Manual => None,
    };

    let id = kernel.lock().allocate_id();
    let task = kernel.create_task(id, main).map_err(BootError::MainTask)?;
    kernel.lock().admit(task);

    kernel.dispatch();
    drop(timer);

    let report = kernel.shutdown();
    drop(adoption);
    Ok(report)
}

impl Kernel {
    /// Lock the kernel state.
    pub(crate) fn lock(&self) -> spin::MutexGuard<'_, Scheduler> {
        self.inner.scheduler.lock()
    }

    pub(crate) fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn now(&self) -> Instant {
        self.inner.clock.now()
    }

    /// The identifier of the calling task.
    ///
    /// # Panics
    /// Panics if called from outside a task of this kernel.
    pub(crate) fn caller(&self) -> TaskId {
        self.lock()
            .current()
            .expect("Kernel call made outside of a running task")
    }

    /// Create a task with the given identifier. The task is not admitted in
    /// the ready roster.
    fn create_task<F>(&self, id: TaskId, body: F) -> io::Result<Box<Task>>
    where
        F: FnOnce(&Kernel) -> i32 + Send + 'static,
    {
        let kernel = self.clone();
        let context = thread::Context::create(
            format!("task-{id}"),
            self.config().stack_size,
            move || kernel.run_task(id, body),
        )?;
        Ok(Box::new(Task::new(id, context, self.now())))
    }

    /// The entry point of every task thread.
    fn run_task<F>(&self, id: TaskId, body: F)
    where
        F: FnOnce(&Kernel) -> i32,
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.wait_for_dispatch(id);
            body(self)
        }));

        match outcome {
            Ok(code) => self.finish(id, code),
            Err(payload) => match payload.downcast::<Unwind>() {
                Ok(unwind) => match *unwind {
                    Unwind::Exit(code) => self.finish(id, code),
                    Unwind::Halt => log::trace!("Task {id} halted"),
                },
                Err(_) => {
                    log::error!("Task {id} panicked");
                    self.finish(id, config::PANIC_EXIT_CODE);
                }
            },
        }
    }

    /// Terminate a task: record its exit code, move it to the dead tasks,
    /// wake up the tasks joining it and give the processor back to the
    /// dispatcher.
    fn finish(&self, id: TaskId, code: i32) {
        let now = self.now();
        let mut scheduler = self.lock();
        if let Some(mut task) = scheduler.detach(id) {
            task.terminate(code, now);
            let report = task.report(now);
            log::info!(
                "Task {id} exit: execution time {} ms, processor time {} ms, {} activations",
                report.execution_time.as_millis(),
                report.processor_time.as_millis(),
                report.activations
            );

            scheduler.attach(task, Location::Dead);
            scheduler.wake_joiners(id);
        }

        if scheduler.current() == Some(id) {
            scheduler.release_current();
        }
        drop(scheduler);
        self.inner.dispatcher.unpark();
    }

    /// Suspend the calling task until the dispatcher selects it.
    ///
    /// # Panics
    /// Unwinds the stack of the task if the kernel shuts down in the
    /// meantime. The unwind is caught at the entry point of the task.
    pub(crate) fn wait_for_dispatch(&self, id: TaskId) {
        thread::suspend_until(|| {
            self.inner.halted.load(Ordering::Acquire) || self.lock().current() == Some(id)
        });

        if self.inner.halted.load(Ordering::Acquire) {
            panic::resume_unwind(Box::new(Unwind::Halt));
        }
    }

    /// Give the processor back to the dispatcher and wait until the calling
    /// task is dispatched again. The caller must have released the processor
    /// beforehand, either by staying ready or by moving itself to another
    /// roster.
    pub(crate) fn switch_out(&self, id: TaskId) {
        self.inner.dispatcher.unpark();
        self.wait_for_dispatch(id);
    }

    /// Create a new task running `body`. The task is ready immediately and
    /// runs when the dispatcher selects it. The value returned by `body` is
    /// the exit code of the task.
    ///
    /// # Errors
    /// Returns [`Error::Exhausted`] if no execution context could be created
    /// for the task.
    pub fn spawn<F>(&self, body: F) -> Result<TaskId>
    where
        F: FnOnce(&Kernel) -> i32 + Send + 'static,
    {
        self.checkpoint();
        let id = self.lock().allocate_id();
        let task = self.create_task(id, body).map_err(|error| {
            log::error!("Failed to create task {id}: {error}");
            Error::Exhausted
        })?;

        self.lock().admit(task);
        log::debug!("Task {id} created");
        Ok(id)
    }

    /// Terminate the calling task with `code`. Tasks joining it are woken up
    /// and receive `code`.
    ///
    /// The stack of the task is unwound, so destructors of values owned by
    /// the task run before the task terminates.
    pub fn exit(&self, code: i32) -> ! {
        panic::resume_unwind(Box::new(Unwind::Exit(code)))
    }

    /// Give the processor back to the dispatcher. The calling task stays
    /// ready, in its place in the ready roster.
    pub fn yield_now(&self) {
        let id = self.lock().release_current();
        if let Some(id) = id {
            log::trace!("Task {id} yields");
            self.switch_out(id);
        }
    }

    /// The identifier of the calling task.
    ///
    /// # Panics
    /// Panics if called from outside a task of this kernel.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.checkpoint();
        self.caller()
    }

    /// Set the priority of a task, or of the calling task if `task` is
    /// `None`. Both the static and the dynamic priority are set. A priority
    /// outside of the priority band is ignored.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] if the task does not exist.
    pub fn set_priority(&self, task: Option<TaskId>, priority: i32) -> Result<()> {
        self.checkpoint();
        if !(config::MIN_PRIORITY..=config::MAX_PRIORITY).contains(&priority) {
            log::debug!("Priority {priority} out of range, ignored");
            return Ok(());
        }

        let id = task.unwrap_or_else(|| self.caller());
        let scheduler = self.lock();
        let task = scheduler.task(id).ok_or(Error::InvalidHandle)?;
        task.set_priority(priority);
        Ok(())
    }

    /// The static priority of a task, or of the calling task if `task` is
    /// `None`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] if the task does not exist.
    pub fn priority(&self, task: Option<TaskId>) -> Result<i32> {
        self.checkpoint();
        let id = task.unwrap_or_else(|| self.caller());
        self.lock()
            .task(id)
            .map(Task::static_priority)
            .ok_or(Error::InvalidHandle)
    }

    /// The state of a task.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandle`] if the task does not exist.
    pub fn task_state(&self, task: TaskId) -> Result<State> {
        self.checkpoint();
        self.lock()
            .task(task)
            .map(Task::state)
            .ok_or(Error::InvalidHandle)
    }

    /// The number of ticks elapsed since boot, in milliseconds with the
    /// default tick source.
    #[must_use]
    pub fn systime(&self) -> u64 {
        self.checkpoint();
        self.now().as_millis()
    }

    /// Deliver one tick to the kernel and honour the preemption request it
    /// may raise. This is how a task drives the clock with a manual tick
    /// source.
    pub fn tick(&self) {
        self.on_tick();
        self.checkpoint();
    }

    /// The tick handler. Advances the clock and charges the tick to the
    /// running task. When the quantum of the task runs out, a preemption is
    /// requested. With no task running, the dispatcher is woken up so it can
    /// check for sleepers.
    pub(crate) fn on_tick(&self) {
        self.inner.clock.tick();
        let scheduler = self.lock();
        let remaining = scheduler.current_task().map(Task::consume_tick);
        match remaining {
            Some(remaining) => {
                if remaining <= 0 && self.preemption_enabled() {
                    self.inner.preempt_pending.store(true, Ordering::Release);
                }
            }
            None => {
                drop(scheduler);
                self.inner.dispatcher.unpark();
            }
        }
    }

    /// A preemption point: if the quantum of the calling task ran out while
    /// preemption was enabled, the task yields.
    pub fn checkpoint(&self) {
        if self.preemption_enabled() && self.inner.preempt_pending.swap(false, Ordering::AcqRel) {
            log::trace!("Quantum exhausted, preempting the running task");
            self.yield_now();
        }
    }

    /// Stop the kernel: release the tasks that can never run again and
    /// reclaim the execution context of every task.
    fn shutdown(&self) -> Report {
        let now = self.now();
        let (mut tasks, dispatcher_activations) = {
            let mut scheduler = self.lock();
            let blocked = scheduler.blocked();
            if blocked > 0 {
                log::warn!("{blocked} tasks are blocked forever, halting them");
            }
            (scheduler.drain(), scheduler.dispatcher_activations())
        };

        // Halted tasks unwind one at a time, so that no two task stacks ever
        // run concurrently.
        self.inner.halted.store(true, Ordering::Release);
        for task in &mut tasks {
            task.context().resume();
            task.context_mut().reclaim();
        }

        let report = Report {
            tasks: tasks.iter().map(|task| task.report(now)).collect(),
            dispatcher_activations,
            uptime: now.duration_since(Instant::BOOT),
        };

        log::info!(
            "Kernel halted after {} ms, {} dispatcher activations",
            report.uptime.as_millis(),
            report.dispatcher_activations
        );
        report
    }
}
