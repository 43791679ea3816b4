use crate::arch::thread::Context;
use crate::time::Instant;
use core::cell::Cell;
use core::time::Duration;
use intrusive_collections::LinkedListLink;

/// A unique identifier for a task. Identifiers are assigned in creation order
/// and never reused during the lifetime of a kernel.
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct TaskId(usize);

impl TaskId {
    /// The identifier of the main task.
    pub const MAIN: TaskId = TaskId(config::MAIN_TASK_ID);

    /// The identifier reserved for the dispatcher.
    pub const DISPATCHER: TaskId = TaskId(config::DISPATCHER_TASK_ID);
}

impl From<usize> for TaskId {
    fn from(id: usize) -> Self {
        Self(id)
    }
}

impl From<TaskId> for usize {
    fn from(id: TaskId) -> usize {
        id.0
    }
}

impl core::fmt::Display for TaskId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// The task is currently running on the processor.
    Running,

    /// The task is ready to run and is waiting to be selected by the
    /// dispatcher.
    Ready,

    /// The task is blocked, either on a semaphore or waiting for another
    /// task to terminate.
    Suspended,

    /// The task is sleeping until a deadline is reached.
    Sleeping,

    /// The task has terminated. Its exit code stays available until the
    /// kernel shuts down.
    Dead,
}

/// A pending sleep: when the task fell asleep and for how long.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nap {
    pub start: Instant,
    pub duration: Duration,
}

impl Nap {
    /// The instant from which the task may be woken up.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.start + self.duration
    }
}

/// A task control block.
///
/// Scheduling fields that change while the task sits in a roster are kept in
/// cells, since a roster only hands out shared references to its members.
/// The other fields only change while the task is being moved from one roster
/// to another, when the kernel owns the control block.
#[derive(Debug)]
pub struct Task {
    /// An adapter for the intrusive linked list. This allows the task to be
    /// part of a roster.
    pub(crate) link: LinkedListLink,

    /// The identifier of the task.
    id: TaskId,

    /// The execution context of the task, which owns its stack.
    context: Context,

    /// The priority set by the user. Lower values are scheduled first.
    static_priority: Cell<i32>,

    /// The priority used by the scheduler, aged every time the task is not
    /// selected and reset to the static priority when it is.
    dynamic_priority: Cell<i32>,

    /// The ticks left in the current quantum.
    remaining_ticks: Cell<i64>,

    /// The state of the task.
    state: Cell<State>,

    /// The code the task terminated with. Only set once the task is dead.
    exit_code: Option<i32>,

    /// The task this task is joining, only set while suspended on a join.
    waited_task: Option<TaskId>,

    /// The pending sleep, only set while sleeping.
    nap: Option<Nap>,

    /// Set when the semaphore the task waited on was destroyed instead of
    /// handing it a unit.
    interrupted: Cell<bool>,

    /// When the task was created.
    created_at: Instant,

    /// When the task terminated.
    exited_at: Option<Instant>,

    /// How many times the task was dispatched.
    activations: Cell<u64>,

    /// How many ticks the task spent running, one more per activation.
    processor_time: Cell<u64>,
}

// SAFETY: A task is only reachable through the scheduler, and the scheduler
// is only touched with its lock held, so the cells and the list link are
// never accessed from two threads at the same time.
unsafe impl Send for Task {}

impl Task {
    /// Create a ready task with the default priority.
    #[must_use]
    pub fn new(id: TaskId, context: Context, now: Instant) -> Self {
        Self {
            link: LinkedListLink::new(),
            id,
            context,
            static_priority: Cell::new(config::DEFAULT_PRIORITY),
            dynamic_priority: Cell::new(config::DEFAULT_PRIORITY),
            remaining_ticks: Cell::new(0),
            state: Cell::new(State::Ready),
            exit_code: None,
            waited_task: None,
            nap: None,
            interrupted: Cell::new(false),
            created_at: now,
            exited_at: None,
            activations: Cell::new(0),
            processor_time: Cell::new(0),
        }
    }

    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state.get()
    }

    pub fn set_state(&self, state: State) {
        self.state.set(state);
    }

    #[must_use]
    pub fn static_priority(&self) -> i32 {
        self.static_priority.get()
    }

    #[must_use]
    pub fn dynamic_priority(&self) -> i32 {
        self.dynamic_priority.get()
    }

    /// Set both the static and the dynamic priority of the task.
    pub fn set_priority(&self, priority: i32) {
        self.static_priority.set(priority);
        self.dynamic_priority.set(priority);
    }

    /// Raise the scheduling priority of the task by one step. The dynamic
    /// priority is not clamped to the priority band: a task waiting behind a
    /// task of the highest priority must be able to go past it.
    pub fn age(&self) {
        self.dynamic_priority
            .set(self.dynamic_priority.get().saturating_sub(1));
    }

    /// Reset the dynamic priority to the static one.
    pub fn restore_priority(&self) {
        self.dynamic_priority.set(self.static_priority.get());
    }

    /// Give the task a fresh quantum and count a new activation. Every
    /// activation is charged one tick of processor time.
    pub fn arm_quantum(&self, quantum: u32) {
        self.remaining_ticks.set(i64::from(quantum));
        self.activations.set(self.activations.get() + 1);
        self.processor_time.set(self.processor_time.get() + 1);
    }

    /// Charge one tick to the task and return the ticks left in its quantum.
    pub fn consume_tick(&self) -> i64 {
        let remaining = self.remaining_ticks.get() - 1;
        self.remaining_ticks.set(remaining);
        self.processor_time.set(self.processor_time.get() + 1);
        remaining
    }

    #[must_use]
    pub fn remaining_ticks(&self) -> i64 {
        self.remaining_ticks.get()
    }

    #[must_use]
    pub fn activations(&self) -> u64 {
        self.activations.get()
    }

    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Record the termination of the task.
    pub fn terminate(&mut self, code: i32, now: Instant) {
        self.exit_code = Some(code);
        self.exited_at = Some(now);
    }

    #[must_use]
    pub const fn waited_task(&self) -> Option<TaskId> {
        self.waited_task
    }

    pub fn set_waited_task(&mut self, target: Option<TaskId>) {
        self.waited_task = target;
    }

    #[must_use]
    pub const fn nap(&self) -> Option<Nap> {
        self.nap
    }

    pub fn set_nap(&mut self, nap: Option<Nap>) {
        self.nap = nap;
    }

    /// Record that the wait of the task ended because its semaphore was
    /// destroyed.
    pub fn interrupt(&self) {
        self.interrupted.set(true);
    }

    /// Whether the last wait of the task was interrupted. Clears the flag.
    pub fn take_interrupted(&self) -> bool {
        self.interrupted.replace(false)
    }

    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Build the diagnostics of the task as seen at `now`.
    #[must_use]
    pub fn report(&self, now: Instant) -> TaskReport {
        let end = self.exited_at.unwrap_or(now);
        TaskReport {
            id: self.id,
            exit_code: self.exit_code,
            execution_time: end.duration_since(self.created_at),
            processor_time: Duration::from_millis(self.processor_time.get()),
            activations: self.activations.get(),
        }
    }
}

/// The diagnostics of a task, collected when the kernel shuts down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskReport {
    /// The identifier of the task.
    pub id: TaskId,

    /// The exit code of the task, or `None` if it was still blocked when the
    /// kernel shut down.
    pub exit_code: Option<i32>,

    /// The time between the creation and the termination of the task.
    pub execution_time: Duration,

    /// The time the task spent running, as measured by the tick source,
    /// plus one tick for every activation.
    pub processor_time: Duration,

    /// The number of times the task was dispatched.
    pub activations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(TaskId::from(2), Context::detached(), Instant::BOOT)
    }

    #[test]
    fn test_new_task_defaults() {
        let task = task();
        assert_eq!(task.state(), State::Ready);
        assert_eq!(task.static_priority(), config::DEFAULT_PRIORITY);
        assert_eq!(task.dynamic_priority(), config::DEFAULT_PRIORITY);
        assert_eq!(task.exit_code(), None);
        assert_eq!(task.activations(), 0);
    }

    #[test]
    fn test_aging_goes_past_the_priority_band() {
        let task = task();
        task.set_priority(config::MIN_PRIORITY);
        task.age();
        assert_eq!(task.dynamic_priority(), config::MIN_PRIORITY - 1);
        assert_eq!(task.static_priority(), config::MIN_PRIORITY);

        task.restore_priority();
        assert_eq!(task.dynamic_priority(), config::MIN_PRIORITY);
    }

    #[test]
    fn test_quantum_accounting() {
        let task = task();
        task.arm_quantum(2);
        assert_eq!(task.consume_tick(), 1);
        assert_eq!(task.consume_tick(), 0);
        assert_eq!(task.activations(), 1);

        let report = task.report(Instant::from_millis(7));
        assert_eq!(report.processor_time, Duration::from_millis(3));
        assert_eq!(report.execution_time, Duration::from_millis(7));
        assert_eq!(report.exit_code, None);
    }

    #[test]
    fn test_report_stops_at_termination() {
        let mut task = task();
        task.terminate(42, Instant::from_millis(3));
        let report = task.report(Instant::from_millis(100));
        assert_eq!(report.exit_code, Some(42));
        assert_eq!(report.execution_time, Duration::from_millis(3));
    }
}
