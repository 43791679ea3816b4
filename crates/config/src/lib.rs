#![no_std]

/// The number of ticks a task may run before the tick source asks it to give
/// the processor back to the dispatcher. With the default 1 ms tick this is a
/// 20 ms time slice.
///
/// A lower value makes the system more responsive but spends more time in the
/// dispatcher. The quantum is reset every time a task is dispatched, so a task
/// that yields early does not carry its unused ticks over.
pub const QUANTUM: u32 = 20;

/// The size of the stack owned by every task. Each task gets its own stack,
/// released only when the task is reclaimed by the kernel at shutdown.
///
/// This value is large enough for the usual task bodies, formatting and
/// logging included. Tasks with deep recursion should be given a bigger
/// stack through the runtime configuration.
pub const STACK_SIZE: usize = 64 * 1024;

/// The lowest priority value, which is the *highest* scheduling priority.
pub const MIN_PRIORITY: i32 = -20;

/// The highest priority value, which is the *lowest* scheduling priority.
pub const MAX_PRIORITY: i32 = 20;

/// The priority given to every task at creation.
pub const DEFAULT_PRIORITY: i32 = 0;

/// The interval between two ticks of the periodic tick source, in
/// milliseconds. The system clock counts ticks, so `systime()` is expressed
/// in units of this interval.
pub const TICK_INTERVAL_MS: u64 = 1;

/// The identifier of the main task, created by the kernel at boot.
pub const MAIN_TASK_ID: usize = 0;

/// The identifier reserved for the dispatcher. The dispatcher is not a task
/// that can be scheduled, but it owns an identifier so that user tasks are
/// numbered the same way on every boot.
pub const DISPATCHER_TASK_ID: usize = 1;

/// The exit code recorded for a task whose body panicked.
pub const PANIC_EXIT_CODE: i32 = -1;
