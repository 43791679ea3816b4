//! Host platform layer: execution contexts, the periodic tick source and the
//! logger. This is the only part of the kernel that knows it runs on top of
//! host threads.
pub mod log;
pub mod thread;
pub mod timer;
