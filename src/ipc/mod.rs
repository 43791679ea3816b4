//! Inter-task communication.
pub mod mqueue;
