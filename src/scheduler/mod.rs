use crate::arch::thread::Context;
use crate::ipc::mqueue::{MessageQueue, QueueId};
use crate::roster::Roster;
use crate::sync::semaphore::{Semaphore, SemaphoreId};
use crate::task::{State, Task, TaskId};
use hashbrown::HashMap;

pub mod aging;
pub mod dispatcher;
pub mod table;

use table::Table;

/// Where a task currently lives. Every task that was admitted by the kernel
/// has exactly one location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    /// In the ready roster. The running task stays there while it runs.
    Ready,

    /// In the suspended roster, waiting for another task to terminate.
    Suspended,

    /// In the sleeping roster.
    Sleeping,

    /// In the wait roster of a semaphore.
    Waiting(SemaphoreId),

    /// Terminated, kept around so its exit code can still be read.
    Dead,
}

impl Location {
    /// The state a task has at this location.
    #[must_use]
    pub const fn state(self) -> State {
        match self {
            Location::Ready => State::Ready,
            Location::Suspended | Location::Waiting(_) => State::Suspended,
            Location::Sleeping => State::Sleeping,
            Location::Dead => State::Dead,
        }
    }
}

/// The kernel state: the rosters, the task currently running and the tables
/// of synchronization objects. It is only ever touched with the kernel lock
/// held.
#[derive(Debug)]
pub struct Scheduler {
    /// Tasks ready to run, including the running one.
    pub ready: Roster,

    /// Tasks waiting for another task to terminate.
    pub suspended: Roster,

    /// Tasks sleeping until a deadline.
    pub sleeping: Roster,

    /// Terminated tasks. Their execution context is reclaimed as soon as
    /// they die, their control block when the kernel shuts down.
    graveyard: HashMap<TaskId, Box<Task>>,

    /// The location of every task admitted by the kernel.
    locations: HashMap<TaskId, Location>,

    /// The semaphores created by the tasks.
    pub semaphores: Table<SemaphoreId, Semaphore>,

    /// The message queues created by the tasks.
    pub queues: Table<QueueId, MessageQueue>,

    /// The task currently running, or `None` while the dispatcher runs.
    current: Option<TaskId>,

    /// The identifier given to the next task.
    next_id: usize,

    /// How many times control came back to the dispatcher.
    dispatcher_activations: u64,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: Roster::new(),
            suspended: Roster::new(),
            sleeping: Roster::new(),
            graveyard: HashMap::new(),
            locations: HashMap::new(),
            semaphores: Table::new(),
            queues: Table::new(),
            current: None,
            next_id: config::MAIN_TASK_ID,
            dispatcher_activations: 0,
        }
    }

    /// Reserve the identifier of a new task. The identifier of the dispatcher
    /// is never handed out.
    pub fn allocate_id(&mut self) -> TaskId {
        if self.next_id == config::DISPATCHER_TASK_ID {
            self.next_id += 1;
        }
        let id = TaskId::from(self.next_id);
        self.next_id += 1;
        id
    }

    /// The task currently running, if any.
    #[must_use]
    pub const fn current(&self) -> Option<TaskId> {
        self.current
    }

    /// Mark `id` as the running task.
    pub fn set_current(&mut self, id: TaskId) {
        if let Some(task) = self.ready.get(id) {
            task.set_state(State::Running);
        }
        self.current = Some(id);
    }

    /// Give the processor back to the dispatcher. The running task stays in
    /// the ready roster unless it was moved elsewhere beforehand.
    pub fn release_current(&mut self) -> Option<TaskId> {
        let id = self.current.take()?;
        if let Some(task) = self.ready.get(id) {
            task.set_state(State::Ready);
        }
        Some(id)
    }

    /// The control block of the running task.
    #[must_use]
    pub fn current_task(&self) -> Option<&Task> {
        self.ready.get(self.current?)
    }

    /// Count one more return of control to the dispatcher.
    pub fn count_dispatcher_activation(&mut self) {
        self.dispatcher_activations += 1;
    }

    #[must_use]
    pub const fn dispatcher_activations(&self) -> u64 {
        self.dispatcher_activations
    }

    /// The location of a task, or `None` if no such task was ever admitted.
    #[must_use]
    pub fn location(&self, id: TaskId) -> Option<Location> {
        self.locations.get(&id).copied()
    }

    /// The control block of any task, wherever it lives.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        match self.location(id)? {
            Location::Ready => self.ready.get(id),
            Location::Suspended => self.suspended.get(id),
            Location::Sleeping => self.sleeping.get(id),
            Location::Waiting(semaphore) => self.semaphores.get(semaphore).ok()?.waiters().get(id),
            Location::Dead => self.graveyard.get(&id).map(Box::as_ref),
        }
    }

    /// Take the execution context out of a dead task, so its thread can be
    /// joined. The control block stays in place with its exit code. Returns
    /// `None` if the task is not dead.
    pub fn retire(&mut self, id: TaskId) -> Option<Context> {
        let task = self.graveyard.get_mut(&id)?;
        Some(task.context_mut().split_off())
    }

    /// Admit a new task in the ready roster.
    pub fn admit(&mut self, task: Box<Task>) {
        log::trace!("Task {} admitted", task.id());
        self.attach(task, Location::Ready);
    }

    /// Take a task out of its current location. The caller must give it a
    /// new location with [`Scheduler::attach`].
    pub fn detach(&mut self, id: TaskId) -> Option<Box<Task>> {
        let task = match self.locations.remove(&id)? {
            Location::Ready => self.ready.remove(id),
            Location::Suspended => self.suspended.remove(id),
            Location::Sleeping => self.sleeping.remove(id),
            Location::Waiting(semaphore) => self
                .semaphores
                .get_mut(semaphore)
                .ok()
                .and_then(|semaphore| semaphore.waiters_mut().remove(id)),
            Location::Dead => self.graveyard.remove(&id),
        };

        if task.is_none() {
            log::error!("Task {id} missing from its roster");
        }
        task
    }

    /// Give a detached task a new location. A task sent to the wait roster
    /// of a semaphore that no longer exists is made ready instead.
    pub fn attach(&mut self, task: Box<Task>, to: Location) {
        let id = task.id();
        let location = match to {
            Location::Waiting(semaphore) => match self.semaphores.get_mut(semaphore) {
                Ok(semaphore) => {
                    task.set_state(to.state());
                    semaphore.waiters_mut().append(task);
                    to
                }
                Err(_) => {
                    task.set_state(State::Ready);
                    self.ready.append(task);
                    Location::Ready
                }
            },
            Location::Ready => {
                task.set_state(to.state());
                self.ready.append(task);
                to
            }
            Location::Suspended => {
                task.set_state(to.state());
                self.suspended.append(task);
                to
            }
            Location::Sleeping => {
                task.set_state(to.state());
                self.sleeping.append(task);
                to
            }
            Location::Dead => {
                task.set_state(to.state());
                self.graveyard.insert(id, task);
                to
            }
        };

        log::trace!("Task {id} moved to {location:?}");
        self.locations.insert(id, location);
    }

    /// Move a task from its current location to `to`. Returns false if the
    /// task does not exist.
    pub fn relocate(&mut self, id: TaskId, to: Location) -> bool {
        match self.detach(id) {
            Some(task) => {
                self.attach(task, to);
                true
            }
            None => false,
        }
    }

    /// The number of tasks that are neither runnable nor dead.
    #[must_use]
    pub fn blocked(&self) -> usize {
        self.locations
            .values()
            .filter(|location| matches!(location, Location::Suspended | Location::Waiting(_)))
            .count()
    }

    /// Take every task out of the scheduler, dead or alive, ordered by
    /// identifier. Used when the kernel shuts down.
    pub fn drain(&mut self) -> Vec<Box<Task>> {
        let mut tasks: Vec<Box<Task>> = self.graveyard.drain().map(|(_, task)| task).collect();
        for roster in [&mut self.ready, &mut self.suspended, &mut self.sleeping] {
            while let Some(task) = roster.pop_front() {
                tasks.push(task);
            }
        }
        for semaphore in self.semaphores.alive_mut() {
            while let Some(task) = semaphore.waiters_mut().pop_front() {
                tasks.push(task);
            }
        }

        self.locations.clear();
        self.current = None;
        tasks.sort_by_key(|task| task.id());
        tasks
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Instant;

    fn admit(scheduler: &mut Scheduler) -> TaskId {
        let id = scheduler.allocate_id();
        scheduler.admit(Box::new(Task::new(id, Context::detached(), Instant::BOOT)));
        id
    }

    #[test]
    fn test_identifiers_skip_the_dispatcher() {
        let mut scheduler = Scheduler::new();
        assert_eq!(scheduler.allocate_id(), TaskId::MAIN);
        assert_eq!(usize::from(scheduler.allocate_id()), 2);
        assert_eq!(usize::from(scheduler.allocate_id()), 3);
    }

    #[test]
    fn test_relocate_keeps_single_membership() {
        let mut scheduler = Scheduler::new();
        let id = admit(&mut scheduler);

        assert!(scheduler.relocate(id, Location::Sleeping));
        assert!(scheduler.ready.is_empty());
        assert_eq!(scheduler.sleeping.len(), 1);
        assert_eq!(scheduler.location(id), Some(Location::Sleeping));
        assert_eq!(scheduler.task(id).unwrap().state(), State::Sleeping);

        assert!(scheduler.relocate(id, Location::Dead));
        assert!(scheduler.sleeping.is_empty());
        assert_eq!(scheduler.task(id).unwrap().state(), State::Dead);
    }

    #[test]
    fn test_waiting_on_missing_semaphore_falls_back_to_ready() {
        let mut scheduler = Scheduler::new();
        let id = admit(&mut scheduler);

        assert!(scheduler.relocate(id, Location::Waiting(SemaphoreId::from(42))));
        assert_eq!(scheduler.location(id), Some(Location::Ready));
        assert_eq!(scheduler.ready.len(), 1);
    }

    #[test]
    fn test_current_task_state() {
        let mut scheduler = Scheduler::new();
        let id = admit(&mut scheduler);

        scheduler.set_current(id);
        assert_eq!(scheduler.current_task().unwrap().state(), State::Running);
        assert_eq!(scheduler.release_current(), Some(id));
        assert_eq!(scheduler.task(id).unwrap().state(), State::Ready);
        assert_eq!(scheduler.current(), None);
    }

    #[test]
    fn test_only_dead_tasks_are_retired() {
        let mut scheduler = Scheduler::new();
        let alive = admit(&mut scheduler);
        let dead = admit(&mut scheduler);
        let mut task = scheduler.detach(dead).unwrap();
        task.terminate(3, Instant::BOOT);
        scheduler.attach(task, Location::Dead);

        assert!(scheduler.retire(alive).is_none());
        assert!(scheduler.retire(dead).is_some());
        assert_eq!(scheduler.location(dead), Some(Location::Dead));
        assert_eq!(scheduler.task(dead).and_then(Task::exit_code), Some(3));
    }

    #[test]
    fn test_drain_collects_every_task() {
        let mut scheduler = Scheduler::new();
        let a = admit(&mut scheduler);
        let b = admit(&mut scheduler);
        let c = admit(&mut scheduler);
        scheduler.relocate(a, Location::Dead);
        scheduler.relocate(c, Location::Suspended);

        assert_eq!(scheduler.blocked(), 1);
        let ids: Vec<TaskId> = scheduler.drain().iter().map(|task| task.id()).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert!(scheduler.ready.is_empty());
        assert_eq!(scheduler.location(b), None);
    }
}
