use crate::task::{Task, TaskId};
use core::ptr::NonNull;
use hashbrown::HashMap;
use intrusive_collections::{LinkedList, LinkedListLink, intrusive_adapter};

intrusive_adapter!(pub RosterAdapter = Box<Task>: Task { link: LinkedListLink });

/// A roster of tasks: an intrusive doubly-linked list that owns its members.
///
/// Moving a task from one roster to another moves the ownership of its
/// control block, so a task can never be a member of two rosters at once.
/// Insertion order is preserved, which the scheduler relies on to break ties
/// between tasks of equal priority.
///
/// Members are indexed by identifier, so finding or removing a task takes
/// constant time: the index leads straight to the links of the task.
pub struct Roster {
    list: LinkedList<RosterAdapter>,

    /// The control block of every member. A boxed task does not move while
    /// it is linked, so these pointers stay valid until the task leaves.
    members: HashMap<TaskId, NonNull<Task>>,
}

// SAFETY: The pointers of the index only point into control blocks owned by
// the list of the same roster, and a roster is only reached through the
// scheduler lock, like the tasks themselves.
unsafe impl Send for Roster {}

impl Roster {
    /// Create an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self {
            list: LinkedList::new(RosterAdapter::new()),
            members: HashMap::new(),
        }
    }

    /// The number of tasks in the roster.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Append a task at the end of the roster.
    pub fn append(&mut self, task: Box<Task>) {
        self.members.insert(task.id(), NonNull::from(task.as_ref()));
        self.list.push_back(task);
    }

    /// Detach the first task of the roster.
    pub fn pop_front(&mut self) -> Option<Box<Task>> {
        let task = self.list.pop_front()?;
        self.members.remove(&task.id());
        Some(task)
    }

    /// Detach the task with the given identifier. Returns `None` if the task
    /// is not a member of this roster, leaving the roster untouched.
    pub fn remove(&mut self, id: TaskId) -> Option<Box<Task>> {
        let task = self.members.remove(&id)?;

        // SAFETY: The index only holds members of this list, and `task` was
        // still linked until now.
        let mut cursor = unsafe { self.list.cursor_mut_from_ptr(task.as_ptr()) };
        cursor.remove()
    }

    /// Detach every task matching `predicate`, in roster order. The scan is
    /// a single pass over the roster.
    pub fn drain_where<P>(&mut self, mut predicate: P) -> Vec<Box<Task>>
    where
        P: FnMut(&Task) -> bool,
    {
        let mut drained = Vec::new();
        let mut cursor = self.list.front_mut();
        while let Some(task) = cursor.get() {
            if predicate(task) {
                self.members.remove(&task.id());
                drained.extend(cursor.remove());
            } else {
                cursor.move_next();
            }
        }
        drained
    }

    /// Return the task with the given identifier, if it is a member.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        let task = self.members.get(&id)?;

        // SAFETY: The task is a member, so the list owns it and keeps it
        // alive for as long as the roster is borrowed.
        Some(unsafe { task.as_ref() })
    }

    /// Iterate over the tasks in roster order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.list.iter()
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Roster {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter().map(Task::id)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::thread::Context;
    use crate::time::Instant;

    fn task(id: usize) -> Box<Task> {
        Box::new(Task::new(TaskId::from(id), Context::detached(), Instant::BOOT))
    }

    fn ids(roster: &Roster) -> Vec<usize> {
        roster.iter().map(|task| usize::from(task.id())).collect()
    }

    #[test]
    fn test_append_keeps_insertion_order() {
        let mut roster = Roster::new();
        for id in 0..4 {
            roster.append(task(id));
        }
        assert_eq!(ids(&roster), vec![0, 1, 2, 3]);
        assert_eq!(roster.len(), 4);
    }

    #[test]
    fn test_remove_repairs_neighbours() {
        let mut roster = Roster::new();
        for id in 0..3 {
            roster.append(task(id));
        }

        let removed = roster.remove(TaskId::from(1)).unwrap();
        assert_eq!(removed.id(), TaskId::from(1));
        assert_eq!(ids(&roster), vec![0, 2]);
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_remove_only_member_empties_roster() {
        let mut roster = Roster::new();
        roster.append(task(7));
        assert!(roster.remove(TaskId::from(7)).is_some());
        assert!(roster.is_empty());
        assert_eq!(roster.len(), 0);
    }

    #[test]
    fn test_remove_non_member_is_harmless() {
        let mut roster = Roster::new();
        roster.append(task(0));
        assert!(roster.remove(TaskId::from(9)).is_none());
        assert_eq!(ids(&roster), vec![0]);
    }

    #[test]
    fn test_moving_between_rosters() {
        let mut ready = Roster::new();
        let mut sleeping = Roster::new();
        ready.append(task(0));
        ready.append(task(1));

        let moved = ready.remove(TaskId::from(0)).unwrap();
        sleeping.append(moved);
        assert_eq!(ids(&ready), vec![1]);
        assert_eq!(ids(&sleeping), vec![0]);

        let back = sleeping.pop_front().unwrap();
        ready.append(back);
        assert_eq!(ids(&ready), vec![1, 0]);
        assert!(sleeping.is_empty());
    }

    #[test]
    fn test_lookup_follows_membership() {
        let mut roster = Roster::new();
        for id in 0..3 {
            roster.append(task(id));
        }
        assert_eq!(roster.get(TaskId::from(2)).map(Task::id), Some(TaskId::from(2)));

        let removed = roster.remove(TaskId::from(2)).unwrap();
        assert!(roster.get(TaskId::from(2)).is_none());
        assert!(roster.remove(TaskId::from(2)).is_none());

        roster.drain_where(|task| task.id() == TaskId::from(0));
        assert!(roster.get(TaskId::from(0)).is_none());
        assert_eq!(roster.pop_front().map(|task| task.id()), Some(TaskId::from(1)));
        assert!(roster.get(TaskId::from(1)).is_none());

        roster.append(removed);
        assert_eq!(ids(&roster), vec![2]);
        assert_eq!(roster.get(TaskId::from(2)).map(Task::id), Some(TaskId::from(2)));
    }

    #[test]
    fn test_drain_where_is_single_pass() {
        let mut roster = Roster::new();
        for id in 0..6 {
            roster.append(task(id));
        }

        let drained = roster.drain_where(|task| usize::from(task.id()) % 2 == 0);
        let drained: Vec<usize> = drained.iter().map(|task| task.id().into()).collect();
        assert_eq!(drained, vec![0, 2, 4]);
        assert_eq!(ids(&roster), vec![1, 3, 5]);
        assert_eq!(roster.len(), 3);
    }
}
