use crate::error::{Error, Result};
use core::hash::Hash;
use hashbrown::HashMap;

/// A table of kernel objects addressed by handle.
///
/// Destroying an object leaves a tombstone behind, so that a stale handle is
/// reported as [`Error::Destroyed`] while a handle that never named an object
/// is reported as [`Error::InvalidHandle`].
#[derive(Debug)]
pub struct Table<K, T> {
    /// The objects of the table, `None` once destroyed.
    slots: HashMap<K, Option<T>>,

    /// The handle given to the next object.
    next: usize,
}

impl<K, T> Table<K, T>
where
    K: From<usize> + Copy + Eq + Hash,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next: 0,
        }
    }

    /// Insert an object and return its handle.
    pub fn insert(&mut self, object: T) -> K {
        let handle = K::from(self.next);
        self.next += 1;
        self.slots.insert(handle, Some(object));
        handle
    }

    /// # Errors
    /// Fails if the handle is unknown or the object was destroyed.
    pub fn get(&self, handle: K) -> Result<&T> {
        match self.slots.get(&handle) {
            Some(Some(object)) => Ok(object),
            Some(None) => Err(Error::Destroyed),
            None => Err(Error::InvalidHandle),
        }
    }

    /// # Errors
    /// Fails if the handle is unknown or the object was destroyed.
    pub fn get_mut(&mut self, handle: K) -> Result<&mut T> {
        match self.slots.get_mut(&handle) {
            Some(Some(object)) => Ok(object),
            Some(None) => Err(Error::Destroyed),
            None => Err(Error::InvalidHandle),
        }
    }

    /// Take the object out of the table, leaving a tombstone.
    ///
    /// # Errors
    /// Fails if the handle is unknown or the object was already destroyed.
    pub fn destroy(&mut self, handle: K) -> Result<T> {
        match self.slots.get_mut(&handle) {
            Some(slot) => slot.take().ok_or(Error::Destroyed),
            None => Err(Error::InvalidHandle),
        }
    }

    /// Iterate mutably over the objects that were not destroyed.
    pub fn alive_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.values_mut().filter_map(Option::as_mut)
    }
}

impl<K, T> Default for Table<K, T>
where
    K: From<usize> + Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    struct Handle(usize);

    impl From<usize> for Handle {
        fn from(id: usize) -> Self {
            Self(id)
        }
    }

    #[test]
    fn test_handles_are_distinct() {
        let mut table = Table::<Handle, &str>::new();
        let a = table.insert("a");
        let b = table.insert("b");
        assert_ne!(a, b);
        assert_eq!(table.get(a), Ok(&"a"));
        assert_eq!(table.get(b), Ok(&"b"));
    }

    #[test]
    fn test_destroyed_and_unknown_handles_differ() {
        let mut table = Table::<Handle, u32>::new();
        let handle = table.insert(7);
        assert_eq!(table.destroy(handle), Ok(7));

        assert_eq!(table.get(handle), Err(Error::Destroyed));
        assert_eq!(table.destroy(handle), Err(Error::Destroyed));
        assert_eq!(table.get(Handle(99)), Err(Error::InvalidHandle));
        assert_eq!(table.get_mut(Handle(99)).err(), Some(Error::InvalidHandle));
    }

    #[test]
    fn test_alive_mut_skips_tombstones() {
        let mut table = Table::<Handle, u32>::new();
        let first = table.insert(1);
        table.insert(2);
        table.destroy(first).unwrap();

        let alive: Vec<u32> = table.alive_mut().map(|value| *value).collect();
        assert_eq!(alive, vec![2]);
    }
}
