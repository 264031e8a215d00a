//! Element behaviour: hashing, comparison and release.
//!
//! The table knows nothing about the shape of its elements. An
//! [`ElementOps`] value decides which part of an element is its key, and is
//! also where any per-table user context lives.

use core::cmp::Ordering;
use core::fmt::Debug;

use crate::hash::HashProvider;

/// Hashing, comparison and release for the elements of one table.
///
/// Two elements are the same entry iff `compare` returns
/// [`Ordering::Equal`]. Equal elements must hash equal for the same seeds.
pub trait ElementOps<T> {
    /// Digests the key part of `element`.
    fn hash(&self, element: &T, seed0: u64, seed1: u64) -> u64;

    /// Orders two elements by key.
    fn compare(&self, a: &T, b: &T) -> Ordering;

    /// Disposes of an element the table is discarding.
    ///
    /// Called by [`clear`](crate::HashTable::clear) and when the table is
    /// dropped. Elements handed back to the caller never pass through here.
    fn release(&self, element: T) {
        drop(element);
    }
}

/// Hash function pointer.
pub type HashFn<T> = fn(&T, u64, u64) -> u64;
/// Comparison function pointer, given the bundle's context.
pub type CompareFn<T, C> = fn(&T, &T, &C) -> Ordering;
/// Release function pointer.
pub type ReleaseFn<T> = fn(T);

/// An [`ElementOps`] built from plain functions and a context value.
///
/// # Examples
///
/// ```rust
/// # use core::cmp::Ordering;
/// # use robin_table::HashTable;
/// # use robin_table::hash;
/// # use robin_table::ops::FnOps;
/// #
/// #[derive(Debug, PartialEq)]
/// struct User {
///     id: u32,
///     age: u8,
/// }
///
/// fn hash_user(user: &User, seed0: u64, seed1: u64) -> u64 {
///     hash::sip(&user.id.to_le_bytes(), seed0, seed1)
/// }
///
/// fn compare_user(a: &User, b: &User, _: &()) -> Ordering {
///     a.id.cmp(&b.id)
/// }
///
/// let ops = FnOps::new(hash_user, compare_user, ());
/// let mut table = HashTable::new(ops).unwrap();
/// table.set(User { id: 1, age: 44 });
/// assert_eq!(table.get(&User { id: 1, age: 0 }).map(|u| u.age), Some(44));
/// ```
pub struct FnOps<T, C = ()> {
    hash: HashFn<T>,
    compare: CompareFn<T, C>,
    release: Option<ReleaseFn<T>>,
    context: C,
}

impl<T, C> FnOps<T, C> {
    /// Bundles a hash function, a comparison function and a context.
    pub fn new(hash: HashFn<T>, compare: CompareFn<T, C>, context: C) -> Self {
        Self {
            hash,
            compare,
            release: None,
            context,
        }
    }

    /// Adds a release function run on discarded elements.
    pub fn with_release(mut self, release: ReleaseFn<T>) -> Self {
        self.release = Some(release);
        self
    }

    /// Returns the context value.
    pub fn context(&self) -> &C {
        &self.context
    }
}

impl<T, C: Debug> Debug for FnOps<T, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnOps")
            .field("release", &self.release.is_some())
            .field("context", &self.context)
            .finish()
    }
}

impl<T, C> ElementOps<T> for FnOps<T, C> {
    #[inline]
    fn hash(&self, element: &T, seed0: u64, seed1: u64) -> u64 {
        (self.hash)(element, seed0, seed1)
    }

    #[inline]
    fn compare(&self, a: &T, b: &T) -> Ordering {
        (self.compare)(a, b, &self.context)
    }

    fn release(&self, element: T) {
        match self.release {
            Some(release) => release(element),
            None => drop(element),
        }
    }
}

/// An [`ElementOps`] for elements whose key is a byte slice.
///
/// Keys compare bytewise and hash with the chosen provider.
///
/// # Examples
///
/// ```rust
/// # use robin_table::HashTable;
/// # use robin_table::hash;
/// # use robin_table::ops::KeyBytes;
/// #
/// fn name(entry: &(String, u32)) -> &[u8] {
///     entry.0.as_bytes()
/// }
///
/// let mut table = HashTable::new(KeyBytes::new(name, hash::fast)).unwrap();
/// table.set(("apple".to_string(), 3));
/// assert_eq!(table.get(&("apple".to_string(), 0)).map(|e| e.1), Some(3));
/// ```
pub struct KeyBytes<T> {
    key: fn(&T) -> &[u8],
    provider: HashProvider,
}

impl<T> KeyBytes<T> {
    /// Uses `key` to view the key bytes of an element and `provider` to
    /// hash them.
    pub fn new(key: fn(&T) -> &[u8], provider: HashProvider) -> Self {
        Self { key, provider }
    }
}

impl<T> Clone for KeyBytes<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for KeyBytes<T> {}

impl<T> Debug for KeyBytes<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyBytes").finish_non_exhaustive()
    }
}

impl<T> ElementOps<T> for KeyBytes<T> {
    #[inline]
    fn hash(&self, element: &T, seed0: u64, seed1: u64) -> u64 {
        (self.provider)((self.key)(element), seed0, seed1)
    }

    #[inline]
    fn compare(&self, a: &T, b: &T) -> Ordering {
        (self.key)(a).cmp((self.key)(b))
    }
}
