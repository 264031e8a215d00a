//! The robin-hood hash table.
//!
//! Buckets live in one allocation split into three parallel arrays: a `u32`
//! distance word per bucket (zero marks an empty bucket, otherwise it is the
//! probe distance plus one), the cached 64-bit digest of each element, and
//! the elements themselves.
//!
//! Probing is linear with wraparound. On insertion an element that is
//! further from its ideal bucket takes the slot of a resident that is closer
//! to its own, and on deletion the following run of displaced elements
//! shifts back one slot, so no tombstones are ever left behind.

use core::alloc::Layout;
use core::cmp::Ordering;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::allocator::DefaultAllocator;
use crate::allocator::RawAllocator;
use crate::allocator::RawAllocatorExt;
use crate::config::MIN_CAPACITY;
use crate::config::TableConfig;
use crate::error::Result;
use crate::error::TableError;
use crate::ops::ElementOps;

/// Distance word of an empty bucket.
const EMPTY: u32 = 0;

#[inline(always)]
fn grow_threshold(buckets: usize) -> usize {
    buckets - buckets / 4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Capacity {
    buckets: usize,
}

impl Capacity {
    /// Largest bucket count whose probe distances fit a `u32` distance word.
    const MAX_BUCKETS: usize = 1 << 31;

    fn checked(buckets: Option<usize>) -> Result<Self> {
        match buckets {
            Some(buckets) if buckets <= Self::MAX_BUCKETS => Ok(Capacity { buckets }),
            _ => Err(TableError::CapacityOverflow),
        }
    }

    fn for_hint(hint: usize) -> Result<Self> {
        Self::checked(hint.max(MIN_CAPACITY).checked_next_power_of_two())
    }

    fn doubled(self) -> Result<Self> {
        Self::checked(self.buckets.checked_mul(2))
    }

    #[inline(always)]
    fn mask(self) -> usize {
        self.buckets - 1
    }
}

#[derive(Debug)]
struct DataLayout {
    layout: Layout,
    capacity: Capacity,
    dibs_offset: usize,
    buckets_offset: usize,
    hashes_offset: usize,
}

impl DataLayout {
    fn new<T>(capacity: Capacity) -> Result<Self> {
        let overflow = |_| TableError::CapacityOverflow;

        let dibs_layout = Layout::array::<u32>(capacity.buckets).map_err(overflow)?;
        let buckets_layout =
            Layout::array::<MaybeUninit<T>>(capacity.buckets).map_err(overflow)?;
        let hashes_layout = Layout::array::<u64>(capacity.buckets).map_err(overflow)?;

        let (layout, dibs_offset) = Layout::new::<()>().extend(dibs_layout).map_err(overflow)?;
        let (layout, buckets_offset) = layout.extend(buckets_layout).map_err(overflow)?;
        let (layout, hashes_offset) = layout.extend(hashes_layout).map_err(overflow)?;

        Ok(DataLayout {
            layout,
            capacity,
            dibs_offset,
            buckets_offset,
            hashes_offset,
        })
    }
}

/// Probe statistics for a table.
///
/// Only available with the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of elements currently in the table
    pub populated: usize,
    /// Number of buckets in use
    pub capacity: usize,
    /// Load factor (populated / capacity)
    pub load_factor: f64,
    /// Longest probe distance of any stored element
    pub max_distance: usize,
    /// Mean probe distance over all stored elements
    pub mean_distance: f64,
    /// Total bytes held by the bucket allocation
    pub total_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        std::println!("=== Hash Table Debug Statistics ===");
        std::println!(
            "Population: {}/{} ({:.2}% load factor)",
            self.populated,
            self.capacity,
            self.load_factor * 100.0
        );
        std::println!(
            "Probe distance: max {}, mean {:.3}",
            self.max_distance,
            self.mean_distance
        );
        std::println!("Total Allocated: {} bytes", self.total_bytes);
    }
}

/// An open-addressing hash table using robin-hood hashing.
///
/// `HashTable<T, O, A>` stores elements of type `T`. Hashing, equality and
/// release of elements are delegated to `O`, and the bucket array is
/// allocated through `A`. The table grows by doubling once three quarters of
/// its buckets are occupied, and it only shrinks when
/// [`clear`](Self::clear) is asked to. Probe distances are stored as `u32`,
/// so the bucket count is capped at 2^31; asking for more is a
/// [`TableError::CapacityOverflow`].
///
/// Allocation failures after construction never panic: they latch the
/// [`oom`](Self::oom) flag and leave the table in its prior valid state.
///
/// ## Example
///
/// ```rust
/// # use robin_table::HashTable;
/// # use robin_table::hash;
/// # use robin_table::ops::KeyBytes;
/// #
/// #[derive(Debug, PartialEq)]
/// struct Person {
///     name: &'static str,
///     age: u32,
/// }
///
/// fn name(p: &Person) -> &[u8] {
///     p.name.as_bytes()
/// }
///
/// let mut table = HashTable::new(KeyBytes::new(name, hash::sip)).unwrap();
/// table.set(Person { name: "Dale", age: 44 });
/// table.set(Person { name: "Roger", age: 68 });
///
/// let key = Person { name: "Dale", age: 0 };
/// assert_eq!(table.get(&key).map(|p| p.age), Some(44));
///
/// let removed = table.delete(&key);
/// assert_eq!(removed, Some(Person { name: "Dale", age: 44 }));
/// assert_eq!(table.len(), 1);
/// ```
pub struct HashTable<T, O: ElementOps<T>, A: RawAllocator = DefaultAllocator> {
    layout: DataLayout,
    alloc: NonNull<u8>,

    populated: usize,
    grow_at: usize,
    mask: usize,

    seed0: u64,
    seed1: u64,
    oom: bool,

    ops: O,
    allocator: A,

    _phantom: PhantomData<T>,
}

impl<T, O: ElementOps<T>, A: RawAllocator> Debug for HashTable<T, O, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use alloc::format;
        use alloc::string::String;
        use alloc::vec::Vec;

        // SAFETY: The distance array covers every bucket in use.
        let dibs = unsafe { self.dibs_ptr().as_ref() };
        f.debug_struct("HashTable")
            .field(
                "distances",
                &dibs
                    .chunks(16)
                    .map(|chunk| {
                        chunk
                            .iter()
                            .map(|&dib| {
                                if dib == EMPTY {
                                    String::from("..")
                                } else {
                                    format!("{:02}", dib - 1)
                                }
                            })
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .collect::<Vec<_>>(),
            )
            .field("populated", &self.populated)
            .field("capacity", &self.capacity())
            .field("oom", &self.oom)
            .finish()
    }
}

impl<T, O: ElementOps<T>, A: RawAllocator> Drop for HashTable<T, O, A> {
    fn drop(&mut self) {
        self.release_all();
        // SAFETY: `alloc` was produced by `allocator` with `layout`.
        unsafe { self.allocator.deallocate(self.alloc, self.layout.layout) };
    }
}

impl<T, O> HashTable<T, O>
where
    O: ElementOps<T>,
{
    /// Creates a table with the default configuration: 16 buckets, both
    /// seeds zero and the default allocator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use robin_table::HashTable;
    /// # use robin_table::hash;
    /// # use robin_table::ops::KeyBytes;
    /// #
    /// fn key(v: &Vec<u8>) -> &[u8] {
    ///     v
    /// }
    ///
    /// let table: HashTable<Vec<u8>, _> = HashTable::new(KeyBytes::new(key, hash::fast)).unwrap();
    /// assert_eq!(table.capacity(), 16);
    /// assert!(table.is_empty());
    /// ```
    pub fn new(ops: O) -> Result<Self> {
        Self::with_config(TableConfig::default(), ops)
    }

    /// Creates a table from `config` using the default allocator.
    ///
    /// The default allocator is captured now; installing a process-wide
    /// default later does not affect this table.
    pub fn with_config(config: TableConfig, ops: O) -> Result<Self> {
        Self::with_config_in(config, ops, DefaultAllocator::current())
    }
}

impl<T, O, A> HashTable<T, O, A>
where
    O: ElementOps<T>,
    A: RawAllocator,
{
    /// Creates a table from `config` that allocates through `allocator`.
    ///
    /// The bucket count is the capacity hint rounded up to a power of two,
    /// and never less than 16.
    ///
    /// # Errors
    ///
    /// Fails with [`TableError::CapacityOverflow`] if the bucket array cannot
    /// be sized, or [`TableError::AllocationFailed`] if the allocator refuses
    /// it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use robin_table::HashTable;
    /// # use robin_table::TableConfig;
    /// # use robin_table::allocator::Global;
    /// # use robin_table::hash;
    /// # use robin_table::ops::KeyBytes;
    /// #
    /// fn key(v: &[u8; 4]) -> &[u8] {
    ///     v
    /// }
    ///
    /// let config = TableConfig::new().with_capacity(100).with_seeds(3, 4);
    /// let table: HashTable<[u8; 4], _, _> =
    ///     HashTable::with_config_in(config, KeyBytes::new(key, hash::sip), Global).unwrap();
    /// assert_eq!(table.capacity(), 128);
    /// assert_eq!(table.seeds(), (3, 4));
    /// ```
    pub fn with_config_in(config: TableConfig, ops: O, allocator: A) -> Result<Self> {
        let capacity = Capacity::for_hint(config.capacity)?;
        let layout = DataLayout::new::<T>(capacity)?;
        let alloc = allocator.try_allocate(layout.layout)?;

        let table = Self {
            layout,
            alloc,
            populated: 0,
            grow_at: grow_threshold(capacity.buckets),
            mask: capacity.mask(),
            seed0: config.seed0,
            seed1: config.seed1,
            oom: false,
            ops,
            allocator,
            _phantom: PhantomData,
        };
        table.reset_dibs();

        tracing::trace!(
            buckets = capacity.buckets,
            element_size = core::mem::size_of::<T>(),
            "created hash table"
        );
        Ok(table)
    }

    fn dibs_ptr(&self) -> NonNull<[u32]> {
        // SAFETY: Allocation is valid and holds at least `mask + 1` distances
        unsafe {
            NonNull::slice_from_raw_parts(
                self.alloc.add(self.layout.dibs_offset).cast(),
                self.mask + 1,
            )
        }
    }

    fn buckets_ptr(&self) -> NonNull<[MaybeUninit<T>]> {
        // SAFETY: Allocation is valid and holds at least `mask + 1` buckets
        unsafe {
            NonNull::slice_from_raw_parts(
                self.alloc.add(self.layout.buckets_offset).cast(),
                self.mask + 1,
            )
        }
    }

    fn hashes_ptr(&self) -> NonNull<[u64]> {
        // SAFETY: Allocation is valid and holds at least `mask + 1` digests
        unsafe {
            NonNull::slice_from_raw_parts(
                self.alloc.add(self.layout.hashes_offset).cast(),
                self.mask + 1,
            )
        }
    }

    /// Marks every bucket in use as empty.
    fn reset_dibs(&self) {
        // SAFETY: The distance array covers `mask + 1` `u32`s owned by this
        // table.
        unsafe {
            core::ptr::write_bytes(self.dibs_ptr().cast::<u32>().as_ptr(), 0x0, self.mask + 1);
        }
    }

    #[inline(always)]
    fn ideal_index(&self, hash: u64) -> usize {
        (hash as usize) & self.mask
    }

    #[inline(always)]
    fn hash_of(&self, element: &T) -> u64 {
        self.ops.hash(element, self.seed0, self.seed1)
    }

    /// Returns the number of elements in the table.
    pub fn len(&self) -> usize {
        self.populated
    }

    /// Returns `true` if the table contains no elements.
    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Returns the number of buckets currently in use.
    ///
    /// Always a power of two, at least 16.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Returns `true` once any allocation made on behalf of this table has
    /// failed.
    ///
    /// The flag is sticky: it stays set for the lifetime of the table.
    /// Check it after inserts that may grow the table and after a clear that
    /// asked for more buckets.
    pub fn oom(&self) -> bool {
        self.oom
    }

    /// Returns the two seeds handed to the hash function.
    pub fn seeds(&self) -> (u64, u64) {
        (self.seed0, self.seed1)
    }

    /// Returns the element behaviour, including any user context it carries.
    pub fn ops(&self) -> &O {
        &self.ops
    }

    /// Returns the allocator the table was built with.
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Finds the bucket holding an element equal to `key`.
    ///
    /// Stops at the first empty bucket, or at the first resident that sits
    /// closer to its ideal bucket than `key` would at the same position: had
    /// `key` been inserted, it would have taken that resident's slot.
    #[inline]
    fn find_index(&self, hash: u64, key: &T) -> Option<usize> {
        if self.populated == 0 {
            return None;
        }

        // SAFETY: All three arrays cover `mask + 1` buckets and every index
        // is reduced by `mask`. Buckets with a non-empty distance hold an
        // initialized element and digest.
        unsafe {
            let dibs = self.dibs_ptr().as_ref();
            let hashes = self.hashes_ptr().as_ref();
            let buckets = self.buckets_ptr().as_ref();

            let mut index = self.ideal_index(hash);
            let mut dib: u32 = 1;
            loop {
                let resident = *dibs.get_unchecked(index);
                if resident == EMPTY {
                    return None;
                }
                if *hashes.get_unchecked(index) == hash
                    && self
                        .ops
                        .compare(key, buckets.get_unchecked(index).assume_init_ref())
                        == Ordering::Equal
                {
                    return Some(index);
                }
                if dib > resident {
                    return None;
                }

                index = (index + 1) & self.mask;
                dib += 1;
            }
        }
    }

    /// Places `element` with the robin-hood rule.
    ///
    /// With `replace` set, an equal element already in the table is swapped
    /// out and returned. Equality is only checked while placing `element`
    /// itself: a present key is always reached before the first swap, since
    /// lookup would stop at the same resident.
    ///
    /// # Safety
    ///
    /// There must be at least one empty bucket, or an element equal to
    /// `element` when `replace` is set.
    unsafe fn insert_hashed(&mut self, hash: u64, element: T, replace: bool) -> Option<T> {
        // SAFETY: Indices are reduced by `mask`, so every access is in
        // bounds. Only buckets with a non-empty distance are read as
        // initialized.
        unsafe {
            let dibs = self.dibs_ptr().as_mut();
            let hashes = self.hashes_ptr().as_mut();
            let buckets = self.buckets_ptr().as_mut();

            let mut hash = hash;
            let mut element = element;
            let mut check_equal = replace;
            let mut index = self.ideal_index(hash);
            let mut dib: u32 = 1;
            loop {
                let resident = *dibs.get_unchecked(index);
                if resident == EMPTY {
                    *dibs.get_unchecked_mut(index) = dib;
                    *hashes.get_unchecked_mut(index) = hash;
                    buckets.get_unchecked_mut(index).write(element);
                    self.populated += 1;
                    return None;
                }

                if check_equal
                    && *hashes.get_unchecked(index) == hash
                    && self
                        .ops
                        .compare(&element, buckets.get_unchecked(index).assume_init_ref())
                        == Ordering::Equal
                {
                    let slot = buckets.get_unchecked_mut(index).assume_init_mut();
                    return Some(core::mem::replace(slot, element));
                }

                if resident < dib {
                    *dibs.get_unchecked_mut(index) = dib;
                    dib = resident;
                    hash = core::mem::replace(hashes.get_unchecked_mut(index), hash);
                    element = core::mem::replace(
                        buckets.get_unchecked_mut(index).assume_init_mut(),
                        element,
                    );
                    check_equal = false;
                }

                index = (index + 1) & self.mask;
                dib += 1;
            }
        }
    }

    /// Takes the element out of an occupied bucket and shifts the following
    /// displaced run back by one.
    ///
    /// # Safety
    ///
    /// `index` must be an occupied bucket in use.
    unsafe fn remove_at(&mut self, index: usize) -> T {
        // SAFETY: Indices are reduced by `mask`. The vacated bucket is only
        // overwritten by moving an occupied bucket into it.
        unsafe {
            let dibs = self.dibs_ptr().as_mut();
            let hashes = self.hashes_ptr().as_mut();
            let buckets = self.buckets_ptr().as_mut();

            let value = buckets.get_unchecked(index).assume_init_read();
            *dibs.get_unchecked_mut(index) = EMPTY;
            self.populated -= 1;

            let mut hole = index;
            loop {
                let next = (hole + 1) & self.mask;
                let dib = *dibs.get_unchecked(next);
                // Empty, or already in its ideal bucket.
                if dib <= 1 {
                    break;
                }

                let buckets_ptr = buckets.as_mut_ptr();
                core::ptr::copy_nonoverlapping(buckets_ptr.add(next), buckets_ptr.add(hole), 1);
                *hashes.get_unchecked_mut(hole) = *hashes.get_unchecked(next);
                *dibs.get_unchecked_mut(hole) = dib - 1;
                *dibs.get_unchecked_mut(next) = EMPTY;
                hole = next;
            }

            value
        }
    }

    fn latch_oom(&mut self, error: TableError) {
        if !self.oom {
            tracing::warn!(%error, buckets = self.capacity(), "hash table out of memory");
        }
        self.oom = true;
    }

    /// Doubles the bucket count and reinserts every element.
    ///
    /// On failure the table is left as it was and the OOM flag is latched.
    #[cold]
    fn grow(&mut self) -> bool {
        let capacity = match (Capacity { buckets: self.capacity() }).doubled() {
            Ok(capacity) => capacity,
            Err(error) => {
                self.latch_oom(error);
                return false;
            }
        };
        let new_layout = match DataLayout::new::<T>(capacity) {
            Ok(layout) => layout,
            Err(error) => {
                self.latch_oom(error);
                return false;
            }
        };
        let new_alloc = match self.allocator.try_allocate(new_layout.layout) {
            Ok(alloc) => alloc,
            Err(error) => {
                self.latch_oom(error);
                return false;
            }
        };

        tracing::debug!(
            from = self.capacity(),
            to = capacity.buckets,
            populated = self.populated,
            "growing hash table"
        );

        let old_layout = core::mem::replace(&mut self.layout, new_layout);
        let old_alloc = core::mem::replace(&mut self.alloc, new_alloc);
        let old_buckets = self.mask + 1;
        self.mask = capacity.mask();
        self.grow_at = grow_threshold(capacity.buckets);
        self.populated = 0;
        self.reset_dibs();

        // SAFETY: The old arrays stay valid until deallocated below. Values
        // are moved out exactly once; the old block is released without
        // dropping anything.
        unsafe {
            let old_dibs: NonNull<[u32]> = NonNull::slice_from_raw_parts(
                old_alloc.add(old_layout.dibs_offset).cast(),
                old_buckets,
            );
            let old_hashes: NonNull<[u64]> = NonNull::slice_from_raw_parts(
                old_alloc.add(old_layout.hashes_offset).cast(),
                old_buckets,
            );
            let old_values: NonNull<[MaybeUninit<T>]> = NonNull::slice_from_raw_parts(
                old_alloc.add(old_layout.buckets_offset).cast(),
                old_buckets,
            );

            for (index, &dib) in old_dibs.as_ref().iter().enumerate() {
                if dib == EMPTY {
                    continue;
                }
                let hash = *old_hashes.as_ref().get_unchecked(index);
                let value = old_values.as_ref().get_unchecked(index).assume_init_read();
                self.insert_hashed(hash, value, false);
            }

            self.allocator.deallocate(old_alloc, old_layout.layout);
        }

        true
    }

    /// Releases every element and marks all buckets empty.
    fn release_all(&mut self) {
        if self.populated == 0 {
            return;
        }

        // SAFETY: Buckets with a non-empty distance hold an initialized
        // element, which is read out once after its bucket is marked empty.
        unsafe {
            let dibs = self.dibs_ptr().as_mut();
            let buckets = self.buckets_ptr().as_ref();
            for index in 0..dibs.len() {
                if *dibs.get_unchecked(index) == EMPTY {
                    continue;
                }
                *dibs.get_unchecked_mut(index) = EMPTY;
                self.populated -= 1;
                self.ops
                    .release(buckets.get_unchecked(index).assume_init_read());
            }
        }
        debug_assert_eq!(self.populated, 0);
    }

    /// Looks up the element equal to `key`.
    ///
    /// Only the key part of `key`, as seen by the element behaviour, is
    /// used.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use robin_table::HashTable;
    /// # use robin_table::hash;
    /// # use robin_table::ops::KeyBytes;
    /// #
    /// fn key<'a>(pair: &'a (&'static str, u32)) -> &'a [u8] {
    ///     pair.0.as_bytes()
    /// }
    ///
    /// let mut table = HashTable::new(KeyBytes::new(key, hash::sip)).unwrap();
    /// table.set(("a", 1));
    /// assert_eq!(table.get(&("a", 0)), Some(&("a", 1)));
    /// assert_eq!(table.get(&("b", 0)), None);
    /// ```
    #[inline]
    pub fn get(&self, key: &T) -> Option<&T> {
        let hash = self.hash_of(key);
        let index = self.find_index(hash, key)?;
        // SAFETY: `find_index` only returns occupied buckets.
        Some(unsafe {
            self.buckets_ptr()
                .as_ref()
                .get_unchecked(index)
                .assume_init_ref()
        })
    }

    /// Looks up the element equal to `key`, returning a mutable reference.
    ///
    /// The key part of the element must not be changed through it.
    #[inline]
    pub fn get_mut(&mut self, key: &T) -> Option<&mut T> {
        let hash = self.hash_of(key);
        let index = self.find_index(hash, key)?;
        // SAFETY: `find_index` only returns occupied buckets.
        Some(unsafe {
            self.buckets_ptr()
                .as_mut()
                .get_unchecked_mut(index)
                .assume_init_mut()
        })
    }

    /// Inserts `element`, or replaces the element equal to it.
    ///
    /// Returns the replaced element, if any. An insert that fills the table
    /// to three quarters of its buckets doubles the bucket count before
    /// returning; if that allocation fails the element still stays in the
    /// table and the [`oom`](Self::oom) flag is set.
    ///
    /// # Errors
    ///
    /// Hands `element` back when every bucket is occupied, the key is new,
    /// and growing the table failed.
    pub fn try_set(&mut self, element: T) -> core::result::Result<Option<T>, T> {
        let hash = self.hash_of(&element);

        if self.populated == self.capacity() {
            if let Some(index) = self.find_index(hash, &element) {
                // SAFETY: `find_index` only returns occupied buckets.
                let slot = unsafe {
                    self.buckets_ptr()
                        .as_mut()
                        .get_unchecked_mut(index)
                        .assume_init_mut()
                };
                return Ok(Some(core::mem::replace(slot, element)));
            }
            if !self.grow() {
                return Err(element);
            }
        }

        // SAFETY: Either a bucket is free, or the table just grew.
        let previous = unsafe { self.insert_hashed(hash, element, true) };
        if previous.is_none() && self.populated >= self.grow_at {
            self.grow();
        }
        Ok(previous)
    }

    /// Inserts `element`, or replaces the element equal to it.
    ///
    /// Returns the replaced element, if any. Identical to
    /// [`try_set`](Self::try_set), except that an element which cannot be
    /// stored at all is passed to the release hook.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use robin_table::HashTable;
    /// # use robin_table::hash;
    /// # use robin_table::ops::KeyBytes;
    /// #
    /// fn key<'a>(pair: &'a (&'static str, u32)) -> &'a [u8] {
    ///     pair.0.as_bytes()
    /// }
    ///
    /// let mut table = HashTable::new(KeyBytes::new(key, hash::sip)).unwrap();
    /// assert_eq!(table.set(("a", 1)), None);
    /// assert_eq!(table.set(("a", 2)), Some(("a", 1)));
    /// assert_eq!(table.len(), 1);
    /// ```
    pub fn set(&mut self, element: T) -> Option<T> {
        match self.try_set(element) {
            Ok(previous) => previous,
            Err(rejected) => {
                self.ops.release(rejected);
                None
            }
        }
    }

    /// Removes and returns the element equal to `key`.
    ///
    /// The element is handed back to the caller rather than released.
    /// Removal shifts later elements, so cursors obtained from
    /// [`iterate`](Self::iterate) must restart from zero afterwards.
    pub fn delete(&mut self, key: &T) -> Option<T> {
        let hash = self.hash_of(key);
        let index = self.find_index(hash, key)?;
        // SAFETY: `find_index` only returns occupied buckets.
        Some(unsafe { self.remove_at(index) })
    }

    /// Returns the element in the bucket at `position` modulo the capacity.
    ///
    /// This reads the physical layout directly and skips hashing entirely.
    /// The result changes whenever the table grows or elements are removed.
    pub fn probe(&self, position: u64) -> Option<&T> {
        let index = (position & self.mask as u64) as usize;
        // SAFETY: `index` is reduced by `mask`, and the element is only read
        // when its bucket is occupied.
        unsafe {
            if *self.dibs_ptr().as_ref().get_unchecked(index) == EMPTY {
                return None;
            }
            Some(
                self.buckets_ptr()
                    .as_ref()
                    .get_unchecked(index)
                    .assume_init_ref(),
            )
        }
    }

    /// Calls `f` on every element in bucket order.
    ///
    /// Returning `false` from `f` stops the scan early. Returns `true` if
    /// every element was visited. The key part of an element must not be
    /// changed through the mutable reference.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use robin_table::HashTable;
    /// # use robin_table::hash;
    /// # use robin_table::ops::KeyBytes;
    /// #
    /// fn key(pair: &(u8, u32)) -> &[u8] {
    ///     core::slice::from_ref(&pair.0)
    /// }
    ///
    /// let mut table = HashTable::new(KeyBytes::new(key, hash::sip)).unwrap();
    /// for k in 0..4u8 {
    ///     table.set((k, 1));
    /// }
    ///
    /// assert!(table.scan(|pair| {
    ///     pair.1 += 1;
    ///     true
    /// }));
    /// assert!(table.iter().all(|pair| pair.1 == 2));
    ///
    /// let mut seen = 0;
    /// assert!(!table.scan(|_| {
    ///     seen += 1;
    ///     seen < 2
    /// }));
    /// assert_eq!(seen, 2);
    /// ```
    pub fn scan(&mut self, mut f: impl FnMut(&mut T) -> bool) -> bool {
        // SAFETY: Only buckets with a non-empty distance are handed out.
        unsafe {
            let dibs = self.dibs_ptr().as_ref();
            let buckets = self.buckets_ptr().as_mut();
            for (index, &dib) in dibs.iter().enumerate() {
                if dib == EMPTY {
                    continue;
                }
                if !f(buckets.get_unchecked_mut(index).assume_init_mut()) {
                    return false;
                }
            }
        }
        true
    }

    /// Yields the next element at or after `*cursor`, advancing the cursor
    /// past it.
    ///
    /// Start with a cursor of zero and call until `None`; the cursor is then
    /// at the capacity. The cursor is a plain bucket index: a
    /// [`delete`](Self::delete) in the middle of a walk rearranges buckets,
    /// so continuing may skip or revisit elements unless the cursor is reset
    /// to zero.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use robin_table::HashTable;
    /// # use robin_table::hash;
    /// # use robin_table::ops::KeyBytes;
    /// #
    /// fn key(v: &[u8; 1]) -> &[u8] {
    ///     v
    /// }
    ///
    /// let mut table = HashTable::new(KeyBytes::new(key, hash::sip)).unwrap();
    /// table.set([1]);
    /// table.set([2]);
    ///
    /// let mut cursor = 0;
    /// let mut total = 0;
    /// while let Some(v) = table.iterate(&mut cursor) {
    ///     total += v[0];
    /// }
    /// assert_eq!(total, 3);
    /// assert_eq!(cursor, table.capacity());
    /// ```
    pub fn iterate(&mut self, cursor: &mut usize) -> Option<&mut T> {
        let buckets = self.capacity();
        // SAFETY: `cursor` is bounds-checked against the capacity before each
        // access, and only occupied buckets are handed out.
        unsafe {
            let dibs = self.dibs_ptr().as_ref();
            while *cursor < buckets {
                let index = *cursor;
                *cursor += 1;
                if *dibs.get_unchecked(index) != EMPTY {
                    return Some(
                        self.buckets_ptr()
                            .as_mut()
                            .get_unchecked_mut(index)
                            .assume_init_mut(),
                    );
                }
            }
        }
        None
    }

    /// Returns an iterator over all elements in bucket order.
    pub fn iter(&self) -> Iter<'_, T> {
        // SAFETY: The slices cover the buckets in use and borrow `self`.
        unsafe {
            Iter {
                dibs: self.dibs_ptr().as_ref(),
                buckets: self.buckets_ptr().as_ref(),
                index: 0,
                remaining: self.populated,
            }
        }
    }

    /// Removes every element, passing each to the release hook.
    ///
    /// With `capacity` set the bucket count changes to that hint, rounded
    /// the same way as at construction. Shrinking, or growing back within
    /// memory the table already holds, reuses the existing allocation.
    /// Growing past it reallocates; on failure the table keeps its current
    /// buckets and the [`oom`](Self::oom) flag is set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use robin_table::HashTable;
    /// # use robin_table::hash;
    /// # use robin_table::ops::KeyBytes;
    /// #
    /// fn key(v: &[u8; 8]) -> &[u8] {
    ///     v
    /// }
    ///
    /// let mut table = HashTable::new(KeyBytes::new(key, hash::fast)).unwrap();
    /// for v in 0..100u64 {
    ///     table.set(v.to_le_bytes());
    /// }
    /// assert_eq!(table.capacity(), 256);
    ///
    /// table.clear(None);
    /// assert!(table.is_empty());
    /// assert_eq!(table.capacity(), 256);
    ///
    /// table.clear(Some(0));
    /// assert_eq!(table.capacity(), 16);
    /// ```
    pub fn clear(&mut self, capacity: Option<usize>) {
        self.release_all();

        if let Some(hint) = capacity {
            match Capacity::for_hint(hint) {
                Ok(target) => self.reshape(target),
                Err(error) => self.latch_oom(error),
            }
        }
    }

    /// Switches an empty table to `target` buckets.
    fn reshape(&mut self, target: Capacity) {
        debug_assert_eq!(self.populated, 0);
        if target.buckets == self.capacity() {
            return;
        }

        if target > self.layout.capacity {
            let new_layout = match DataLayout::new::<T>(target) {
                Ok(layout) => layout,
                Err(error) => {
                    self.latch_oom(error);
                    return;
                }
            };
            debug_assert_eq!(new_layout.layout.align(), self.layout.layout.align());

            // SAFETY: `alloc` came from `allocator` with the current layout,
            // and the alignment is unchanged. The table is empty, so the
            // moved contents do not matter.
            let moved = unsafe {
                self.allocator
                    .reallocate(self.alloc, self.layout.layout, new_layout.layout.size())
            };
            match moved {
                Some(alloc) => {
                    self.alloc = alloc;
                    self.layout = new_layout;
                }
                None => {
                    self.latch_oom(TableError::AllocationFailed {
                        size: new_layout.layout.size(),
                        align: new_layout.layout.align(),
                    });
                    return;
                }
            }
        }

        tracing::debug!(
            from = self.capacity(),
            to = target.buckets,
            allocated = self.layout.capacity.buckets,
            "resizing cleared hash table"
        );
        self.mask = target.mask();
        self.grow_at = grow_threshold(target.buckets);
        self.reset_dibs();
    }

    /// Returns a histogram of probe distances: entry `d` counts the elements
    /// sitting `d` buckets past their ideal bucket.
    ///
    /// Only available with the `stats` feature.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_histogram(&self) -> alloc::vec::Vec<usize> {
        let mut hist = alloc::vec::Vec::new();
        // SAFETY: The distance array covers every bucket in use.
        for &dib in unsafe { self.dibs_ptr().as_ref() } {
            if dib == EMPTY {
                continue;
            }
            let distance = dib as usize - 1;
            if hist.len() <= distance {
                hist.resize(distance + 1, 0);
            }
            hist[distance] += 1;
        }
        hist
    }

    /// Returns probe and utilization statistics.
    ///
    /// Only available with the `stats` feature.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let hist = self.probe_histogram();
        let total: usize = hist.iter().enumerate().map(|(d, &n)| d * n).sum();

        DebugStats {
            populated: self.populated,
            capacity: self.capacity(),
            load_factor: self.populated as f64 / self.capacity() as f64,
            max_distance: hist.len().saturating_sub(1),
            mean_distance: if self.populated == 0 {
                0.0
            } else {
                total as f64 / self.populated as f64
            },
            total_bytes: self.layout.layout.size(),
        }
    }

    /// Checks that every stored distance matches the element's position
    /// relative to its ideal bucket.
    #[cfg(test)]
    pub(crate) fn assert_distances(&self) {
        // SAFETY: Only digests of occupied buckets are read.
        unsafe {
            let dibs = self.dibs_ptr().as_ref();
            let hashes = self.hashes_ptr().as_ref();
            let mut occupied = 0;
            for (index, &dib) in dibs.iter().enumerate() {
                if dib == EMPTY {
                    continue;
                }
                occupied += 1;
                let ideal = self.ideal_index(hashes[index]);
                let distance = index.wrapping_sub(ideal) & self.mask;
                assert_eq!(dib as usize - 1, distance, "bucket {index}: {self:#?}");

                // Distances grow by at most one from bucket to bucket.
                let prev = dibs[index.wrapping_sub(1) & self.mask];
                assert!(dib <= prev + 1, "bucket {index}: {self:#?}");
            }
            assert_eq!(occupied, self.populated);
        }
    }
}

/// An iterator over the elements of a [`HashTable`].
///
/// This struct is created by the [`iter`] method on [`HashTable`]. It
/// yields `&T` references in bucket order.
///
/// [`iter`]: HashTable::iter
pub struct Iter<'a, T> {
    dibs: &'a [u32],
    buckets: &'a [MaybeUninit<T>],
    index: usize,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 && self.index < self.dibs.len() {
            let index = self.index;
            self.index += 1;
            if self.dibs[index] != EMPTY {
                self.remaining -= 1;
                // SAFETY: Occupied buckets hold an initialized element.
                return Some(unsafe { self.buckets[index].assume_init_ref() });
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<'a, T, O, A> IntoIterator for &'a HashTable<T, O, A>
where
    O: ElementOps<T>,
    A: RawAllocator,
{
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
