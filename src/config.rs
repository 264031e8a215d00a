//! Construction options for [`HashTable`](crate::HashTable).

/// Smallest bucket count a table will ever use.
pub const MIN_CAPACITY: usize = 16;

/// Construction record for a hash table.
///
/// The capacity is a hint: it is rounded up to the next power of two and
/// never goes below [`MIN_CAPACITY`]. The two seeds are handed unchanged to
/// the element hash function on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    /// Requested number of buckets.
    pub capacity: usize,
    /// First seed passed to the hash function.
    pub seed0: u64,
    /// Second seed passed to the hash function.
    pub seed1: u64,
}

impl TableConfig {
    /// Creates a configuration with default values.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use robin_table::TableConfig;
    /// let config = TableConfig::new().with_capacity(100).with_seeds(1, 2);
    /// assert_eq!(config.capacity, 100);
    /// assert_eq!((config.seed0, config.seed1), (1, 2));
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the capacity hint.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets both hash seeds.
    pub fn with_seeds(mut self, seed0: u64, seed1: u64) -> Self {
        self.seed0 = seed0;
        self.seed1 = seed1;
        self
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            capacity: MIN_CAPACITY,
            seed0: 0,
            seed1: 0,
        }
    }
}
