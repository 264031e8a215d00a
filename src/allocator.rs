//! Allocator binding for the bucket array.
//!
//! Every allocation a table performs goes through a [`RawAllocator`]. A table
//! either receives one explicitly at construction, or uses
//! [`DefaultAllocator`], which resolves to the process allocator unless a
//! legacy override was installed with [`set_default_allocator`] before the
//! table was built.

use core::alloc::Layout;
use core::ptr::NonNull;

use spin::Once;

use crate::error::Result;
use crate::error::TableError;

/// Memory source for a table's bucket array.
///
/// # Safety
///
/// Implementations must return blocks that are valid for reads and writes of
/// `layout.size()` bytes and aligned to `layout.align()`, and must accept any
/// block they handed out back in `reallocate` and `deallocate`. Returning
/// `None` signals failure and must leave any passed-in block untouched.
pub unsafe trait RawAllocator {
    /// Allocates a block for `layout`.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Resizes `ptr` from `old` to `new_size` bytes, keeping the alignment
    /// of `old` and the first `min(old.size(), new_size)` bytes.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated by this allocator with layout `old`.
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>>;

    /// Releases a block.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated by this allocator with `layout`.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process allocator from the `alloc` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct Global;

// SAFETY: Forwards to the global allocator, which upholds the contract.
unsafe impl RawAllocator for Global {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return Some(dangling(layout));
        }
        // SAFETY: The layout has a non-zero size.
        NonNull::new(unsafe { alloc::alloc::alloc(layout) })
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        if old.size() == 0 || new_size == 0 {
            let new_layout = Layout::from_size_align(new_size, old.align()).ok()?;
            let new_ptr = self.allocate(new_layout)?;
            // SAFETY: Caller guarantees `ptr` came from us with `old`.
            unsafe { self.deallocate(ptr, old) };
            return Some(new_ptr);
        }
        // SAFETY: Caller guarantees `ptr` came from us with `old`, and both
        // sizes are non-zero.
        NonNull::new(unsafe { alloc::alloc::realloc(ptr.as_ptr(), old, new_size) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            // SAFETY: Caller guarantees `ptr` came from us with `layout`.
            unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }
}

fn dangling(layout: Layout) -> NonNull<u8> {
    // SAFETY: Alignments are never zero.
    unsafe { NonNull::new_unchecked(layout.align() as *mut u8) }
}

/// Allocation function shaped like `malloc`.
pub type AllocFn = fn(usize) -> *mut u8;
/// Reallocation function shaped like `realloc`.
pub type ReallocFn = fn(*mut u8, usize) -> *mut u8;
/// Release function shaped like `free`.
pub type FreeFn = fn(*mut u8);

/// Alignment every block from an [`FnAllocator`] must satisfy.
pub const FN_ALLOCATOR_ALIGN: usize = 16;

/// An allocator built from three plain functions.
///
/// The functions only see sizes, so they must behave like `malloc`, `realloc`
/// and `free`: blocks are aligned to [`FN_ALLOCATOR_ALIGN`], a null return is
/// a failure that leaves the old block alone, and `realloc` keeps the
/// contents. Layouts with a stricter alignment are refused.
#[derive(Debug, Clone, Copy)]
pub struct FnAllocator {
    alloc: AllocFn,
    realloc: Option<ReallocFn>,
    free: FreeFn,
}

impl FnAllocator {
    /// Binds an allocate/reallocate/deallocate triple.
    ///
    /// # Safety
    ///
    /// The functions must follow the `malloc`/`realloc`/`free` contract
    /// described on [`FnAllocator`].
    pub unsafe fn new(alloc: AllocFn, realloc: ReallocFn, free: FreeFn) -> Self {
        Self {
            alloc,
            realloc: Some(realloc),
            free,
        }
    }

    /// Binds only allocate and deallocate; reallocation copies into a fresh
    /// block.
    ///
    /// # Safety
    ///
    /// The functions must follow the `malloc`/`free` contract described on
    /// [`FnAllocator`].
    pub unsafe fn without_realloc(alloc: AllocFn, free: FreeFn) -> Self {
        Self {
            alloc,
            realloc: None,
            free,
        }
    }
}

// SAFETY: Upheld by the contract of the unsafe constructors.
unsafe impl RawAllocator for FnAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.align() > FN_ALLOCATOR_ALIGN {
            return None;
        }
        let ptr = NonNull::new((self.alloc)(layout.size().max(1)))?;
        debug_assert_eq!(ptr.as_ptr() as usize % layout.align(), 0);
        Some(ptr)
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        if let Some(realloc) = self.realloc {
            let moved = NonNull::new(realloc(ptr.as_ptr(), new_size.max(1)))?;
            debug_assert_eq!(moved.as_ptr() as usize % old.align(), 0);
            return Some(moved);
        }

        let new_layout = Layout::from_size_align(new_size, old.align()).ok()?;
        let new_ptr = self.allocate(new_layout)?;
        // SAFETY: Both blocks are live and at least `min` bytes long.
        unsafe {
            core::ptr::copy_nonoverlapping(
                ptr.as_ptr(),
                new_ptr.as_ptr(),
                old.size().min(new_size),
            );
            self.deallocate(ptr, old);
        }
        Some(new_ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        (self.free)(ptr.as_ptr())
    }
}

static LEGACY_DEFAULT: Once<FnAllocator> = Once::new();

/// Installs a process-wide allocator for tables built with
/// [`DefaultAllocator`] from now on.
///
/// Tables constructed earlier keep the allocator they captured. The override
/// can be installed once per process; later calls fail with
/// [`TableError::AllocatorAlreadyInstalled`].
///
/// # Safety
///
/// The functions must follow the `malloc`/`free` contract described on
/// [`FnAllocator`].
#[deprecated(note = "pass an allocator to `HashTable::with_config_in` instead")]
pub unsafe fn set_default_allocator(alloc: AllocFn, free: FreeFn) -> Result<()> {
    let mut installed = false;
    LEGACY_DEFAULT.call_once(|| {
        installed = true;
        // SAFETY: Forwarded from the caller.
        unsafe { FnAllocator::without_realloc(alloc, free) }
    });

    if installed {
        tracing::debug!("installed process-wide default allocator");
        Ok(())
    } else {
        Err(TableError::AllocatorAlreadyInstalled)
    }
}

/// The allocator a table uses when none is given explicitly.
///
/// Captures the legacy override (if any) at the moment it is created, so a
/// later [`set_default_allocator`] call does not affect existing tables.
#[derive(Debug, Clone, Copy)]
pub struct DefaultAllocator {
    legacy: Option<FnAllocator>,
}

impl DefaultAllocator {
    /// Snapshots the currently installed default.
    pub fn current() -> Self {
        Self {
            legacy: LEGACY_DEFAULT.get().copied(),
        }
    }
}

impl Default for DefaultAllocator {
    fn default() -> Self {
        Self::current()
    }
}

// SAFETY: Delegates every call to one fixed allocator chosen at creation.
unsafe impl RawAllocator for DefaultAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        match &self.legacy {
            Some(legacy) => legacy.allocate(layout),
            None => Global.allocate(layout),
        }
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: Forwarded to the allocator that produced `ptr`.
        unsafe {
            match &self.legacy {
                Some(legacy) => legacy.reallocate(ptr, old, new_size),
                None => Global.reallocate(ptr, old, new_size),
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarded to the allocator that produced `ptr`.
        unsafe {
            match &self.legacy {
                Some(legacy) => legacy.deallocate(ptr, layout),
                None => Global.deallocate(ptr, layout),
            }
        }
    }
}

impl<A: RawAllocator + ?Sized> RawAllocatorExt for A {}

/// Layout helpers shared by the bucket store.
pub(crate) trait RawAllocatorExt: RawAllocator {
    /// Allocates `layout`, translating failure into a [`TableError`].
    fn try_allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        self.allocate(layout).ok_or(TableError::AllocationFailed {
            size: layout.size(),
            align: layout.align(),
        })
    }
}
