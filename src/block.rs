//! Control blocks: the heap-side bookkeeping behind [`SharedPtr`] and
//! [`WeakPtr`].
//!
//! A block is one allocation holding the strong/weak counts plus whatever a
//! concrete variant needs to destroy the value and to free itself. The two
//! variants are [`PtrBlock`] (ownership taken over an external pointer,
//! destroyed via a deleter) and [`ValueBlock`] (value embedded in the same
//! allocation as the counts). Handles only ever see a [`Header`]; the
//! concrete layout is recovered inside the block's own `drop_value` /
//! `drop_block` slots.
//!
//! [`SharedPtr`]: crate::SharedPtr
//! [`WeakPtr`]: crate::WeakPtr

use core::alloc::Layout;
use core::cell::Cell;
use core::mem::{ManuallyDrop, MaybeUninit};
use core::ptr::{self, NonNull};

use allocator_api2::alloc::{handle_alloc_error, Allocator};

/// Counts and destructors shared by every block variant.
///
/// Count convention: the strong cohort collectively owns one weak link, so a
/// fresh block starts at `strong = 1, weak = 1`. `drop_value` runs when the
/// strong count hits zero; `drop_block` runs when the weak count does. The
/// collective link guarantees the block outlives `drop_value` even if the
/// value's destructor releases weak handles to this same block.
pub(crate) struct Header {
    strong: Cell<usize>,
    weak: Cell<usize>,
    drop_value: unsafe fn(*mut Header),
    drop_block: unsafe fn(*mut Header),
}

impl Header {
    fn new(drop_value: unsafe fn(*mut Header), drop_block: unsafe fn(*mut Header)) -> Self {
        Header {
            strong: Cell::new(1),
            weak: Cell::new(1),
            drop_value,
            drop_block,
        }
    }

    /// The value is alive exactly while some strong handle exists.
    pub(crate) fn is_valid(&self) -> bool {
        self.strong.get() > 0
    }

    pub(crate) fn strong_count(&self) -> usize {
        self.strong.get()
    }

    /// Raw weak count, including the link owned by the strong cohort.
    pub(crate) fn weak_count(&self) -> usize {
        self.weak.get()
    }

    /// Mint a new strong link by copying an existing live one.
    ///
    /// Only reachable while the caller itself holds a strong link, so the
    /// block must be valid.
    pub(crate) fn incr_strong(&self) {
        debug_assert!(self.is_valid(), "strong link minted on a dead block");
        self.strong.set(self.strong.get() + 1);
    }

    /// Checked promotion of a weak link: increments the strong count only
    /// while the value is still alive. A dead value is never resurrected.
    pub(crate) fn try_incr_strong(&self) -> bool {
        if self.is_valid() {
            self.strong.set(self.strong.get() + 1);
            true
        } else {
            false
        }
    }

    /// Mint a new weak link. Legal while the block is valid or while other
    /// weak links still exist (weak-from-weak after the value died).
    pub(crate) fn incr_weak(&self) {
        debug_assert!(
            self.is_valid() || self.weak.get() > 0,
            "weak link minted on a freed block"
        );
        self.weak.set(self.weak.get() + 1);
    }
}

/// Releases one strong link. If it was the last one, destroys the value and
/// releases the strong cohort's collective weak link, which frees the block
/// once no weak handles remain.
///
/// # Safety
///
/// `header` must point to a live block and the caller must own the strong
/// link being released.
pub(crate) unsafe fn release_strong(header: NonNull<Header>) {
    let h = header.as_ref();
    debug_assert!(h.is_valid());
    let strong = h.strong.get() - 1;
    h.strong.set(strong);
    if strong != 0 {
        return;
    }
    (h.drop_value)(header.as_ptr());
    // The collective weak link is released only after the value is fully
    // destroyed, so `drop_value` can never observe a freed block.
    release_weak(header);
}

/// Releases one weak link, freeing the block when it was the last link of
/// either kind.
///
/// # Safety
///
/// `header` must point to a live block and the caller must own the weak link
/// being released.
pub(crate) unsafe fn release_weak(header: NonNull<Header>) {
    let h = header.as_ref();
    debug_assert!(h.weak.get() > 0);
    let weak = h.weak.get() - 1;
    h.weak.set(weak);
    if weak == 0 {
        debug_assert!(!h.is_valid());
        (h.drop_block)(header.as_ptr());
    }
}

/// A (block, value) pointer pair. This is the whole state of a non-empty
/// handle; the value pointer may be fat, the header pointer never is.
pub(crate) struct Link<T: ?Sized> {
    pub(crate) header: NonNull<Header>,
    pub(crate) ptr: NonNull<T>,
}

impl<T: ?Sized> Clone for Link<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Link<T> {}

/// Block variant owning an externally-allocated value through a deleter.
///
/// `Header` must stay the first field so a `*mut Header` round-trips to the
/// concrete block type inside the drop slots.
#[repr(C)]
pub(crate) struct PtrBlock<T: ?Sized, D, A: Allocator> {
    header: Header,
    deleter: ManuallyDrop<D>,
    alloc: ManuallyDrop<A>,
    ptr: *mut T,
}

impl<T, D, A> PtrBlock<T, D, A>
where
    T: ?Sized,
    D: FnOnce(*mut T),
    A: Allocator,
{
    /// Allocates a block from `alloc` taking ownership of `ptr`. The deleter
    /// and the allocator are moved into the block; the allocator is used
    /// again, by value, when the block frees itself.
    pub(crate) fn make(ptr: *mut T, deleter: D, alloc: A) -> NonNull<Header> {
        let layout = Layout::new::<Self>();
        let block = match alloc.allocate(layout) {
            Ok(mem) => mem.cast::<Self>(),
            Err(_) => handle_alloc_error(layout),
        };
        unsafe {
            block.as_ptr().write(PtrBlock {
                header: Header::new(Self::drop_value, Self::drop_block),
                deleter: ManuallyDrop::new(deleter),
                alloc: ManuallyDrop::new(alloc),
                ptr,
            });
        }
        block.cast()
    }

    unsafe fn drop_value(header: *mut Header) {
        let block = &mut *(header as *mut Self);
        // `drop_value` runs exactly once, when the strong count hits zero.
        let deleter = ManuallyDrop::take(&mut block.deleter);
        deleter(block.ptr);
    }

    unsafe fn drop_block(header: *mut Header) {
        let block = &mut *(header as *mut Self);
        // Move the allocator out before the memory it lives in goes away.
        let alloc = ManuallyDrop::take(&mut block.alloc);
        alloc.deallocate(
            NonNull::new_unchecked(header as *mut u8),
            Layout::new::<Self>(),
        );
    }
}

/// Block variant embedding the value in the same allocation as the counts,
/// so value + bookkeeping cost a single allocator round-trip.
#[repr(C)]
pub(crate) struct ValueBlock<T, A: Allocator> {
    header: Header,
    alloc: ManuallyDrop<A>,
    value: MaybeUninit<T>,
}

impl<T, A: Allocator> ValueBlock<T, A> {
    /// Allocates a block from `alloc` and constructs `value` in its embedded
    /// storage. Returns the header plus the address of the stored value.
    pub(crate) fn make(value: T, alloc: A) -> (NonNull<Header>, NonNull<T>) {
        let layout = Layout::new::<Self>();
        let block = match alloc.allocate(layout) {
            Ok(mem) => mem.cast::<Self>(),
            Err(_) => handle_alloc_error(layout),
        };
        unsafe {
            block.as_ptr().write(ValueBlock {
                header: Header::new(Self::drop_value, Self::drop_block),
                alloc: ManuallyDrop::new(alloc),
                value: MaybeUninit::new(value),
            });
            let value_ptr = ptr::addr_of_mut!((*block.as_ptr()).value) as *mut T;
            (block.cast(), NonNull::new_unchecked(value_ptr))
        }
    }

    unsafe fn drop_value(header: *mut Header) {
        let block = &mut *(header as *mut Self);
        // In-place destruction only; the storage is part of the block and is
        // reclaimed by `drop_block`.
        block.value.assume_init_drop();
    }

    unsafe fn drop_block(header: *mut Header) {
        let block = &mut *(header as *mut Self);
        let alloc = ManuallyDrop::take(&mut block.alloc);
        alloc.deallocate(
            NonNull::new_unchecked(header as *mut u8),
            Layout::new::<Self>(),
        );
    }
}
