//! `SharedPtr<T>` is a reference-counted owning handle in the style of C++'s
//! `shared_ptr`: nullable, deleter-aware and allocator-aware.
//!
//! Unlike [`std::rc::Rc`], a `SharedPtr` may be empty ([`SharedPtr::empty`],
//! [`Default`]), can take ownership of an externally-allocated value with a
//! custom deleter ([`SharedPtr::from_raw_with`]), and can place both its
//! bookkeeping and the value wherever an [`Allocator`] says
//! ([`SharedPtr::new_in`]).
//!
//! Counts are non-atomic; handles are neither `Send` nor `Sync`.

use alloc::boxed::Box;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem;
use core::ops::Deref;
use core::ptr::NonNull;

use allocator_api2::alloc::{Allocator, Global};

use crate::block::{self, Link, PtrBlock, ValueBlock};
use crate::weak::WeakPtr;

/// The default deleter: frees the value as a `Box`.
///
/// Sound only for pointers produced by `Box::into_raw`, which is the
/// contract of every caller handing it to a control block.
fn box_deleter<T: ?Sized>(ptr: *mut T) {
    drop(unsafe { Box::from_raw(ptr) });
}

/// A shared owning pointer. Cloning shares the value; the value is dropped
/// when the last clone goes away.
///
/// ```
/// use sharc::SharedPtr;
///
/// let a = SharedPtr::new(1);
/// let b = a.clone();
/// assert_eq!(SharedPtr::use_count(&a), 2);
/// assert_eq!(*b, 1);
/// ```
pub struct SharedPtr<T: ?Sized> {
    raw: Option<Link<T>>,
    phantom: PhantomData<T>,
}

impl<T> SharedPtr<T> {
    /// Constructs a value and its bookkeeping in one allocation.
    pub fn new(value: T) -> Self {
        SharedPtr::new_in(value, Global)
    }

    /// Like [`SharedPtr::new`], but the single fused allocation comes from
    /// `alloc`. The allocator is moved into the block and used again to free
    /// it once the last handle is gone.
    pub fn new_in<A>(value: T, alloc: A) -> Self
    where
        A: Allocator + 'static,
    {
        let (header, ptr) = ValueBlock::make(value, alloc);
        SharedPtr::from_link(Link { header, ptr })
    }
}

impl<T: ?Sized> SharedPtr<T> {
    /// An empty handle: no block, no value.
    ///
    /// ```
    /// let p = sharc::SharedPtr::<i32>::empty();
    /// assert!(sharc::SharedPtr::get(&p).is_none());
    /// assert_eq!(sharc::SharedPtr::use_count(&p), 0);
    /// ```
    pub const fn empty() -> Self {
        SharedPtr {
            raw: None,
            phantom: PhantomData,
        }
    }

    /// Takes ownership of a boxed value. The box's allocation is kept as-is
    /// and freed through the box when the last strong handle drops; the
    /// bookkeeping lives in a second, separate allocation.
    ///
    /// This also covers boxed slices and (via unsized coercion of the
    /// argument) trait objects:
    ///
    /// ```
    /// use sharc::SharedPtr;
    ///
    /// let p: SharedPtr<[i32]> = SharedPtr::from_box(vec![1, 2, 3].into_boxed_slice());
    /// assert_eq!(p[1], 2);
    /// ```
    pub fn from_box(value: Box<T>) -> Self
    where
        T: 'static,
    {
        let ptr = Box::into_raw(value);
        // Ownership of `ptr` is unique here by construction.
        unsafe { SharedPtr::from_raw_with(ptr, box_deleter::<T>) }
    }

    /// Takes ownership of `ptr`, destroying it with its `Box` drop.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from [`Box::into_raw`] and must not be owned by
    /// any other handle chain or freed through any other path.
    pub unsafe fn from_raw(ptr: *mut T) -> Self
    where
        T: 'static,
    {
        SharedPtr::from_raw_with(ptr, box_deleter::<T>)
    }

    /// Takes ownership of `ptr`, destroying it by calling `deleter` when the
    /// last strong handle drops. The bookkeeping block is allocated from the
    /// global allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for the deleter's idea of destruction and must
    /// not be owned by any other handle chain: two independent ownership
    /// chains over one address double-destroy it.
    pub unsafe fn from_raw_with<D>(ptr: *mut T, deleter: D) -> Self
    where
        D: FnOnce(*mut T) + 'static,
    {
        SharedPtr::from_raw_in(ptr, deleter, Global)
    }

    /// Full-control form of [`SharedPtr::from_raw_with`]: the bookkeeping
    /// block is allocated from (and later returned to) `alloc`.
    ///
    /// # Safety
    ///
    /// Same contract as [`SharedPtr::from_raw_with`].
    pub unsafe fn from_raw_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Self
    where
        D: FnOnce(*mut T) + 'static,
        A: Allocator + 'static,
    {
        let ptr = match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => panic!("SharedPtr built from a null pointer"),
        };
        let header = PtrBlock::make(ptr.as_ptr(), deleter, alloc);
        SharedPtr::from_link(Link { header, ptr })
    }

    /// Wraps a link whose strong count already accounts for this handle.
    pub(crate) fn from_link(link: Link<T>) -> Self {
        SharedPtr {
            raw: Some(link),
            phantom: PhantomData,
        }
    }

    /// A reference to the value, or `None` for an empty handle.
    pub fn get(this: &Self) -> Option<&T> {
        this.raw.as_ref().map(|link| unsafe { link.ptr.as_ref() })
    }

    /// Mutable access to the value, granted only while `this` is the unique
    /// handle (one strong, no weak).
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let link = this.raw.as_ref()?;
        let header = unsafe { link.header.as_ref() };
        // weak == 1 is just the strong cohort's own link.
        if header.strong_count() == 1 && header.weak_count() == 1 {
            Some(unsafe { &mut *link.ptr.as_ptr() })
        } else {
            None
        }
    }

    /// The number of strong handles sharing the value, or 0 when empty.
    pub fn use_count(this: &Self) -> usize {
        match &this.raw {
            Some(link) => unsafe { link.header.as_ref() }.strong_count(),
            None => 0,
        }
    }

    /// The number of live [`WeakPtr`] handles on this block.
    pub fn weak_count(this: &Self) -> usize {
        match &this.raw {
            Some(link) => unsafe { link.header.as_ref() }.weak_count() - 1,
            None => 0,
        }
    }

    /// True if both handles point at the same value (or are both empty).
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        match (&this.raw, &other.raw) {
            (Some(a), Some(b)) => core::ptr::eq(a.ptr.as_ptr(), b.ptr.as_ptr()),
            (None, None) => true,
            _ => false,
        }
    }

    /// Releases this handle's strong link and leaves it empty. Dropping the
    /// last strong link destroys the value; if no weak handles remain the
    /// block is freed too. Idempotent.
    pub fn reset(this: &mut Self) {
        if let Some(link) = this.raw.take() {
            unsafe { block::release_strong(link.header) };
        }
    }

    /// Creates a weak handle observing the same value without keeping it
    /// alive. Downgrading an empty handle yields an empty weak handle.
    pub fn downgrade(this: &Self) -> WeakPtr<T> {
        match &this.raw {
            Some(link) => {
                unsafe { link.header.as_ref() }.incr_weak();
                WeakPtr::from_link(*link)
            }
            None => WeakPtr::new(),
        }
    }
}

impl<T: ?Sized + 'static> SharedPtr<T> {
    /// Re-points the handle at something reachable from the value, keeping
    /// the same block and counts. The usual use is the upcast to a trait
    /// object, which ordinary assignment cannot express for a smart pointer
    /// on stable Rust:
    ///
    /// ```
    /// use sharc::SharedPtr;
    ///
    /// trait Greet { fn hello(&self) -> &'static str; }
    /// struct En;
    /// impl Greet for En { fn hello(&self) -> &'static str { "hello" } }
    ///
    /// let en = SharedPtr::new(En);
    /// let greeter: SharedPtr<dyn Greet> = SharedPtr::cast(en, |x| x as &dyn Greet);
    /// assert_eq!(greeter.hello(), "hello");
    /// ```
    ///
    /// When the last strong handle drops, the block still destroys the
    /// original concrete value. Casting an empty handle yields an empty
    /// handle without calling `f`.
    pub fn cast<U, F>(this: Self, f: F) -> SharedPtr<U>
    where
        U: ?Sized + 'static,
        F: for<'x> FnOnce(&'x T) -> &'x U,
    {
        let link = match this.raw {
            Some(link) => link,
            None => return SharedPtr::empty(),
        };
        let ptr = NonNull::from(f(unsafe { link.ptr.as_ref() }));
        // The strong link moves into the new handle unchanged.
        mem::forget(this);
        SharedPtr::from_link(Link {
            header: link.header,
            ptr,
        })
    }
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    fn clone(&self) -> Self {
        if let Some(link) = &self.raw {
            unsafe { link.header.as_ref() }.incr_strong();
        }
        SharedPtr {
            raw: self.raw,
            phantom: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for SharedPtr<T> {
    fn drop(&mut self) {
        SharedPtr::reset(self);
    }
}

impl<T: ?Sized> Default for SharedPtr<T> {
    /// An empty handle.
    fn default() -> Self {
        SharedPtr::empty()
    }
}

impl<T: ?Sized> Deref for SharedPtr<T> {
    type Target = T;

    /// # Panics
    ///
    /// Dereferencing an empty handle is a bug in the caller and panics.
    fn deref(&self) -> &T {
        let link = self.raw.as_ref().expect("dereferenced an empty SharedPtr");
        unsafe { link.ptr.as_ref() }
    }
}

impl<T: ?Sized + 'static> From<Box<T>> for SharedPtr<T> {
    fn from(value: Box<T>) -> Self {
        SharedPtr::from_box(value)
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match SharedPtr::get(self) {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.raw {
            Some(link) => fmt::Pointer::fmt(&link.ptr, f),
            None => fmt::Pointer::fmt(&core::ptr::null::<u8>(), f),
        }
    }
}

/// Comparisons go through the pointed-to values; empty handles compare
/// equal to each other and order before non-empty ones.
impl<T: ?Sized + PartialEq> PartialEq for SharedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        SharedPtr::get(self) == SharedPtr::get(other)
    }
}

impl<T: ?Sized + Eq> Eq for SharedPtr<T> {}

impl<T: ?Sized + PartialOrd> PartialOrd for SharedPtr<T> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        SharedPtr::get(self).partial_cmp(&SharedPtr::get(other))
    }
}

impl<T: ?Sized + Ord> Ord for SharedPtr<T> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        SharedPtr::get(self).cmp(&SharedPtr::get(other))
    }
}

impl<T: ?Sized + Hash> Hash for SharedPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        SharedPtr::get(self).hash(state)
    }
}
