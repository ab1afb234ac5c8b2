//! `WeakPtr<T>` observes a value owned by [`SharedPtr`] handles without
//! keeping it alive. It is the tool for breaking reference cycles: the
//! back-edge of a cycle holds a `WeakPtr` and promotes it on demand.
//!
//! A weak handle keeps the control block allocated (so liveness can still be
//! queried) but not the value; once the last strong handle drops, the value
//! is gone and [`WeakPtr::upgrade`] returns `None`.

use core::fmt;

use crate::block::{self, Link};
use crate::shared::SharedPtr;

/// A non-owning observer of a shared value.
///
/// ```
/// use sharc::SharedPtr;
///
/// let a = SharedPtr::new(5);
/// let w = SharedPtr::downgrade(&a);
/// assert_eq!(*w.upgrade().unwrap(), 5);
///
/// drop(a);
/// assert!(w.expired());
/// assert!(w.upgrade().is_none());
/// ```
pub struct WeakPtr<T: ?Sized> {
    raw: Option<Link<T>>,
}

impl<T: ?Sized> WeakPtr<T> {
    /// An empty weak handle, not attached to any block. `upgrade` on it
    /// always fails.
    pub const fn new() -> Self {
        WeakPtr { raw: None }
    }

    /// Wraps a link whose weak count already accounts for this handle.
    pub(crate) fn from_link(link: Link<T>) -> Self {
        WeakPtr { raw: Some(link) }
    }

    /// True once no strong handle keeps the value alive (or for an empty
    /// weak handle). Not before: a value with any live strong handle is not
    /// expired.
    pub fn expired(&self) -> bool {
        match &self.raw {
            Some(link) => !unsafe { link.header.as_ref() }.is_valid(),
            None => true,
        }
    }

    /// The number of strong handles currently sharing the value, or 0.
    pub fn use_count(&self) -> usize {
        match &self.raw {
            Some(link) => unsafe { link.header.as_ref() }.strong_count(),
            None => 0,
        }
    }

    /// Promotes this weak handle into a strong one.
    ///
    /// This is a single checked operation: the strong count is incremented
    /// only if the value is still alive, so a dead value can never be
    /// resurrected by racing the promotion against the last strong drop.
    /// Returns `None` exactly when [`expired`](WeakPtr::expired) is true.
    pub fn upgrade(&self) -> Option<SharedPtr<T>> {
        let link = self.raw.as_ref()?;
        if unsafe { link.header.as_ref() }.try_incr_strong() {
            Some(SharedPtr::from_link(*link))
        } else {
            None
        }
    }

    /// Releases the weak link, leaving this handle empty. If it was the last
    /// link of either kind, the block is freed. Idempotent.
    pub fn reset(&mut self) {
        if let Some(link) = self.raw.take() {
            unsafe { block::release_weak(link.header) };
        }
    }
}

impl<T: ?Sized> Clone for WeakPtr<T> {
    /// Weak handles may be copied even after the value died, as long as the
    /// block is still around (which holding `self` guarantees).
    fn clone(&self) -> Self {
        if let Some(link) = &self.raw {
            unsafe { link.header.as_ref() }.incr_weak();
        }
        WeakPtr { raw: self.raw }
    }
}

impl<T: ?Sized> Drop for WeakPtr<T> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized> Default for WeakPtr<T> {
    /// An empty weak handle.
    fn default() -> Self {
        WeakPtr::new()
    }
}

impl<T: ?Sized> From<&SharedPtr<T>> for WeakPtr<T> {
    fn from(owner: &SharedPtr<T>) -> Self {
        SharedPtr::downgrade(owner)
    }
}

impl<T: ?Sized> fmt::Debug for WeakPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(WeakPtr)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_alloc::CountingAlloc;
    use alloc::boxed::Box;
    use core::cell::RefCell;
    use std::cell::Cell;
    use std::rc::Rc;

    struct DropCounter(Rc<Cell<usize>>);
    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn upgrade_fails_after_last_strong_drop() {
        let mut a = SharedPtr::new(5);
        let w = SharedPtr::downgrade(&a);
        assert!(!w.expired());
        assert_eq!(*w.upgrade().unwrap(), 5);

        SharedPtr::reset(&mut a);
        assert!(w.expired());
        assert!(w.upgrade().is_none());
    }

    #[test]
    fn expired_flips_only_at_zero_strong() {
        let a = SharedPtr::new(1);
        let b = a.clone();
        let w = SharedPtr::downgrade(&a);
        drop(a);
        assert!(!w.expired());
        drop(b);
        assert!(w.expired());
    }

    #[test]
    fn upgrade_shares_the_strong_count() {
        let a = SharedPtr::new(1);
        let w = SharedPtr::downgrade(&a);
        let b = w.upgrade().unwrap();
        assert_eq!(SharedPtr::use_count(&a), 2);
        assert!(SharedPtr::ptr_eq(&a, &b));
    }

    #[test]
    fn weak_does_not_keep_the_value_alive() {
        let drops = Rc::new(Cell::new(0));
        let alloc = CountingAlloc::default();
        let a = SharedPtr::new_in(DropCounter(drops.clone()), alloc.clone());
        let w = SharedPtr::downgrade(&a);

        drop(a);
        // Value destroyed, block still allocated for the weak handle.
        assert_eq!(drops.get(), 1);
        assert_eq!(alloc.frees.get(), 0);

        drop(w);
        assert_eq!(alloc.allocs.get(), 1);
        assert_eq!(alloc.frees.get(), 1);
    }

    #[test]
    fn weak_clone_after_value_died() {
        let a = SharedPtr::new(3);
        let w = SharedPtr::downgrade(&a);
        drop(a);

        let w2 = w.clone();
        assert!(w.expired());
        assert!(w2.expired());
        assert!(w2.upgrade().is_none());
    }

    #[test]
    fn weak_count_observer() {
        let a = SharedPtr::new(0);
        assert_eq!(SharedPtr::weak_count(&a), 0);
        let w1 = SharedPtr::downgrade(&a);
        let w2 = w1.clone();
        assert_eq!(SharedPtr::weak_count(&a), 2);
        drop(w1);
        drop(w2);
        assert_eq!(SharedPtr::weak_count(&a), 0);
    }

    #[test]
    fn empty_weak_handle() {
        let mut w = WeakPtr::<i32>::new();
        assert!(w.expired());
        assert_eq!(w.use_count(), 0);
        assert!(w.upgrade().is_none());
        w.reset();
        w.reset();
    }

    #[test]
    fn reset_releases_the_block() {
        let alloc = CountingAlloc::default();
        let a = SharedPtr::new_in(9, alloc.clone());
        let mut w = SharedPtr::downgrade(&a);
        drop(a);
        assert_eq!(alloc.frees.get(), 0);
        w.reset();
        assert_eq!(alloc.frees.get(), 1);
        assert!(w.expired());
    }

    // A value that holds the last weak handle to itself: its destructor
    // releases that handle mid-destruction, which must not free the block
    // out from under the running destructor.
    struct SelfRef {
        me: RefCell<WeakPtr<SelfRef>>,
    }

    #[test]
    fn self_referential_value_drops_cleanly() {
        let alloc = CountingAlloc::default();
        let a = SharedPtr::new_in(
            SelfRef {
                me: RefCell::new(WeakPtr::new()),
            },
            alloc.clone(),
        );
        *a.me.borrow_mut() = SharedPtr::downgrade(&a);
        assert_eq!(SharedPtr::weak_count(&a), 1);

        drop(a);
        assert_eq!(alloc.allocs.get(), 1);
        assert_eq!(alloc.frees.get(), 1);
    }

    #[test]
    fn from_shared_reference() {
        let a = SharedPtr::new(2);
        let w = WeakPtr::from(&a);
        assert_eq!(w.use_count(), 1);
        assert_eq!(SharedPtr::weak_count(&a), 1);
    }

    #[test]
    fn bump_arena_allocator() {
        let bump: &'static bumpalo::Bump = Box::leak(Box::new(bumpalo::Bump::new()));
        let a = SharedPtr::new_in([1u8, 2, 3], bump);
        let w = SharedPtr::downgrade(&a);
        assert_eq!(a[1], 2);
        drop(a);
        assert!(w.expired());
        drop(w);
    }
}
