/*!
This crate provides [`SharedPtr<T>`] and [`WeakPtr<T>`]: reference-counted
smart pointers modeled on C++'s
[`shared_ptr`](https://en.cppreference.com/w/cpp/memory/shared_ptr) /
`weak_ptr` pair, built over an explicit control block rather than on
[`std::rc::Rc`].

What the control-block design buys over `std`'s pointers:

* **Nullable handles.** A `SharedPtr` has an empty state
  ([`SharedPtr::empty`], [`Default`]); `get` returns `Option<&T>` and
  [`SharedPtr::reset`] relinquishes ownership in place.
* **Custom deleters.** Ownership can be taken over an externally-allocated
  value, destroyed by an arbitrary callable instead of a `Box` drop:

```rust
    use sharc::SharedPtr;
    use std::{cell::Cell, rc::Rc};

    let freed = Rc::new(Cell::new(false));
    let flag = freed.clone();
    let raw = Box::into_raw(Box::new(42));
    let deleter = move |q: *mut i32| {
        flag.set(true);
        drop(unsafe { Box::from_raw(q) });
    };
    let p = unsafe { SharedPtr::from_raw_with(raw, deleter) };
    drop(p);
    assert!(freed.get());
```

* **Custom allocators.** The bookkeeping block (and, for
  [`SharedPtr::new_in`], the value fused into the same allocation) can be
  placed by any [`allocator_api2`] allocator, on stable Rust:

```rust
    use sharc::SharedPtr;
    use bumpalo::Bump;

    let arena: &'static Bump = Box::leak(Box::new(Bump::new()));
    let p = SharedPtr::new_in([0u64; 4], arena);
    assert_eq!(p[0], 0);
```

* **Polymorphic destruction.** A `SharedPtr<dyn Trait>` built from a
  concrete value still runs the concrete destructor when the last strong
  handle drops, because destruction is dispatched through the control
  block, not through the handle's type:

```rust
    use sharc::SharedPtr;

    trait Animal { fn legs(&self) -> u8; }
    struct Cat;
    impl Animal for Cat { fn legs(&self) -> u8 { 4 } }

    // coerce at the call site...
    let a: SharedPtr<dyn Animal> = SharedPtr::from_box(Box::new(Cat));
    // ...or upcast an existing handle
    let b: SharedPtr<dyn Animal> = SharedPtr::cast(SharedPtr::new(Cat), |c| c as &dyn Animal);
    assert_eq!(a.legs() + b.legs(), 8);
```

Weak handles observe without owning, which is how reference cycles are
broken manually:

```rust
    use sharc::{SharedPtr, WeakPtr};

    let strong = SharedPtr::new(String::from("alive"));
    let weak = SharedPtr::downgrade(&strong);
    assert_eq!(&*weak.upgrade().unwrap(), "alive");

    drop(strong);
    assert!(weak.expired());
    assert!(weak.upgrade().is_none());
```

# Lifetime model

The managed value lives until the last strong handle releases it. The
control block lives until the last handle of *either* kind releases it, so
a `WeakPtr` can always answer [`expired`](WeakPtr::expired) even after the
value is gone. Promotion ([`WeakPtr::upgrade`]) is a single checked
operation that never resurrects a dead value.

# Threading

Counts are plain `Cell<usize>`: this is a single-threaded primitive, like
`Rc`, and the handles are `!Send`/`!Sync`. There is no atomic variant.

# Errors

Running out of memory is reported through
[`allocator_api2::alloc::handle_alloc_error`], like the `std` pointers. All
other misuse (dereferencing an empty handle, double ownership of one raw
pointer) is a caller bug, not a runtime condition: the safe surface panics
on the former, and the latter is excluded by `unsafe` preconditions.
*/
#![no_std]
#[cfg(test)]
extern crate std;

extern crate alloc;

mod block;
mod shared;
mod weak;

pub use self::shared::SharedPtr;
pub use self::weak::WeakPtr;

/// Allocation-count instrumentation for tests: forwards to the global
/// allocator while tallying calls, so tests can assert how many allocator
/// round-trips an operation cost and that every block is eventually freed.
#[cfg(test)]
pub(crate) mod test_alloc {
    use alloc::rc::Rc;
    use core::alloc::Layout;
    use core::cell::Cell;
    use core::ptr::NonNull;

    use allocator_api2::alloc::{AllocError, Allocator, Global};

    #[derive(Clone, Default)]
    pub(crate) struct CountingAlloc {
        pub(crate) allocs: Rc<Cell<usize>>,
        pub(crate) frees: Rc<Cell<usize>>,
    }

    unsafe impl Allocator for CountingAlloc {
        fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
            self.allocs.set(self.allocs.get() + 1);
            Global.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            self.frees.set(self.frees.get() + 1);
            Global.deallocate(ptr, layout)
        }
    }
}
