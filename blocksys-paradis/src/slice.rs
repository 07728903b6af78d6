use std::marker::PhantomData;
use std::ops::Range;

/// Shared mutable access to a slice from several threads at once.
///
/// The access itself performs no synchronization. It is the caller's responsibility to ensure
/// that no two threads ever hold overlapping subslices at the same time. The typical way of
/// guaranteeing this is to address the slice only through indices drawn from the caller's own
/// subset of a [`DisjointSubsets`](crate::DisjointSubsets).
pub struct ParallelSliceAccess<'a, T> {
    ptr: *mut T,
    len: usize,
    marker: PhantomData<&'a mut [T]>,
}

impl<'a, T> ParallelSliceAccess<'a, T> {
    /// Creates an access from an exclusive borrow, so that no other access to the slice can
    /// exist while the parallel access is alive.
    pub fn new(slice: &'a mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Construct a mutable subslice for the given range.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    ///
    /// # Safety
    ///
    /// Multiple threads must not hold subslices with overlapping ranges at the same time,
    /// and a single thread must not hold two overlapping subslices.
    pub unsafe fn subslice_mut(&self, range: Range<usize>) -> &'a mut [T] {
        let Range { start, end } = range;
        assert!(start <= end && end <= self.len, "Subslice range out of bounds");
        std::slice::from_raw_parts_mut(self.ptr.add(start), end - start)
    }
}

impl<'a, T> Clone for ParallelSliceAccess<'a, T> {
    fn clone(&self) -> Self {
        Self {
            ptr: self.ptr,
            len: self.len,
            marker: PhantomData,
        }
    }
}

unsafe impl<'a, T: Send> Sync for ParallelSliceAccess<'a, T> {}
unsafe impl<'a, T: Send> Send for ParallelSliceAccess<'a, T> {}
