// Aligned transfer buffer for O_DIRECT and SG_IO transfers

use crate::{SalvageError, SalvageResult};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

pub const PAGE_SIZE: usize = 4096;

/// Heap buffer whose start address is a multiple of `alignment`
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    size: usize,
}

impl AlignedBuffer {
    /// Allocate a zeroed buffer; `size` is rounded up to the alignment
    pub fn new(size: usize, alignment: usize) -> SalvageResult<Self> {
        if !alignment.is_power_of_two() {
            return Err(SalvageError::AllocationFailed(format!(
                "alignment {} is not a power of 2",
                alignment
            )));
        }
        if size == 0 {
            return Err(SalvageError::AllocationFailed(
                "zero-sized transfer buffer".to_string(),
            ));
        }

        let aligned_size = (size + alignment - 1) & !(alignment - 1);
        let layout = Layout::from_size_align(aligned_size, alignment)
            .map_err(|e| SalvageError::AllocationFailed(e.to_string()))?;

        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            SalvageError::AllocationFailed(format!("failed to allocate {} bytes", aligned_size))
        })?;

        Ok(Self {
            ptr,
            layout,
            size: aligned_size,
        })
    }

    pub fn page_aligned(size: usize) -> SalvageResult<Self> {
        Self::new(size, PAGE_SIZE)
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    pub fn zero(&mut self) {
        self.as_mut_slice().fill(0);
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

// The buffer owns its allocation exclusively
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}
