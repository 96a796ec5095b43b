use crate::error::{ComponentError, Result};
use std::alloc::{self, Layout};
use std::ptr;

/// An uninitialized, aligned byte buffer. Dropping it frees the memory without touching
/// its contents.
pub(crate) struct RawBuffer {
    ptr: *mut u8,
    layout: Layout,
}

impl RawBuffer {
    pub fn new(size: usize, align: usize) -> Result<RawBuffer> {
        let layout = Layout::from_size_align(size, align).map_err(|_| ComponentError::OutOfMemory {
            what: "instance data",
        })?;

        if layout.size() == 0 {
            return Ok(RawBuffer {
                ptr: layout.align() as *mut u8,
                layout,
            });
        }

        let ptr = unsafe { alloc::alloc(layout) };
        if ptr.is_null() {
            return Err(ComponentError::OutOfMemory {
                what: "instance data",
            });
        }

        Ok(RawBuffer { ptr, layout })
    }

    /// Allocates a buffer for `count` elements of `stride` bytes.
    pub fn with_elements(count: usize, stride: usize, align: usize) -> Result<RawBuffer> {
        let size = count.checked_mul(stride).ok_or(ComponentError::OutOfMemory {
            what: "instance data",
        })?;
        Self::new(size, align)
    }

    #[inline]
    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Copies the first `len` bytes of `other` into `self`.
    pub unsafe fn copy_from(&mut self, other: &RawBuffer, len: usize) {
        debug_assert!(len <= self.size() && len <= other.size());
        ptr::copy_nonoverlapping(other.ptr, self.ptr, len);
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        if self.layout.size() != 0 {
            unsafe { alloc::dealloc(self.ptr, self.layout) };
        }
    }
}

#[test]
fn test_raw_buffer() {
    let mut a = RawBuffer::with_elements(4, 8, 8).unwrap();
    assert_eq!(a.size(), 32);
    assert_eq!(a.ptr() as usize % 8, 0);

    unsafe { ptr::write_bytes(a.ptr(), 0xab, a.size()) };
    let mut b = RawBuffer::with_elements(8, 8, 8).unwrap();
    unsafe { b.copy_from(&a, a.size()) };
    assert_eq!(unsafe { *b.ptr().add(31) }, 0xab);

    let empty = RawBuffer::with_elements(16, 0, 16).unwrap();
    assert_eq!(empty.ptr() as usize % 16, 0);

    assert!(matches!(
        RawBuffer::with_elements(usize::MAX, 2, 1),
        Err(ComponentError::OutOfMemory { .. })
    ));
    a = RawBuffer::new(0, 1).unwrap();
    assert_eq!(a.size(), 0);
}
