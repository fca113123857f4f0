/// Index element types

use bytemuck::Pod;

/// Width of the indices stored in an index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    /// 16-bit unsigned indices
    U16,
    /// 32-bit unsigned indices
    U32,
}

impl IndexFormat {
    /// Returns size in bytes of one index
    pub fn size_bytes(&self) -> u32 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }

    /// Format whose element size is `stride` bytes
    pub fn from_stride(stride: u32) -> Option<Self> {
        match stride {
            2 => Some(IndexFormat::U16),
            4 => Some(IndexFormat::U32),
            _ => None,
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
}

/// Element type accepted by the typed index-buffer constructors
///
/// Implemented for `u16` and `u32` only.
pub trait IndexType: Pod + sealed::Sealed {
    const FORMAT: IndexFormat;
}

impl IndexType for u16 {
    const FORMAT: IndexFormat = IndexFormat::U16;
}

impl IndexType for u32 {
    const FORMAT: IndexFormat = IndexFormat::U32;
}

#[cfg(test)]
#[path = "index_type_tests.rs"]
mod tests;
