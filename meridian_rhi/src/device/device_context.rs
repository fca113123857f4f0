/// DeviceContext trait and the opaque types crossing it
///
/// Resources never talk to a graphics API directly. Everything they need
/// from the device (allocation, mapping, cache maintenance, immediate copies,
/// synchronization and debug naming) goes through this trait, which is
/// implemented by backends (e.g. the Vulkan device context) and by the mock
/// device used in unit tests.

use std::ptr::NonNull;
use bitflags::bitflags;
use crate::error::Result;

// ============================================================================
// Handles
// ============================================================================

/// Opaque device buffer handle
///
/// The value is backend-defined; resources only store and hand it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(u64);

impl BufferHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Opaque memory allocation handle, tied 1:1 to a `BufferHandle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationHandle(u64);

impl AllocationHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// A buffer together with its backing allocation
///
/// Produced by `DeviceContext::create_buffer` and released as a unit by
/// `DeviceContext::destroy_buffer`, so one handle never outlives the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferResource {
    pub buffer: BufferHandle,
    pub allocation: AllocationHandle,
}

// ============================================================================
// Flags
// ============================================================================

bitflags! {
    /// Buffer usage flags (bit values match Vulkan's VkBufferUsageFlagBits)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsageFlags: u32 {
        /// Source of a transfer (staging)
        const TRANSFER_SRC = 0x0000_0001;
        /// Destination of a transfer
        const TRANSFER_DST = 0x0000_0002;
        /// Bindable as an index buffer
        const INDEX_BUFFER = 0x0000_0040;
    }
}

bitflags! {
    /// Memory property flags (bit values match Vulkan's VkMemoryPropertyFlagBits)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryPropertyFlags: u32 {
        /// Fastest for the device, not necessarily visible to the host
        const DEVICE_LOCAL = 0x0000_0001;
        /// Can be mapped by the host
        const HOST_VISIBLE = 0x0000_0002;
        /// Host writes are visible to the device without an explicit flush
        const HOST_COHERENT = 0x0000_0004;
        /// Cached on the host side
        const HOST_CACHED = 0x0000_0008;
    }
}

/// Queue family a piece of immediate work is submitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    /// Transfer-capable queue (dedicated when the device exposes one)
    Copy,
}

// ============================================================================
// Descriptors
// ============================================================================

/// Descriptor for creating a buffer
#[derive(Debug, Clone, Copy)]
pub struct BufferCreateDesc<'a> {
    /// Allocation name (diagnostics only)
    pub name: &'a str,
    /// Size in bytes
    pub size: u64,
    /// Buffer usage
    pub usage: BufferUsageFlags,
    /// Required memory properties
    pub memory_properties: MemoryPropertyFlags,
    /// Bytes written into the buffer at creation; requires HOST_VISIBLE memory
    /// and must be exactly `size` bytes long
    pub initial_data: Option<&'a [u8]>,
}

/// An open immediate command recording
///
/// Returned by `DeviceContext::begin_immediate` and consumed by
/// `DeviceContext::end_immediate`. `raw` is backend-defined (the Vulkan
/// backend stores the command buffer handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRecording {
    queue: QueueKind,
    raw: u64,
}

impl CommandRecording {
    pub fn new(queue: QueueKind, raw: u64) -> Self {
        Self { queue, raw }
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }
}

// ============================================================================
// DeviceContext trait
// ============================================================================

/// Device context
///
/// Owns the physical allocator and the device queues. Shared between
/// resources as `Arc<dyn DeviceContext>` and must outlive every resource
/// created from it.
pub trait DeviceContext: Send + Sync {
    /// Create a buffer and its backing allocation
    ///
    /// On failure nothing is left allocated.
    fn create_buffer(&self, desc: &BufferCreateDesc<'_>) -> Result<BufferResource>;

    /// Destroy a buffer and free its allocation
    ///
    /// The caller guarantees no submitted device work still references it.
    fn destroy_buffer(&self, resource: BufferResource);

    /// Map an allocation into host address space
    fn map_memory(&self, allocation: AllocationHandle) -> Result<NonNull<u8>>;

    /// Release a host mapping obtained with `map_memory`
    fn unmap_memory(&self, allocation: AllocationHandle);

    /// Make host writes in `[offset, offset + size)` visible to the device
    fn flush_mapped_range(&self, allocation: AllocationHandle, offset: u64, size: u64) -> Result<()>;

    /// Block until every queue of the device is idle
    fn wait_all_device_work(&self) -> Result<()>;

    /// Open a short-lived command recording on `queue`
    fn begin_immediate(&self, queue: QueueKind) -> Result<CommandRecording>;

    /// Record a copy of `size` bytes from the start of `src` to the start of `dst`
    fn record_buffer_copy(
        &self,
        recording: &CommandRecording,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    );

    /// Submit the recording and block until the device completed it
    fn end_immediate(&self, recording: CommandRecording) -> Result<()>;

    /// Attach a debug-visible name to a buffer
    fn set_debug_name(&self, buffer: BufferHandle, name: &str);

    /// Copy `size` bytes from `src` to `dst` and wait for completion
    ///
    /// Once this returns `Ok`, `dst` holds the data and `src` may be destroyed.
    fn copy_buffer_immediate(
        &self,
        queue: QueueKind,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) -> Result<()> {
        let recording = self.begin_immediate(queue)?;
        self.record_buffer_copy(&recording, src, dst, size);
        self.end_immediate(recording)
    }
}

#[cfg(test)]
#[path = "device_context_tests.rs"]
mod tests;
