/// Resource-level GPU index buffer.
///
/// An IndexBuffer owns one device buffer holding triangle indices. Its
/// residency is decided once per creation:
///
/// - created WITHOUT initial data: host-visible memory, mappable, updated
///   in place by the CPU (dynamic geometry)
/// - created WITH initial data: device-local memory, filled through a
///   transient staging buffer and an immediate copy, never mappable
///
/// With persistent mapping enabled, a mappable buffer uses host-visible
/// memory that is not necessarily coherent: the mapping is kept across
/// `unmap()` calls and each `unmap()` flushes the whole buffer instead.
///
/// # Example
///
/// ```ignore
/// let mut indices = IndexBuffer::new(ctx.clone(), IndexBufferDesc::default().with_name("quad"));
/// indices.create(&[0u16, 1, 2, 2, 3, 0])?;
/// assert!(!indices.is_mappable());
/// ```

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::device::{
    BufferCreateDesc, BufferHandle, BufferResource, BufferUsageFlags, DeviceContext,
    MemoryPropertyFlags, QueueKind,
};
use crate::error::{Error, Result};
use crate::resource::index_type::{IndexFormat, IndexType};
use crate::resource::staging_buffer::StagingBuffer;
use crate::{engine_bail, engine_debug, engine_error, engine_trace};

const SOURCE: &str = "meridian::IndexBuffer";

// ===== INDEX BUFFER DESC =====

/// Creation-independent configuration of an IndexBuffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBufferDesc {
    /// Debug name, attached to the device buffer and used in log messages
    pub name: String,
    /// Keep host mappings alive across `unmap()` and flush explicitly
    ///
    /// Backends may still hand out coherent memory: the Vulkan context only
    /// allocates coherent host-visible memory, so there the flush has no
    /// visible effect.
    pub persistent_mapping: bool,
}

impl Default for IndexBufferDesc {
    fn default() -> Self {
        Self {
            name: "index_buffer".to_string(),
            persistent_mapping: false,
        }
    }
}

impl IndexBufferDesc {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_persistent_mapping(mut self, persistent_mapping: bool) -> Self {
        self.persistent_mapping = persistent_mapping;
        self
    }
}

// ===== INDEX BUFFER STATE =====

/// Lifecycle state of an IndexBuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBufferState {
    /// No device buffer (never created, or destroyed)
    Uninitialized,
    /// Host-visible buffer, not currently mapped
    MappableReady,
    /// Device-local buffer filled at creation
    StagedReady,
    /// Host-visible buffer with a live host mapping
    Mapped,
}

// ===== INDEX BUFFER =====

/// GPU index buffer with host-mappable or staged residency
pub struct IndexBuffer {
    ctx: Arc<dyn DeviceContext>,
    name: String,
    persistent_mapping: bool,
    resource: Option<BufferResource>,
    size: u64,
    stride: u32,
    index_count: u32,
    mappable: bool,
    mapped: Option<NonNull<u8>>,
}

// SAFETY: `mapped` points into device memory owned by `resource`; it is only
// handed out or written through `&mut self`, and the context is Send + Sync.
unsafe impl Send for IndexBuffer {}

impl IndexBuffer {
    /// Create an IndexBuffer bound to a device context, without any device buffer
    ///
    /// # Arguments
    ///
    /// * `ctx` - Device context used for every device operation of this buffer
    /// * `desc` - Debug name and mapping mode
    pub fn new(ctx: Arc<dyn DeviceContext>, desc: IndexBufferDesc) -> Self {
        Self {
            ctx,
            name: desc.name,
            persistent_mapping: desc.persistent_mapping,
            resource: None,
            size: 0,
            stride: 0,
            index_count: 0,
            mappable: false,
            mapped: None,
        }
    }

    // ===== CREATION =====

    /// Create a device-local buffer filled with `indices`
    ///
    /// Any previous buffer is destroyed first. The result is not mappable.
    pub fn create<T: IndexType>(&mut self, indices: &[T]) -> Result<()> {
        let Ok(index_count) = u32::try_from(indices.len()) else {
            self.destroy();
            engine_bail!(SOURCE, UsageViolation =>
                "'{}': {} indices exceed the 32-bit index count", self.name, indices.len());
        };
        let bytes: &[u8] = bytemuck::cast_slice(indices);
        self.create_internal(bytes.len() as u64, Some(bytes), T::FORMAT.size_bytes(), index_count)
    }

    /// Create a host-visible buffer with room for `index_count` indices of type `T`
    ///
    /// Any previous buffer is destroyed first. Contents start zeroed on the
    /// mock device and undefined on real hardware.
    pub fn create_dynamic<T: IndexType>(&mut self, index_count: u32) -> Result<()> {
        let stride = T::FORMAT.size_bytes();
        self.create_internal(u64::from(index_count) * u64::from(stride), None, stride, index_count)
    }

    /// Create the buffer from raw bytes
    ///
    /// # Arguments
    ///
    /// * `size` - Buffer size in bytes, must be non-zero
    /// * `indices` - Initial contents (exactly `size` bytes). `None` selects
    ///   the mappable residency, `Some` the staged one.
    ///
    /// No index format is recorded: `index_format()` returns `None` and
    /// `update()` accepts either element type.
    pub fn create_raw(&mut self, size: u64, indices: Option<&[u8]>) -> Result<()> {
        self.create_internal(size, indices, 0, 0)
    }

    fn create_internal(
        &mut self,
        size: u64,
        indices: Option<&[u8]>,
        stride: u32,
        index_count: u32,
    ) -> Result<()> {
        // Destroy previous buffer
        self.destroy();

        if size == 0 {
            engine_bail!(SOURCE, UsageViolation =>
                "'{}': cannot create a zero-sized index buffer", self.name);
        }
        if let Some(data) = indices {
            if data.len() as u64 != size {
                engine_bail!(SOURCE, UsageViolation =>
                    "'{}': initial data is {} bytes but size is {}", self.name, data.len(), size);
            }
        }

        let resource = match indices {
            None => self.create_mappable(size)?,
            Some(data) => self.create_staged(data)?,
        };

        self.ctx.set_debug_name(resource.buffer, &self.name);

        self.resource = Some(resource);
        self.size = size;
        self.stride = stride;
        self.index_count = index_count;
        self.mappable = indices.is_none();

        engine_debug!(SOURCE, "'{}': created {} bytes ({})", self.name, size,
            if self.mappable { "mappable" } else { "staged" });
        Ok(())
    }

    fn create_mappable(&self, size: u64) -> Result<BufferResource> {
        // Persistent mappings are flushed explicitly, coherency is not requested
        let mut memory_properties = MemoryPropertyFlags::HOST_VISIBLE;
        if !self.persistent_mapping {
            memory_properties |= MemoryPropertyFlags::HOST_COHERENT;
        }

        self.ctx
            .create_buffer(&BufferCreateDesc {
                name: &self.name,
                size,
                usage: BufferUsageFlags::INDEX_BUFFER,
                memory_properties,
                initial_data: None,
            })
            .map_err(|e| {
                engine_error!(SOURCE, "'{}': failed to create host-visible buffer: {}", self.name, e);
                e.reclassify(Error::AllocationFailure)
            })
    }

    fn create_staged(&self, data: &[u8]) -> Result<BufferResource> {
        let staging = StagingBuffer::new(self.ctx.as_ref(), &self.name, data)?;

        let resource = self
            .ctx
            .create_buffer(&BufferCreateDesc {
                name: &self.name,
                size: staging.size(),
                usage: BufferUsageFlags::TRANSFER_DST | BufferUsageFlags::INDEX_BUFFER,
                memory_properties: MemoryPropertyFlags::DEVICE_LOCAL,
                initial_data: None,
            })
            .map_err(|e| {
                engine_error!(SOURCE, "'{}': failed to create device-local buffer: {}", self.name, e);
                e.reclassify(Error::AllocationFailure)
            })?;

        if let Err(err) = staging.copy_to(resource.buffer, QueueKind::Copy) {
            self.ctx.destroy_buffer(resource);
            return Err(err);
        }

        Ok(resource)
    }

    // ===== HOST ACCESS =====

    /// Map the buffer for host writes
    ///
    /// Returns the existing pointer when already mapped. Fails with
    /// `UsageViolation` on staged or uninitialized buffers.
    ///
    /// The pointer is valid for `size()` bytes until `unmap()` (non-persistent
    /// mode) or `destroy()`.
    pub fn map(&mut self) -> Result<NonNull<u8>> {
        let resource = self.mappable_resource()?;

        if let Some(ptr) = self.mapped {
            return Ok(ptr);
        }

        let ptr = self.ctx.map_memory(resource.allocation).map_err(|e| {
            engine_error!(SOURCE, "'{}': map failed: {}", self.name, e);
            e.reclassify(Error::MapFailure)
        })?;
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    /// End a host write session
    ///
    /// Non-persistent: releases the mapping (no-op when not mapped).
    /// Persistent: keeps any mapping and always flushes `[0, size)` so host
    /// writes become visible to the device.
    pub fn unmap(&mut self) -> Result<()> {
        let resource = self.mappable_resource()?;

        if self.persistent_mapping {
            self.ctx
                .flush_mapped_range(resource.allocation, 0, self.size)
                .map_err(|e| {
                    engine_error!(SOURCE, "'{}': flush failed: {}", self.name, e);
                    e.reclassify(Error::FlushFailure)
                })?;
        } else if self.mapped.take().is_some() {
            self.ctx.unmap_memory(resource.allocation);
        }
        Ok(())
    }

    /// Write `indices` starting at index `first_index` (map, copy, unmap)
    pub fn update<T: IndexType>(&mut self, first_index: u32, indices: &[T]) -> Result<()> {
        if self.stride != 0 && self.stride != T::FORMAT.size_bytes() {
            engine_bail!(SOURCE, UsageViolation =>
                "'{}': buffer holds {}-byte indices, got {}-byte indices",
                self.name, self.stride, T::FORMAT.size_bytes());
        }
        let offset = u64::from(first_index) * u64::from(T::FORMAT.size_bytes());
        self.write_bytes(offset, bytemuck::cast_slice(indices))
    }

    /// Write raw bytes at `offset` (map, bounds-checked copy, unmap)
    ///
    /// A mapping opened earlier by the caller stays open. In persistent mode
    /// the write is always flushed.
    pub fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.mappable_resource()?;

        let end = offset.checked_add(bytes.len() as u64);
        if end.map_or(true, |end| end > self.size) {
            engine_bail!(SOURCE, UsageViolation =>
                "'{}': write of {} bytes at offset {} exceeds buffer size {}",
                self.name, bytes.len(), offset, self.size);
        }

        let was_mapped = self.mapped.is_some();
        let ptr = self.map()?;
        // SAFETY: [offset, offset + len) lies within the mapped range checked above
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                ptr.as_ptr().add(offset as usize),
                bytes.len(),
            );
        }
        if was_mapped && !self.persistent_mapping {
            return Ok(());
        }
        self.unmap()
    }

    fn mappable_resource(&self) -> Result<BufferResource> {
        match self.resource {
            Some(resource) if self.mappable => Ok(resource),
            Some(_) => engine_bail!(SOURCE, UsageViolation =>
                "'{}': not mappable, can only be updated via staging", self.name),
            None => engine_bail!(SOURCE, UsageViolation =>
                "'{}': no device buffer, call create first", self.name),
        }
    }

    // ===== DESTRUCTION =====

    /// Release the device buffer
    ///
    /// Waits for all device work first, releases any host mapping, then
    /// destroys the buffer. Safe to call any number of times.
    pub fn destroy(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };

        // Wait in case it's still in use by the device
        if let Err(err) = self.ctx.wait_all_device_work() {
            engine_error!(SOURCE, "'{}': device wait failed before destroy, continuing: {}",
                self.name, err);
        }

        if self.mapped.take().is_some() {
            self.ctx.unmap_memory(resource.allocation);
        }
        self.ctx.destroy_buffer(resource);

        self.size = 0;
        self.stride = 0;
        self.index_count = 0;
        self.mappable = false;

        engine_trace!(SOURCE, "'{}': destroyed", self.name);
    }

    // ===== ACCESSORS =====

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes (0 when no device buffer exists)
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes per index (0 for raw or uninitialized buffers)
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn index_format(&self) -> Option<IndexFormat> {
        IndexFormat::from_stride(self.stride)
    }

    pub fn is_16bit(&self) -> bool {
        self.index_format() == Some(IndexFormat::U16)
    }

    pub fn is_32bit(&self) -> bool {
        self.index_format() == Some(IndexFormat::U32)
    }

    pub fn is_mappable(&self) -> bool {
        self.mappable
    }

    pub fn persistent_mapping(&self) -> bool {
        self.persistent_mapping
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    pub fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped
    }

    /// Device buffer handle, for binding at draw time
    pub fn handle(&self) -> Option<BufferHandle> {
        self.resource.map(|r| r.buffer)
    }

    pub fn state(&self) -> IndexBufferState {
        match (self.resource, self.mappable, self.mapped) {
            (None, _, _) => IndexBufferState::Uninitialized,
            (Some(_), false, _) => IndexBufferState::StagedReady,
            (Some(_), true, Some(_)) => IndexBufferState::Mapped,
            (Some(_), true, None) => IndexBufferState::MappableReady,
        }
    }
}

impl Drop for IndexBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for IndexBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexBuffer")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("size", &self.size)
            .field("stride", &self.stride)
            .field("index_count", &self.index_count)
            .field("persistent_mapping", &self.persistent_mapping)
            .finish()
    }
}

#[cfg(test)]
#[path = "index_buffer_tests.rs"]
mod tests;
