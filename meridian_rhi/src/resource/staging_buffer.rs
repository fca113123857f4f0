/// StagingBuffer - transient upload source for device-local buffers
///
/// Lives only inside a staged creation call. The device buffer is released
/// when the value is dropped.

use crate::device::{
    BufferCreateDesc, BufferHandle, BufferResource, BufferUsageFlags, DeviceContext,
    MemoryPropertyFlags, QueueKind,
};
use crate::error::{Error, Result};
use crate::{engine_error, engine_trace};

const SOURCE: &str = "meridian::StagingBuffer";

pub(crate) struct StagingBuffer<'a> {
    ctx: &'a dyn DeviceContext,
    resource: BufferResource,
    size: u64,
}

impl<'a> StagingBuffer<'a> {
    /// Create a host-visible, coherent transfer source holding `data`
    pub(crate) fn new(ctx: &'a dyn DeviceContext, name: &str, data: &[u8]) -> Result<Self> {
        let size = data.len() as u64;
        let staging_name = format!("{}_staging", name);

        let resource = ctx
            .create_buffer(&BufferCreateDesc {
                name: &staging_name,
                size,
                usage: BufferUsageFlags::TRANSFER_SRC,
                memory_properties: MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
                initial_data: Some(data),
            })
            .map_err(|e| {
                engine_error!(SOURCE, "'{}': failed to create staging buffer ({} bytes): {}", name, size, e);
                e.reclassify(Error::AllocationFailure)
            })?;

        engine_trace!(SOURCE, "'{}': staging buffer created ({} bytes)", staging_name, size);
        Ok(Self { ctx, resource, size })
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Copy the whole staging buffer to the start of `dst` and wait for completion
    ///
    /// If the submission fails the device is drained before returning, so both
    /// buffers can be released by the caller right away.
    pub(crate) fn copy_to(&self, dst: BufferHandle, queue: QueueKind) -> Result<()> {
        if let Err(err) = self
            .ctx
            .copy_buffer_immediate(queue, self.resource.buffer, dst, self.size)
        {
            engine_error!(SOURCE, "Staging copy of {} bytes failed: {}", self.size, err);
            if let Err(wait_err) = self.ctx.wait_all_device_work() {
                engine_error!(SOURCE, "Device wait after failed copy also failed: {}", wait_err);
            }
            return Err(err);
        }
        Ok(())
    }
}

impl Drop for StagingBuffer<'_> {
    fn drop(&mut self) {
        self.ctx.destroy_buffer(self.resource);
        engine_trace!(SOURCE, "Staging buffer released ({} bytes)", self.size);
    }
}

#[cfg(test)]
#[path = "staging_buffer_tests.rs"]
mod tests;
