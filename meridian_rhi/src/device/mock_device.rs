/// Mock DeviceContext for unit tests (no GPU required)
///
/// Allocations are plain host memory, immediate copies run on `end_immediate`,
/// every call is journaled and each fallible operation can be told to fail.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::device::{
    AllocationHandle, BufferCreateDesc, BufferHandle, BufferResource, BufferUsageFlags,
    CommandRecording, DeviceContext, MemoryPropertyFlags, QueueKind,
};
use crate::error::Result;
use crate::engine_bail;

// ============================================================================
// Call journal
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreateBuffer {
        buffer: BufferHandle,
        size: u64,
        usage: BufferUsageFlags,
        memory_properties: MemoryPropertyFlags,
        with_data: bool,
    },
    DestroyBuffer(BufferHandle),
    MapMemory(AllocationHandle),
    UnmapMemory(AllocationHandle),
    FlushMappedRange {
        allocation: AllocationHandle,
        offset: u64,
        size: u64,
    },
    WaitAllDeviceWork,
    BeginImmediate(QueueKind),
    RecordBufferCopy {
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    },
    EndImmediate(QueueKind),
    SetDebugName {
        buffer: BufferHandle,
        name: String,
    },
}

// ============================================================================
// Mock state
// ============================================================================

#[derive(Debug)]
struct MockAllocation {
    buffer: BufferHandle,
    memory: Vec<u8>,
    usage: BufferUsageFlags,
    memory_properties: MemoryPropertyFlags,
    mapped: bool,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    allocations: HashMap<u64, MockAllocation>,
    buffer_to_allocation: HashMap<u64, u64>,
    debug_names: HashMap<u64, String>,
    calls: Vec<MockCall>,
    create_attempts: usize,
    fail_create_at: Option<usize>,
    fail_map: bool,
    fail_flush: bool,
    fail_submit: bool,
    recording: Option<(QueueKind, Vec<(BufferHandle, BufferHandle, u64)>)>,
}

/// Mock device context
#[derive(Debug, Default)]
pub struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Failure injection =====

    /// Make the `nth` `create_buffer` call from now on fail (0 = next call)
    pub fn fail_create_buffer_at(&self, nth: usize) {
        let mut state = self.state.lock().unwrap();
        state.fail_create_at = Some(state.create_attempts + nth);
    }

    pub fn fail_map(&self, fail: bool) {
        self.state.lock().unwrap().fail_map = fail;
    }

    pub fn fail_flush(&self, fail: bool) {
        self.state.lock().unwrap().fail_flush = fail;
    }

    pub fn fail_submit(&self, fail: bool) {
        self.state.lock().unwrap().fail_submit = fail;
    }

    // ===== Inspection =====

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn count_calls(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Number of buffers created and not yet destroyed
    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().unwrap().allocations.len()
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let allocation = state.buffer_to_allocation.get(&buffer.as_raw())?;
        state.allocations.get(allocation).map(|a| a.memory.clone())
    }

    pub fn buffer_usage(&self, buffer: BufferHandle) -> Option<BufferUsageFlags> {
        let state = self.state.lock().unwrap();
        let allocation = state.buffer_to_allocation.get(&buffer.as_raw())?;
        state.allocations.get(allocation).map(|a| a.usage)
    }

    pub fn buffer_memory_properties(&self, buffer: BufferHandle) -> Option<MemoryPropertyFlags> {
        let state = self.state.lock().unwrap();
        let allocation = state.buffer_to_allocation.get(&buffer.as_raw())?;
        state.allocations.get(allocation).map(|a| a.memory_properties)
    }

    pub fn debug_name(&self, buffer: BufferHandle) -> Option<String> {
        self.state.lock().unwrap().debug_names.get(&buffer.as_raw()).cloned()
    }

    pub fn is_mapped(&self, allocation: AllocationHandle) -> bool {
        self.state
            .lock()
            .unwrap()
            .allocations
            .get(&allocation.as_raw())
            .map(|a| a.mapped)
            .unwrap_or(false)
    }
}

impl DeviceContext for MockDevice {
    fn create_buffer(&self, desc: &BufferCreateDesc<'_>) -> Result<BufferResource> {
        let mut state = self.state.lock().unwrap();
        let attempt = state.create_attempts;
        state.create_attempts += 1;

        if state.fail_create_at == Some(attempt) {
            state.fail_create_at = None;
            engine_bail!("meridian::mock", AllocationFailure =>
                "create_buffer '{}': injected failure ({} bytes)", desc.name, desc.size);
        }
        if desc.size == 0 {
            engine_bail!("meridian::mock", AllocationFailure =>
                "create_buffer '{}': zero-sized buffer", desc.name);
        }

        let mut memory = vec![0u8; desc.size as usize];
        if let Some(data) = desc.initial_data {
            if !desc.memory_properties.contains(MemoryPropertyFlags::HOST_VISIBLE) {
                engine_bail!("meridian::mock", AllocationFailure =>
                    "create_buffer '{}': initial data requires host-visible memory", desc.name);
            }
            if data.len() as u64 != desc.size {
                engine_bail!("meridian::mock", AllocationFailure =>
                    "create_buffer '{}': initial data is {} bytes, buffer is {}",
                    desc.name, data.len(), desc.size);
            }
            memory.copy_from_slice(data);
        }

        state.next_id += 1;
        let buffer = BufferHandle::from_raw(0x1000 + state.next_id);
        let allocation = AllocationHandle::from_raw(0x2000 + state.next_id);

        state.allocations.insert(allocation.as_raw(), MockAllocation {
            buffer,
            memory,
            usage: desc.usage,
            memory_properties: desc.memory_properties,
            mapped: false,
        });
        state.buffer_to_allocation.insert(buffer.as_raw(), allocation.as_raw());
        state.calls.push(MockCall::CreateBuffer {
            buffer,
            size: desc.size,
            usage: desc.usage,
            memory_properties: desc.memory_properties,
            with_data: desc.initial_data.is_some(),
        });

        Ok(BufferResource { buffer, allocation })
    }

    fn destroy_buffer(&self, resource: BufferResource) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::DestroyBuffer(resource.buffer));
        state.buffer_to_allocation.remove(&resource.buffer.as_raw());
        state.debug_names.remove(&resource.buffer.as_raw());
        let removed = state.allocations.remove(&resource.allocation.as_raw());
        assert!(
            removed.map(|a| a.buffer == resource.buffer).unwrap_or(false),
            "destroy_buffer: unknown or mismatched resource {:?}",
            resource
        );
    }

    fn map_memory(&self, allocation: AllocationHandle) -> Result<NonNull<u8>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::MapMemory(allocation));
        let fail_map = state.fail_map;

        let Some(entry) = state.allocations.get_mut(&allocation.as_raw()) else {
            engine_bail!("meridian::mock", MapFailure => "map_memory: unknown allocation {:?}", allocation);
        };
        if fail_map {
            engine_bail!("meridian::mock", MapFailure => "map_memory: injected failure");
        }
        if !entry.memory_properties.contains(MemoryPropertyFlags::HOST_VISIBLE) {
            engine_bail!("meridian::mock", MapFailure => "map_memory: memory is not host-visible");
        }

        entry.mapped = true;
        NonNull::new(entry.memory.as_mut_ptr())
            .ok_or_else(|| crate::engine_err!("meridian::mock", MapFailure => "map_memory: null memory"))
    }

    fn unmap_memory(&self, allocation: AllocationHandle) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::UnmapMemory(allocation));
        if let Some(entry) = state.allocations.get_mut(&allocation.as_raw()) {
            entry.mapped = false;
        }
    }

    fn flush_mapped_range(&self, allocation: AllocationHandle, offset: u64, size: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::FlushMappedRange { allocation, offset, size });
        if state.fail_flush {
            engine_bail!("meridian::mock", FlushFailure => "flush_mapped_range: injected failure");
        }
        Ok(())
    }

    fn wait_all_device_work(&self) -> Result<()> {
        self.state.lock().unwrap().calls.push(MockCall::WaitAllDeviceWork);
        Ok(())
    }

    fn begin_immediate(&self, queue: QueueKind) -> Result<CommandRecording> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::BeginImmediate(queue));
        if state.recording.is_some() {
            engine_bail!("meridian::mock", "begin_immediate: a recording is already open");
        }
        state.recording = Some((queue, Vec::new()));
        Ok(CommandRecording::new(queue, 0xC0DE))
    }

    fn record_buffer_copy(
        &self,
        _recording: &CommandRecording,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::RecordBufferCopy { src, dst, size });
        if let Some((_, copies)) = state.recording.as_mut() {
            copies.push((src, dst, size));
        }
    }

    fn end_immediate(&self, recording: CommandRecording) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::EndImmediate(recording.queue()));
        let Some((_, copies)) = state.recording.take() else {
            engine_bail!("meridian::mock", "end_immediate: no open recording");
        };
        if state.fail_submit {
            engine_bail!("meridian::mock", "end_immediate: injected submit failure");
        }

        for (src, dst, size) in copies {
            let src_alloc = state.buffer_to_allocation[&src.as_raw()];
            let dst_alloc = state.buffer_to_allocation[&dst.as_raw()];
            let bytes = state.allocations[&src_alloc].memory[..size as usize].to_vec();
            if let Some(entry) = state.allocations.get_mut(&dst_alloc) {
                entry.memory[..size as usize].copy_from_slice(&bytes);
            }
        }
        Ok(())
    }

    fn set_debug_name(&self, buffer: BufferHandle, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::SetDebugName { buffer, name: name.to_string() });
        state.debug_names.insert(buffer.as_raw(), name.to_string());
    }
}

#[cfg(test)]
#[path = "mock_device_tests.rs"]
mod tests;
