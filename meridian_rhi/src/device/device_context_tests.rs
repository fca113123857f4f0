//! Unit tests for device_context.rs

use crate::device::mock_device::{MockCall, MockDevice};
use crate::device::{
    AllocationHandle, BufferCreateDesc, BufferHandle, BufferUsageFlags, CommandRecording,
    DeviceContext, MemoryPropertyFlags, QueueKind,
};

// ============================================================================
// FLAG VALUES
// ============================================================================

#[test]
fn test_usage_flags_match_vulkan_bits() {
    // Backends forward these bits unchanged
    assert_eq!(BufferUsageFlags::TRANSFER_SRC.bits(), 0x1);
    assert_eq!(BufferUsageFlags::TRANSFER_DST.bits(), 0x2);
    assert_eq!(BufferUsageFlags::INDEX_BUFFER.bits(), 0x40);
}

#[test]
fn test_memory_property_flags_match_vulkan_bits() {
    assert_eq!(MemoryPropertyFlags::DEVICE_LOCAL.bits(), 0x1);
    assert_eq!(MemoryPropertyFlags::HOST_VISIBLE.bits(), 0x2);
    assert_eq!(MemoryPropertyFlags::HOST_COHERENT.bits(), 0x4);
    assert_eq!(MemoryPropertyFlags::HOST_CACHED.bits(), 0x8);
}

// ============================================================================
// HANDLES
// ============================================================================

#[test]
fn test_handles_keep_raw_value() {
    assert_eq!(BufferHandle::from_raw(0xDEAD).as_raw(), 0xDEAD);
    assert_eq!(AllocationHandle::from_raw(7).as_raw(), 7);
    assert_ne!(BufferHandle::from_raw(1), BufferHandle::from_raw(2));
}

#[test]
fn test_command_recording_accessors() {
    let recording = CommandRecording::new(QueueKind::Copy, 42);
    assert_eq!(recording.queue(), QueueKind::Copy);
    assert_eq!(recording.raw(), 42);
}

// ============================================================================
// PROVIDED METHODS
// ============================================================================

#[test]
fn test_copy_buffer_immediate_call_order() {
    let device = MockDevice::new();
    let src = device
        .create_buffer(&BufferCreateDesc {
            name: "src",
            size: 64,
            usage: BufferUsageFlags::TRANSFER_SRC,
            memory_properties: MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
            initial_data: Some(&[3u8; 64][..]),
        })
        .unwrap();
    let dst = device
        .create_buffer(&BufferCreateDesc {
            name: "dst",
            size: 64,
            usage: BufferUsageFlags::TRANSFER_DST,
            memory_properties: MemoryPropertyFlags::DEVICE_LOCAL,
            initial_data: None,
        })
        .unwrap();
    device.clear_calls();

    device
        .copy_buffer_immediate(QueueKind::Copy, src.buffer, dst.buffer, 64)
        .unwrap();

    assert_eq!(
        device.calls(),
        vec![
            MockCall::BeginImmediate(QueueKind::Copy),
            MockCall::RecordBufferCopy { src: src.buffer, dst: dst.buffer, size: 64 },
            MockCall::EndImmediate(QueueKind::Copy),
        ]
    );
}

#[test]
fn test_device_context_is_object_safe() {
    let device: std::sync::Arc<dyn DeviceContext> = std::sync::Arc::new(MockDevice::new());
    assert!(device.wait_all_device_work().is_ok());
}
