/// Conversions between meridian device types and Vulkan / gpu-allocator types

use ash::vk;
use gpu_allocator::MemoryLocation;
use meridian_rhi::meridian::device::{BufferUsageFlags, MemoryPropertyFlags, QueueKind};

/// Convert buffer usage flags to Vulkan usage flags
pub(crate) fn buffer_usage_to_vk(usage: BufferUsageFlags) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsageFlags::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsageFlags::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsageFlags::INDEX_BUFFER) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    flags
}

/// Pick the gpu-allocator memory location for the requested properties
///
/// gpu-allocator only hands out host-coherent memory for host-visible
/// locations, so HOST_COHERENT does not influence the choice.
pub(crate) fn memory_location(properties: MemoryPropertyFlags) -> MemoryLocation {
    if !properties.contains(MemoryPropertyFlags::HOST_VISIBLE) {
        MemoryLocation::GpuOnly
    } else if properties.contains(MemoryPropertyFlags::HOST_CACHED) {
        MemoryLocation::GpuToCpu
    } else {
        MemoryLocation::CpuToGpu
    }
}

/// Align a memory-object offset down to `nonCoherentAtomSize`
///
/// Flushes are issued from the aligned offset with `VK_WHOLE_SIZE`, which is
/// valid for any atom-aligned offset inside a mapped memory object.
pub(crate) fn align_flush_offset(offset: u64, non_coherent_atom_size: u64) -> u64 {
    if non_coherent_atom_size <= 1 {
        return offset;
    }
    offset - offset % non_coherent_atom_size
}

/// Queue family flags a queue of this kind must support
pub(crate) fn queue_kind_flags(kind: QueueKind) -> vk::QueueFlags {
    match kind {
        QueueKind::Graphics => vk::QueueFlags::GRAPHICS,
        QueueKind::Compute => vk::QueueFlags::COMPUTE,
        QueueKind::Copy => vk::QueueFlags::TRANSFER,
    }
}

/// Select a queue family for `kind`
///
/// Prefers a dedicated family (compute without graphics, transfer without
/// graphics or compute) and falls back to any family supporting the kind.
/// Graphics and compute families implicitly support transfers.
pub(crate) fn select_queue_family(families: &[vk::QueueFamilyProperties], kind: QueueKind) -> Option<u32> {
    let supports = |flags: vk::QueueFlags| match kind {
        QueueKind::Copy => flags.intersects(
            vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        ),
        _ => flags.contains(queue_kind_flags(kind)),
    };
    let dedicated = |flags: vk::QueueFlags| match kind {
        QueueKind::Graphics => true,
        QueueKind::Compute => !flags.contains(vk::QueueFlags::GRAPHICS),
        QueueKind::Copy => !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
    };

    let usable = |(_, family): &(usize, &vk::QueueFamilyProperties)| {
        family.queue_count > 0 && supports(family.queue_flags)
    };

    families
        .iter()
        .enumerate()
        .filter(usable)
        .find(|(_, family)| dedicated(family.queue_flags))
        .or_else(|| families.iter().enumerate().find(usable))
        .map(|(index, _)| index as u32)
}

#[cfg(test)]
#[path = "vulkan_conversion_tests.rs"]
mod tests;
