/*!
# Meridian RHI - Vulkan Backend

Vulkan implementation of the `DeviceContext` trait from `meridian_rhi`.

This crate uses the Ash library for Vulkan bindings and gpu-allocator for
memory management. The context is headless: it needs no window or surface,
only a Vulkan-capable GPU.

Validation layer support (debug messenger routed to the engine logger) is
compiled in with the `vulkan-validation` feature.
*/

// Vulkan implementation modules
mod vulkan_context;
mod vulkan_conversion;
#[cfg(feature = "vulkan-validation")]
mod debug;

pub use vulkan_context::VulkanDeviceContext;

// Re-export debug utilities
#[cfg(feature = "vulkan-validation")]
pub use debug::{get_validation_stats, print_validation_stats_report, ValidationStats};

// Main meridian namespace module
pub mod meridian {
    pub use crate::vulkan_context::VulkanDeviceContext;
}
