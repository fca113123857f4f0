/// Device module - the seam between resources and a graphics backend

// Module declarations
pub mod device_context;
pub mod device_config;

// Re-export everything from device_context.rs
pub use device_context::*;
pub use device_config::*;

// Mock device for tests (no GPU required)
#[cfg(test)]
pub mod mock_device;
