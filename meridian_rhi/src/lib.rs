/*!
# Meridian RHI

Core types of the Meridian render hardware interface.

This crate holds the backend-agnostic side of GPU resource management:
resources (such as `IndexBuffer`) talk to the GPU exclusively through the
`DeviceContext` trait, which backends (e.g. `meridian_rhi_vulkan`) implement.

## Architecture

- **DeviceContext**: buffer allocation, host mapping, immediate copies, device waits
- **IndexBuffer**: index storage with host-mappable or staged residency
- **Engine**: process-wide logging facade used by every crate of the workspace
*/

// Internal modules
mod error;
mod engine;
pub mod log;
pub mod device;
pub mod resource;

// Main meridian namespace module
pub mod meridian {
    // Error types
    pub use crate::error::{Error, Result};

    // Logging facade
    pub use crate::engine::Engine;

    // Logging sub-module (types only, macros live at the crate root)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
    }

    // Device sub-module
    pub mod device {
        pub use crate::device::*;
    }

    // Resource sub-module
    pub mod resource {
        pub use crate::resource::*;
    }
}
