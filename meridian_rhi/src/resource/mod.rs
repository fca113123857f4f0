//! Resource module
//!
//! GPU resources built on top of a `DeviceContext`.

mod staging_buffer;
pub mod index_type;
pub mod index_buffer;

pub use index_type::{IndexFormat, IndexType};
pub use index_buffer::{IndexBuffer, IndexBufferDesc, IndexBufferState};
