//! Lifetime-guarded Vulkan render passes, framebuffers and command buffers
//! over `ash`.
//!
//! Object hierarchy (each child holds a strong reference to its parent):
//!
//! ```text
//! Device
//! ├── RenderPass ◄────────────┐
//! ├── Image                   │
//! │   └── ImageView ◄──── FrameBuffer
//! └── CommandPool             ▲
//!     └── CommandBuffer ──────┘ (while a render pass is active)
//! ```
//!
//! Every guarded object carries a [`guard::ReferenceGuard`]. Dropping an
//! object while a [`guard::StrongReference`] to it is still alive (one that
//! was leaked, for example through `mem::forget` or an `Rc` cycle) is an
//! irrecoverable error: registered callbacks run and the process aborts.
//!
//! Naming conventions:
//!
//! | Prefix   | Meaning                                   |
//! |----------|-------------------------------------------|
//! | `raw_*`  | Returns or takes the `ash::vk` handle type |
//! | `ash_*`  | Returns the `ash` wrapper object          |
//!
//! Cargo features (both on by default):
//! - `reference-guard`: count strong references. Without it guards and
//!   strong references are zero-sized and every check compiles away.
//! - `render-pass-tracking`: track the active render pass and subpass of
//!   primary command buffers.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod command;
pub mod device;
pub mod framebuffer;
pub mod guard;
pub mod image;
pub mod render_pass;

pub use ash;
