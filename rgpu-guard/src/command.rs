//! Command pools ([`CommandPool`]) and command buffers with a checked
//! recording state machine ([`CommandBuffer`]).
//!
//! A command buffer moves `Initial -> Recording -> Executable`, and back to
//! `Initial` through [`reset`](CommandBuffer::reset). Calls made in the wrong
//! state fail with [`RecordError`] naming the call and the state instead of
//! reaching the driver.
//!
//! With the `render-pass-tracking` feature, primary buffers also track the
//! active render pass and subpass: `begin_render_pass` cannot nest,
//! `next_subpass` cannot run past the last subpass, `end_render_pass` needs
//! the last subpass, draws need a pass and copies/dispatches need to be
//! outside one. While a pass is active the buffer holds strong references to
//! its render pass and framebuffer.
//!
//! Draw, copy, dispatch and binding commands stay `unsafe`: their GPU-side
//! arguments (pipelines, buffers, barriers) are not validated here.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;
use crate::framebuffer::FrameBuffer;
use crate::guard::{Guarded, ReferenceGuard, StrongReference};
use crate::render_pass::RenderPass;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateCommandPoolError {
    #[error("Vulkan error creating command pool: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum AllocateCommandBufferError {
    #[error("Vulkan error allocating command buffer: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(
        "{call}() is not allowed while the command buffer is {state}"
    )]
    InvalidState {
        call: &'static str,
        state: RecordingState,
    },

    #[error("{call}() requires a {required:?} command buffer")]
    WrongLevel {
        call: &'static str,
        required: vk::CommandBufferLevel,
    },

    #[error(
        "{call}() called while a render pass is active (subpass {subpass})"
    )]
    RenderPassActive {
        call: &'static str,
        subpass: u32,
    },

    #[error("{call}() called without an active render pass")]
    NoRenderPass { call: &'static str },

    #[error(
        "next_subpass() overflows a render pass with {subpass_count} \
         subpass(es)"
    )]
    SubpassOverflow { subpass_count: u32 },

    #[error(
        "end_render_pass() called in subpass {current} of a render pass with \
         {subpass_count} subpasses"
    )]
    SubpassesRemaining {
        current: u32,
        subpass_count: u32,
    },

    #[error(
        "Subpass {subpass} is out of range for a render pass with \
         {subpass_count} subpass(es)"
    )]
    InvalidSubpass {
        subpass: u32,
        subpass_count: u32,
    },

    #[error(
        "{call}() is not allowed in a subpass recorded with {contents:?} \
         contents"
    )]
    SubpassContents {
        call: &'static str,
        contents: vk::SubpassContents,
    },

    #[error("Framebuffer was created for a different render pass")]
    FramebufferMismatch,

    #[error(
        "Render pass clears {required} attachment(s) but {provided} clear \
         value(s) were given"
    )]
    ClearValueCount {
        required: u32,
        provided: usize,
    },

    #[error(
        "Render area {render_area:?} exceeds the framebuffer extent {extent:?}"
    )]
    RenderAreaOutOfBounds {
        render_area: vk::Rect2D,
        extent: vk::Extent2D,
    },

    #[error(
        "Command buffer {index} passed to execute_commands() is not a \
         secondary buffer"
    )]
    NotSecondary { index: usize },

    #[error(
        "Secondary command buffer {index} is {state}, not executable"
    )]
    SecondaryNotExecutable {
        index: usize,
        state: RecordingState,
    },

    #[error(
        "Secondary command buffer {index} has RENDER_PASS_CONTINUE = \
         {continues}, which does not match the primary's render pass scope"
    )]
    ContinuationMismatch {
        index: usize,
        continues: bool,
    },

    #[error(
        "Secondary command buffer {index} continues subpass {inherited} of \
         another render pass scope than subpass {active} of the active one"
    )]
    InheritanceMismatch {
        index: usize,
        inherited: u32,
        active: u32,
    },

    #[error(
        "reset() requires a pool created with RESET_COMMAND_BUFFER"
    )]
    PoolNotResettable,

    #[error("Vulkan error in {call}(): {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },
}

// ---------------------------------------------------------------------------
// CommandPool
// ---------------------------------------------------------------------------

/// A Vulkan command pool, tracked by a [`ReferenceGuard`].
///
/// Every [`CommandBuffer`] allocated from the pool holds a strong reference
/// to it, so the pool outlives its buffers.
///
/// `CommandPool` is `!Sync`. Vulkan requires external synchronization for
/// allocation and freeing, and confining the pool to one thread at a time
/// provides it.
pub struct CommandPool {
    guard: ReferenceGuard,
    parent: Arc<Device>,
    handle: vk::CommandPool,
    queue_family: u32,
    flags: vk::CommandPoolCreateFlags,
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

impl fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPool")
            .field("handle", &self.handle)
            .field("queue_family", &self.queue_family)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl CommandPool {
    /// Create a command pool for the given queue family.
    ///
    /// Pass `RESET_COMMAND_BUFFER` in `flags` to allow
    /// [`CommandBuffer::reset`]. `name` is an optional debug label; naming
    /// failures are logged and do not fail the call.
    pub fn new(
        device: &Arc<Device>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
        name: Option<&str>,
    ) -> Result<Self, CreateCommandPoolError> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        // SAFETY: create_info uses the caller's queue family for this device.
        let handle = unsafe { device.create_raw_command_pool(&create_info) }
            .map_err(CreateCommandPoolError::Vulkan)?;

        // SAFETY: handle is a valid command pool created from device.
        let name_result = unsafe { device.set_object_name_str(handle, name) };
        if let Err(e) = name_result {
            tracing::warn!("Failed to name command pool {:?}: {e}", handle);
        }

        Ok(Self {
            guard: ReferenceGuard::new("CommandPool"),
            parent: Arc::clone(device),
            handle,
            queue_family,
            flags,
            _not_sync: PhantomData,
        })
    }

    pub fn allocate_primary(
        &self,
        name: Option<&str>,
    ) -> Result<CommandBuffer<'_>, AllocateCommandBufferError> {
        self.allocate(vk::CommandBufferLevel::PRIMARY, name)
    }

    pub fn allocate_secondary(
        &self,
        name: Option<&str>,
    ) -> Result<CommandBuffer<'_>, AllocateCommandBufferError> {
        self.allocate(vk::CommandBufferLevel::SECONDARY, name)
    }

    fn allocate(
        &self,
        level: vk::CommandBufferLevel,
        name: Option<&str>,
    ) -> Result<CommandBuffer<'_>, AllocateCommandBufferError> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.handle)
            .level(level)
            .command_buffer_count(1);

        // SAFETY: info references a valid pool created from parent.
        // CommandPool is !Sync so no concurrent pool access is possible.
        let handle = unsafe { self.parent.allocate_raw_command_buffers(&info) }
            .map_err(AllocateCommandBufferError::Vulkan)?
            .into_iter()
            .next()
            .ok_or(AllocateCommandBufferError::Vulkan(
                vk::Result::ERROR_UNKNOWN,
            ))?;

        // SAFETY: handle is a valid command buffer created from parent.
        let name_result =
            unsafe { self.parent.set_object_name_str(handle, name) };
        if let Err(e) = name_result {
            tracing::warn!("Failed to name command buffer {handle:?}: {e}");
        }

        Ok(CommandBuffer {
            pool: StrongReference::new(self),
            handle,
            level,
            state: RecordingState::Initial,
            inherited: None,
            render_pass: RenderPassTracker::new(),
        })
    }

    pub fn raw_command_pool(&self) -> vk::CommandPool {
        self.handle
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn is_resettable(&self) -> bool {
        self.flags
            .contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }
}

impl Guarded for CommandPool {
    fn reference_guard(&self) -> &ReferenceGuard {
        &self.guard
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.guard.check_unreferenced();
        tracing::debug!("Dropping command pool {:?}", self.handle);
        // SAFETY: handle was created from parent. Every command buffer
        // allocated from it held a strong reference and has been dropped,
        // which freed it.
        unsafe {
            self.parent
                .destroy_raw_command_pool(self.handle)
        };
    }
}

// ---------------------------------------------------------------------------
// Recording state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Initial,
    Recording,
    Executable,
    /// `vkEndCommandBuffer` failed; only `reset` leaves this state.
    Invalid,
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initial => "initial",
            Self::Recording => "recording",
            Self::Executable => "executable",
            Self::Invalid => "invalid",
        })
    }
}

/// Render pass a secondary buffer continues, for
/// [`CommandBuffer::begin_secondary`].
#[derive(Debug, Clone, Copy)]
pub struct SecondaryInheritance<'r> {
    pub render_pass: &'r RenderPass,
    pub subpass: u32,
    /// Optional; naming it lets the driver optimize.
    pub framebuffer: Option<&'r FrameBuffer<'r>>,
}

// ---------------------------------------------------------------------------
// Render pass tracking
// ---------------------------------------------------------------------------

#[cfg(feature = "render-pass-tracking")]
struct ActiveRenderPass<'a> {
    render_pass: StrongReference<'a, RenderPass>,
    _framebuffer: StrongReference<'a, FrameBuffer<'a>>,
    subpass: u32,
    contents: vk::SubpassContents,
}

/// Active render pass and subpass of a primary command buffer.
#[cfg(feature = "render-pass-tracking")]
struct RenderPassTracker<'a> {
    active: Option<ActiveRenderPass<'a>>,
}

#[cfg(feature = "render-pass-tracking")]
impl<'a> RenderPassTracker<'a> {
    fn new() -> Self {
        Self { active: None }
    }

    fn current_subpass(&self) -> Option<u32> {
        self.active.as_ref().map(|a| a.subpass)
    }

    fn ensure_outside(&self, call: &'static str) -> Result<(), RecordError> {
        match &self.active {
            Some(active) => Err(RecordError::RenderPassActive {
                call,
                subpass: active.subpass,
            }),
            None => Ok(()),
        }
    }

    fn ensure_inside(
        &self,
        call: &'static str,
    ) -> Result<&ActiveRenderPass<'a>, RecordError> {
        self.active
            .as_ref()
            .ok_or(RecordError::NoRenderPass { call })
    }

    fn ensure_inline(&self, call: &'static str) -> Result<(), RecordError> {
        let active = self.ensure_inside(call)?;
        if active.contents != vk::SubpassContents::INLINE {
            return Err(RecordError::SubpassContents {
                call,
                contents: active.contents,
            });
        }
        Ok(())
    }

    fn check_secondaries(
        &self,
        secondaries: &[&CommandBuffer<'_>],
    ) -> Result<(), RecordError> {
        let call = "execute_commands";
        if let Some(active) = &self.active
            && active.contents != vk::SubpassContents::SECONDARY_COMMAND_BUFFERS
        {
            return Err(RecordError::SubpassContents {
                call,
                contents: active.contents,
            });
        }
        let Some(active) = &self.active else {
            if let Some(index) = secondaries
                .iter()
                .position(|secondary| secondary.inherited.is_some())
            {
                return Err(RecordError::ContinuationMismatch {
                    index,
                    continues: true,
                });
            }
            return Ok(());
        };
        for (index, secondary) in secondaries.iter().enumerate() {
            let Some(inherited) = &secondary.inherited else {
                return Err(RecordError::ContinuationMismatch {
                    index,
                    continues: false,
                });
            };
            let same_pass = StrongReference::ptr_eq(
                &inherited.render_pass,
                &active.render_pass,
            );
            if !same_pass || inherited.subpass != active.subpass {
                return Err(RecordError::InheritanceMismatch {
                    index,
                    inherited: inherited.subpass,
                    active: active.subpass,
                });
            }
        }
        Ok(())
    }

    fn check_next(&self) -> Result<(), RecordError> {
        let active = self.ensure_inside("next_subpass")?;
        let subpass_count = active.render_pass.subpass_count();
        if active.subpass + 1 >= subpass_count {
            return Err(RecordError::SubpassOverflow { subpass_count });
        }
        Ok(())
    }

    fn check_end(&self) -> Result<(), RecordError> {
        let active = self.ensure_inside("end_render_pass")?;
        let subpass_count = active.render_pass.subpass_count();
        if active.subpass + 1 != subpass_count {
            return Err(RecordError::SubpassesRemaining {
                current: active.subpass,
                subpass_count,
            });
        }
        Ok(())
    }

    fn enter(
        &mut self,
        render_pass: &'a RenderPass,
        framebuffer: &'a FrameBuffer<'a>,
        contents: vk::SubpassContents,
    ) {
        tracing::trace!(
            "Entering render pass {:?} subpass 0",
            render_pass.raw_render_pass()
        );
        self.active = Some(ActiveRenderPass {
            render_pass: StrongReference::new(render_pass),
            _framebuffer: StrongReference::new(framebuffer),
            subpass: 0,
            contents,
        });
    }

    fn advance(&mut self, contents: vk::SubpassContents) {
        if let Some(active) = &mut self.active {
            active.subpass += 1;
            active.contents = contents;
            tracing::trace!(
                "Advancing render pass {:?} to subpass {}",
                active.render_pass.raw_render_pass(),
                active.subpass
            );
        }
    }

    fn leave(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::trace!(
                "Leaving render pass {:?}",
                active.render_pass.raw_render_pass()
            );
        }
    }
}

/// Compiled out: every check passes and nothing is held.
#[cfg(not(feature = "render-pass-tracking"))]
struct RenderPassTracker<'a> {
    _scope: PhantomData<&'a RenderPass>,
}

#[cfg(not(feature = "render-pass-tracking"))]
impl<'a> RenderPassTracker<'a> {
    fn new() -> Self {
        Self {
            _scope: PhantomData,
        }
    }

    fn current_subpass(&self) -> Option<u32> {
        None
    }

    fn ensure_outside(&self, _call: &'static str) -> Result<(), RecordError> {
        Ok(())
    }

    fn ensure_inline(&self, _call: &'static str) -> Result<(), RecordError> {
        Ok(())
    }

    fn check_secondaries(
        &self,
        _secondaries: &[&CommandBuffer<'_>],
    ) -> Result<(), RecordError> {
        Ok(())
    }

    fn check_next(&self) -> Result<(), RecordError> {
        Ok(())
    }

    fn check_end(&self) -> Result<(), RecordError> {
        Ok(())
    }

    fn enter(
        &mut self,
        _render_pass: &'a RenderPass,
        _framebuffer: &'a FrameBuffer<'a>,
        _contents: vk::SubpassContents,
    ) {
    }

    fn advance(&mut self, _contents: vk::SubpassContents) {}

    fn leave(&mut self) {}
}

/// Render pass and subpass a secondary buffer was begun to continue.
struct InheritedScope<'a> {
    render_pass: StrongReference<'a, RenderPass>,
    subpass: u32,
}

// ---------------------------------------------------------------------------
// CommandBuffer
// ---------------------------------------------------------------------------

/// A command buffer allocated from a [`CommandPool`].
///
/// Holds a strong reference to its pool and frees itself on drop. It must
/// not be dropped while pending execution on the GPU.
pub struct CommandBuffer<'a> {
    pool: StrongReference<'a, CommandPool>,
    handle: vk::CommandBuffer,
    level: vk::CommandBufferLevel,
    state: RecordingState,
    inherited: Option<InheritedScope<'a>>,
    render_pass: RenderPassTracker<'a>,
}

impl fmt::Debug for CommandBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("handle", &self.handle)
            .field("level", &self.level)
            .field("state", &self.state)
            .field("subpass", &self.render_pass.current_subpass())
            .finish_non_exhaustive()
    }
}

impl Drop for CommandBuffer<'_> {
    fn drop(&mut self) {
        tracing::debug!("Dropping command buffer {:?}", self.handle);
        // SAFETY: handle was allocated from the pool, which is alive (strong
        // reference) and confined to this thread (!Sync). Callers do not drop
        // buffers that are pending execution.
        unsafe {
            self.pool
                .parent()
                .free_raw_command_buffers(self.pool.raw_command_pool(), &[
                    self.handle,
                ])
        };
    }
}

impl<'a> CommandBuffer<'a> {
    pub fn raw_command_buffer(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn parent(&self) -> &Arc<Device> {
        self.pool.parent()
    }

    pub fn pool(&self) -> &'a CommandPool {
        self.pool.get()
    }

    pub fn level(&self) -> vk::CommandBufferLevel {
        self.level
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Current subpass of the active render pass. Always `None` when
    /// render-pass tracking is compiled out.
    pub fn current_subpass(&self) -> Option<u32> {
        self.render_pass.current_subpass()
    }

    fn is_primary(&self) -> bool {
        self.level == vk::CommandBufferLevel::PRIMARY
    }

    fn require_state(
        &self,
        call: &'static str,
        expected: RecordingState,
    ) -> Result<(), RecordError> {
        if self.state != expected {
            return Err(RecordError::InvalidState {
                call,
                state: self.state,
            });
        }
        Ok(())
    }

    fn require_level(
        &self,
        call: &'static str,
        required: vk::CommandBufferLevel,
    ) -> Result<(), RecordError> {
        if self.level != required {
            return Err(RecordError::WrongLevel { call, required });
        }
        Ok(())
    }

    /// Checks shared by commands that must be recorded inside a subpass.
    fn require_subpass(&self, call: &'static str) -> Result<(), RecordError> {
        self.require_state(call, RecordingState::Recording)?;
        if self.is_primary() {
            self.render_pass.ensure_inline(call)
        } else if self.inherited.is_none() {
            Err(RecordError::NoRenderPass { call })
        } else {
            Ok(())
        }
    }

    /// Checks shared by commands that must be recorded outside render passes.
    fn require_no_subpass(
        &self,
        call: &'static str,
    ) -> Result<(), RecordError> {
        self.require_state(call, RecordingState::Recording)?;
        if self.is_primary() {
            self.render_pass.ensure_outside(call)
        } else if let Some(inherited) = &self.inherited {
            Err(RecordError::RenderPassActive {
                call,
                subpass: inherited.subpass,
            })
        } else {
            Ok(())
        }
    }

    /// Begin recording a primary buffer.
    pub fn begin(
        &mut self,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<(), RecordError> {
        let call = "begin";
        self.require_level(call, vk::CommandBufferLevel::PRIMARY)?;
        self.require_state(call, RecordingState::Initial)?;

        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        // SAFETY: The buffer is in the initial state, so it is neither
        // recording nor pending.
        unsafe {
            self.parent()
                .begin_raw_command_buffer(self.handle, &begin_info)
        }
        .map_err(|result| RecordError::Vulkan { call, result })?;

        self.state = RecordingState::Recording;
        Ok(())
    }

    /// Begin recording a secondary buffer, optionally as a continuation of
    /// one subpass of a render pass.
    ///
    /// An inherited render pass stays strongly referenced until the buffer
    /// is reset or dropped, and [`execute_commands`](Self::execute_commands)
    /// only accepts the buffer inside that render pass and subpass.
    pub fn begin_secondary(
        &mut self,
        flags: vk::CommandBufferUsageFlags,
        inheritance: Option<SecondaryInheritance<'a>>,
    ) -> Result<(), RecordError> {
        let call = "begin_secondary";
        self.require_level(call, vk::CommandBufferLevel::SECONDARY)?;
        self.require_state(call, RecordingState::Initial)?;

        let mut flags = flags;
        let mut inheritance_info = vk::CommandBufferInheritanceInfo::default();
        if let Some(inheritance) = &inheritance {
            let subpass_count = inheritance.render_pass.subpass_count();
            if inheritance.subpass >= subpass_count {
                return Err(RecordError::InvalidSubpass {
                    subpass: inheritance.subpass,
                    subpass_count,
                });
            }
            if let Some(framebuffer) = inheritance.framebuffer {
                let render_pass = framebuffer.render_pass();
                if !std::ptr::eq(render_pass, inheritance.render_pass) {
                    return Err(RecordError::FramebufferMismatch);
                }
                inheritance_info =
                    inheritance_info.framebuffer(framebuffer.raw_framebuffer());
            }
            inheritance_info = inheritance_info
                .render_pass(inheritance.render_pass.raw_render_pass())
                .subpass(inheritance.subpass);
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(flags)
            .inheritance_info(&inheritance_info);
        // SAFETY: The buffer is in the initial state, and any inherited
        // render pass and framebuffer are live objects of this device.
        unsafe {
            self.parent()
                .begin_raw_command_buffer(self.handle, &begin_info)
        }
        .map_err(|result| RecordError::Vulkan { call, result })?;

        self.inherited = inheritance.map(|inheritance| InheritedScope {
            render_pass: StrongReference::new(inheritance.render_pass),
            subpass: inheritance.subpass,
        });
        self.state = RecordingState::Recording;
        Ok(())
    }

    /// End recording. Fails while a render pass is still active.
    ///
    /// If the driver reports an error the buffer becomes
    /// [`RecordingState::Invalid`] and must be reset.
    pub fn end(&mut self) -> Result<(), RecordError> {
        let call = "end";
        self.require_state(call, RecordingState::Recording)?;
        self.render_pass.ensure_outside(call)?;

        // SAFETY: The buffer is recording and outside any render pass.
        let result = unsafe {
            self.parent()
                .end_raw_command_buffer(self.handle)
        };
        match result {
            Ok(()) => {
                self.state = RecordingState::Executable;
                Ok(())
            }
            Err(result) => {
                self.state = RecordingState::Invalid;
                Err(RecordError::Vulkan { call, result })
            }
        }
    }

    /// Return the buffer to the initial state, dropping any render pass
    /// scope.
    ///
    /// # Safety
    /// The buffer must not be pending execution on the GPU.
    pub unsafe fn reset(&mut self) -> Result<(), RecordError> {
        if !self.pool.is_resettable() {
            return Err(RecordError::PoolNotResettable);
        }

        // SAFETY: Caller guarantees the buffer is not pending, and the pool
        // was created with RESET_COMMAND_BUFFER.
        unsafe {
            self.parent().reset_raw_command_buffer(
                self.handle,
                vk::CommandBufferResetFlags::empty(),
            )
        }
        .map_err(|result| RecordError::Vulkan {
            call: "reset",
            result,
        })?;

        self.render_pass.leave();
        self.inherited = None;
        self.state = RecordingState::Initial;
        Ok(())
    }

    /// Begin `render_pass` on `framebuffer`, entering subpass 0.
    ///
    /// `clear_values` must cover every attachment the pass clears.
    ///
    /// Both borrows share the buffer's lifetime, so the render pass and
    /// framebuffer must outlive the command buffer itself, not just the
    /// render pass scope. A buffer reused across frames therefore needs its
    /// framebuffers created before it.
    pub fn begin_render_pass(
        &mut self,
        render_pass: &'a RenderPass,
        framebuffer: &'a FrameBuffer<'a>,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
        contents: vk::SubpassContents,
    ) -> Result<(), RecordError> {
        let call = "begin_render_pass";
        self.require_level(call, vk::CommandBufferLevel::PRIMARY)?;
        self.require_state(call, RecordingState::Recording)?;
        self.render_pass.ensure_outside(call)?;

        if !std::ptr::eq(framebuffer.render_pass(), render_pass) {
            return Err(RecordError::FramebufferMismatch);
        }
        let required = render_pass.info().required_clear_values();
        if clear_values.len() < required as usize {
            return Err(RecordError::ClearValueCount {
                required,
                provided: clear_values.len(),
            });
        }
        let extent = framebuffer.extent();
        let fits = |offset: i32, size: u32, limit: u32| {
            let end = i64::from(offset) + i64::from(size);
            offset >= 0 && end <= i64::from(limit)
        };
        let area = render_area;
        if !fits(area.offset.x, area.extent.width, extent.width)
            || !fits(area.offset.y, area.extent.height, extent.height)
        {
            return Err(RecordError::RenderAreaOutOfBounds {
                render_area,
                extent,
            });
        }

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.raw_render_pass())
            .framebuffer(framebuffer.raw_framebuffer())
            .render_area(render_area)
            .clear_values(clear_values);
        // SAFETY: The buffer is a recording primary buffer outside any render
        // pass, and the framebuffer was created for this render pass.
        unsafe {
            self.parent()
                .cmd_begin_render_pass(self.handle, &begin_info, contents)
        };

        self.render_pass
            .enter(render_pass, framebuffer, contents);
        Ok(())
    }

    /// Advance to the next subpass of the active render pass.
    pub fn next_subpass(
        &mut self,
        contents: vk::SubpassContents,
    ) -> Result<(), RecordError> {
        let call = "next_subpass";
        self.require_level(call, vk::CommandBufferLevel::PRIMARY)?;
        self.require_state(call, RecordingState::Recording)?;
        self.render_pass.check_next()?;

        // SAFETY: The buffer is recording inside a render pass with a
        // following subpass.
        unsafe {
            self.parent()
                .cmd_next_subpass(self.handle, contents)
        };

        self.render_pass.advance(contents);
        Ok(())
    }

    /// End the active render pass. Must be in its last subpass.
    pub fn end_render_pass(&mut self) -> Result<(), RecordError> {
        let call = "end_render_pass";
        self.require_level(call, vk::CommandBufferLevel::PRIMARY)?;
        self.require_state(call, RecordingState::Recording)?;
        self.render_pass.check_end()?;

        // SAFETY: The buffer is recording in the last subpass of a render
        // pass.
        unsafe { self.parent().cmd_end_render_pass(self.handle) };

        self.render_pass.leave();
        Ok(())
    }

    /// Execute executable secondary buffers from this primary buffer.
    ///
    /// Inside a render pass the current subpass must have been begun with
    /// `SECONDARY_COMMAND_BUFFERS` contents and every secondary must continue
    /// exactly that render pass and subpass. Outside a render pass no
    /// secondary may continue one.
    ///
    /// The secondaries are not borrowed past this call. Resetting or
    /// dropping one frees or rewrites the commands the primary refers to, so
    /// they must stay alive and unchanged until the primary has finished
    /// executing or has been reset.
    pub fn execute_commands(
        &mut self,
        secondaries: &[&CommandBuffer<'_>],
    ) -> Result<(), RecordError> {
        let call = "execute_commands";
        self.require_level(call, vk::CommandBufferLevel::PRIMARY)?;
        self.require_state(call, RecordingState::Recording)?;
        for (index, secondary) in secondaries.iter().enumerate() {
            if secondary.level != vk::CommandBufferLevel::SECONDARY {
                return Err(RecordError::NotSecondary { index });
            }
            if secondary.state != RecordingState::Executable {
                return Err(RecordError::SecondaryNotExecutable {
                    index,
                    state: secondary.state,
                });
            }
        }
        self.render_pass.check_secondaries(secondaries)?;

        let raw: Vec<_> = secondaries.iter().map(|s| s.handle).collect();
        // SAFETY: The buffer is a recording primary buffer and every
        // secondary is executable.
        unsafe {
            self.parent()
                .cmd_execute_commands(self.handle, &raw)
        };
        Ok(())
    }

    /// Bind a graphics pipeline for subsequent draw commands.
    ///
    /// # Safety
    /// `pipeline` must be a valid graphics pipeline created from this device.
    pub unsafe fn bind_graphics_pipeline(
        &mut self,
        pipeline: vk::Pipeline,
    ) -> Result<(), RecordError> {
        let call = "bind_graphics_pipeline";
        self.require_state(call, RecordingState::Recording)?;
        // SAFETY: The buffer is recording; caller guarantees pipeline
        // validity.
        unsafe {
            self.parent().cmd_bind_pipeline(
                self.handle,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            )
        };
        Ok(())
    }

    /// Bind a compute pipeline for subsequent dispatches.
    ///
    /// # Safety
    /// `pipeline` must be a valid compute pipeline created from this device.
    pub unsafe fn bind_compute_pipeline(
        &mut self,
        pipeline: vk::Pipeline,
    ) -> Result<(), RecordError> {
        let call = "bind_compute_pipeline";
        self.require_state(call, RecordingState::Recording)?;
        // SAFETY: The buffer is recording; caller guarantees pipeline
        // validity.
        unsafe {
            self.parent().cmd_bind_pipeline(
                self.handle,
                vk::PipelineBindPoint::COMPUTE,
                pipeline,
            )
        };
        Ok(())
    }

    /// # Safety
    /// `buffers` and `offsets` must have equal length. All buffers must be
    /// valid vertex buffers created from this device.
    pub unsafe fn bind_raw_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) -> Result<(), RecordError> {
        self.require_state("bind_vertex_buffers", RecordingState::Recording)?;
        // SAFETY: The buffer is recording; caller guarantees buffer/offset
        // validity.
        unsafe {
            self.parent().cmd_bind_vertex_buffers(
                self.handle,
                first_binding,
                buffers,
                offsets,
            )
        };
        Ok(())
    }

    /// # Safety
    /// `viewports` must be non-empty and within device limits.
    pub unsafe fn set_viewport(
        &mut self,
        viewports: &[vk::Viewport],
    ) -> Result<(), RecordError> {
        self.require_state("set_viewport", RecordingState::Recording)?;
        // SAFETY: The buffer is recording.
        unsafe {
            self.parent()
                .cmd_set_viewport(self.handle, 0, viewports)
        };
        Ok(())
    }

    /// # Safety
    /// `scissors` must be non-empty and within device limits.
    pub unsafe fn set_scissor(
        &mut self,
        scissors: &[vk::Rect2D],
    ) -> Result<(), RecordError> {
        self.require_state("set_scissor", RecordingState::Recording)?;
        // SAFETY: The buffer is recording.
        unsafe {
            self.parent()
                .cmd_set_scissor(self.handle, 0, scissors)
        };
        Ok(())
    }

    /// Record a non-indexed draw.
    ///
    /// # Safety
    /// A compatible graphics pipeline must be bound and all of its dynamic
    /// state set.
    pub unsafe fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), RecordError> {
        self.require_subpass("draw")?;
        // SAFETY: The buffer is recording inside a subpass; caller
        // guarantees pipeline state.
        unsafe {
            self.parent().cmd_draw(
                self.handle,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        };
        Ok(())
    }

    /// Record an indexed draw.
    ///
    /// # Safety
    /// A compatible graphics pipeline and a valid index buffer must be bound
    /// and all dynamic state set.
    pub unsafe fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<(), RecordError> {
        self.require_subpass("draw_indexed")?;
        // SAFETY: The buffer is recording inside a subpass; caller
        // guarantees pipeline and index buffer state.
        unsafe {
            self.parent().cmd_draw_indexed(
                self.handle,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
        Ok(())
    }

    /// # Safety
    /// A compute pipeline must be bound and the group counts must be within
    /// device limits.
    pub unsafe fn dispatch(
        &mut self,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) -> Result<(), RecordError> {
        self.require_no_subpass("dispatch")?;
        // SAFETY: The buffer is recording outside any render pass; caller
        // guarantees pipeline state.
        unsafe {
            self.parent().cmd_dispatch(
                self.handle,
                group_count_x,
                group_count_y,
                group_count_z,
            )
        };
        Ok(())
    }

    /// Record a buffer-to-buffer copy.
    ///
    /// # Safety
    /// Both buffers must be valid handles created from this device with the
    /// matching transfer usage. Regions must be in bounds and must not
    /// overlap within one buffer.
    pub unsafe fn copy_buffer(
        &mut self,
        src_buffer: vk::Buffer,
        dst_buffer: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) -> Result<(), RecordError> {
        self.require_no_subpass("copy_buffer")?;
        // SAFETY: The buffer is recording outside any render pass; caller
        // guarantees buffer and region validity.
        unsafe {
            self.parent().cmd_copy_buffer(
                self.handle,
                src_buffer,
                dst_buffer,
                regions,
            )
        };
        Ok(())
    }

    /// Record a pipeline barrier.
    ///
    /// # Safety
    /// Every barrier must reference valid resources. Inside a render pass
    /// the barrier must match a self-dependency of the current subpass.
    pub unsafe fn pipeline_barrier(
        &mut self,
        src_stage_mask: vk::PipelineStageFlags,
        dst_stage_mask: vk::PipelineStageFlags,
        dependency_flags: vk::DependencyFlags,
        memory_barriers: &[vk::MemoryBarrier<'_>],
        buffer_memory_barriers: &[vk::BufferMemoryBarrier<'_>],
        image_memory_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) -> Result<(), RecordError> {
        self.require_state("pipeline_barrier", RecordingState::Recording)?;
        // SAFETY: The buffer is recording; caller guarantees barrier
        // validity.
        unsafe {
            self.parent().cmd_pipeline_barrier(
                self.handle,
                src_stage_mask,
                dst_stage_mask,
                dependency_flags,
                memory_barriers,
                buffer_memory_barriers,
                image_memory_barriers,
            )
        };
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Auto-trait assertions
// ---------------------------------------------------------------------------

// CommandPool: Send + !Sync (PhantomData<Cell<()>>). Command buffers borrow
// their pool and therefore stay on its thread.
#[allow(dead_code)]
trait AssertSend: Send {}
impl AssertSend for CommandPool {}

#[cfg(test)]
mod tests {
    use ash::vk::{self, Handle};

    use super::*;
    use crate::device::mock::{Call, MockLog, mock_device};
    use crate::image::tests::{fake_image, whole_view};
    use crate::image::{Image, ImageView};
    use crate::render_pass::{
        AttachmentDescription, RenderPassCreateInfo, SubpassDependency,
        SubpassDescription,
    };

    const RGBA8: vk::Format = vk::Format::R8G8B8A8_UNORM;
    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 64,
        height: 64,
    };
    const AREA: vk::Rect2D = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: EXTENT,
    };
    const INLINE: vk::SubpassContents = vk::SubpassContents::INLINE;
    const NO_USAGE: vk::CommandBufferUsageFlags =
        vk::CommandBufferUsageFlags::empty();
    const DEVICE_OOM: vk::Result = vk::Result::ERROR_OUT_OF_DEVICE_MEMORY;
    const HOST_OOM: vk::Result = vk::Result::ERROR_OUT_OF_HOST_MEMORY;

    fn render_pass_info(subpass_count: usize) -> RenderPassCreateInfo {
        let attachments = [AttachmentDescription::new(0, RGBA8)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)];
        let mut subpasses = vec![SubpassDescription::default(); subpass_count];
        for subpass in &mut subpasses {
            subpass.add_color_attachment(
                0,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            );
        }
        let refs: Vec<_> = subpasses.iter().collect();
        let dependencies: Vec<_> = refs
            .windows(2)
            .map(|pair| SubpassDependency::new(Some(pair[0]), Some(pair[1])))
            .collect();
        RenderPassCreateInfo::new(&attachments, &refs, &dependencies).unwrap()
    }

    struct Fixture {
        device: Arc<Device>,
        log: Arc<MockLog>,
        image: Image,
        single: RenderPass,
        double: RenderPass,
        pool: CommandPool,
    }

    impl Fixture {
        fn new() -> Self {
            let flags = vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
            Self::with_pool_flags(flags)
        }

        fn with_pool_flags(flags: vk::CommandPoolCreateFlags) -> Self {
            let (device, log) = mock_device();
            let image = fake_image(&device, 0xAA, RGBA8, 64, 64, 1);
            let single =
                RenderPass::new(&device, render_pass_info(1), None).unwrap();
            let double =
                RenderPass::new(&device, render_pass_info(2), None).unwrap();
            let pool = CommandPool::new(&device, 0, flags, None).unwrap();
            Self {
                device,
                log,
                image,
                single,
                double,
                pool,
            }
        }

        fn view(&self) -> ImageView<'_> {
            whole_view(&self.image)
        }

        fn framebuffer<'a>(
            &'a self,
            render_pass: &'a RenderPass,
            view: &'a ImageView<'a>,
        ) -> FrameBuffer<'a> {
            FrameBuffer::new(render_pass, &[view], EXTENT, 1, None).unwrap()
        }
    }

    fn clear() -> [vk::ClearValue; 1] {
        [vk::ClearValue::default()]
    }

    #[test]
    fn begin_end_transitions() {
        let fx = Fixture::new();
        let mut cmd = fx.pool.allocate_primary(Some("frame")).unwrap();
        assert_eq!(cmd.state(), RecordingState::Initial);

        let usage = vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        cmd.begin(usage).unwrap();
        assert_eq!(cmd.state(), RecordingState::Recording);
        cmd.end().unwrap();
        assert_eq!(cmd.state(), RecordingState::Executable);

        let handle = cmd.raw_command_buffer();
        let calls = fx.log.calls();
        assert!(calls.contains(&Call::Begin(handle)));
        assert!(calls.contains(&Call::End(handle)));
        assert!(calls.contains(&Call::SetName(
            vk::ObjectType::COMMAND_BUFFER,
            "frame".into()
        )));

        drop(cmd);
        assert_eq!(
            fx.log.calls().last(),
            Some(&Call::FreeCommandBuffers(vec![handle]))
        );
    }

    #[test]
    fn double_end_rejected() {
        let fx = Fixture::new();
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();
        cmd.end().unwrap();
        let err = cmd.end().unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidState {
                call: "end",
                state: RecordingState::Executable,
            }
        ));
        assert_eq!(
            err.to_string(),
            "end() is not allowed while the command buffer is executable"
        );
    }

    #[test]
    fn double_begin_rejected() {
        let fx = Fixture::new();
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();
        let err = cmd.begin(NO_USAGE).unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidState {
                call: "begin",
                state: RecordingState::Recording,
            }
        ));
    }

    #[test]
    fn draw_before_begin_rejected() {
        let fx = Fixture::new();
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        fx.log.clear();
        // SAFETY: The mock dispatch records nothing for rejected calls.
        let err = unsafe { cmd.draw(3, 1, 0, 0) }.unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidState {
                call: "draw",
                state: RecordingState::Initial,
            }
        ));
        assert!(fx.log.calls().is_empty());
    }

    #[test]
    fn render_pass_scope_records_and_releases() {
        let fx = Fixture::new();
        let view = fx.view();
        let framebuffer = fx.framebuffer(&fx.double, &view);
        let guard = framebuffer.reference_guard();
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();
        fx.log.clear();

        cmd.begin_render_pass(&fx.double, &framebuffer, AREA, &clear(), INLINE)
            .unwrap();
        #[cfg(feature = "render-pass-tracking")]
        assert_eq!(cmd.current_subpass(), Some(0));
        #[cfg(all(
            feature = "render-pass-tracking",
            feature = "reference-guard"
        ))]
        {
            assert_eq!(fx.double.reference_guard().reference_count(), 2);
            assert_eq!(guard.reference_count(), 1);
        }
        // SAFETY: The mock dispatch needs no pipeline.
        unsafe { cmd.draw(3, 1, 0, 0) }.unwrap();
        cmd.next_subpass(INLINE).unwrap();
        #[cfg(feature = "render-pass-tracking")]
        assert_eq!(cmd.current_subpass(), Some(1));
        // SAFETY: The mock dispatch needs no pipeline or index buffer.
        unsafe { cmd.draw_indexed(6, 1, 0, 0, 0) }.unwrap();
        cmd.end_render_pass().unwrap();
        cmd.end().unwrap();

        assert_eq!(cmd.current_subpass(), None);
        #[cfg(feature = "reference-guard")]
        assert_eq!(fx.double.reference_guard().reference_count(), 1);
        assert_eq!(guard.reference_count(), 0);
        assert_eq!(
            fx.log.calls(),
            vec![
                Call::BeginRenderPass {
                    render_pass: fx.double.raw_render_pass(),
                    framebuffer: framebuffer.raw_framebuffer(),
                    clear_values: 1,
                    contents: INLINE,
                },
                Call::Draw(3),
                Call::NextSubpass(INLINE),
                Call::DrawIndexed(6),
                Call::EndRenderPass,
                Call::End(cmd.raw_command_buffer()),
            ]
        );
    }

    #[cfg(feature = "render-pass-tracking")]
    #[test]
    fn nested_begin_render_pass_rejected() {
        let fx = Fixture::new();
        let view = fx.view();
        let framebuffer = fx.framebuffer(&fx.single, &view);
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();
        cmd.begin_render_pass(&fx.single, &framebuffer, AREA, &clear(), INLINE)
            .unwrap();

        let err = cmd
            .begin_render_pass(&fx.single, &framebuffer, AREA, &clear(), INLINE)
            .unwrap_err();
        assert!(matches!(
            err,
            RecordError::RenderPassActive {
                call: "begin_render_pass",
                subpass: 0,
            }
        ));
        assert_eq!(
            err.to_string(),
            "begin_render_pass() called while a render pass is active \
             (subpass 0)"
        );
        cmd.end_render_pass().unwrap();
    }

    #[cfg(feature = "render-pass-tracking")]
    #[test]
    fn next_subpass_overflow_rejected() {
        let fx = Fixture::new();
        let view = fx.view();
        let single_fb = fx.framebuffer(&fx.single, &view);
        let double_fb = fx.framebuffer(&fx.double, &view);
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();

        cmd.begin_render_pass(&fx.single, &single_fb, AREA, &clear(), INLINE)
            .unwrap();
        let err = cmd.next_subpass(INLINE).unwrap_err();
        assert!(matches!(
            err,
            RecordError::SubpassOverflow {
                subpass_count: 1,
            }
        ));
        cmd.end_render_pass().unwrap();

        cmd.begin_render_pass(&fx.double, &double_fb, AREA, &clear(), INLINE)
            .unwrap();
        cmd.next_subpass(INLINE).unwrap();
        let err = cmd.next_subpass(INLINE).unwrap_err();
        assert!(matches!(
            err,
            RecordError::SubpassOverflow {
                subpass_count: 2,
            }
        ));
        assert_eq!(cmd.current_subpass(), Some(1));
        cmd.end_render_pass().unwrap();
    }

    #[cfg(feature = "render-pass-tracking")]
    #[test]
    fn render_pass_calls_without_pass_rejected() {
        let fx = Fixture::new();
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();

        assert!(matches!(
            cmd.next_subpass(INLINE).unwrap_err(),
            RecordError::NoRenderPass {
                call: "next_subpass",
            }
        ));
        assert!(matches!(
            cmd.end_render_pass().unwrap_err(),
            RecordError::NoRenderPass {
                call: "end_render_pass",
            }
        ));
        // SAFETY: Rejected before reaching the dispatch.
        let err = unsafe { cmd.draw(3, 1, 0, 0) }.unwrap_err();
        assert!(matches!(err, RecordError::NoRenderPass { call: "draw" }));
    }

    #[cfg(feature = "render-pass-tracking")]
    #[test]
    fn end_and_transfers_rejected_inside_pass() {
        let fx = Fixture::new();
        let view = fx.view();
        let framebuffer = fx.framebuffer(&fx.double, &view);
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();
        cmd.begin_render_pass(&fx.double, &framebuffer, AREA, &clear(), INLINE)
            .unwrap();

        assert!(matches!(
            cmd.end().unwrap_err(),
            RecordError::RenderPassActive {
                call: "end",
                subpass: 0,
            }
        ));
        // SAFETY: Rejected before reaching the dispatch.
        let err = unsafe {
            cmd.copy_buffer(
                vk::Buffer::from_raw(1),
                vk::Buffer::from_raw(2),
                &[vk::BufferCopy::default()],
            )
        }
        .unwrap_err();
        assert!(matches!(
            err,
            RecordError::RenderPassActive {
                call: "copy_buffer",
                ..
            }
        ));
        // SAFETY: Rejected before reaching the dispatch.
        let err = unsafe { cmd.dispatch(1, 1, 1) }.unwrap_err();
        assert!(matches!(
            err,
            RecordError::RenderPassActive {
                call: "dispatch",
                ..
            }
        ));

        assert!(matches!(
            cmd.end_render_pass().unwrap_err(),
            RecordError::SubpassesRemaining {
                current: 0,
                subpass_count: 2,
            }
        ));
        cmd.next_subpass(INLINE).unwrap();
        cmd.end_render_pass().unwrap();
        cmd.end().unwrap();
    }

    #[test]
    fn outside_pass_commands_record() {
        let fx = Fixture::new();
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();
        fx.log.clear();

        let compute = vk::Pipeline::from_raw(3);
        // SAFETY: The mock dispatch accepts fake handles.
        unsafe {
            cmd.bind_compute_pipeline(compute).unwrap();
            cmd.dispatch(8, 8, 1).unwrap();
            cmd.pipeline_barrier(
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[vk::MemoryBarrier::default()],
                &[],
                &[],
            )
            .unwrap();
            cmd.copy_buffer(
                vk::Buffer::from_raw(1),
                vk::Buffer::from_raw(2),
                &[vk::BufferCopy::default(); 2],
            )
            .unwrap();
        }
        assert_eq!(
            fx.log.calls(),
            vec![
                Call::BindPipeline(compute),
                Call::Dispatch(8, 8, 1),
                Call::PipelineBarrier,
                Call::CopyBuffer(2),
            ]
        );
    }

    #[test]
    fn state_commands_need_recording_only() {
        let fx = Fixture::new();
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        let viewport = vk::Viewport::default().width(64.0).height(64.0);

        // SAFETY: Rejected before reaching the dispatch.
        let err = unsafe { cmd.set_viewport(&[viewport]) }.unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidState {
                call: "set_viewport",
                state: RecordingState::Initial,
            }
        ));

        cmd.begin(NO_USAGE).unwrap();
        fx.log.clear();
        let graphics = vk::Pipeline::from_raw(5);
        // SAFETY: The mock dispatch accepts fake handles.
        unsafe {
            cmd.bind_graphics_pipeline(graphics).unwrap();
            cmd.bind_raw_vertex_buffers(1, &[vk::Buffer::from_raw(6)], &[0])
                .unwrap();
            cmd.set_viewport(&[viewport]).unwrap();
            cmd.set_scissor(&[AREA, AREA]).unwrap();
        }
        assert_eq!(
            fx.log.calls(),
            vec![
                Call::BindPipeline(graphics),
                Call::BindVertexBuffers(1),
                Call::SetViewport(1),
                Call::SetScissor(2),
            ]
        );
    }

    #[test]
    fn framebuffer_for_other_pass_rejected() {
        let fx = Fixture::new();
        let view = fx.view();
        let framebuffer = fx.framebuffer(&fx.single, &view);
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();

        let err = cmd
            .begin_render_pass(&fx.double, &framebuffer, AREA, &clear(), INLINE)
            .unwrap_err();
        assert!(matches!(err, RecordError::FramebufferMismatch));
        assert_eq!(cmd.current_subpass(), None);
    }

    #[test]
    fn missing_clear_values_rejected() {
        let fx = Fixture::new();
        let view = fx.view();
        let framebuffer = fx.framebuffer(&fx.single, &view);
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();

        let err = cmd
            .begin_render_pass(&fx.single, &framebuffer, AREA, &[], INLINE)
            .unwrap_err();
        assert!(matches!(
            err,
            RecordError::ClearValueCount {
                required: 1,
                provided: 0,
            }
        ));
    }

    #[test]
    fn render_area_must_fit_framebuffer() {
        let fx = Fixture::new();
        let view = fx.view();
        let framebuffer = fx.framebuffer(&fx.single, &view);
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();

        let shifted = vk::Rect2D {
            offset: vk::Offset2D { x: 1, y: 0 },
            extent: EXTENT,
        };
        let err = cmd
            .begin_render_pass(
                &fx.single,
                &framebuffer,
                shifted,
                &clear(),
                INLINE,
            )
            .unwrap_err();
        assert!(matches!(err, RecordError::RenderAreaOutOfBounds { .. }));

        let inner = vk::Rect2D {
            offset: vk::Offset2D { x: 16, y: 16 },
            extent: vk::Extent2D {
                width: 48,
                height: 48,
            },
        };
        cmd.begin_render_pass(
            &fx.single,
            &framebuffer,
            inner,
            &clear(),
            INLINE,
        )
        .unwrap();
        cmd.end_render_pass().unwrap();
    }

    #[test]
    fn reset_returns_to_initial() {
        let fx = Fixture::new();
        let view = fx.view();
        let framebuffer = fx.framebuffer(&fx.single, &view);
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();
        cmd.begin_render_pass(&fx.single, &framebuffer, AREA, &clear(), INLINE)
            .unwrap();

        // SAFETY: Nothing was submitted.
        unsafe { cmd.reset() }.unwrap();
        assert_eq!(cmd.state(), RecordingState::Initial);
        assert_eq!(cmd.current_subpass(), None);
        #[cfg(feature = "reference-guard")]
        assert_eq!(fx.single.reference_guard().reference_count(), 1);
        let guard = framebuffer.reference_guard();
        assert_eq!(guard.reference_count(), 0);

        cmd.begin(NO_USAGE).unwrap();
        cmd.end().unwrap();
    }

    #[test]
    fn reset_requires_resettable_pool() {
        let flags = vk::CommandPoolCreateFlags::TRANSIENT;
        let fx = Fixture::with_pool_flags(flags);
        assert!(!fx.pool.is_resettable());
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();
        // SAFETY: Rejected before reaching the dispatch.
        let err = unsafe { cmd.reset() }.unwrap_err();
        assert!(matches!(err, RecordError::PoolNotResettable));
        assert_eq!(cmd.state(), RecordingState::Recording);
    }

    #[test]
    fn failed_end_invalidates_until_reset() {
        let fx = Fixture::new();
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        cmd.begin(NO_USAGE).unwrap();
        fx.log.fail_next(DEVICE_OOM);
        let err = cmd.end().unwrap_err();
        assert!(matches!(
            err,
            RecordError::Vulkan {
                call: "end",
                result: DEVICE_OOM,
            }
        ));
        assert_eq!(cmd.state(), RecordingState::Invalid);
        assert!(cmd.begin(NO_USAGE).is_err());

        // SAFETY: Nothing was submitted.
        unsafe { cmd.reset() }.unwrap();
        cmd.begin(NO_USAGE).unwrap();
    }

    #[test]
    fn failed_begin_stays_initial() {
        let fx = Fixture::new();
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        fx.log.fail_next(HOST_OOM);
        assert!(cmd.begin(NO_USAGE).is_err());
        assert_eq!(cmd.state(), RecordingState::Initial);
    }

    #[test]
    fn secondary_buffers_execute_inside_pass() {
        let fx = Fixture::new();
        let view = fx.view();
        let framebuffer = fx.framebuffer(&fx.single, &view);

        let mut secondary = fx.pool.allocate_secondary(None).unwrap();
        assert!(matches!(
            secondary.begin(NO_USAGE).unwrap_err(),
            RecordError::WrongLevel {
                call: "begin",
                required: vk::CommandBufferLevel::PRIMARY,
            }
        ));
        secondary
            .begin_secondary(
                vk::CommandBufferUsageFlags::empty(),
                Some(SecondaryInheritance {
                    render_pass: &fx.single,
                    subpass: 0,
                    framebuffer: Some(&framebuffer),
                }),
            )
            .unwrap();
        // SAFETY: The mock dispatch needs no pipeline.
        unsafe { secondary.draw(3, 1, 0, 0) }.unwrap();
        // SAFETY: Rejected before reaching the dispatch.
        let err = unsafe { secondary.dispatch(1, 1, 1) }.unwrap_err();
        assert!(matches!(
            err,
            RecordError::RenderPassActive { subpass: 0, .. }
        ));

        let mut primary = fx.pool.allocate_primary(None).unwrap();
        primary.begin(NO_USAGE).unwrap();
        primary
            .begin_render_pass(
                &fx.single,
                &framebuffer,
                AREA,
                &clear(),
                vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
            )
            .unwrap();

        let err = primary
            .execute_commands(&[&secondary])
            .unwrap_err();
        assert!(matches!(
            err,
            RecordError::SecondaryNotExecutable {
                index: 0,
                state: RecordingState::Recording,
            }
        ));
        secondary.end().unwrap();
        primary.execute_commands(&[&secondary]).unwrap();
        let err = primary
            .execute_commands(&[&primary_like(&fx)])
            .unwrap_err();
        assert!(matches!(err, RecordError::NotSecondary { index: 0 }));
        primary.end_render_pass().unwrap();
        primary.end().unwrap();

        let raw = secondary.raw_command_buffer();
        let executed = Call::ExecuteCommands(vec![raw]);
        assert!(fx.log.calls().contains(&executed));
    }

    fn primary_like(fx: &Fixture) -> CommandBuffer<'_> {
        fx.pool.allocate_primary(None).unwrap()
    }

    #[cfg(feature = "render-pass-tracking")]
    #[test]
    fn secondaries_need_matching_subpass_contents() {
        let fx = Fixture::new();
        let view = fx.view();
        let framebuffer = fx.framebuffer(&fx.single, &view);

        let mut standalone = fx.pool.allocate_secondary(None).unwrap();
        standalone
            .begin_secondary(NO_USAGE, None)
            .unwrap();
        standalone.end().unwrap();

        let mut primary = fx.pool.allocate_primary(None).unwrap();
        primary.begin(NO_USAGE).unwrap();
        primary
            .execute_commands(&[&standalone])
            .unwrap();

        primary
            .begin_render_pass(&fx.single, &framebuffer, AREA, &clear(), INLINE)
            .unwrap();
        let err = primary
            .execute_commands(&[&standalone])
            .unwrap_err();
        assert!(matches!(
            err,
            RecordError::SubpassContents {
                call: "execute_commands",
                ..
            }
        ));
        primary.end_render_pass().unwrap();

        primary
            .begin_render_pass(
                &fx.single,
                &framebuffer,
                AREA,
                &clear(),
                vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
            )
            .unwrap();
        let err = primary
            .execute_commands(&[&standalone])
            .unwrap_err();
        assert!(matches!(
            err,
            RecordError::ContinuationMismatch {
                index: 0,
                continues: false,
            }
        ));
        // SAFETY: Rejected before reaching the dispatch.
        let err = unsafe { primary.draw(3, 1, 0, 0) }.unwrap_err();
        assert!(matches!(
            err,
            RecordError::SubpassContents {
                call: "draw",
                ..
            }
        ));
        primary.end_render_pass().unwrap();
    }

    #[cfg(feature = "render-pass-tracking")]
    fn continuation<'a>(
        fx: &'a Fixture,
        render_pass: &'a RenderPass,
        subpass: u32,
    ) -> CommandBuffer<'a> {
        let mut secondary = fx.pool.allocate_secondary(None).unwrap();
        secondary
            .begin_secondary(
                vk::CommandBufferUsageFlags::empty(),
                Some(SecondaryInheritance {
                    render_pass,
                    subpass,
                    framebuffer: None,
                }),
            )
            .unwrap();
        secondary.end().unwrap();
        secondary
    }

    #[cfg(feature = "render-pass-tracking")]
    #[test]
    fn secondaries_must_continue_the_active_subpass() {
        let fx = Fixture::new();
        let view = fx.view();
        let framebuffer = fx.framebuffer(&fx.double, &view);
        let other_pass = continuation(&fx, &fx.single, 0);
        let first = continuation(&fx, &fx.double, 0);
        let second = continuation(&fx, &fx.double, 1);
        #[cfg(feature = "reference-guard")]
        assert_eq!(fx.single.reference_guard().reference_count(), 1);

        let mut primary = fx.pool.allocate_primary(None).unwrap();
        primary.begin(NO_USAGE).unwrap();
        primary
            .begin_render_pass(
                &fx.double,
                &framebuffer,
                AREA,
                &clear(),
                vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
            )
            .unwrap();

        let err = primary
            .execute_commands(&[&other_pass])
            .unwrap_err();
        assert!(matches!(
            err,
            RecordError::InheritanceMismatch {
                index: 0,
                inherited: 0,
                active: 0,
            }
        ));
        let err = primary
            .execute_commands(&[&first, &second])
            .unwrap_err();
        assert!(matches!(
            err,
            RecordError::InheritanceMismatch {
                index: 1,
                inherited: 1,
                active: 0,
            }
        ));
        primary.execute_commands(&[&first]).unwrap();

        primary
            .next_subpass(vk::SubpassContents::SECONDARY_COMMAND_BUFFERS)
            .unwrap();
        assert!(matches!(
            primary.execute_commands(&[&first]).unwrap_err(),
            RecordError::InheritanceMismatch {
                index: 0,
                inherited: 0,
                active: 1,
            }
        ));
        primary.execute_commands(&[&second]).unwrap();
        primary.end_render_pass().unwrap();
        primary.end().unwrap();

        drop(other_pass);
        assert_eq!(fx.single.reference_guard().reference_count(), 0);
    }

    #[test]
    fn secondary_inheritance_is_checked() {
        let fx = Fixture::new();
        let view = fx.view();
        let framebuffer = fx.framebuffer(&fx.single, &view);
        let mut secondary = fx.pool.allocate_secondary(None).unwrap();

        let err = secondary
            .begin_secondary(
                vk::CommandBufferUsageFlags::empty(),
                Some(SecondaryInheritance {
                    render_pass: &fx.single,
                    subpass: 1,
                    framebuffer: None,
                }),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidSubpass {
                subpass: 1,
                subpass_count: 1,
            }
        ));

        let err = secondary
            .begin_secondary(
                vk::CommandBufferUsageFlags::empty(),
                Some(SecondaryInheritance {
                    render_pass: &fx.double,
                    subpass: 0,
                    framebuffer: Some(&framebuffer),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, RecordError::FramebufferMismatch));
        assert_eq!(secondary.state(), RecordingState::Initial);

        secondary
            .begin_secondary(NO_USAGE, None)
            .unwrap();
        // SAFETY: Rejected before reaching the dispatch.
        let err = unsafe { secondary.draw(3, 1, 0, 0) }.unwrap_err();
        assert!(matches!(err, RecordError::NoRenderPass { call: "draw" }));
    }

    #[test]
    fn buffers_reference_their_pool() {
        let fx = Fixture::new();
        let a = fx.pool.allocate_primary(None).unwrap();
        let b = fx.pool.allocate_secondary(None).unwrap();
        #[cfg(feature = "reference-guard")]
        assert_eq!(fx.pool.reference_guard().reference_count(), 2);
        assert!(std::ptr::eq(a.pool(), &fx.pool));
        drop(a);
        drop(b);
        assert_eq!(fx.pool.reference_guard().reference_count(), 0);
        assert!(Arc::ptr_eq(fx.pool.parent(), &fx.device));
    }

    #[cfg(not(feature = "render-pass-tracking"))]
    #[test]
    fn untracked_buffers_only_check_recording_state() {
        let fx = Fixture::new();
        let mut cmd = fx.pool.allocate_primary(None).unwrap();
        assert!(cmd.next_subpass(INLINE).is_err());
        cmd.begin(NO_USAGE).unwrap();
        cmd.next_subpass(INLINE).unwrap();
        cmd.end_render_pass().unwrap();
        // SAFETY: The mock dispatch needs no pipeline.
        unsafe { cmd.draw(3, 1, 0, 0) }.unwrap();
        assert_eq!(cmd.current_subpass(), None);
        cmd.end().unwrap();
    }
}
