//! Logical device seam ([`Device`], [`DeviceDispatch`]).
//!
//! Every wrapper in this crate reaches Vulkan through a [`DeviceDispatch`]:
//! a table of `unsafe` raw operations (create/destroy, command recording,
//! debug naming) that the safe wrappers call after they have validated
//! their own invariants. [`AshDispatch`] implements it on top of an
//! `ash::Device` that is created and destroyed by the application.
//!
//! [`Device`] boxes a dispatch and is shared through `Arc<Device>` by every
//! object created from it, so the dispatch cannot go away while children
//! are alive.

use std::ffi::{CStr, CString};
use std::ops::Deref;

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NameObjectError {
    #[error(
        "Invalid Vulkan object name (contains interior NUL): {0}"
    )]
    InvalidName(std::ffi::NulError),

    #[error("Vulkan error setting object name: {0}")]
    Vulkan(vk::Result),
}

// ---------------------------------------------------------------------------
// DeviceDispatch
// ---------------------------------------------------------------------------

/// Raw device operations used by the safe wrappers.
///
/// Methods mirror the corresponding `vk*` entry points. None of them
/// validate anything; callers uphold the Vulkan valid-usage rules listed in
/// each method's `# Safety` section.
pub trait DeviceDispatch: Send + Sync {
    fn raw_device(&self) -> vk::Device;

    /// # Safety
    /// All pointers reachable from `create_info` must be valid for the
    /// duration of the call and describe a valid render pass.
    unsafe fn create_raw_render_pass(
        &self,
        create_info: &vk::RenderPassCreateInfo<'_>,
    ) -> Result<vk::RenderPass, vk::Result>;

    /// # Safety
    /// `render_pass` must have been created from this device, must not be
    /// destroyed twice, and must not be in use by pending GPU work.
    unsafe fn destroy_raw_render_pass(&self, render_pass: vk::RenderPass);

    /// # Safety
    /// `create_info.render_pass` and every attachment view must be valid
    /// handles created from this device.
    unsafe fn create_raw_framebuffer(
        &self,
        create_info: &vk::FramebufferCreateInfo<'_>,
    ) -> Result<vk::Framebuffer, vk::Result>;

    /// # Safety
    /// `framebuffer` must have been created from this device and must not
    /// be in use by pending GPU work.
    unsafe fn destroy_raw_framebuffer(&self, framebuffer: vk::Framebuffer);

    /// # Safety
    /// `create_info` must describe a valid image for this device.
    unsafe fn create_raw_image(
        &self,
        create_info: &vk::ImageCreateInfo<'_>,
    ) -> Result<vk::Image, vk::Result>;

    /// # Safety
    /// `image` must have been created from this device, all views of it must
    /// be destroyed, and it must not be in use by pending GPU work.
    unsafe fn destroy_raw_image(&self, image: vk::Image);

    /// # Safety
    /// `image` must be a valid image created from this device.
    unsafe fn get_raw_image_memory_requirements(
        &self,
        image: vk::Image,
    ) -> vk::MemoryRequirements;

    /// # Safety
    /// `image` must not be bound yet. `memory` and `offset` must satisfy the
    /// image's memory requirements.
    unsafe fn bind_raw_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result>;

    /// # Safety
    /// `create_info.image` must be a valid image created from this device
    /// and the subresource range must lie within it.
    unsafe fn create_raw_image_view(
        &self,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, vk::Result>;

    /// # Safety
    /// `view` must have been created from this device and no framebuffer or
    /// pending GPU work may still use it.
    unsafe fn destroy_raw_image_view(&self, view: vk::ImageView);

    /// # Safety
    /// `create_info` must name a valid queue family of this device.
    unsafe fn create_raw_command_pool(
        &self,
        create_info: &vk::CommandPoolCreateInfo<'_>,
    ) -> Result<vk::CommandPool, vk::Result>;

    /// # Safety
    /// `pool` must have been created from this device. Every buffer
    /// allocated from it must have finished execution.
    unsafe fn destroy_raw_command_pool(&self, pool: vk::CommandPool);

    /// # Safety
    /// `allocate_info.command_pool` must be a valid pool created from this
    /// device and externally synchronized for the duration of the call.
    unsafe fn allocate_raw_command_buffers(
        &self,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result>;

    /// # Safety
    /// Every buffer must have been allocated from `pool` and none may be
    /// pending execution. `pool` must be externally synchronized.
    unsafe fn free_raw_command_buffers(
        &self,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    );

    /// # Safety
    /// `command_buffer` must not be recording or pending execution, and all
    /// pointers in `begin_info` must be valid for the duration of the call.
    unsafe fn begin_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> Result<(), vk::Result>;

    /// # Safety
    /// `command_buffer` must be recording, outside any render pass.
    unsafe fn end_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result>;

    /// # Safety
    /// `command_buffer` must not be pending execution and its pool must have
    /// been created with `RESET_COMMAND_BUFFER`.
    unsafe fn reset_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> Result<(), vk::Result>;

    /// # Safety
    /// `command_buffer` must be a recording primary buffer outside any
    /// render pass. The framebuffer in `begin_info` must have been created
    /// for a render pass compatible with `begin_info.render_pass`.
    unsafe fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    );

    /// # Safety
    /// `command_buffer` must be recording inside a render pass that has a
    /// subpass after the current one.
    unsafe fn cmd_next_subpass(
        &self,
        command_buffer: vk::CommandBuffer,
        contents: vk::SubpassContents,
    );

    /// # Safety
    /// `command_buffer` must be recording in the last subpass of a render
    /// pass.
    unsafe fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);

    /// # Safety
    /// `command_buffer` must be a recording primary buffer. Every secondary
    /// buffer must be executable and allocated from this device.
    unsafe fn cmd_execute_commands(
        &self,
        command_buffer: vk::CommandBuffer,
        secondaries: &[vk::CommandBuffer],
    );

    /// # Safety
    /// `command_buffer` must be recording. `pipeline` must be a valid
    /// pipeline for `bind_point` created from this device.
    unsafe fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );

    /// # Safety
    /// `command_buffer` must be recording. `buffers` and `offsets` must have
    /// equal length and every buffer must be valid.
    unsafe fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );

    /// # Safety
    /// `command_buffer` must be recording inside a render pass with a
    /// compatible graphics pipeline bound.
    unsafe fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    /// # Safety
    /// Same as [`cmd_draw`](Self::cmd_draw), plus a bound index buffer large
    /// enough for the requested range.
    unsafe fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    /// # Safety
    /// `command_buffer` must be recording outside any render pass with a
    /// compute pipeline bound.
    unsafe fn cmd_dispatch(
        &self,
        command_buffer: vk::CommandBuffer,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    );

    /// # Safety
    /// `command_buffer` must be recording outside any render pass. Both
    /// buffers must be valid and every region in bounds.
    unsafe fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src_buffer: vk::Buffer,
        dst_buffer: vk::Buffer,
        regions: &[vk::BufferCopy],
    );

    /// # Safety
    /// `command_buffer` must be recording. Every barrier must reference
    /// valid resources and stage masks supported by the queue family.
    #[allow(clippy::too_many_arguments)]
    unsafe fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage_mask: vk::PipelineStageFlags,
        dst_stage_mask: vk::PipelineStageFlags,
        dependency_flags: vk::DependencyFlags,
        memory_barriers: &[vk::MemoryBarrier<'_>],
        buffer_memory_barriers: &[vk::BufferMemoryBarrier<'_>],
        image_memory_barriers: &[vk::ImageMemoryBarrier<'_>],
    );

    /// # Safety
    /// `command_buffer` must be recording.
    unsafe fn cmd_set_viewport(
        &self,
        command_buffer: vk::CommandBuffer,
        first_viewport: u32,
        viewports: &[vk::Viewport],
    );

    /// # Safety
    /// `command_buffer` must be recording.
    unsafe fn cmd_set_scissor(
        &self,
        command_buffer: vk::CommandBuffer,
        first_scissor: u32,
        scissors: &[vk::Rect2D],
    );

    /// Attach a debug name to an object. Dispatches without
    /// `VK_EXT_debug_utils` leave the default, which does nothing.
    ///
    /// # Safety
    /// `object_handle` must be a live object of type `object_type` created
    /// from this device.
    unsafe fn set_raw_object_name(
        &self,
        object_type: vk::ObjectType,
        object_handle: u64,
        name: &CStr,
    ) -> Result<(), vk::Result> {
        let _ = (object_type, object_handle, name);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AshDispatch
// ---------------------------------------------------------------------------

/// [`DeviceDispatch`] over an application-owned `ash::Device`.
///
/// Does not destroy the device on drop.
pub struct AshDispatch {
    device: ash::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
}

impl AshDispatch {
    /// # Safety
    /// `device` must outlive this dispatch and every object created through
    /// it. When `debug_utils` is set, `VK_EXT_debug_utils` must be enabled on
    /// `instance`.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: ash::Device,
        debug_utils: bool,
    ) -> Self {
        let debug_utils = debug_utils
            .then(|| ash::ext::debug_utils::Device::new(instance, &device));
        Self {
            device,
            debug_utils,
        }
    }

    pub fn ash_device(&self) -> &ash::Device {
        &self.device
    }
}

impl std::fmt::Debug for AshDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AshDispatch")
            .field("handle", &self.device.handle())
            .field("debug_utils", &self.debug_utils.is_some())
            .finish()
    }
}

impl DeviceDispatch for AshDispatch {
    fn raw_device(&self) -> vk::Device {
        self.device.handle()
    }

    unsafe fn create_raw_render_pass(
        &self,
        create_info: &vk::RenderPassCreateInfo<'_>,
    ) -> Result<vk::RenderPass, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe {
            self.device
                .create_render_pass(create_info, None)
        }
    }

    unsafe fn destroy_raw_render_pass(&self, render_pass: vk::RenderPass) {
        // SAFETY: Caller guarantees provenance and that the pass is idle.
        unsafe {
            self.device
                .destroy_render_pass(render_pass, None)
        };
    }

    unsafe fn create_raw_framebuffer(
        &self,
        create_info: &vk::FramebufferCreateInfo<'_>,
    ) -> Result<vk::Framebuffer, vk::Result> {
        // SAFETY: Caller guarantees render pass and view provenance.
        unsafe {
            self.device
                .create_framebuffer(create_info, None)
        }
    }

    unsafe fn destroy_raw_framebuffer(&self, framebuffer: vk::Framebuffer) {
        // SAFETY: Caller guarantees provenance and that the framebuffer is
        // idle.
        unsafe {
            self.device
                .destroy_framebuffer(framebuffer, None)
        };
    }

    unsafe fn create_raw_image(
        &self,
        create_info: &vk::ImageCreateInfo<'_>,
    ) -> Result<vk::Image, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.device.create_image(create_info, None) }
    }

    unsafe fn destroy_raw_image(&self, image: vk::Image) {
        // SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.device.destroy_image(image, None) };
    }

    unsafe fn get_raw_image_memory_requirements(
        &self,
        image: vk::Image,
    ) -> vk::MemoryRequirements {
        // SAFETY: Caller guarantees image provenance.
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    unsafe fn bind_raw_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the image is unbound and memory fits.
        unsafe {
            self.device
                .bind_image_memory(image, memory, offset)
        }
    }

    unsafe fn create_raw_image_view(
        &self,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, vk::Result> {
        // SAFETY: Caller guarantees image provenance and range validity.
        unsafe { self.device.create_image_view(create_info, None) }
    }

    unsafe fn destroy_raw_image_view(&self, view: vk::ImageView) {
        // SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.device.destroy_image_view(view, None) };
    }

    unsafe fn create_raw_command_pool(
        &self,
        create_info: &vk::CommandPoolCreateInfo<'_>,
    ) -> Result<vk::CommandPool, vk::Result> {
        // SAFETY: Caller guarantees queue family validity.
        unsafe {
            self.device
                .create_command_pool(create_info, None)
        }
    }

    unsafe fn destroy_raw_command_pool(&self, pool: vk::CommandPool) {
        // SAFETY: Caller guarantees provenance and idle buffers.
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    unsafe fn allocate_raw_command_buffers(
        &self,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result> {
        // SAFETY: Caller guarantees pool provenance and synchronization.
        unsafe {
            self.device
                .allocate_command_buffers(allocate_info)
        }
    }

    unsafe fn free_raw_command_buffers(
        &self,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) {
        if command_buffers.is_empty() {
            return;
        }
        // SAFETY: Caller guarantees pool/buffer provenance, idle state and
        // external synchronization on pool.
        unsafe {
            self.device
                .free_command_buffers(pool, command_buffers)
        }
    }

    unsafe fn begin_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees command_buffer state and begin_info
        // validity.
        unsafe {
            self.device
                .begin_command_buffer(command_buffer, begin_info)
        }
    }

    unsafe fn end_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees command_buffer is recording.
        unsafe { self.device.end_command_buffer(command_buffer) }
    }

    unsafe fn reset_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees command_buffer is not pending and the
        // pool flag is set.
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, flags)
        }
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    ) {
        // SAFETY: Caller guarantees recording state and framebuffer
        // compatibility.
        unsafe {
            self.device
                .cmd_begin_render_pass(command_buffer, begin_info, contents)
        }
    }

    unsafe fn cmd_next_subpass(
        &self,
        command_buffer: vk::CommandBuffer,
        contents: vk::SubpassContents,
    ) {
        // SAFETY: Caller guarantees a following subpass exists.
        unsafe {
            self.device
                .cmd_next_subpass(command_buffer, contents)
        }
    }

    unsafe fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        // SAFETY: Caller guarantees the buffer is in the last subpass.
        unsafe { self.device.cmd_end_render_pass(command_buffer) }
    }

    unsafe fn cmd_execute_commands(
        &self,
        command_buffer: vk::CommandBuffer,
        secondaries: &[vk::CommandBuffer],
    ) {
        // SAFETY: Caller guarantees secondaries are executable.
        unsafe {
            self.device
                .cmd_execute_commands(command_buffer, secondaries)
        }
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        // SAFETY: Caller guarantees command_buffer state and pipeline
        // validity.
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, bind_point, pipeline)
        }
    }

    unsafe fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        // SAFETY: Caller guarantees command_buffer state and
        // buffer/offset validity.
        unsafe {
            self.device.cmd_bind_vertex_buffers(
                command_buffer,
                first_binding,
                buffers,
                offsets,
            )
        }
    }

    unsafe fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        // SAFETY: Caller guarantees render pass scope and bound pipeline.
        unsafe {
            self.device.cmd_draw(
                command_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        }
    }

    unsafe fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        // SAFETY: Caller guarantees render pass scope and bound pipeline and
        // index buffer.
        unsafe {
            self.device.cmd_draw_indexed(
                command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    unsafe fn cmd_dispatch(
        &self,
        command_buffer: vk::CommandBuffer,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) {
        // SAFETY: Caller guarantees compute pipeline and no render pass.
        unsafe {
            self.device.cmd_dispatch(
                command_buffer,
                group_count_x,
                group_count_y,
                group_count_z,
            )
        }
    }

    unsafe fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src_buffer: vk::Buffer,
        dst_buffer: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        // SAFETY: Caller guarantees command_buffer state, buffer validity
        // and region bounds.
        unsafe {
            self.device.cmd_copy_buffer(
                command_buffer,
                src_buffer,
                dst_buffer,
                regions,
            )
        }
    }

    unsafe fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage_mask: vk::PipelineStageFlags,
        dst_stage_mask: vk::PipelineStageFlags,
        dependency_flags: vk::DependencyFlags,
        memory_barriers: &[vk::MemoryBarrier<'_>],
        buffer_memory_barriers: &[vk::BufferMemoryBarrier<'_>],
        image_memory_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        // SAFETY: Caller guarantees barrier validity.
        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer,
                src_stage_mask,
                dst_stage_mask,
                dependency_flags,
                memory_barriers,
                buffer_memory_barriers,
                image_memory_barriers,
            )
        }
    }

    unsafe fn cmd_set_viewport(
        &self,
        command_buffer: vk::CommandBuffer,
        first_viewport: u32,
        viewports: &[vk::Viewport],
    ) {
        // SAFETY: Caller guarantees command_buffer is recording.
        unsafe {
            self.device
                .cmd_set_viewport(command_buffer, first_viewport, viewports)
        }
    }

    unsafe fn cmd_set_scissor(
        &self,
        command_buffer: vk::CommandBuffer,
        first_scissor: u32,
        scissors: &[vk::Rect2D],
    ) {
        // SAFETY: Caller guarantees command_buffer is recording.
        unsafe {
            self.device
                .cmd_set_scissor(command_buffer, first_scissor, scissors)
        }
    }

    unsafe fn set_raw_object_name(
        &self,
        object_type: vk::ObjectType,
        object_handle: u64,
        name: &CStr,
    ) -> Result<(), vk::Result> {
        let Some(debug_utils) = self.debug_utils.as_ref() else {
            return Ok(());
        };

        let mut object_name_info =
            vk::DebugUtilsObjectNameInfoEXT::default().object_name(name);
        object_name_info.object_type = object_type;
        object_name_info.object_handle = object_handle;

        // SAFETY: Caller guarantees object provenance and validity.
        unsafe { debug_utils.set_debug_utils_object_name(&object_name_info) }
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// A logical device as seen by the wrappers: a boxed [`DeviceDispatch`].
///
/// Dereferences to the dispatch, so raw operations are called as
/// `device.create_raw_render_pass(..)`.
pub struct Device {
    dispatch: Box<dyn DeviceDispatch>,
}

impl Device {
    pub fn new<D>(dispatch: D) -> Self
    where
        D: DeviceDispatch + 'static,
    {
        Self {
            dispatch: Box::new(dispatch),
        }
    }

    /// Wrap an application-owned `ash::Device`.
    ///
    /// # Safety
    /// Same contract as [`AshDispatch::new`].
    pub unsafe fn from_ash(
        instance: &ash::Instance,
        device: ash::Device,
        debug_utils: bool,
    ) -> Self {
        // SAFETY: Forwarded to the caller.
        Self::new(unsafe { AshDispatch::new(instance, device, debug_utils) })
    }

    /// Convenience helper to set a debug name from UTF-8 text.
    ///
    /// Passing `None` as the name is treated as a no-op.
    ///
    /// # Safety
    /// `object` must be a valid Vulkan handle created from this device and
    /// must remain valid for the duration of the call.
    pub unsafe fn set_object_name_str<H>(
        &self,
        object: H,
        name: Option<&str>,
    ) -> Result<(), NameObjectError>
    where
        H: vk::Handle,
    {
        let Some(name) = name else {
            return Ok(());
        };
        let name = CString::new(name).map_err(NameObjectError::InvalidName)?;

        // SAFETY: Caller guarantees object provenance and validity.
        unsafe {
            self.dispatch
                .set_raw_object_name(H::TYPE, object.as_raw(), &name)
        }
        .map_err(NameObjectError::Vulkan)
    }
}

impl Deref for Device {
    type Target = dyn DeviceDispatch;

    fn deref(&self) -> &Self::Target {
        self.dispatch.as_ref()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.dispatch.raw_device())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Test dispatch
// ---------------------------------------------------------------------------
