//! Guarded framebuffers ([`FrameBuffer`]) and the compatibility check that
//! gates their creation ([`check_compatibility`]).
//!
//! A framebuffer binds one image view to each attachment slot of a render
//! pass. Vulkan requires, per slot, the same format as the attachment, an
//! image at least as large as the framebuffer, and at least as many layers.
//! None of this is checked by the driver, so [`FrameBuffer::new`] checks it
//! before the native call and reports the first offending position.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;
use crate::guard::{Guarded, ReferenceGuard, StrongReference};
use crate::image::ImageView;
use crate::render_pass::{AttachmentDescription, RenderPass};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramebufferCompatibilityError {
    #[error(
        "Framebuffer dimensions must be non-zero (got {width}x{height}, \
         {layers} layer(s))"
    )]
    InvalidDimensions {
        width: u32,
        height: u32,
        layers: u32,
    },

    #[error(
        "Framebuffer binds {actual} view(s) but the render pass declares \
         {expected} attachment(s)"
    )]
    AttachmentCount {
        expected: usize,
        actual: usize,
    },

    #[error(
        "View {index} has format {actual:?}, attachment expects {expected:?}"
    )]
    Format {
        index: usize,
        expected: vk::Format,
        actual: vk::Format,
    },

    #[error(
        "View {index} image is {available_width}x{available_height}, smaller \
         than the framebuffer's {width}x{height}"
    )]
    Extent {
        index: usize,
        width: u32,
        height: u32,
        available_width: u32,
        available_height: u32,
    },

    #[error(
        "View {index} has {available} layer(s), framebuffer needs {required}"
    )]
    Layers {
        index: usize,
        required: u32,
        available: u32,
    },
}

#[derive(Debug, Error)]
pub enum CreateFramebufferError {
    #[error(transparent)]
    Incompatible(#[from] FramebufferCompatibilityError),

    #[error(
        "View {index} was created on a different device than the render pass"
    )]
    DeviceMismatch { index: usize },

    #[error("Vulkan error creating framebuffer: {0}")]
    Vulkan(vk::Result),
}

// ---------------------------------------------------------------------------
// Compatibility
// ---------------------------------------------------------------------------

/// The parts of an image view a framebuffer cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewInfo {
    pub format: vk::Format,
    /// Extent of the underlying image.
    pub extent: vk::Extent2D,
    pub layer_count: u32,
}

impl ViewInfo {
    pub fn of(view: &ImageView<'_>) -> Self {
        Self {
            format: view.format(),
            extent: view.image().extent(),
            layer_count: view.layer_count(),
        }
    }
}

/// Check `views` against the attachment slots of a render pass for a
/// framebuffer of `extent` x `layers`.
///
/// Views are checked in order. For each one, format, then extent, then layer
/// count; the first failure is returned.
pub fn check_compatibility(
    attachments: &[AttachmentDescription],
    views: &[ViewInfo],
    extent: vk::Extent2D,
    layers: u32,
) -> Result<(), FramebufferCompatibilityError> {
    if extent.width == 0 || extent.height == 0 || layers == 0 {
        return Err(FramebufferCompatibilityError::InvalidDimensions {
            width: extent.width,
            height: extent.height,
            layers,
        });
    }
    if views.len() != attachments.len() {
        return Err(FramebufferCompatibilityError::AttachmentCount {
            expected: attachments.len(),
            actual: views.len(),
        });
    }

    let pairs = views.iter().zip(attachments);
    for (index, (view, attachment)) in pairs.enumerate() {
        if view.format != attachment.format() {
            return Err(FramebufferCompatibilityError::Format {
                index,
                expected: attachment.format(),
                actual: view.format,
            });
        }
        if view.extent.width < extent.width
            || view.extent.height < extent.height
        {
            return Err(FramebufferCompatibilityError::Extent {
                index,
                width: extent.width,
                height: extent.height,
                available_width: view.extent.width,
                available_height: view.extent.height,
            });
        }
        if view.layer_count < layers {
            return Err(FramebufferCompatibilityError::Layers {
                index,
                required: layers,
                available: view.layer_count,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FrameBuffer
// ---------------------------------------------------------------------------

/// A Vulkan framebuffer holding strong references to its render pass and
/// every bound view.
pub struct FrameBuffer<'a> {
    guard: ReferenceGuard,
    parent: Arc<Device>,
    handle: vk::Framebuffer,
    render_pass: StrongReference<'a, RenderPass>,
    views: Vec<StrongReference<'a, ImageView<'a>>>,
    extent: vk::Extent2D,
    layers: u32,
}

impl std::fmt::Debug for FrameBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("handle", &self.handle)
            .field(
                "render_pass",
                &self.render_pass.raw_render_pass(),
            )
            .field("extent", &self.extent)
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

impl<'a> FrameBuffer<'a> {
    pub fn new(
        render_pass: &'a RenderPass,
        views: &[&'a ImageView<'a>],
        extent: vk::Extent2D,
        layers: u32,
        name: Option<&str>,
    ) -> Result<Self, CreateFramebufferError> {
        let infos: Vec<_> = views.iter().map(|v| ViewInfo::of(v)).collect();
        let attachments = render_pass.attachments();
        check_compatibility(attachments, &infos, extent, layers)?;

        let device = render_pass.parent();
        if let Some(index) = views
            .iter()
            .position(|view| !Arc::ptr_eq(view.parent(), device))
        {
            return Err(CreateFramebufferError::DeviceMismatch { index });
        }

        let raw_views: Vec<_> = views
            .iter()
            .map(|view| view.raw_image_view())
            .collect();
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.raw_render_pass())
            .attachments(&raw_views)
            .width(extent.width)
            .height(extent.height)
            .layers(layers);

        // SAFETY: The render pass and every view belong to device, and the
        // views were checked against the render pass above.
        let handle = unsafe { device.create_raw_framebuffer(&create_info) }
            .map_err(CreateFramebufferError::Vulkan)?;

        // SAFETY: handle is a valid framebuffer created from device.
        let name_result = unsafe { device.set_object_name_str(handle, name) };
        if let Err(e) = name_result {
            tracing::warn!("Failed to name framebuffer {:?}: {e}", handle);
        }

        Ok(Self {
            guard: ReferenceGuard::new("FrameBuffer"),
            parent: Arc::clone(device),
            handle,
            render_pass: StrongReference::new(render_pass),
            views: views
                .iter()
                .map(|view| StrongReference::new(*view))
                .collect(),
            extent,
            layers,
        })
    }

    pub fn raw_framebuffer(&self) -> vk::Framebuffer {
        self.handle
    }

    pub fn render_pass(&self) -> &'a RenderPass {
        self.render_pass.get()
    }

    pub fn attachments(
        &self,
    ) -> impl ExactSizeIterator<Item = &'a ImageView<'a>> + '_ {
        self.views.iter().map(StrongReference::get)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    /// Render area covering the whole framebuffer.
    pub fn full_render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }
}

impl Guarded for FrameBuffer<'_> {
    fn reference_guard(&self) -> &ReferenceGuard {
        &self.guard
    }
}

impl Drop for FrameBuffer<'_> {
    fn drop(&mut self) {
        self.guard.check_unreferenced();
        tracing::debug!("Dropping framebuffer {:?}", self.handle);
        // SAFETY: handle was created from parent and is owned by this
        // wrapper. The render pass and views are still alive: their strong
        // references are released only after this body returns.
        unsafe { self.parent.destroy_raw_framebuffer(self.handle) };
    }
}
