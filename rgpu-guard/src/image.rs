//! Guarded image types: [`Image`] and [`ImageView`].
//!
//! [`Image`] wraps a 2-D `VkImage` (optionally layered) with the metadata the
//! framebuffer checks need: format, extent and layer count. Memory is held as
//! an opaque [`ImageMemory`] released after the image is destroyed.
//! [`Image::allocate`] creates and binds memory through `gpu-allocator`;
//! [`Image::from_raw`] wraps an image owned elsewhere, such as a swapchain
//! image, and never destroys it.
//!
//! [`ImageView`] holds a [`StrongReference`] to its image, so an image with
//! live views cannot be dropped.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::{
    AllocationError, MemoryLocation,
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
};
use thiserror::Error;

use crate::device::Device;
use crate::guard::{Guarded, ReferenceGuard, StrongReference};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateImageError {
    #[error("Vulkan error creating image: {0}")]
    CreateImage(vk::Result),

    #[error("GPU allocator error allocating memory: {0}")]
    AllocateMemory(AllocationError),

    #[error("GPU allocator mutex was poisoned")]
    AllocatorPoisoned,

    #[error("Vulkan error binding image memory: {0}")]
    BindMemory(vk::Result),

    #[error(
        "Image dimensions must be non-zero (got {width}x{height}, {layers} \
         layer(s))"
    )]
    InvalidDimensions {
        width: u32,
        height: u32,
        layers: u32,
    },
}

#[derive(Debug, Error)]
pub enum CreateImageViewError {
    #[error("Vulkan error creating image view: {0}")]
    Vulkan(vk::Result),

    #[error(
        "View of {count} layer(s) starting at {base} does not fit the \
         image's {available} layer(s)"
    )]
    LayerRange {
        base: u32,
        count: u32,
        available: u32,
    },
}

// ---------------------------------------------------------------------------
// Format classification
// ---------------------------------------------------------------------------

/// Aspects carried by `format`: `DEPTH` and/or `STENCIL` for depth/stencil
/// formats, `COLOR` for everything else except `UNDEFINED`.
pub fn format_aspects(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::UNDEFINED => vk::ImageAspectFlags::empty(),
        vk::Format::D16_UNORM
        | vk::Format::X8_D24_UNORM_PACK32
        | vk::Format::D32_SFLOAT => vk::ImageAspectFlags::DEPTH,
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

// ---------------------------------------------------------------------------
// Image memory
// ---------------------------------------------------------------------------

/// Backing memory owned by an [`Image`]; released when dropped, after the
/// image handle has been destroyed.
pub trait ImageMemory: Send + Sync + std::fmt::Debug {}

/// A `gpu-allocator` allocation returned to its allocator on drop.
pub struct AllocatorMemory {
    allocator: Arc<Mutex<Allocator>>,
    allocation: Option<Allocation>,
}

impl std::fmt::Debug for AllocatorMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocatorMemory")
            .field("allocation", &self.allocation)
            .finish_non_exhaustive()
    }
}

impl ImageMemory for AllocatorMemory {}

impl Drop for AllocatorMemory {
    fn drop(&mut self) {
        let Some(allocation) = self.allocation.take() else {
            return;
        };
        match self.allocator.lock() {
            Ok(mut allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    tracing::error!("Failed to free GPU image allocation: {e}");
                }
            }
            Err(_) => {
                tracing::error!(
                    "GPU allocator mutex poisoned; leaking image allocation"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

/// Parameters for [`Image::allocate`].
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
}

impl ImageDesc {
    /// Single-layer, single-sample image.
    pub fn new(
        format: vk::Format,
        width: u32,
        height: u32,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            format,
            extent: vk::Extent2D { width, height },
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage,
        }
    }

    pub fn array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }
}

/// A 2-D Vulkan image tracked by a [`ReferenceGuard`].
pub struct Image {
    guard: ReferenceGuard,
    parent: Arc<Device>,
    handle: vk::Image,
    desc: ImageDesc,
    owned: bool,
    // Dropped after `handle` is destroyed in `Drop::drop`.
    memory: Option<Box<dyn ImageMemory>>,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("handle", &self.handle)
            .field("format", &self.desc.format)
            .field("extent", &self.desc.extent)
            .field("array_layers", &self.desc.array_layers)
            .field("owned", &self.owned)
            .finish_non_exhaustive()
    }
}

impl Image {
    /// Create an image and bind freshly allocated `GpuOnly` memory to it.
    pub fn allocate(
        device: &Arc<Device>,
        allocator: &Arc<Mutex<Allocator>>,
        desc: &ImageDesc,
        name: Option<&str>,
    ) -> Result<Self, CreateImageError> {
        check_dimensions(desc)?;

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(desc.array_layers)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        // SAFETY: create_info is fully initialised and has no borrowed data.
        let handle = unsafe { device.create_raw_image(&create_info) }
            .map_err(CreateImageError::CreateImage)?;

        // SAFETY: handle is a valid image created from device.
        let name_result = unsafe { device.set_object_name_str(handle, name) };
        if let Err(e) = name_result {
            tracing::warn!("Failed to name image {:?}: {e}", handle);
        }

        // SAFETY: handle is a valid image created from this device.
        let requirements =
            unsafe { device.get_raw_image_memory_requirements(handle) };
        let allocation = allocator
            .lock()
            .map_err(|_| CreateImageError::AllocatorPoisoned)
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: name.unwrap_or("image"),
                        requirements,
                        location: MemoryLocation::GpuOnly,
                        linear: false,
                        allocation_scheme:
                            AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(CreateImageError::AllocateMemory)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: handle was created from this device and is not
                // bound to memory yet.
                unsafe { device.destroy_raw_image(handle) };
                return Err(e);
            }
        };

        // From here the allocation is returned to the allocator on any exit.
        let memory = AllocatorMemory {
            allocator: Arc::clone(allocator),
            allocation: Some(allocation),
        };

        let bind_result = match memory.allocation.as_ref() {
            // SAFETY: handle and the allocation's memory are valid and
            // belong to this device.
            Some(allocation) => unsafe {
                device.bind_raw_image_memory(
                    handle,
                    allocation.memory(),
                    allocation.offset(),
                )
            },
            None => Ok(()),
        };
        if let Err(e) = bind_result {
            drop(memory);
            // SAFETY: handle is valid and owned by this scope.
            unsafe { device.destroy_raw_image(handle) };
            return Err(CreateImageError::BindMemory(e));
        }

        Ok(Self {
            guard: ReferenceGuard::new("Image"),
            parent: Arc::clone(device),
            handle,
            desc: *desc,
            owned: true,
            memory: Some(Box::new(memory)),
        })
    }

    /// Wrap an image created and destroyed elsewhere.
    ///
    /// # Safety
    /// `handle` must be a valid image created from `device` whose format,
    /// extent, layer count and sample count match `desc`, and it must
    /// outlive the returned wrapper.
    pub unsafe fn from_raw(
        device: &Arc<Device>,
        handle: vk::Image,
        desc: &ImageDesc,
    ) -> Self {
        Self {
            guard: ReferenceGuard::new("Image"),
            parent: Arc::clone(device),
            handle,
            desc: *desc,
            owned: false,
            memory: None,
        }
    }

    /// Take ownership of an image and its backing memory.
    ///
    /// # Safety
    /// `handle` must be a valid image created from `device`, bound to
    /// `memory`, matching `desc`, and not owned by anything else.
    pub unsafe fn from_raw_owned(
        device: &Arc<Device>,
        handle: vk::Image,
        desc: &ImageDesc,
        memory: Box<dyn ImageMemory>,
    ) -> Self {
        Self {
            guard: ReferenceGuard::new("Image"),
            parent: Arc::clone(device),
            handle,
            desc: *desc,
            owned: true,
            memory: Some(memory),
        }
    }

    pub fn raw_image(&self) -> vk::Image {
        self.handle
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }

    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    pub fn array_layers(&self) -> u32 {
        self.desc.array_layers
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.desc.samples
    }

    pub fn memory(&self) -> Option<&dyn ImageMemory> {
        self.memory.as_deref()
    }
}

impl Guarded for Image {
    fn reference_guard(&self) -> &ReferenceGuard {
        &self.guard
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.guard.check_unreferenced();
        if !self.owned {
            return;
        }
        tracing::debug!("Dropping image {:?}", self.handle);
        // SAFETY: handle was created from parent, is owned by this wrapper,
        // and the guard shows no view still references it.
        unsafe { self.parent.destroy_raw_image(self.handle) };
    }
}

fn check_dimensions(desc: &ImageDesc) -> Result<(), CreateImageError> {
    if desc.extent.width == 0
        || desc.extent.height == 0
        || desc.array_layers == 0
    {
        return Err(CreateImageError::InvalidDimensions {
            width: desc.extent.width,
            height: desc.extent.height,
            layers: desc.array_layers,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ImageView
// ---------------------------------------------------------------------------

/// Parameters for [`ImageView::new`].
#[derive(Debug, Clone, Copy)]
pub struct ImageViewDesc {
    pub view_type: vk::ImageViewType,
    /// `None` reuses the image's format.
    pub format: Option<vk::Format>,
    pub aspect_mask: vk::ImageAspectFlags,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl ImageViewDesc {
    /// A view of every layer of `image` with aspects derived from its
    /// format.
    pub fn whole(image: &Image) -> Self {
        let layers = image.array_layers();
        Self {
            view_type: if layers > 1 {
                vk::ImageViewType::TYPE_2D_ARRAY
            } else {
                vk::ImageViewType::TYPE_2D
            },
            format: None,
            aspect_mask: format_aspects(image.format()),
            base_array_layer: 0,
            layer_count: layers,
        }
    }

    pub fn layers(mut self, base_array_layer: u32, layer_count: u32) -> Self {
        self.base_array_layer = base_array_layer;
        self.layer_count = layer_count;
        self
    }
}

/// A view of an [`Image`], tracked by a [`ReferenceGuard`].
///
/// Framebuffers hold strong references to the views they bind.
pub struct ImageView<'img> {
    guard: ReferenceGuard,
    image: StrongReference<'img, Image>,
    handle: vk::ImageView,
    format: vk::Format,
    base_array_layer: u32,
    layer_count: u32,
}

impl std::fmt::Debug for ImageView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageView")
            .field("handle", &self.handle)
            .field("image", &self.image.raw_image())
            .field("format", &self.format)
            .field("base_array_layer", &self.base_array_layer)
            .field("layer_count", &self.layer_count)
            .finish_non_exhaustive()
    }
}

impl<'img> ImageView<'img> {
    pub fn new(
        image: &'img Image,
        desc: &ImageViewDesc,
        name: Option<&str>,
    ) -> Result<Self, CreateImageViewError> {
        let available = image.array_layers();
        let in_range = desc.layer_count > 0
            && desc
                .base_array_layer
                .checked_add(desc.layer_count)
                .is_some_and(|end| end <= available);
        if !in_range {
            return Err(CreateImageViewError::LayerRange {
                base: desc.base_array_layer,
                count: desc.layer_count,
                available,
            });
        }

        let format = desc.format.unwrap_or(image.format());
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image.raw_image())
            .view_type(desc.view_type)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: desc.base_array_layer,
                layer_count: desc.layer_count,
            });

        let device = image.parent();
        // SAFETY: create_info references a valid image created from device
        // and the layer range was checked above.
        let handle = unsafe { device.create_raw_image_view(&create_info) }
            .map_err(CreateImageViewError::Vulkan)?;

        // SAFETY: handle is a valid image view created from device.
        let name_result = unsafe { device.set_object_name_str(handle, name) };
        if let Err(e) = name_result {
            tracing::warn!("Failed to name image view {:?}: {e}", handle);
        }

        Ok(Self {
            guard: ReferenceGuard::new("ImageView"),
            image: StrongReference::new(image),
            handle,
            format,
            base_array_layer: desc.base_array_layer,
            layer_count: desc.layer_count,
        })
    }

    pub fn raw_image_view(&self) -> vk::ImageView {
        self.handle
    }

    pub fn image(&self) -> &'img Image {
        self.image.get()
    }

    pub fn parent(&self) -> &Arc<Device> {
        self.image.parent()
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn base_array_layer(&self) -> u32 {
        self.base_array_layer
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }
}

impl Guarded for ImageView<'_> {
    fn reference_guard(&self) -> &ReferenceGuard {
        &self.guard
    }
}

impl Drop for ImageView<'_> {
    fn drop(&mut self) {
        self.guard.check_unreferenced();
        tracing::debug!("Dropping image view {:?}", self.handle);
        let device = self.parent();
        // SAFETY: handle was created from the image's device and no
        // framebuffer references it anymore.
        unsafe { device.destroy_raw_image_view(self.handle) };
    }
}
