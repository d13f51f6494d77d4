//! TOML render-graph descriptions and their conversion into
//! `rgpu_guard` builder types.
//!
//! Enum-valued fields use the lower snake_case form of the Vulkan name
//! without its prefix (`VK_FORMAT_R8G8B8A8_UNORM` is `"r8g8b8a8_unorm"`).

use eyre::{WrapErr, bail, eyre};
use rgpu_guard::ash::vk;
use rgpu_guard::framebuffer::{ViewInfo, check_compatibility};
use rgpu_guard::render_pass::{
    AttachmentDescription, RenderPassCreateInfo, SubpassDependency,
    SubpassDescription,
};
use serde::Deserialize;

/// Defines a serde-deserializable name enum and its mapping to an `ash`
/// constant type.
macro_rules! vk_names {
    (
        $(#[$meta:meta])*
        $name:ident => $vk:ty {
            $($variant:ident => $value:ident),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl From<$name> for $vk {
            fn from(value: $name) -> Self {
                match value {
                    $($name::$variant => <$vk>::$value),+
                }
            }
        }
    };
}

vk_names! {
    Format => vk::Format {
        R8g8b8a8Unorm => R8G8B8A8_UNORM,
        R8g8b8a8Srgb => R8G8B8A8_SRGB,
        B8g8r8a8Unorm => B8G8R8A8_UNORM,
        B8g8r8a8Srgb => B8G8R8A8_SRGB,
        A2b10g10r10UnormPack32 => A2B10G10R10_UNORM_PACK32,
        R16g16b16a16Sfloat => R16G16B16A16_SFLOAT,
        R32g32b32a32Sfloat => R32G32B32A32_SFLOAT,
        R32Sfloat => R32_SFLOAT,
        D16Unorm => D16_UNORM,
        X8D24UnormPack32 => X8_D24_UNORM_PACK32,
        D32Sfloat => D32_SFLOAT,
        S8Uint => S8_UINT,
        D16UnormS8Uint => D16_UNORM_S8_UINT,
        D24UnormS8Uint => D24_UNORM_S8_UINT,
        D32SfloatS8Uint => D32_SFLOAT_S8_UINT,
    }
}

vk_names! {
    LoadOp => vk::AttachmentLoadOp {
        Load => LOAD,
        Clear => CLEAR,
        DontCare => DONT_CARE,
    }
}

vk_names! {
    StoreOp => vk::AttachmentStoreOp {
        Store => STORE,
        DontCare => DONT_CARE,
    }
}

vk_names! {
    Layout => vk::ImageLayout {
        Undefined => UNDEFINED,
        General => GENERAL,
        ColorAttachmentOptimal => COLOR_ATTACHMENT_OPTIMAL,
        DepthStencilAttachmentOptimal => DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        DepthStencilReadOnlyOptimal => DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ShaderReadOnlyOptimal => SHADER_READ_ONLY_OPTIMAL,
        TransferSrcOptimal => TRANSFER_SRC_OPTIMAL,
        TransferDstOptimal => TRANSFER_DST_OPTIMAL,
        PresentSrc => PRESENT_SRC_KHR,
    }
}

vk_names! {
    Stage => vk::PipelineStageFlags {
        TopOfPipe => TOP_OF_PIPE,
        VertexShader => VERTEX_SHADER,
        FragmentShader => FRAGMENT_SHADER,
        EarlyFragmentTests => EARLY_FRAGMENT_TESTS,
        LateFragmentTests => LATE_FRAGMENT_TESTS,
        ColorAttachmentOutput => COLOR_ATTACHMENT_OUTPUT,
        ComputeShader => COMPUTE_SHADER,
        Transfer => TRANSFER,
        BottomOfPipe => BOTTOM_OF_PIPE,
        AllGraphics => ALL_GRAPHICS,
        AllCommands => ALL_COMMANDS,
    }
}

vk_names! {
    Access => vk::AccessFlags {
        InputAttachmentRead => INPUT_ATTACHMENT_READ,
        ShaderRead => SHADER_READ,
        ShaderWrite => SHADER_WRITE,
        ColorAttachmentRead => COLOR_ATTACHMENT_READ,
        ColorAttachmentWrite => COLOR_ATTACHMENT_WRITE,
        DepthStencilAttachmentRead => DEPTH_STENCIL_ATTACHMENT_READ,
        DepthStencilAttachmentWrite => DEPTH_STENCIL_ATTACHMENT_WRITE,
        TransferRead => TRANSFER_READ,
        TransferWrite => TRANSFER_WRITE,
        MemoryRead => MEMORY_READ,
        MemoryWrite => MEMORY_WRITE,
    }
}

fn fold_flags<T, F>(names: &[T]) -> F
where
    T: Copy + Into<F>,
    F: std::ops::BitOr<Output = F> + Default,
{
    names
        .iter()
        .fold(F::default(), |acc, &name| acc | name.into())
}

fn sample_count(samples: u32) -> eyre::Result<vk::SampleCountFlags> {
    if !samples.is_power_of_two() || samples > 64 {
        bail!("sample count must be a power of two up to 64, got {samples}");
    }
    Ok(vk::SampleCountFlags::from_raw(samples))
}

const fn one() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// File model
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphFile {
    #[serde(default, rename = "attachment")]
    pub attachments: Vec<AttachmentEntry>,
    #[serde(default, rename = "subpass")]
    pub subpasses: Vec<SubpassEntry>,
    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<DependencyEntry>,
    pub framebuffer: Option<FramebufferEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachmentEntry {
    pub id: u32,
    pub format: Format,
    #[serde(default = "one")]
    pub samples: u32,
    pub load_op: Option<LoadOp>,
    pub store_op: Option<StoreOp>,
    pub stencil_load_op: Option<LoadOp>,
    pub stencil_store_op: Option<StoreOp>,
    pub initial_layout: Option<Layout>,
    pub final_layout: Option<Layout>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachmentRef {
    pub attachment: u32,
    pub layout: Layout,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubpassEntry {
    pub name: String,
    #[serde(default)]
    pub input: Vec<AttachmentRef>,
    #[serde(default)]
    pub color: Vec<AttachmentRef>,
    #[serde(default)]
    pub resolve: Vec<AttachmentRef>,
    pub depth_stencil: Option<AttachmentRef>,
    #[serde(default)]
    pub preserve: Vec<u32>,
}

/// `src`/`dst` name a subpass; absent or `"external"` is the external
/// boundary.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyEntry {
    pub src: Option<String>,
    pub dst: Option<String>,
    #[serde(default)]
    pub src_stages: Vec<Stage>,
    #[serde(default)]
    pub dst_stages: Vec<Stage>,
    #[serde(default)]
    pub src_access: Vec<Access>,
    #[serde(default)]
    pub dst_access: Vec<Access>,
    #[serde(default)]
    pub by_region: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FramebufferEntry {
    pub width: u32,
    pub height: u32,
    #[serde(default = "one")]
    pub layers: u32,
    /// One view per attachment, in attachment order.
    pub views: Vec<ViewEntry>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewEntry {
    pub format: Format,
    pub width: u32,
    pub height: u32,
    #[serde(default = "one")]
    pub layers: u32,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

impl AttachmentEntry {
    fn description(&self) -> eyre::Result<AttachmentDescription> {
        let format: vk::Format = self.format.into();
        let context = || format!("attachment {}", self.id);
        let samples = sample_count(self.samples).wrap_err_with(context)?;
        let mut description =
            AttachmentDescription::new(self.id, format).samples(samples);
        if let Some(load_op) = self.load_op {
            description = description.load_op(load_op.into());
        }
        if let Some(store_op) = self.store_op {
            description = description.store_op(store_op.into());
        }
        if let Some(load_op) = self.stencil_load_op {
            description = description.stencil_load_op(load_op.into());
        }
        if let Some(store_op) = self.stencil_store_op {
            description = description.stencil_store_op(store_op.into());
        }
        if let Some(layout) = self.initial_layout {
            description = description.initial_layout(layout.into());
        }
        if let Some(layout) = self.final_layout {
            description = description.final_layout(layout.into());
        }
        Ok(description)
    }
}

impl SubpassEntry {
    fn description(&self) -> SubpassDescription {
        let mut description = SubpassDescription::default();
        for r in &self.input {
            description.add_input_attachment(r.attachment, r.layout.into());
        }
        for r in &self.color {
            description.add_color_attachment(r.attachment, r.layout.into());
        }
        for r in &self.resolve {
            description.add_resolve_attachment(r.attachment, r.layout.into());
        }
        if let Some(r) = self.depth_stencil {
            description.set_depth_stencil_attachment(
                r.attachment,
                r.layout.into(),
            );
        }
        for &attachment in &self.preserve {
            description.add_preserve_attachment(attachment);
        }
        description
    }
}

impl GraphFile {
    pub fn parse(source: &str) -> eyre::Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Build and validate the render graph.
    pub fn render_pass_info(&self) -> eyre::Result<RenderPassCreateInfo> {
        for (index, subpass) in self.subpasses.iter().enumerate() {
            if subpass.name == "external" {
                bail!("subpass {index} uses the reserved name \"external\"");
            }
            let name = &subpass.name;
            let earlier = &self.subpasses[..index];
            if earlier.iter().any(|s| &s.name == name) {
                bail!("subpass name {name:?} is used more than once");
            }
        }

        let attachments = self
            .attachments
            .iter()
            .map(AttachmentEntry::description)
            .collect::<eyre::Result<Vec<_>>>()?;
        let subpasses: Vec<_> = self
            .subpasses
            .iter()
            .map(SubpassEntry::description)
            .collect();
        let subpass_refs: Vec<&SubpassDescription> = subpasses.iter().collect();

        let endpoint = |name: Option<&str>| match name {
            None | Some("external") => Ok(None),
            Some(name) => self
                .subpasses
                .iter()
                .position(|s| s.name == name)
                .map(|index| Some(&subpasses[index]))
                .ok_or_else(|| {
                    eyre!("dependency names unknown subpass {name:?}")
                }),
        };

        let mut dependencies = Vec::with_capacity(self.dependencies.len());
        for entry in &self.dependencies {
            let mut flags = vk::DependencyFlags::empty();
            if entry.by_region {
                flags |= vk::DependencyFlags::BY_REGION;
            }
            let src = endpoint(entry.src.as_deref())?;
            let dst = endpoint(entry.dst.as_deref())?;
            let dependency = SubpassDependency::new(src, dst)
                .src_stage_mask(fold_flags(&entry.src_stages))
                .dst_stage_mask(fold_flags(&entry.dst_stages))
                .src_access_mask(fold_flags(&entry.src_access))
                .dst_access_mask(fold_flags(&entry.dst_access))
                .dependency_flags(flags);
            dependencies.push(dependency);
        }

        RenderPassCreateInfo::new(&attachments, &subpass_refs, &dependencies)
            .wrap_err("render graph is invalid")
    }

    /// Check the `[framebuffer]` section against a built graph.
    pub fn check_framebuffer(
        &self,
        info: &RenderPassCreateInfo,
    ) -> eyre::Result<()> {
        let Some(framebuffer) = &self.framebuffer else {
            bail!("graph file has no [framebuffer] section");
        };
        let views: Vec<_> = framebuffer
            .views
            .iter()
            .map(|view| ViewInfo {
                format: view.format.into(),
                extent: vk::Extent2D {
                    width: view.width,
                    height: view.height,
                },
                layer_count: view.layers,
            })
            .collect();
        let extent = vk::Extent2D {
            width: framebuffer.width,
            height: framebuffer.height,
        };
        let layers = framebuffer.layers;
        check_compatibility(info.attachments(), &views, extent, layers)
            .wrap_err("framebuffer is incompatible with the render graph")
    }
}
