//! Render-graph construction ([`RenderPassCreateInfo`]) and the guarded
//! [`RenderPass`] built from it.
//!
//! Attachments are declared with caller-chosen [`AttachmentId`]s and
//! subpasses refer to them by identity, never by position. Dependencies
//! refer to the [`SubpassDescription`] values themselves (`None` is the
//! external boundary). [`RenderPassCreateInfo::new`] resolves all of this
//! into the index-based arrays Vulkan expects and rejects every graph that
//! is ill-formed before anything reaches the driver:
//!
//! 1. duplicate attachment identities,
//! 2. references to identities that were never declared,
//! 3. roles used with the wrong kind of format (color roles need a color
//!    format, the depth role a depth/stencil format),
//! 4. resolve lists whose length differs from the color list,
//! 5. dependencies on subpasses outside the graph, external-to-external
//!    edges, and edges that point backwards.
//!
//! The resolved arrays stay owned by the [`RenderPass`] so pipeline code can
//! look up subpass layouts later through [`RenderPass::info`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;
use crate::guard::{Guarded, ReferenceGuard};
use crate::image::format_aspects;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Position of a subpass within the list given to
/// [`RenderPassCreateInfo::new`].
pub type SubpassIndex = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentRole {
    Input,
    Color,
    Resolve,
    DepthStencil,
    Preserve,
}

impl fmt::Display for AttachmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Color => "color",
            Self::Resolve => "resolve",
            Self::DepthStencil => "depth/stencil",
            Self::Preserve => "preserve",
        })
    }
}

/// Kind of format a role requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    Color,
    DepthStencil,
}

impl fmt::Display for FormatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Color => "color",
            Self::DepthStencil => "depth/stencil",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyEnd {
    Source,
    Destination,
}

impl fmt::Display for DependencyEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::Destination => "destination",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderPassGraphError {
    #[error(
        "Attachment {id} declared twice (positions {first} and {second})"
    )]
    DuplicateAttachment {
        id: AttachmentId,
        first: u32,
        second: u32,
    },

    #[error("Render pass declares no subpasses")]
    NoSubpasses,

    #[error(
        "Subpass {second} repeats the description of subpass {first}"
    )]
    DuplicateSubpass {
        first: SubpassIndex,
        second: SubpassIndex,
    },

    #[error(
        "Subpass {subpass} uses unknown attachment {id} as {role} attachment"
    )]
    UnknownAttachment {
        subpass: SubpassIndex,
        role: AttachmentRole,
        id: AttachmentId,
    },

    #[error(
        "Subpass {subpass} uses attachment {id} ({format:?}) as {role} \
         attachment, which requires a {required} format"
    )]
    IncompatibleFormat {
        subpass: SubpassIndex,
        role: AttachmentRole,
        id: AttachmentId,
        format: vk::Format,
        required: FormatClass,
    },

    #[error(
        "Subpass {subpass} declares {resolve} resolve attachment(s) for \
         {color} color attachment(s)"
    )]
    ResolveCountMismatch {
        subpass: SubpassIndex,
        color: usize,
        resolve: usize,
    },

    #[error(
        "Dependency {dependency} {end} subpass is not part of this render pass"
    )]
    ForeignSubpass {
        dependency: usize,
        end: DependencyEnd,
    },

    #[error("Dependency {dependency} is external on both ends")]
    ExternalToExternal { dependency: usize },

    #[error(
        "Dependency {dependency} points backwards \
         (subpass {src} to subpass {dst})"
    )]
    BackwardDependency {
        dependency: usize,
        src: SubpassIndex,
        dst: SubpassIndex,
    },
}

#[derive(Debug, Error)]
pub enum CreateRenderPassError {
    #[error("Vulkan error creating render pass: {0}")]
    Vulkan(vk::Result),
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// Caller-chosen identity of an attachment. Unique within one render pass;
/// unrelated to the attachment's final position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentId(pub u32);

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for AttachmentId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<&AttachmentDescription> for AttachmentId {
    fn from(attachment: &AttachmentDescription) -> Self {
        attachment.id
    }
}

/// An attachment slot: identity plus the native description.
///
/// Defaults to one sample, `DONT_CARE` operations and
/// `UNDEFINED -> GENERAL` layouts; the setters override each field.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentDescription {
    id: AttachmentId,
    raw: vk::AttachmentDescription,
}

impl AttachmentDescription {
    pub fn new(id: impl Into<AttachmentId>, format: vk::Format) -> Self {
        Self {
            id: id.into(),
            raw: vk::AttachmentDescription::default()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::GENERAL),
        }
    }

    pub fn flags(mut self, flags: vk::AttachmentDescriptionFlags) -> Self {
        self.raw.flags = flags;
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.raw.samples = samples;
        self
    }

    pub fn load_op(mut self, load_op: vk::AttachmentLoadOp) -> Self {
        self.raw.load_op = load_op;
        self
    }

    pub fn store_op(mut self, store_op: vk::AttachmentStoreOp) -> Self {
        self.raw.store_op = store_op;
        self
    }

    pub fn stencil_load_op(mut self, load_op: vk::AttachmentLoadOp) -> Self {
        self.raw.stencil_load_op = load_op;
        self
    }

    pub fn stencil_store_op(mut self, store_op: vk::AttachmentStoreOp) -> Self {
        self.raw.stencil_store_op = store_op;
        self
    }

    pub fn initial_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.raw.initial_layout = layout;
        self
    }

    pub fn final_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.raw.final_layout = layout;
        self
    }

    pub fn id(&self) -> AttachmentId {
        self.id
    }

    pub fn format(&self) -> vk::Format {
        self.raw.format
    }

    pub fn sample_count(&self) -> vk::SampleCountFlags {
        self.raw.samples
    }

    pub fn raw(&self) -> vk::AttachmentDescription {
        self.raw
    }

    pub fn is_color(&self) -> bool {
        format_aspects(self.format()).contains(vk::ImageAspectFlags::COLOR)
    }

    pub fn is_depth_stencil(&self) -> bool {
        self.has_depth_aspect() || self.has_stencil_aspect()
    }

    pub fn has_depth_aspect(&self) -> bool {
        format_aspects(self.format()).contains(vk::ImageAspectFlags::DEPTH)
    }

    pub fn has_stencil_aspect(&self) -> bool {
        format_aspects(self.format()).contains(vk::ImageAspectFlags::STENCIL)
    }

    /// Whether beginning the render pass clears any aspect of this
    /// attachment, and therefore consumes a clear value.
    pub fn is_cleared(&self) -> bool {
        let clears_main = self.raw.load_op == vk::AttachmentLoadOp::CLEAR
            && (self.is_color() || self.has_depth_aspect());
        let clears_stencil = self.has_stencil_aspect()
            && self.raw.stencil_load_op == vk::AttachmentLoadOp::CLEAR;
        clears_main || clears_stencil
    }

    fn satisfies(&self, required: FormatClass) -> bool {
        match required {
            FormatClass::Color => self.is_color(),
            FormatClass::DepthStencil => self.is_depth_stencil(),
        }
    }
}

// ---------------------------------------------------------------------------
// Subpasses and dependencies
// ---------------------------------------------------------------------------

/// Attachment roles of one subpass, by identity.
#[derive(Debug, Clone)]
pub struct SubpassDescription {
    flags: vk::SubpassDescriptionFlags,
    bind_point: vk::PipelineBindPoint,
    input: Vec<(AttachmentId, vk::ImageLayout)>,
    color: Vec<(AttachmentId, vk::ImageLayout)>,
    resolve: Vec<(AttachmentId, vk::ImageLayout)>,
    depth_stencil: Option<(AttachmentId, vk::ImageLayout)>,
    preserve: Vec<AttachmentId>,
}

impl Default for SubpassDescription {
    fn default() -> Self {
        Self::new(vk::PipelineBindPoint::GRAPHICS)
    }
}

impl SubpassDescription {
    pub fn new(bind_point: vk::PipelineBindPoint) -> Self {
        Self {
            flags: vk::SubpassDescriptionFlags::empty(),
            bind_point,
            input: Vec::new(),
            color: Vec::new(),
            resolve: Vec::new(),
            depth_stencil: None,
            preserve: Vec::new(),
        }
    }

    pub fn flags(mut self, flags: vk::SubpassDescriptionFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn add_input_attachment(
        &mut self,
        attachment: impl Into<AttachmentId>,
        layout: vk::ImageLayout,
    ) -> &mut Self {
        self.input.push((attachment.into(), layout));
        self
    }

    pub fn add_color_attachment(
        &mut self,
        attachment: impl Into<AttachmentId>,
        layout: vk::ImageLayout,
    ) -> &mut Self {
        self.color.push((attachment.into(), layout));
        self
    }

    /// Resolve targets pair with color attachments by position.
    pub fn add_resolve_attachment(
        &mut self,
        attachment: impl Into<AttachmentId>,
        layout: vk::ImageLayout,
    ) -> &mut Self {
        self.resolve.push((attachment.into(), layout));
        self
    }

    /// Replaces any previously set depth/stencil attachment.
    pub fn set_depth_stencil_attachment(
        &mut self,
        attachment: impl Into<AttachmentId>,
        layout: vk::ImageLayout,
    ) -> &mut Self {
        self.depth_stencil = Some((attachment.into(), layout));
        self
    }

    pub fn add_preserve_attachment(
        &mut self,
        attachment: impl Into<AttachmentId>,
    ) -> &mut Self {
        self.preserve.push(attachment.into());
        self
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub fn input_attachments(&self) -> &[(AttachmentId, vk::ImageLayout)] {
        &self.input
    }

    pub fn color_attachments(&self) -> &[(AttachmentId, vk::ImageLayout)] {
        &self.color
    }

    pub fn resolve_attachments(&self) -> &[(AttachmentId, vk::ImageLayout)] {
        &self.resolve
    }

    pub fn depth_stencil_attachment(
        &self,
    ) -> Option<(AttachmentId, vk::ImageLayout)> {
        self.depth_stencil
    }

    pub fn preserve_attachments(&self) -> &[AttachmentId] {
        &self.preserve
    }
}

/// An execution/memory dependency between two subpasses of the same graph.
///
/// An unset end is the external boundary (`VK_SUBPASS_EXTERNAL`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SubpassDependency<'a> {
    src: Option<&'a SubpassDescription>,
    dst: Option<&'a SubpassDescription>,
    src_stage_mask: vk::PipelineStageFlags,
    dst_stage_mask: vk::PipelineStageFlags,
    src_access_mask: vk::AccessFlags,
    dst_access_mask: vk::AccessFlags,
    dependency_flags: vk::DependencyFlags,
}

impl<'a> SubpassDependency<'a> {
    pub fn new(
        src: Option<&'a SubpassDescription>,
        dst: Option<&'a SubpassDescription>,
    ) -> Self {
        Self {
            src,
            dst,
            ..Self::default()
        }
    }

    pub fn src_stage_mask(mut self, mask: vk::PipelineStageFlags) -> Self {
        self.src_stage_mask = mask;
        self
    }

    pub fn dst_stage_mask(mut self, mask: vk::PipelineStageFlags) -> Self {
        self.dst_stage_mask = mask;
        self
    }

    pub fn src_access_mask(mut self, mask: vk::AccessFlags) -> Self {
        self.src_access_mask = mask;
        self
    }

    pub fn dst_access_mask(mut self, mask: vk::AccessFlags) -> Self {
        self.dst_access_mask = mask;
        self
    }

    pub fn dependency_flags(mut self, flags: vk::DependencyFlags) -> Self {
        self.dependency_flags = flags;
        self
    }

    pub fn src(&self) -> Option<&'a SubpassDescription> {
        self.src
    }

    pub fn dst(&self) -> Option<&'a SubpassDescription> {
        self.dst
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// One subpass with every reference resolved to an attachment index.
#[derive(Debug, Clone)]
pub struct ResolvedSubpass {
    flags: vk::SubpassDescriptionFlags,
    bind_point: vk::PipelineBindPoint,
    input: Vec<vk::AttachmentReference>,
    color: Vec<vk::AttachmentReference>,
    resolve: Vec<vk::AttachmentReference>,
    /// `attachment == vk::ATTACHMENT_UNUSED` when the subpass has none.
    depth_stencil: vk::AttachmentReference,
    preserve: Vec<u32>,
}

impl ResolvedSubpass {
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub fn input_attachments(&self) -> &[vk::AttachmentReference] {
        &self.input
    }

    pub fn color_attachments(&self) -> &[vk::AttachmentReference] {
        &self.color
    }

    pub fn resolve_attachments(&self) -> &[vk::AttachmentReference] {
        &self.resolve
    }

    pub fn depth_stencil_attachment(&self) -> Option<vk::AttachmentReference> {
        (self.depth_stencil.attachment != vk::ATTACHMENT_UNUSED)
            .then_some(self.depth_stencil)
    }

    pub fn preserve_attachments(&self) -> &[u32] {
        &self.preserve
    }

    fn raw(&self) -> vk::SubpassDescription<'_> {
        let description = vk::SubpassDescription::default()
            .flags(self.flags)
            .pipeline_bind_point(self.bind_point)
            .input_attachments(&self.input)
            .color_attachments(&self.color)
            .depth_stencil_attachment(&self.depth_stencil)
            .preserve_attachments(&self.preserve);
        // The resolve setter also writes color_attachment_count.
        if self.resolve.is_empty() {
            description
        } else {
            description.resolve_attachments(&self.resolve)
        }
    }
}

/// A validated render graph in Vulkan's index-based form.
#[derive(Debug, Clone)]
pub struct RenderPassCreateInfo {
    flags: vk::RenderPassCreateFlags,
    attachments: Vec<AttachmentDescription>,
    indices: HashMap<AttachmentId, u32>,
    subpasses: Vec<ResolvedSubpass>,
    dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassCreateInfo {
    /// Resolve and validate a render graph.
    ///
    /// Attachments keep the order given here; each attachment's index is its
    /// position in `attachments`. Subpass identity in `dependencies` is by
    /// address, so a dependency must borrow the same `SubpassDescription`
    /// values listed in `subpasses`.
    pub fn new(
        attachments: &[AttachmentDescription],
        subpasses: &[&SubpassDescription],
        dependencies: &[SubpassDependency<'_>],
    ) -> Result<Self, RenderPassGraphError> {
        let _span = tracing::debug_span!(
            "resolve_render_pass",
            attachments = attachments.len(),
            subpasses = subpasses.len(),
            dependencies = dependencies.len(),
        )
        .entered();

        let mut indices = HashMap::with_capacity(attachments.len());
        for (position, attachment) in (0u32..).zip(attachments) {
            if let Some(&first) = indices.get(&attachment.id) {
                return Err(RenderPassGraphError::DuplicateAttachment {
                    id: attachment.id,
                    first,
                    second: position,
                });
            }
            indices.insert(attachment.id, position);
        }

        if subpasses.is_empty() {
            return Err(RenderPassGraphError::NoSubpasses);
        }
        for (second, subpass) in subpasses.iter().enumerate().skip(1) {
            if let Some(first) = subpasses[..second]
                .iter()
                .position(|earlier| std::ptr::eq(*earlier, *subpass))
            {
                return Err(RenderPassGraphError::DuplicateSubpass {
                    first: first as u32,
                    second: second as u32,
                });
            }
        }

        let resolver = Resolver {
            attachments,
            indices: &indices,
        };
        let resolved_subpasses = (0u32..)
            .zip(subpasses)
            .map(|(index, subpass)| resolver.resolve_subpass(index, subpass))
            .collect::<Result<Vec<_>, _>>()?;

        let resolved_dependencies = dependencies
            .iter()
            .enumerate()
            .map(|(index, dependency)| {
                resolve_dependency(index, dependency, subpasses)
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::trace!(
            "Resolved render graph with {} attachment(s), {} subpass(es), \
             {} dependency(ies)",
            attachments.len(),
            resolved_subpasses.len(),
            resolved_dependencies.len()
        );

        Ok(Self {
            flags: vk::RenderPassCreateFlags::empty(),
            attachments: attachments.to_vec(),
            indices,
            subpasses: resolved_subpasses,
            dependencies: resolved_dependencies,
        })
    }

    pub fn flags(mut self, flags: vk::RenderPassCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn attachments(&self) -> &[AttachmentDescription] {
        &self.attachments
    }

    /// Final index of the attachment declared with `id`.
    pub fn attachment_index(&self, id: impl Into<AttachmentId>) -> Option<u32> {
        self.indices.get(&id.into()).copied()
    }

    pub fn subpass_count(&self) -> u32 {
        self.subpasses.len() as u32
    }

    pub fn subpass(&self, index: SubpassIndex) -> Option<&ResolvedSubpass> {
        self.subpasses.get(index as usize)
    }

    pub fn subpasses(&self) -> &[ResolvedSubpass] {
        &self.subpasses
    }

    pub fn dependencies(&self) -> &[vk::SubpassDependency] {
        &self.dependencies
    }

    /// Smallest clear-value count that covers every cleared attachment.
    pub fn required_clear_values(&self) -> u32 {
        (1u32..)
            .zip(&self.attachments)
            .filter(|(_, attachment)| attachment.is_cleared())
            .map(|(count, _)| count)
            .last()
            .unwrap_or(0)
    }

    /// Call `f` with the native create info. All pointers inside it are
    /// valid only for the duration of the call.
    pub fn with_raw<R>(
        &self,
        f: impl FnOnce(&vk::RenderPassCreateInfo<'_>) -> R,
    ) -> R {
        let attachments: Vec<_> = self
            .attachments
            .iter()
            .map(AttachmentDescription::raw)
            .collect();
        let subpasses: Vec<_> = self
            .subpasses
            .iter()
            .map(ResolvedSubpass::raw)
            .collect();
        let create_info = vk::RenderPassCreateInfo::default()
            .flags(self.flags)
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&self.dependencies);
        f(&create_info)
    }
}

struct Resolver<'a> {
    attachments: &'a [AttachmentDescription],
    indices: &'a HashMap<AttachmentId, u32>,
}

impl Resolver<'_> {
    fn resolve_subpass(
        &self,
        subpass: SubpassIndex,
        description: &SubpassDescription,
    ) -> Result<ResolvedSubpass, RenderPassGraphError> {
        let references =
            |role, list: &[(AttachmentId, vk::ImageLayout)], required| {
                list.iter()
                    .map(|&(id, layout)| {
                        self.reference(subpass, role, id, layout, required)
                    })
                    .collect::<Result<Vec<_>, _>>()
            };

        let input = references(
            AttachmentRole::Input,
            &description.input,
            Some(FormatClass::Color),
        )?;
        let color = references(
            AttachmentRole::Color,
            &description.color,
            Some(FormatClass::Color),
        )?;
        let resolve = references(
            AttachmentRole::Resolve,
            &description.resolve,
            Some(FormatClass::Color),
        )?;
        let depth_stencil = match description.depth_stencil {
            Some((id, layout)) => self.reference(
                subpass,
                AttachmentRole::DepthStencil,
                id,
                layout,
                Some(FormatClass::DepthStencil),
            )?,
            None => vk::AttachmentReference {
                attachment: vk::ATTACHMENT_UNUSED,
                layout: vk::ImageLayout::UNDEFINED,
            },
        };
        let preserve = description
            .preserve
            .iter()
            .map(|&id| {
                self.index(subpass, AttachmentRole::Preserve, id)
                    .map(|(index, _)| index)
            })
            .collect::<Result<Vec<_>, _>>()?;

        if !resolve.is_empty() && resolve.len() != color.len() {
            return Err(RenderPassGraphError::ResolveCountMismatch {
                subpass,
                color: color.len(),
                resolve: resolve.len(),
            });
        }

        Ok(ResolvedSubpass {
            flags: description.flags,
            bind_point: description.bind_point,
            input,
            color,
            resolve,
            depth_stencil,
            preserve,
        })
    }

    fn index(
        &self,
        subpass: SubpassIndex,
        role: AttachmentRole,
        id: AttachmentId,
    ) -> Result<(u32, &AttachmentDescription), RenderPassGraphError> {
        let Some(&index) = self.indices.get(&id) else {
            return Err(RenderPassGraphError::UnknownAttachment {
                subpass,
                role,
                id,
            });
        };
        Ok((index, &self.attachments[index as usize]))
    }

    fn reference(
        &self,
        subpass: SubpassIndex,
        role: AttachmentRole,
        id: AttachmentId,
        layout: vk::ImageLayout,
        required: Option<FormatClass>,
    ) -> Result<vk::AttachmentReference, RenderPassGraphError> {
        let (index, attachment) = self.index(subpass, role, id)?;
        if let Some(required) = required
            && !attachment.satisfies(required)
        {
            return Err(RenderPassGraphError::IncompatibleFormat {
                subpass,
                role,
                id,
                format: attachment.format(),
                required,
            });
        }
        Ok(vk::AttachmentReference {
            attachment: index,
            layout,
        })
    }
}

fn resolve_dependency(
    index: usize,
    dependency: &SubpassDependency<'_>,
    subpasses: &[&SubpassDescription],
) -> Result<vk::SubpassDependency, RenderPassGraphError> {
    let end_index = |end: Option<&SubpassDescription>, which| match end {
        None => Ok(vk::SUBPASS_EXTERNAL),
        Some(end) => subpasses
            .iter()
            .position(|subpass| std::ptr::eq(*subpass, end))
            .map(|position| position as u32)
            .ok_or(RenderPassGraphError::ForeignSubpass {
                dependency: index,
                end: which,
            }),
    };

    if dependency.src.is_none() && dependency.dst.is_none() {
        return Err(RenderPassGraphError::ExternalToExternal {
            dependency: index,
        });
    }
    let src = end_index(dependency.src, DependencyEnd::Source)?;
    let dst = end_index(dependency.dst, DependencyEnd::Destination)?;
    if src != vk::SUBPASS_EXTERNAL && dst != vk::SUBPASS_EXTERNAL && src > dst {
        return Err(RenderPassGraphError::BackwardDependency {
            dependency: index,
            src,
            dst,
        });
    }

    Ok(vk::SubpassDependency {
        src_subpass: src,
        dst_subpass: dst,
        src_stage_mask: dependency.src_stage_mask,
        dst_stage_mask: dependency.dst_stage_mask,
        src_access_mask: dependency.src_access_mask,
        dst_access_mask: dependency.dst_access_mask,
        dependency_flags: dependency.dependency_flags,
    })
}

// ---------------------------------------------------------------------------
// RenderPass
// ---------------------------------------------------------------------------

/// An immutable Vulkan render pass built from a validated
/// [`RenderPassCreateInfo`].
///
/// Framebuffers and active command-buffer scopes hold strong references to
/// it; dropping it while any remain is fatal.
pub struct RenderPass {
    guard: ReferenceGuard,
    parent: Arc<Device>,
    handle: vk::RenderPass,
    info: RenderPassCreateInfo,
}

impl fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPass")
            .field("handle", &self.handle)
            .field("attachments", &self.info.attachments.len())
            .field("subpasses", &self.info.subpasses.len())
            .finish_non_exhaustive()
    }
}

impl RenderPass {
    pub fn new(
        device: &Arc<Device>,
        info: RenderPassCreateInfo,
        name: Option<&str>,
    ) -> Result<Self, CreateRenderPassError> {
        let handle = info
            .with_raw(|create_info| {
                // SAFETY: create_info was built from a validated graph and
                // every pointer in it lives until with_raw returns.
                unsafe { device.create_raw_render_pass(create_info) }
            })
            .map_err(CreateRenderPassError::Vulkan)?;

        // SAFETY: handle is a valid render pass created from device.
        let name_result = unsafe { device.set_object_name_str(handle, name) };
        if let Err(e) = name_result {
            tracing::warn!("Failed to name render pass {:?}: {e}", handle);
        }

        Ok(Self {
            guard: ReferenceGuard::new("RenderPass"),
            parent: Arc::clone(device),
            handle,
            info,
        })
    }

    pub fn raw_render_pass(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn parent(&self) -> &Arc<Device> {
        &self.parent
    }

    pub fn info(&self) -> &RenderPassCreateInfo {
        &self.info
    }

    pub fn attachments(&self) -> &[AttachmentDescription] {
        &self.info.attachments
    }

    pub fn subpass_count(&self) -> u32 {
        self.info.subpass_count()
    }
}

impl Guarded for RenderPass {
    fn reference_guard(&self) -> &ReferenceGuard {
        &self.guard
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.guard.check_unreferenced();
        tracing::debug!("Dropping render pass {:?}", self.handle);
        // SAFETY: handle was created from parent and no framebuffer or
        // command buffer scope references it anymore.
        unsafe { self.parent.destroy_raw_render_pass(self.handle) };
    }
}
