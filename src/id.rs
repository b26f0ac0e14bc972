//! Typed identifiers for shadow records.
//!
//! An [`Id`] packs a slot index and an epoch into a single `u64`. The engine
//! hands one out for every object the host registers, and the host keeps it
//! next to the real API object. Ids are plain values: holding one never keeps
//! a shadow record alive, and once a record is dropped its id stops resolving.

use crate::{Epoch, Index};
use std::{cmp::Ordering, fmt, hash, marker::PhantomData};

const EPOCH_SHIFT: u32 = 32;

/// The identifier of a shadow record of type `T`.
#[repr(transparent)]
pub struct Id<T>(u64, PhantomData<T>);

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        let (index, epoch) = self.unzip();
        write!(formatter, "Id({},{})", index, epoch)
    }
}

impl<T> hash::Hash for Id<T> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T> Eq for Id<T> {}

#[cfg(feature = "serde")]
impl<T> serde::Serialize for Id<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for Id<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <u64 as serde::Deserialize>::deserialize(deserializer).map(|raw| Id(raw, PhantomData))
    }
}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

pub trait TypedId: Copy {
    fn zip(index: Index, epoch: Epoch) -> Self;
    fn unzip(self) -> (Index, Epoch);
}

impl<T> TypedId for Id<T> {
    fn zip(index: Index, epoch: Epoch) -> Self {
        Id(
            index as u64 | ((epoch as u64) << EPOCH_SHIFT),
            PhantomData,
        )
    }

    fn unzip(self) -> (Index, Epoch) {
        (self.0 as u32, (self.0 >> EPOCH_SHIFT) as u32)
    }
}

// Device
pub type DeviceId = Id<crate::device::Device>;
pub type ShaderModuleId = Id<crate::pipeline::ShaderModule>;
// Resource
pub type BufferId = Id<crate::resource::Buffer>;
pub type TextureId = Id<crate::resource::Texture>;
pub type TextureViewId = Id<crate::resource::TextureView>;
pub type SamplerId = Id<crate::resource::Sampler>;
pub type QuerySetId = Id<crate::resource::QuerySet>;
// Binding model
pub type BindGroupLayoutId = Id<crate::binding_model::BindGroupLayout>;
pub type PipelineLayoutId = Id<crate::binding_model::PipelineLayout>;
pub type BindGroupId = Id<crate::binding_model::BindGroup>;
// Pipeline
pub type RenderPipelineId = Id<crate::pipeline::RenderPipeline>;
pub type ComputePipelineId = Id<crate::pipeline::ComputePipeline>;
// Command
pub type CommandEncoderId = Id<crate::command::CommandEncoder>;
pub type RenderPassEncoderId = Id<crate::command::RenderPass>;
pub type ComputePassEncoderId = Id<crate::command::ComputePass>;
pub type RenderBundleEncoderId = Id<crate::command::RenderBundleEncoder>;
pub type RenderBundleId = Id<crate::command::RenderBundle>;

/// Any shadowed object, used to name the objects involved in a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    Device(DeviceId),
    ShaderModule(ShaderModuleId),
    Buffer(BufferId),
    Texture(TextureId),
    TextureView(TextureViewId),
    Sampler(SamplerId),
    QuerySet(QuerySetId),
    BindGroupLayout(BindGroupLayoutId),
    PipelineLayout(PipelineLayoutId),
    BindGroup(BindGroupId),
    RenderPipeline(RenderPipelineId),
    ComputePipeline(ComputePipelineId),
    CommandEncoder(CommandEncoderId),
    RenderPass(RenderPassEncoderId),
    ComputePass(ComputePassEncoderId),
    RenderBundleEncoder(RenderBundleEncoderId),
    RenderBundle(RenderBundleId),
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Device(id) => write!(f, "device {:?}", id),
            Self::ShaderModule(id) => write!(f, "shader module {:?}", id),
            Self::Buffer(id) => write!(f, "buffer {:?}", id),
            Self::Texture(id) => write!(f, "texture {:?}", id),
            Self::TextureView(id) => write!(f, "texture view {:?}", id),
            Self::Sampler(id) => write!(f, "sampler {:?}", id),
            Self::QuerySet(id) => write!(f, "query set {:?}", id),
            Self::BindGroupLayout(id) => write!(f, "bind group layout {:?}", id),
            Self::PipelineLayout(id) => write!(f, "pipeline layout {:?}", id),
            Self::BindGroup(id) => write!(f, "bind group {:?}", id),
            Self::RenderPipeline(id) => write!(f, "render pipeline {:?}", id),
            Self::ComputePipeline(id) => write!(f, "compute pipeline {:?}", id),
            Self::CommandEncoder(id) => write!(f, "command encoder {:?}", id),
            Self::RenderPass(id) => write!(f, "render pass {:?}", id),
            Self::ComputePass(id) => write!(f, "compute pass {:?}", id),
            Self::RenderBundleEncoder(id) => write!(f, "render bundle encoder {:?}", id),
            Self::RenderBundle(id) => write!(f, "render bundle {:?}", id),
        }
    }
}

macro_rules! impl_resource_ref {
    ($($variant:ident($id:ty)),* $(,)?) => {
        $(
            impl From<$id> for ResourceRef {
                fn from(id: $id) -> Self {
                    ResourceRef::$variant(id)
                }
            }
        )*
    };
}

impl_resource_ref!(
    Device(DeviceId),
    ShaderModule(ShaderModuleId),
    Buffer(BufferId),
    Texture(TextureId),
    TextureView(TextureViewId),
    Sampler(SamplerId),
    QuerySet(QuerySetId),
    BindGroupLayout(BindGroupLayoutId),
    PipelineLayout(PipelineLayoutId),
    BindGroup(BindGroupId),
    RenderPipeline(RenderPipelineId),
    ComputePipeline(ComputePipelineId),
    CommandEncoder(CommandEncoderId),
    RenderPass(RenderPassEncoderId),
    ComputePass(ComputePassEncoderId),
    RenderBundleEncoder(RenderBundleEncoderId),
    RenderBundle(RenderBundleId),
);

#[test]
fn test_id_roundtrip() {
    let id = BufferId::zip(7, 3);
    assert_eq!(id.unzip(), (7, 3));
    assert_ne!(id, BufferId::zip(7, 4));
    assert_eq!(format!("{:?}", id), "Id(7,3)");
}
