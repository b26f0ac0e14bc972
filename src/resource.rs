use crate::{
    error::{ErrorDetail, ErrorKind, RelatedObjects},
    id::{DeviceId, ResourceRef, TextureId, TypedId},
    storage::Storage,
    Label, LabelHelpers,
};

use std::ops::Range;
use thiserror::Error;
use wgt::{BufferAddress, BufferUsages, TextureFormat};

/// Failure to use a shadowed object at all.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("{0} is invalid or has been dropped")]
    Invalid(ResourceRef),
    #[error("{0} has been destroyed")]
    Destroyed(ResourceRef),
    #[error("{res} belongs to device {actual:?}, but device {expected:?} was expected")]
    DeviceMismatch {
        res: ResourceRef,
        actual: DeviceId,
        expected: DeviceId,
    },
    #[error("{0} has no owning device")]
    Unowned(ResourceRef),
}

impl ResourceError {
    pub fn resource(&self) -> ResourceRef {
        match *self {
            Self::Invalid(res)
            | Self::Destroyed(res)
            | Self::DeviceMismatch { res, .. }
            | Self::Unowned(res) => res,
        }
    }
}

impl ErrorDetail for ResourceError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Invalid(_) | Self::Unowned(_) => ErrorKind::InvalidResource,
            Self::Destroyed(_) => ErrorKind::DestroyedResource,
            Self::DeviceMismatch { .. } => ErrorKind::DeviceMismatch,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        related.push(self.resource());
        if let Self::DeviceMismatch {
            actual, expected, ..
        } = *self
        {
            related.push(actual.into());
            related.push(expected.into());
        }
    }
}

/// Shadow attributes shared by every device-owned object.
#[derive(Debug)]
pub struct ResourceInfo {
    label: String,
    device: Option<DeviceId>,
    destroyed: bool,
}

impl ResourceInfo {
    pub(crate) fn new(label: &Label, device: DeviceId) -> Self {
        Self {
            label: label.borrow_or_default().to_string(),
            device: Some(device),
            destroyed: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Record the owning device. Ownership is set once and never reassigned.
    pub fn bind_device(&mut self, res: ResourceRef, device: DeviceId) -> Result<(), ResourceError> {
        match self.device {
            None => {
                self.device = Some(device);
                Ok(())
            }
            Some(actual) if actual == device => Ok(()),
            Some(actual) => Err(ResourceError::DeviceMismatch {
                res,
                actual,
                expected: device,
            }),
        }
    }

    pub fn device_id(&self, res: ResourceRef) -> Result<DeviceId, ResourceError> {
        self.device.ok_or(ResourceError::Unowned(res))
    }

    pub(crate) fn check_device(
        &self,
        res: ResourceRef,
        expected: DeviceId,
    ) -> Result<(), ResourceError> {
        let actual = self.device_id(res)?;
        if actual != expected {
            return Err(ResourceError::DeviceMismatch {
                res,
                actual,
                expected,
            });
        }
        Ok(())
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub(crate) fn check_not_destroyed(&self, res: ResourceRef) -> Result<(), ResourceError> {
        if self.destroyed {
            Err(ResourceError::Destroyed(res))
        } else {
            Ok(())
        }
    }
}

pub(crate) trait Resource {
    const TYPE: &'static str;

    fn info(&self) -> &ResourceInfo;
    fn info_mut(&mut self) -> &mut ResourceInfo;
}

macro_rules! impl_resource {
    ($($ty:ident),* $(,)?) => {
        $(
            impl Resource for $ty {
                const TYPE: &'static str = stringify!($ty);

                fn info(&self) -> &ResourceInfo {
                    &self.info
                }

                fn info_mut(&mut self) -> &mut ResourceInfo {
                    &mut self.info
                }
            }
        )*
    };
}
pub(crate) use impl_resource;

impl<T: Resource, I: TypedId + Into<ResourceRef>> Storage<T, I> {
    /// Look up a resource that must belong to `device`.
    pub(crate) fn get_on_device(&self, id: I, device: DeviceId) -> Result<&T, ResourceError> {
        let value = self.get(id)?;
        value.info().check_device(id.into(), device)?;
        Ok(value)
    }

    /// Look up a resource that must belong to `device` and must not be destroyed.
    pub(crate) fn get_usable(&self, id: I, device: DeviceId) -> Result<&T, ResourceError> {
        let value = self.get_on_device(id, device)?;
        value.info().check_not_destroyed(id.into())?;
        Ok(value)
    }

    /// Look up a resource that must not be destroyed, whatever its device.
    pub(crate) fn get_alive(&self, id: I) -> Result<&T, ResourceError> {
        let value = self.get(id)?;
        value.info().check_not_destroyed(id.into())?;
        Ok(value)
    }

    pub(crate) fn mark_destroyed(&mut self, id: I) -> Result<(), ResourceError> {
        let value = self.get_mut(id)?;
        if !value.info().is_destroyed() {
            log::debug!("Destroying {} {:?}", T::TYPE, id.into());
        }
        value.info_mut().mark_destroyed();
        Ok(())
    }
}

pub type BufferDescriptor<'a> = wgt::BufferDescriptor<Label<'a>>;

#[derive(Debug)]
pub struct Buffer {
    pub(crate) info: ResourceInfo,
    pub(crate) size: BufferAddress,
    pub(crate) usage: BufferUsages,
}

impl Buffer {
    pub fn size(&self) -> BufferAddress {
        self.size
    }

    pub fn usage(&self) -> BufferUsages {
        self.usage
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum CreateBufferError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Buffers that are mapped at creation have to be aligned to `COPY_BUFFER_ALIGNMENT`")]
    UnalignedSize,
    #[error("Buffer usage must not be empty")]
    EmptyUsage,
    #[error("`MAP` usage can only be combined with the opposite `COPY`, requested {0:?}")]
    UsageMismatch(BufferUsages),
}

impl ErrorDetail for CreateBufferError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::UnalignedSize | Self::EmptyUsage | Self::UsageMismatch(_) => {
                ErrorKind::MalformedArguments
            }
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::Resource(ref e) = *self {
            e.collect_related(related);
        }
    }
}

pub type TextureDescriptor<'a> = wgt::TextureDescriptor<Label<'a>, Vec<TextureFormat>>;

#[derive(Debug)]
pub struct Texture {
    pub(crate) info: ResourceInfo,
    pub(crate) size: wgt::Extent3d,
    pub(crate) mip_level_count: u32,
    pub(crate) sample_count: u32,
    pub(crate) dimension: wgt::TextureDimension,
    pub(crate) format: TextureFormat,
    pub(crate) usage: wgt::TextureUsages,
    pub(crate) view_formats: Vec<TextureFormat>,
}

impl Texture {
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Size of the given mip level.
    pub(crate) fn mip_level_size(&self, level: u32) -> wgt::Extent3d {
        wgt::Extent3d {
            width: (self.size.width >> level).max(1),
            height: (self.size.height >> level).max(1),
            depth_or_array_layers: match self.dimension {
                wgt::TextureDimension::D3 => (self.size.depth_or_array_layers >> level).max(1),
                _ => self.size.depth_or_array_layers,
            },
        }
    }

    pub(crate) fn array_layer_count(&self) -> u32 {
        match self.dimension {
            wgt::TextureDimension::D3 => 1,
            _ => self.size.depth_or_array_layers,
        }
    }
}

/// Number of mip levels in a full chain for the given size.
pub(crate) fn max_mips(dimension: wgt::TextureDimension, size: &wgt::Extent3d) -> u32 {
    let max_dim = match dimension {
        wgt::TextureDimension::D1 => 1,
        wgt::TextureDimension::D2 => size.width.max(size.height),
        wgt::TextureDimension::D3 => size.width.max(size.height).max(size.depth_or_array_layers),
    };
    32 - max_dim.leading_zeros()
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum CreateTextureError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Texture dimensions {0:?} must be non-zero")]
    ZeroSize(wgt::Extent3d),
    #[error("Texture usage must not be empty")]
    EmptyUsage,
    #[error("Requested mip level count {requested} is outside of the range 1..={maximum}")]
    InvalidMipLevelCount { requested: u32, maximum: u32 },
    #[error("Sample count {0} is not supported for format {1:?}")]
    InvalidSampleCount(u32, TextureFormat),
    #[error("Multisampled textures must be 2D with a single mip level")]
    InvalidMultisampledTexture,
    #[error("Format {view:?} cannot be used as a view format of a {texture:?} texture")]
    InvalidViewFormat {
        view: TextureFormat,
        texture: TextureFormat,
    },
}

impl ErrorDetail for CreateTextureError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::ZeroSize(_) | Self::InvalidMipLevelCount { .. } => ErrorKind::OutOfRange,
            Self::EmptyUsage
            | Self::InvalidSampleCount(..)
            | Self::InvalidMultisampledTexture
            | Self::InvalidViewFormat { .. } => ErrorKind::MalformedArguments,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::Resource(ref e) = *self {
            e.collect_related(related);
        }
    }
}

/// Describes a [`TextureView`]. Unset fields are resolved from the parent
/// texture when the view is created.
#[derive(Clone, Debug, Default)]
pub struct TextureViewDescriptor<'a> {
    pub label: Label<'a>,
    pub format: Option<TextureFormat>,
    pub dimension: Option<wgt::TextureViewDimension>,
    pub base_mip_level: u32,
    pub mip_level_count: Option<u32>,
    pub base_array_layer: u32,
    pub array_layer_count: Option<u32>,
}

#[derive(Debug)]
pub struct TextureView {
    pub(crate) info: ResourceInfo,
    pub(crate) parent: TextureId,
    pub(crate) format: TextureFormat,
    pub(crate) dimension: wgt::TextureViewDimension,
    pub(crate) mips: Range<u32>,
    pub(crate) layers: Range<u32>,
    /// Size of the base mip level of the view.
    pub(crate) extent: wgt::Extent3d,
    pub(crate) samples: u32,
}

impl TextureView {
    pub fn parent(&self) -> TextureId {
        self.parent
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn mip_levels(&self) -> Range<u32> {
        self.mips.clone()
    }

    pub fn array_layers(&self) -> Range<u32> {
        self.layers.clone()
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum CreateTextureViewError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Mip levels {base}..{base}+{count} are outside of the texture's {total} levels")]
    InvalidMipRange { base: u32, count: u32, total: u32 },
    #[error("Array layers {base}..{base}+{count} are outside of the texture's {total} layers")]
    InvalidArrayLayerRange { base: u32, count: u32, total: u32 },
    #[error("Cannot create a {view:?} view of a {texture:?} texture")]
    InvalidDimension {
        view: wgt::TextureViewDimension,
        texture: wgt::TextureDimension,
    },
    #[error("Cube views need a multiple of 6 array layers, got {0}")]
    InvalidCubeLayerCount(u32),
    #[error("Format {view:?} is not {texture:?} or one of the texture's view formats")]
    FormatReinterpretation {
        texture: TextureFormat,
        view: TextureFormat,
    },
}

impl ErrorDetail for CreateTextureViewError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::InvalidMipRange { .. } | Self::InvalidArrayLayerRange { .. } => {
                ErrorKind::OutOfRange
            }
            Self::InvalidDimension { .. }
            | Self::InvalidCubeLayerCount(_)
            | Self::FormatReinterpretation { .. } => ErrorKind::MalformedArguments,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::Resource(ref e) = *self {
            e.collect_related(related);
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SamplerDescriptor<'a> {
    pub label: Label<'a>,
    pub mag_filter: wgt::FilterMode,
    pub min_filter: wgt::FilterMode,
    pub mipmap_filter: wgt::FilterMode,
    pub compare: Option<wgt::CompareFunction>,
}

#[derive(Debug)]
pub struct Sampler {
    pub(crate) info: ResourceInfo,
    pub(crate) comparison: bool,
    pub(crate) filtering: bool,
}

pub type QuerySetDescriptor<'a> = wgt::QuerySetDescriptor<Label<'a>>;

/// Largest number of queries a query set may hold.
pub const QUERY_SET_MAX_QUERIES: u32 = 4096;

#[derive(Debug)]
pub struct QuerySet {
    pub(crate) info: ResourceInfo,
    pub(crate) ty: wgt::QueryType,
    pub(crate) count: u32,
}

impl QuerySet {
    pub fn count(&self) -> u32 {
        self.count
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum CreateQuerySetError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Query sets must hold between 1 and {maximum} queries, requested {count}")]
    InvalidCount { count: u32, maximum: u32 },
}

impl ErrorDetail for CreateQuerySetError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::InvalidCount { .. } => ErrorKind::OutOfRange,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::Resource(ref e) = *self {
            e.collect_related(related);
        }
    }
}

impl_resource!(Buffer, Texture, TextureView, Sampler, QuerySet);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_is_bound_once() {
        let first = DeviceId::zip(0, 1);
        let second = DeviceId::zip(1, 1);
        let res = ResourceRef::Buffer(crate::id::BufferId::zip(0, 1));
        let mut info = ResourceInfo::new(&None, first);
        assert_eq!(info.bind_device(res, first), Ok(()));
        let err = info.bind_device(res, second).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceMismatch);
        assert_eq!(info.device_id(res), Ok(first));
    }

    #[test]
    fn destroyed_flag_is_sticky() {
        let device = DeviceId::zip(0, 1);
        let res = ResourceRef::Buffer(crate::id::BufferId::zip(0, 1));
        let mut info = ResourceInfo::new(&None, device);
        assert!(info.check_not_destroyed(res).is_ok());
        info.mark_destroyed();
        info.mark_destroyed();
        assert_eq!(info.check_not_destroyed(res), Err(ResourceError::Destroyed(res)));
    }

    #[test]
    fn full_mip_chain() {
        let size = wgt::Extent3d {
            width: 256,
            height: 64,
            depth_or_array_layers: 1,
        };
        assert_eq!(max_mips(wgt::TextureDimension::D2, &size), 9);
        assert_eq!(max_mips(wgt::TextureDimension::D1, &size), 1);
    }
}
