use std::{error::Error as StdError, fmt::Write as _};

use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    binding_model::{CreateBindGroupError, CreateBindGroupLayoutError, CreatePipelineLayoutError},
    command::{
        CommandEncoderError, ComputePassError, CreateRenderBundleError, QueryError,
        RenderBundleError, RenderPassError, TransferError,
    },
    device::DeviceError,
    id::ResourceRef,
    pipeline::{
        CreateComputePipelineError, CreateRenderPipelineError, CreateShaderModuleError,
        GetBindGroupLayoutError,
    },
    resource::{
        CreateBufferError, CreateQuerySetError, CreateTextureError, CreateTextureViewError,
        ResourceError,
    },
};

/// Coarse classification of a validation failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A recording call on an encoder that is not open.
    InvalidEncoderState,
    /// Use of a buffer, texture, query set or device after `destroy`.
    DestroyedResource,
    /// Objects from different devices used together.
    DeviceMismatch,
    /// Index, slot or offset outside of its allowed bounds.
    OutOfRange,
    /// A buffer too small for the declared access.
    SizeMismatch,
    /// Pipeline or bundle incompatible with a pass, or a bind group
    /// incompatible with the pipeline layout.
    LayoutIncompatible,
    /// Subresource aliasing, query reuse or overlapping queries.
    AlreadyInUse,
    /// No pipeline, bind group, index buffer or vertex buffer where one is required.
    MissingBinding,
    /// Argument shape or alignment is wrong.
    MalformedArguments,
    /// The id does not refer to a live shadow record.
    InvalidResource,
}

/// Objects involved in a failure, most specific first.
pub type RelatedObjects = SmallVec<[ResourceRef; 4]>;

/// Classification shared by every error type of the crate.
pub trait ErrorDetail {
    fn kind(&self) -> ErrorKind;

    fn collect_related(&self, _related: &mut RelatedObjects) {}
}

macro_rules! define_error {
    ($($variant:ident($inner:ty)),* $(,)?) => {
        /// Any failure reported by a [`ValidationContext`](crate::ValidationContext).
        #[derive(Clone, Debug, Error)]
        pub enum Error {
            $(
                #[error(transparent)]
                $variant(#[from] $inner),
            )*
        }

        impl Error {
            pub fn kind(&self) -> ErrorKind {
                match *self {
                    $(Self::$variant(ref e) => ErrorDetail::kind(e),)*
                }
            }

            /// The objects involved in the failure, without duplicates.
            pub fn related(&self) -> RelatedObjects {
                let mut related = RelatedObjects::new();
                match *self {
                    $(Self::$variant(ref e) => e.collect_related(&mut related),)*
                }
                let mut unique = RelatedObjects::new();
                for res in related {
                    if !unique.contains(&res) {
                        unique.push(res);
                    }
                }
                unique
            }
        }
    };
}

define_error!(
    Resource(ResourceError),
    Device(DeviceError),
    CreateBuffer(CreateBufferError),
    CreateTexture(CreateTextureError),
    CreateTextureView(CreateTextureViewError),
    CreateQuerySet(CreateQuerySetError),
    CreateShaderModule(CreateShaderModuleError),
    CreateBindGroupLayout(CreateBindGroupLayoutError),
    CreatePipelineLayout(CreatePipelineLayoutError),
    CreateBindGroup(CreateBindGroupError),
    CreateRenderPipeline(CreateRenderPipelineError),
    CreateComputePipeline(CreateComputePipelineError),
    GetBindGroupLayout(GetBindGroupLayoutError),
    CreateRenderBundleEncoder(CreateRenderBundleError),
    CommandEncoder(CommandEncoderError),
    RenderPass(RenderPassError),
    ComputePass(ComputePassError),
    RenderBundle(RenderBundleError),
    Transfer(TransferError),
    Query(QueryError),
);

impl Error {
    /// The full human readable message, one line per error in the chain.
    pub fn message(&self) -> String {
        format_error_chain(self)
    }
}

/// Render an error and all of its sources, innermost last.
pub fn format_error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut output = String::new();
    let mut current = Some(error);
    let mut depth = 0;
    while let Some(err) = current {
        let _ = writeln!(output, "{:indent$}{}", "", err, indent = 4 + depth * 2);
        depth += 1;
        current = err.source();
    }
    output
}

/// The single path by which validation failures become observable.
pub trait ErrorSink {
    fn report(&mut self, error: &Error);
}

impl<F: FnMut(&Error)> ErrorSink for F {
    fn report(&mut self, error: &Error) {
        self(error)
    }
}

/// Sink that logs every failure through the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&mut self, error: &Error) {
        let related = error.related();
        log::error!(
            "Validation error ({:?}):\n{}related: {:?}",
            error.kind(),
            error.message(),
            related.as_slice()
        );
    }
}
