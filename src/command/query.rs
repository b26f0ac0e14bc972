use crate::{
    api_log,
    command::{check_open, EncoderStateError},
    error::{ErrorDetail, ErrorKind, RelatedObjects},
    global::ValidationContext,
    hub::Hub,
    id,
    resource::{QuerySet, ResourceError},
    validation::{check_buffer_usage, MissingBufferUsageError},
    Error,
};

use thiserror::Error;
use wgt::{BufferAddress, BufferUsages};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimplifiedQueryType {
    Occlusion,
    Timestamp,
    PipelineStatistics,
}

impl From<wgt::QueryType> for SimplifiedQueryType {
    fn from(q: wgt::QueryType) -> Self {
        match q {
            wgt::QueryType::Occlusion => SimplifiedQueryType::Occlusion,
            wgt::QueryType::Timestamp => SimplifiedQueryType::Timestamp,
            wgt::QueryType::PipelineStatistics(..) => SimplifiedQueryType::PipelineStatistics,
        }
    }
}

/// Describes the timestamp writes of a render or compute pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassTimestampWrites {
    /// The query set to write the timestamps to.
    pub query_set: id::QuerySetId,
    /// The index of the query set at which a start timestamp of this pass is written, if any.
    pub beginning_of_pass_write_index: Option<u32>,
    /// The index of the query set at which an end timestamp of this pass is written, if any.
    pub end_of_pass_write_index: Option<u32>,
}

/// Error encountered while trying to use queries
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueryUseError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Query {query_index} is out of bounds for query set {query_set:?} of size {query_set_size}")]
    OutOfBounds {
        query_set: id::QuerySetId,
        query_index: u32,
        query_set_size: u32,
    },
    #[error("Query {query_index} has already been used within the same renderpass. Queries must only be used once per renderpass")]
    UsedTwiceInsideRenderpass { query_index: u32 },
    #[error("Query {new_query_index} was started while query {active_query_index} was already active. No more than one occlusion query may be active at once")]
    AlreadyStarted {
        active_query_index: u32,
        new_query_index: u32,
    },
    #[error("Query was stopped while there was no active query")]
    AlreadyStopped,
    #[error("A query of type {query_type:?} was started using query set {query_set:?} of type {set_type:?}")]
    IncompatibleType {
        query_set: id::QuerySetId,
        set_type: SimplifiedQueryType,
        query_type: SimplifiedQueryType,
    },
    #[error("An occlusion query was started, but the pass has no occlusion query set")]
    MissingOcclusionQuerySet,
    #[error("Timestamp writes must set a beginning or end of pass write index")]
    MissingTimestampWriteIndices,
    #[error("Beginning and end of pass timestamps are both written to query {0}")]
    IdenticalTimestampWriteIndices(u32),
}

impl ErrorDetail for QueryUseError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::OutOfBounds { .. } => ErrorKind::OutOfRange,
            Self::UsedTwiceInsideRenderpass { .. } | Self::AlreadyStarted { .. } => {
                ErrorKind::AlreadyInUse
            }
            Self::MissingOcclusionQuerySet => ErrorKind::MissingBinding,
            Self::AlreadyStopped
            | Self::IncompatibleType { .. }
            | Self::MissingTimestampWriteIndices
            | Self::IdenticalTimestampWriteIndices(_) => ErrorKind::MalformedArguments,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        match *self {
            Self::Resource(ref e) => e.collect_related(related),
            Self::OutOfBounds { query_set, .. } | Self::IncompatibleType { query_set, .. } => {
                related.push(query_set.into())
            }
            _ => {}
        }
    }
}

/// Error encountered while trying to resolve a query.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    MissingBufferUsage(#[from] MissingBufferUsageError),
    #[error("Resolve buffer offset has to be aligned to `QUERY_RESOLVE_BUFFER_ALIGNMENT`, got {0}")]
    BufferOffsetAlignment(BufferAddress),
    #[error("Resolving queries {start_query}..{end_query} would overrun the query set of size {query_set_size}")]
    QueryOverrun {
        start_query: u32,
        end_query: u32,
        query_set_size: u32,
    },
    #[error("Resolving queries {start_query}..{end_query} ({stride} byte queries) will end up overrunning the bounds of the destination buffer of size {buffer_size} using offsets {buffer_start_offset}..{buffer_end_offset}")]
    BufferOverrun {
        start_query: u32,
        end_query: u32,
        stride: u32,
        buffer_size: BufferAddress,
        buffer_start_offset: BufferAddress,
        buffer_end_offset: BufferAddress,
    },
}

impl ErrorDetail for ResolveError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::MissingBufferUsage(ref e) => e.kind(),
            Self::BufferOffsetAlignment(_) => ErrorKind::MalformedArguments,
            Self::QueryOverrun { .. } => ErrorKind::OutOfRange,
            Self::BufferOverrun { .. } => ErrorKind::SizeMismatch,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::MissingBufferUsage(ref e) = *self {
            e.collect_related(related);
        }
    }
}

/// Error encountered when dealing with queries
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    State(#[from] EncoderStateError),
    #[error("Error encountered while trying to use queries")]
    Use(#[from] QueryUseError),
    #[error("Error encountered while trying to resolve a query")]
    Resolve(#[from] ResolveError),
}

impl ErrorDetail for QueryError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::State(ref e) => e.kind(),
            Self::Use(ref e) => e.kind(),
            Self::Resolve(ref e) => e.kind(),
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        match *self {
            Self::Resource(ref e) => e.collect_related(related),
            Self::State(ref e) => e.collect_related(related),
            Self::Use(ref e) => e.collect_related(related),
            Self::Resolve(ref e) => e.collect_related(related),
        }
    }
}

impl QuerySet {
    pub(crate) fn validate_query(
        &self,
        query_set_id: id::QuerySetId,
        query_type: SimplifiedQueryType,
        query_index: u32,
    ) -> Result<(), QueryUseError> {
        let set_type = SimplifiedQueryType::from(self.ty);
        if set_type != query_type {
            return Err(QueryUseError::IncompatibleType {
                query_set: query_set_id,
                set_type,
                query_type,
            });
        }

        if query_index >= self.count {
            return Err(QueryUseError::OutOfBounds {
                query_set: query_set_id,
                query_index,
                query_set_size: self.count,
            });
        }

        Ok(())
    }
}

/// Validate the timestamp writes of a pass about to begin on `device_id`.
pub(crate) fn validate_timestamp_writes(
    hub: &Hub,
    device_id: id::DeviceId,
    tw: &PassTimestampWrites,
) -> Result<(), QueryUseError> {
    let query_set = hub.query_sets.get_usable(tw.query_set, device_id)?;

    let indices = [tw.beginning_of_pass_write_index, tw.end_of_pass_write_index];
    if indices.iter().all(Option::is_none) {
        return Err(QueryUseError::MissingTimestampWriteIndices);
    }
    if let [Some(begin), Some(end)] = indices {
        if begin == end {
            return Err(QueryUseError::IdenticalTimestampWriteIndices(begin));
        }
    }
    for index in indices.into_iter().flatten() {
        query_set.validate_query(tw.query_set, SimplifiedQueryType::Timestamp, index)?;
    }
    Ok(())
}

impl ValidationContext {
    pub fn command_encoder_resolve_query_set(
        &mut self,
        command_encoder_id: id::CommandEncoderId,
        query_set_id: id::QuerySetId,
        start_query: u32,
        query_count: u32,
        destination: id::BufferId,
        destination_offset: BufferAddress,
    ) -> Result<(), Error> {
        profiling::scope!("CommandEncoder::resolve_query_set");
        api_log!(
            "CommandEncoder::resolve_query_set {:?} {:?} {}..+{} -> {:?} @ {}",
            command_encoder_id,
            query_set_id,
            start_query,
            query_count,
            destination,
            destination_offset
        );

        let result = (|| -> Result<(), QueryError> {
            let encoder = self.encoders.command_encoders.get(command_encoder_id)?;
            check_open(encoder.state, command_encoder_id)?;
            let device_id = encoder.info.device_id(command_encoder_id.into())?;

            let query_set = self.hub.query_sets.get_usable(query_set_id, device_id)?;
            let dst_buffer = self.hub.buffers.get_usable(destination, device_id)?;
            check_buffer_usage(destination, dst_buffer.usage, BufferUsages::QUERY_RESOLVE)
                .map_err(ResolveError::MissingBufferUsage)?;

            if destination_offset % wgt::QUERY_RESOLVE_BUFFER_ALIGNMENT != 0 {
                return Err(ResolveError::BufferOffsetAlignment(destination_offset).into());
            }

            let end_query = start_query as u64 + query_count as u64;
            if end_query > query_set.count as u64 {
                return Err(ResolveError::QueryOverrun {
                    start_query,
                    end_query: end_query as u32,
                    query_set_size: query_set.count,
                }
                .into());
            }

            let elements_per_query = match query_set.ty {
                wgt::QueryType::PipelineStatistics(ps) => ps.bits().count_ones(),
                wgt::QueryType::Timestamp | wgt::QueryType::Occlusion => 1,
            };
            let stride = elements_per_query * wgt::QUERY_SIZE;
            let bytes_used = (stride as BufferAddress) * query_count as BufferAddress;
            let buffer_end_offset = destination_offset + bytes_used;
            if buffer_end_offset > dst_buffer.size {
                return Err(ResolveError::BufferOverrun {
                    start_query,
                    end_query: end_query as u32,
                    stride,
                    buffer_size: dst_buffer.size,
                    buffer_start_offset: destination_offset,
                    buffer_end_offset,
                }
                .into());
            }
            Ok(())
        })();
        self.report(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::DeviceDescriptor,
        resource::{BufferDescriptor, QuerySetDescriptor},
        ErrorKind,
    };

    fn setup(ty: wgt::QueryType) -> (ValidationContext, id::DeviceId, id::QuerySetId) {
        let mut ctx = ValidationContext::new();
        let device = ctx.device_create(&DeviceDescriptor::default()).unwrap();
        let query_set = ctx
            .device_create_query_set(
                device,
                &QuerySetDescriptor {
                    label: None,
                    ty,
                    count: 4,
                },
            )
            .unwrap();
        (ctx, device, query_set)
    }

    #[test]
    fn timestamp_write_indices() {
        let (ctx, device, query_set) = setup(wgt::QueryType::Timestamp);
        let writes = |begin, end| PassTimestampWrites {
            query_set,
            beginning_of_pass_write_index: begin,
            end_of_pass_write_index: end,
        };
        assert!(validate_timestamp_writes(&ctx.hub, device, &writes(Some(0), Some(3))).is_ok());
        assert_eq!(
            validate_timestamp_writes(&ctx.hub, device, &writes(None, None)),
            Err(QueryUseError::MissingTimestampWriteIndices)
        );
        assert_eq!(
            validate_timestamp_writes(&ctx.hub, device, &writes(Some(1), Some(1))),
            Err(QueryUseError::IdenticalTimestampWriteIndices(1))
        );
        let err = validate_timestamp_writes(&ctx.hub, device, &writes(None, Some(4))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn timestamps_need_a_timestamp_set() {
        let (ctx, device, query_set) = setup(wgt::QueryType::Occlusion);
        let err = validate_timestamp_writes(
            &ctx.hub,
            device,
            &PassTimestampWrites {
                query_set,
                beginning_of_pass_write_index: Some(0),
                end_of_pass_write_index: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, QueryUseError::IncompatibleType { .. }));
    }

    #[test]
    fn resolve_bounds() {
        let (mut ctx, device, query_set) = setup(wgt::QueryType::Occlusion);
        let buffer = ctx
            .device_create_buffer(
                device,
                &BufferDescriptor {
                    label: None,
                    size: 512,
                    usage: BufferUsages::QUERY_RESOLVE,
                    mapped_at_creation: false,
                },
            )
            .unwrap();
        let encoder = ctx
            .device_create_command_encoder(device, &Default::default())
            .unwrap();

        ctx.command_encoder_resolve_query_set(encoder, query_set, 0, 4, buffer, 256)
            .unwrap();
        let err = ctx
            .command_encoder_resolve_query_set(encoder, query_set, 0, 4, buffer, 8)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
        let err = ctx
            .command_encoder_resolve_query_set(encoder, query_set, 2, 3, buffer, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);

        ctx.query_set_destroy(query_set).unwrap();
        let err = ctx
            .command_encoder_resolve_query_set(encoder, query_set, 0, 1, buffer, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestroyedResource);
    }
}
