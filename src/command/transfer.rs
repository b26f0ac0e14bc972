use crate::{
    api_log,
    command::{check_open, EncoderStateError},
    error::{ErrorDetail, ErrorKind, RelatedObjects},
    global::ValidationContext,
    id::{BufferId, CommandEncoderId},
    resource::ResourceError,
    validation::{check_buffer_usage, MissingBufferUsageError},
    Error,
};

use thiserror::Error;
use wgt::{BufferAddress, BufferSize, BufferUsages, COPY_BUFFER_ALIGNMENT};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CopySide {
    Source,
    Destination,
}

/// Error encountered while attempting a data transfer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    State(#[from] EncoderStateError),
    #[error(transparent)]
    MissingBufferUsage(#[from] MissingBufferUsageError),
    #[error("Source and destination cannot be the same buffer")]
    SameSourceDestinationBuffer,
    #[error("Copy size {0} does not respect `COPY_BUFFER_ALIGNMENT`")]
    UnalignedCopySize(BufferAddress),
    #[error("Copy offset {0} does not respect `COPY_BUFFER_ALIGNMENT`")]
    UnalignedBufferOffset(BufferAddress),
    #[error("Copy of {start_offset}..{end_offset} would end up overrunning the bounds of the {side:?} buffer of size {buffer_size}")]
    BufferOverrun {
        buffer: BufferId,
        start_offset: BufferAddress,
        end_offset: BufferAddress,
        buffer_size: BufferAddress,
        side: CopySide,
    },
}

impl ErrorDetail for TransferError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::State(ref e) => e.kind(),
            Self::MissingBufferUsage(ref e) => e.kind(),
            Self::SameSourceDestinationBuffer
            | Self::UnalignedCopySize(_)
            | Self::UnalignedBufferOffset(_) => ErrorKind::MalformedArguments,
            Self::BufferOverrun { .. } => ErrorKind::SizeMismatch,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        match *self {
            Self::Resource(ref e) => e.collect_related(related),
            Self::State(ref e) => e.collect_related(related),
            Self::MissingBufferUsage(ref e) => e.collect_related(related),
            Self::BufferOverrun { buffer, .. } => related.push(buffer.into()),
            Self::SameSourceDestinationBuffer
            | Self::UnalignedCopySize(_)
            | Self::UnalignedBufferOffset(_) => {}
        }
    }
}

fn check_range(
    buffer: BufferId,
    offset: BufferAddress,
    size: BufferAddress,
    buffer_size: BufferAddress,
    side: CopySide,
) -> Result<(), TransferError> {
    let end_offset = offset.saturating_add(size);
    if end_offset > buffer_size {
        return Err(TransferError::BufferOverrun {
            buffer,
            start_offset: offset,
            end_offset,
            buffer_size,
            side,
        });
    }
    Ok(())
}

impl ValidationContext {
    pub fn command_encoder_copy_buffer_to_buffer(
        &mut self,
        encoder_id: CommandEncoderId,
        source: BufferId,
        source_offset: BufferAddress,
        destination: BufferId,
        destination_offset: BufferAddress,
        size: BufferAddress,
    ) -> Result<(), Error> {
        profiling::scope!("CommandEncoder::copy_buffer_to_buffer");
        api_log!(
            "CommandEncoder::copy_buffer_to_buffer {:?} {:?}:{} -> {:?}:{} ({} bytes)",
            encoder_id,
            source,
            source_offset,
            destination,
            destination_offset,
            size
        );

        let result = (|| -> Result<(), TransferError> {
            let encoder = self.encoders.command_encoders.get(encoder_id)?;
            check_open(encoder.state, encoder_id)?;
            let device_id = encoder.info.device_id(encoder_id.into())?;

            if source == destination {
                return Err(TransferError::SameSourceDestinationBuffer);
            }
            let src = self.hub.buffers.get_usable(source, device_id)?;
            check_buffer_usage(source, src.usage, BufferUsages::COPY_SRC)?;
            let dst = self.hub.buffers.get_usable(destination, device_id)?;
            check_buffer_usage(destination, dst.usage, BufferUsages::COPY_DST)?;

            if size % COPY_BUFFER_ALIGNMENT != 0 {
                return Err(TransferError::UnalignedCopySize(size));
            }
            for &offset in &[source_offset, destination_offset] {
                if offset % COPY_BUFFER_ALIGNMENT != 0 {
                    return Err(TransferError::UnalignedBufferOffset(offset));
                }
            }
            check_range(source, source_offset, size, src.size, CopySide::Source)?;
            check_range(
                destination,
                destination_offset,
                size,
                dst.size,
                CopySide::Destination,
            )?;

            if size == 0 {
                log::trace!("Ignoring copy_buffer_to_buffer of size 0");
            }
            Ok(())
        })();
        self.report(result)
    }

    /// Validate clearing `size` bytes of a buffer from `offset`, or
    /// everything after `offset` when `size` is `None`.
    pub fn command_encoder_clear_buffer(
        &mut self,
        encoder_id: CommandEncoderId,
        buffer_id: BufferId,
        offset: BufferAddress,
        size: Option<BufferSize>,
    ) -> Result<(), Error> {
        profiling::scope!("CommandEncoder::clear_buffer");
        api_log!(
            "CommandEncoder::clear_buffer {:?} {:?} {} {:?}",
            encoder_id,
            buffer_id,
            offset,
            size
        );

        let result = (|| -> Result<(), TransferError> {
            let encoder = self.encoders.command_encoders.get(encoder_id)?;
            check_open(encoder.state, encoder_id)?;
            let device_id = encoder.info.device_id(encoder_id.into())?;

            let buffer = self.hub.buffers.get_usable(buffer_id, device_id)?;
            check_buffer_usage(buffer_id, buffer.usage, BufferUsages::COPY_DST)?;

            if offset % COPY_BUFFER_ALIGNMENT != 0 {
                return Err(TransferError::UnalignedBufferOffset(offset));
            }
            let size = match size {
                Some(size) => {
                    if size.get() % COPY_BUFFER_ALIGNMENT != 0 {
                        return Err(TransferError::UnalignedCopySize(size.get()));
                    }
                    size.get()
                }
                None => buffer.size.saturating_sub(offset),
            };
            check_range(buffer_id, offset, size, buffer.size, CopySide::Destination)?;
            Ok(())
        })();
        self.report(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::CommandEncoderDescriptor, device::DeviceDescriptor, id::ResourceRef,
        resource::BufferDescriptor,
    };

    struct Setup {
        ctx: ValidationContext,
        encoder: CommandEncoderId,
        src: BufferId,
        dst: BufferId,
    }

    fn setup() -> Setup {
        let mut ctx = ValidationContext::new();
        let device = ctx.device_create(&DeviceDescriptor::default()).unwrap();
        let encoder = ctx
            .device_create_command_encoder(device, &CommandEncoderDescriptor::default())
            .unwrap();
        let mut buffer = |usage| {
            ctx.device_create_buffer(
                device,
                &BufferDescriptor {
                    label: None,
                    size: 64,
                    usage,
                    mapped_at_creation: false,
                },
            )
            .unwrap()
        };
        let src = buffer(BufferUsages::COPY_SRC);
        let dst = buffer(BufferUsages::COPY_DST);
        Setup {
            ctx,
            encoder,
            src,
            dst,
        }
    }

    #[test]
    fn copy_checks() {
        let Setup {
            mut ctx,
            encoder,
            src,
            dst,
        } = setup();
        ctx.command_encoder_copy_buffer_to_buffer(encoder, src, 0, dst, 32, 32)
            .unwrap();

        let err = ctx
            .command_encoder_copy_buffer_to_buffer(encoder, src, 0, dst, 36, 32)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        assert_eq!(err.related().as_slice(), &[ResourceRef::Buffer(dst)]);

        let err = ctx
            .command_encoder_copy_buffer_to_buffer(encoder, dst, 0, src, 0, 4)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
        assert_eq!(err.related().as_slice(), &[ResourceRef::Buffer(dst)]);

        let err = ctx
            .command_encoder_copy_buffer_to_buffer(encoder, src, 2, dst, 0, 4)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
    }

    #[test]
    fn destroyed_copy_source() {
        let Setup {
            mut ctx,
            encoder,
            src,
            dst,
        } = setup();
        ctx.buffer_destroy(src).unwrap();
        let err = ctx
            .command_encoder_copy_buffer_to_buffer(encoder, src, 0, dst, 0, 4)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestroyedResource);
    }

    #[test]
    fn clear_to_end() {
        let Setup {
            mut ctx,
            encoder,
            src,
            dst,
        } = setup();
        ctx.command_encoder_clear_buffer(encoder, dst, 16, None)
            .unwrap();
        assert!(ctx.command_encoder_clear_buffer(encoder, src, 0, None).is_err());
        let err = ctx
            .command_encoder_clear_buffer(encoder, dst, 32, BufferSize::new(64))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);

        ctx.command_encoder_finish(encoder).unwrap();
        let err = ctx
            .command_encoder_clear_buffer(encoder, dst, 0, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEncoderState);
    }
}
