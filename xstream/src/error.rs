use core::fmt;
use std::time::Duration;

/// Discriminant of an [`Error`], cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ClosedStream,
    PostCompletionEmit,
    SinkSaturationViolation,
    DrainStall,
    Io,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ClosedStream => write!(f, "closed stream"),
            ErrorKind::PostCompletionEmit => write!(f, "post-completion emit"),
            ErrorKind::SinkSaturationViolation => write!(f, "sink saturation violation"),
            ErrorKind::DrainStall => write!(f, "drain stall"),
            ErrorKind::Io => write!(f, "i/o"),
            ErrorKind::Other => write!(f, "other"),
        }
    }
}

/// Errors raised by stream roles and pipes.
///
/// `Error` is `Clone` because one failure is usually observed by several
/// parties: the flow unit records it, the role's listeners receive it and the
/// pipe forwards it to whoever established the pipe.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Operation attempted on a stream that is already closed or errored.
    #[error("stream is closed")]
    ClosedStream,

    /// A source emitted a chunk after signaling end-of-stream.
    #[error("chunk emitted after end-of-stream")]
    PostCompletionEmit,

    /// A strict sink received a chunk while still saturated.
    #[error("chunk written to a saturated sink")]
    SinkSaturationViolation,

    /// A saturated sink did not signal drain in time.
    #[error("sink did not drain within {waited:?}")]
    DrainStall { waited: Duration },

    /// Transport failure.
    #[error("i/o error ({kind:?}): {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },

    /// Failure reported by a user-supplied backend.
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn other(message: impl Into<String>) -> Self {
        Error::Other(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ClosedStream => ErrorKind::ClosedStream,
            Error::PostCompletionEmit => ErrorKind::PostCompletionEmit,
            Error::SinkSaturationViolation => ErrorKind::SinkSaturationViolation,
            Error::DrainStall { .. } => ErrorKind::DrainStall,
            Error::Io { .. } => ErrorKind::Io,
            Error::Other(_) => ErrorKind::Other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> std::io::Error {
        let kind = match &err {
            Error::ClosedStream => std::io::ErrorKind::BrokenPipe,
            Error::DrainStall { .. } => std::io::ErrorKind::TimedOut,
            Error::Io { kind, .. } => *kind,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_round_trip_keeps_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let err = Error::from(io);
        assert_eq!(err.kind(), ErrorKind::Io);

        let back: std::io::Error = err.into();
        assert_eq!(back.kind(), std::io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_closed_stream_maps_to_broken_pipe() {
        let io: std::io::Error = Error::ClosedStream.into();
        assert_eq!(io.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
