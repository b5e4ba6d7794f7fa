use std::fmt::Display;

/// EmberDB errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The key does not exist, was deleted, or has expired.
    KeyNotFound,
    /// No segment exists for the requested location.
    SegmentNotFound,
    /// Invalid user input, typically malformed arguments.
    InvalidInput(String),
    /// A record failed its CRC check when read back from a segment.
    InvalidCrc,
    /// A write landed only partially on the backing file.
    ShortWrite,
    /// An IO error.
    Io(String),
    /// An unknown IO backend or segment shape identifier.
    Unsupported(&'static str),
    /// A merge is already in flight; retry later.
    MergeRunning,
    /// The accounting file has no free slots left.
    CountFileNoSpace,
    /// The all-zero terminator header was read; no more records follow.
    EndOfSegment,
    /// A read crossed the end of the backing file.
    Eof,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::KeyNotFound => write!(f, "key not found"),
            Error::SegmentNotFound => write!(f, "segment not found"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::InvalidCrc => write!(f, "invalid crc"),
            Error::ShortWrite => write!(f, "write size is not equal to record size"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::Unsupported(what) => write!(f, "unsupported {what}"),
            Error::MergeRunning => write!(f, "segment merge is running, retry later"),
            Error::CountFileNoSpace => {
                write!(f, "not enough space can be allocated in the count file")
            }
            Error::EndOfSegment => write!(f, "end of records in segment"),
            Error::Eof => write!(f, "end of file"),
        }
    }
}

/// An EmberDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}
