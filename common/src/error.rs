use {std::io, thiserror::Error};

/// Failure taxonomy of the multiplication core.
///
/// Capacity errors are raised at operation entry before anything is
/// allocated; transient I/O failures carry the scratch filename and the
/// original cause after the single retry has been spent.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested transform length exceeds what the moduli support.
    #[error("transform length {requested} exceeds the supported maximum {maximum}")]
    TransformLengthExceeded { requested: u64, maximum: u64 },

    /// A scratch-file operation failed even after a cleanup sweep and retry.
    #[error("i/o failure on scratch file `{filename}`")]
    Io {
        filename: String,
        #[source]
        cause:    io::Error,
    },

    /// The requested size cannot be indexed by an in-memory backing.
    #[error("requested size exceeds the addressable in-memory range")]
    SizeTooLarge,

    /// Modular arithmetic failure, e.g. inverting a non-invertible element.
    #[error("arithmetic error: {0}")]
    Arithmetic(&'static str),

    /// A worker was interrupted while the computation was being joined.
    #[error("worker interrupted")]
    Interrupted,

    /// Invariant violation. These are bugs and should be treated as fatal.
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wraps an I/O failure on the named scratch file.
    pub fn io(filename: impl Into<String>, cause: io::Error) -> Self {
        Self::Io {
            filename: filename.into(),
            cause,
        }
    }
}
