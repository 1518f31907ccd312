use crate::{Rva, Va};

/// An error that can occur anywhere in the RML framework.
#[derive(thiserror::Error, Debug)]
pub enum RmlError {
    /// A byte pattern in a batch did not match anywhere in its module.
    ///
    /// This is fatal to startup: downstream code unconditionally dereferences
    /// the pointers a batch discovers, so a partial pointer table is worse
    /// than refusing to load.
    #[error("pattern `{0}` not found")]
    PatternNotFound(String),

    /// A pattern string could not be parsed.
    #[error("malformed pattern token `{0}`")]
    MalformedPattern(String),

    /// The module image could not be parsed as a PE file.
    #[error("invalid PE image: {0}")]
    InvalidImage(&'static str),

    /// A section required by the caller is missing from the image.
    #[error("section `{0}` not found")]
    SectionNotFound(&'static str),

    /// An image-relative offset fell outside the mapped module span.
    #[error("offset {0} out of image bounds")]
    OutOfBounds(Rva),

    /// A hook operation failed.
    #[error("hook `{name}` failed: {reason}")]
    Hook {
        /// Name the hook was registered under.
        name: String,
        /// Backend-reported reason.
        reason: String,
    },

    /// A hook target address was invalid.
    #[error("invalid hook target {0}")]
    InvalidHookTarget(Va),

    /// A job with the same name already exists.
    #[error("job `{0}` already exists")]
    JobAlreadyExists(String),

    /// The job was not found.
    #[error("job not found")]
    JobNotFound,

    /// The scheduler is shutting down and rejects new registrations.
    #[error("scheduler is shutting down")]
    ShuttingDown,

    /// A script VM operation failed.
    #[error("vm error: {0}")]
    Vm(String),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(&'static str),
}
