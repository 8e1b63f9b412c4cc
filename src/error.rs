//! ## USBTMC Errors
//!
//! The errors used throughout the crate, grouped under the coarse [`ErrorKind`]
//! taxonomy callers can match on, while keeping a descriptive variant per
//! failure so messages stay specific.
//!

/// Coarse error category a caller can match on without caring about the exact
/// variant that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The underlying bulk or control call failed: timeout, stall, disconnect.
    Transport,
    /// The device returned a non-SUCCESS status outside the expected polling
    /// states, or a drain loop exceeded its iteration cap.
    Protocol,
    /// Unknown attribute id, out-of-range value, write to a read-only
    /// attribute, or an unknown minor number / control request.
    InvalidArgument,
    /// Seek, or a write to the enumeration session.
    NotSupported,
    /// The user-supplied buffer could not be accessed.
    Addressing,
    /// Allocation failed, or there was no free session slot on attach.
    Resource,
}

#[allow(unused)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("usb transport error: {0}")]
    Transport(#[from] rusb::Error),

    #[error("device not found")]
    DeviceNotFound,
    #[error("device is not compatible with USBTMC")]
    DeviceIncompatible,
    #[error("specified configuration not found")]
    ConfigurationNotFound,
    #[error("specified interface not found")]
    InterfaceNotFound,
    #[error("specified interface setting not found")]
    InterfaceSettingNotFound,
    #[error("bulk out endpoint not found")]
    BulkOutEndpointNotFound,
    #[error("bulk in endpoint not found")]
    BulkInEndpointNotFound,
    #[error("used incorrect endpoint")]
    IncorrectEndpoint,

    #[error("control request unexpectedly failed")]
    StatusUnexpectedFailure,
    #[error("abort/clear drain loop exceeded {0} iterations without a short packet")]
    DrainExceeded(usize),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
    #[error("write not permitted on this session")]
    NotPermitted,

    #[error("user buffer could not be accessed")]
    Addressing,
    #[error("no free session slot available")]
    Resource,
}

impl Error {
    /// The coarse [`ErrorKind`] this error belongs to, per the error model.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) => ErrorKind::Transport,
            Error::DeviceNotFound
            | Error::DeviceIncompatible
            | Error::ConfigurationNotFound
            | Error::InterfaceNotFound
            | Error::InterfaceSettingNotFound
            | Error::BulkOutEndpointNotFound
            | Error::BulkInEndpointNotFound
            | Error::IncorrectEndpoint
            | Error::StatusUnexpectedFailure
            | Error::DrainExceeded(_) => ErrorKind::Protocol,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotSupported(_) | Error::NotPermitted => ErrorKind::NotSupported,
            Error::Addressing => ErrorKind::Addressing,
            Error::Resource => ErrorKind::Resource,
        }
    }
}
