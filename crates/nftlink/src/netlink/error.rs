//! Error types for nf_tables netlink operations.

use std::io;

/// Result type for nf_tables netlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller mistake detected before any transport I/O.
    Configuration,
    /// Socket open/bind/send/receive failure.
    Transport,
    /// Malformed envelope or attribute record.
    Protocol,
    /// The kernel refused the request.
    KernelRejection,
}

/// Errors that can occur during nf_tables netlink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Family tag not present in the family table.
    #[error("unrecognised family {0}")]
    UnknownFamily(String),

    /// Protocol name not present in the protocol table.
    #[error("unrecognised protocol {0}")]
    UnknownProtocol(String),

    /// Expression kind without an encoder.
    #[error("unknown expression kind: {0}")]
    UnknownExpressionKind(String),

    /// Field not valid for the expression kind, or set with the wrong type.
    #[error("invalid field {field} for {kind} expression: {reason}")]
    InvalidField {
        /// Expression kind name ("payload", "cmp", ...).
        kind: &'static str,
        /// Attribute id of the rejected field.
        field: u16,
        /// Why the field was rejected.
        reason: &'static str,
    },

    /// Could not create the netlink socket.
    #[error("cannot open netlink socket: {0}")]
    TransportOpen(#[source] io::Error),

    /// Could not bind the netlink socket.
    #[error("cannot bind netlink socket: {0}")]
    Bind(#[source] io::Error),

    /// Sending a request failed.
    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    /// Receiving a datagram failed.
    #[error("receive failed: {0}")]
    Recv(#[source] io::Error),

    /// The endpoint was already closed (or never bound).
    #[error("netlink transport closed")]
    TransportClosed,

    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[cfg(feature = "output")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Attribute record runs past its buffer or has inconsistent padding.
    #[error("malformed attribute: {0}")]
    MalformedAttribute(String),

    /// Netlink envelope is truncated or has inconsistent length fields.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Attribute payload does not fit the 16-bit netlink length field.
    #[error("attribute {attr} payload of {len} bytes exceeds the netlink length limit")]
    AttributeTooLong {
        /// Attribute type.
        attr: u16,
        /// Payload length that was requested.
        len: usize,
    },

    /// Buffer too small for the request envelope.
    #[error("cannot build request header: need {needed} bytes, have {available}")]
    HeaderBuild {
        /// Minimum envelope size.
        needed: usize,
        /// Size of the buffer that was given.
        available: usize,
    },

    /// Kernel returned an error code.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Kernel error with operation context.
    #[error("{operation}: {message} (errno {errno})")]
    KernelWithContext {
        /// The operation that failed.
        operation: String,
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// A dump was aborted; no rules from it are returned.
    #[error("rule dump failed: {0}")]
    Dump(#[source] Box<Error>),
}

impl Error {
    /// Create a kernel error from a (negative) netlink errno value.
    pub fn from_errno(errno: i32) -> Self {
        let message = io::Error::from_raw_os_error(-errno).to_string();
        Self::Kernel {
            errno: -errno,
            message,
        }
    }

    /// Create a kernel error with operation context.
    pub fn from_errno_with_context(errno: i32, operation: impl Into<String>) -> Self {
        let message = io::Error::from_raw_os_error(-errno).to_string();
        Self::KernelWithContext {
            operation: operation.into(),
            errno: -errno,
            message,
        }
    }

    /// Add context to this error.
    ///
    /// Wraps kernel errors with operation context. Other errors are returned unchanged.
    pub fn with_context(self, operation: impl Into<String>) -> Self {
        match self {
            Self::Kernel { errno, message } => Self::KernelWithContext {
                operation: operation.into(),
                errno,
                message,
            },
            other => other,
        }
    }

    /// Category of this error. A [`Error::Dump`] reports the kind of its cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownFamily(_)
            | Self::UnknownProtocol(_)
            | Self::UnknownExpressionKind(_)
            | Self::InvalidField { .. } => ErrorKind::Configuration,
            Self::TransportOpen(_)
            | Self::Bind(_)
            | Self::Send(_)
            | Self::Recv(_)
            | Self::TransportClosed
            | Self::Io(_) => ErrorKind::Transport,
            #[cfg(feature = "output")]
            Self::Json(_) => ErrorKind::Protocol,
            Self::MalformedAttribute(_)
            | Self::MalformedEnvelope(_)
            | Self::AttributeTooLong { .. }
            | Self::HeaderBuild { .. } => ErrorKind::Protocol,
            Self::Kernel { .. } | Self::KernelWithContext { .. } => ErrorKind::KernelRejection,
            Self::Dump(inner) => inner.kind(),
        }
    }

    /// Check if this is a "not found" error (ENOENT).
    pub fn is_not_found(&self) -> bool {
        self.errno() == Some(libc::ENOENT)
    }

    /// Check if this is a permission error (EPERM, EACCES).
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.errno(), Some(libc::EPERM | libc::EACCES))
    }

    /// Check if this is an "already exists" error (EEXIST).
    pub fn is_already_exists(&self) -> bool {
        self.errno() == Some(libc::EEXIST)
    }

    /// Get the errno value if this is (or wraps) a kernel error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } | Self::KernelWithContext { errno, .. } => Some(*errno),
            Self::Dump(inner) => inner.errno(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_errno() {
        let err = Error::from_errno(-1); // EPERM
        assert!(err.is_permission_denied());
        assert_eq!(err.errno(), Some(1));
        assert_eq!(err.kind(), ErrorKind::KernelRejection);
    }

    #[test]
    fn test_with_context() {
        let err = Error::from_errno(-2).with_context("adding rule to filter/input");
        assert!(err.is_not_found());
        let msg = err.to_string();
        assert!(msg.contains("adding rule to filter/input"));
        assert!(msg.contains("No such file or directory"));
    }

    #[test]
    fn test_dump_reports_inner_kind() {
        let err = Error::Dump(Box::new(Error::Recv(io::Error::from_raw_os_error(
            libc::ENOBUFS,
        ))));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().starts_with("rule dump failed"));

        let err = Error::Dump(Box::new(Error::from_errno(-17)));
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_configuration_kinds() {
        assert_eq!(
            Error::UnknownFamily("arp".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::UnknownProtocol("foo".into()).to_string(),
            "unrecognised protocol foo"
        );
        assert_eq!(
            Error::MalformedAttribute("x".into()).kind(),
            ErrorKind::Protocol
        );
    }
}
