use std::error;
use std::fmt;

/// Status codes a port operation can fail with.
///
/// These mirror the small, POSIX-flavoured status set a component module is
/// allowed to report back through the port core; anything else a module
/// wants to communicate (codec-specific failures, etc.) belongs in its own
/// error type, not here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Arguments malformed, or the port is in the wrong state for the call.
    Einval,
    /// The module (or, for a non-core parameter, the core) doesn't implement this.
    Enosys,
    /// The client overwrote `Port::format` between allocation and commit.
    Efault,
    /// The port is already connected to a peer.
    Eisconn,
    /// The port has no connection.
    Enotconn,
    /// A pool is exhausted or a payload allocation failed.
    Enomem,
    /// The event pool is exhausted, or an event buffer was too small.
    Enospc,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Einval => "EINVAL",
            Status::Enosys => "ENOSYS",
            Status::Efault => "EFAULT",
            Status::Eisconn => "EISCONN",
            Status::Enotconn => "ENOTCONN",
            Status::Enomem => "ENOMEM",
            Status::Enospc => "ENOSPC",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by port operations: a fixed status plus a human message
/// naming the operation that failed.
pub struct PortError {
    message: &'static str,
    status: Status,
}

impl PortError {
    pub fn new(message: &'static str, status: Status) -> PortError {
        PortError { message, status }
    }

    pub fn status(&self) -> Status {
        self.status
    }
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl fmt::Debug for PortError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "PortError {{ message: {}, status: {} }}",
            self.message, self.status
        )
    }
}

impl error::Error for PortError {}

pub type Result<T> = std::result::Result<T, PortError>;

macro_rules! bail {
    ($status:expr, $message:expr) => {
        return Err($crate::error::PortError::new($message, $status))
    };
}

pub(crate) use bail;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_status_name() {
        let err = PortError::new("format pointer overwritten", Status::Efault);
        assert_eq!(format!("{}", err), "format pointer overwritten (EFAULT)");
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            Status::Einval,
            Status::Enosys,
            Status::Efault,
            Status::Eisconn,
            Status::Enotconn,
            Status::Enomem,
            Status::Enospc,
        ] {
            assert!(!s.as_str().is_empty());
        }
    }
}
