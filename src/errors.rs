use nix::errno::Errno;
use std::error::Error;
use std::fmt;

/// Types of errors that can be reported by the lookup, credential and locking primitives
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// System-level error reported by the operating system
    SysError,
    /// The caller supplied an argument the operating system cannot accept
    UsageError,
    /// The group enumeration primitive kept asking for more room
    UnexpectedEnumeration,
}

/// Internal representation of errors
#[derive(Debug)]
enum ErrorRepr {
    /// Error from the nix crate
    FromNix(nix::Error),
    /// Error with a static description
    WithDescription(ErrorKind, &'static str),
}

/// Error type for every operation of this crate except the launcher
#[derive(Debug)]
pub struct PosixError {
    repr: ErrorRepr,
}

impl PosixError {
    /// The kind of error
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::FromNix(_) => ErrorKind::SysError,
            ErrorRepr::WithDescription(kind, _) => kind,
        }
    }

    /// The OS error code, if the error originated from a system call
    pub fn errno(&self) -> Option<Errno> {
        match self.repr {
            ErrorRepr::FromNix(e) => Some(e),
            _ => None,
        }
    }
}

impl Error for PosixError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.repr {
            ErrorRepr::FromNix(ref e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for PosixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::FromNix(ref e) => write!(f, "POSIX error: {}", e),
            ErrorRepr::WithDescription(_, description) => {
                write!(f, "POSIX error: {}", description)
            }
        }
    }
}

impl From<nix::Error> for PosixError {
    fn from(e: nix::Error) -> PosixError {
        PosixError {
            repr: ErrorRepr::FromNix(e),
        }
    }
}

impl From<(ErrorKind, &'static str)> for PosixError {
    fn from((kind, description): (ErrorKind, &'static str)) -> PosixError {
        PosixError {
            repr: ErrorRepr::WithDescription(kind, description),
        }
    }
}
