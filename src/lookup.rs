use crate::errors::*;
use libc::{c_char, c_int};
use nix::errno::Errno;
use std::ffi::{CStr, CString};

/// Scratch buffer size used when the system cannot tell how much a reentrant lookup needs
pub const DEFAULT_SCRATCH_SIZE: usize = 16384;

/// Upper bound on a scratch buffer, whatever `sysconf()` claims
const MAX_SCRATCH_SIZE: usize = 1 << 20;

/// Outcome of a reentrant database lookup
///
/// The `*_r` lookups report "no such entry" and "lookup failed" through
/// a combination of their return value, the result pointer and `errno`.
/// This type is the only place where these signals are interpreted.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum LookupOutcome<T> {
    /// The lookup produced a record
    Found(T),
    /// The database was consulted and has no matching entry
    NotFound,
    /// The lookup itself failed
    SystemError(Errno),
}

impl<T> LookupOutcome<T> {
    /// Classify the result of a reentrant lookup.
    ///
    /// `ret` is the value returned by the call, `record` is `Some` when the
    /// result pointer was set, and `errno` must have been reset right before
    /// the call and sampled right after it (see [`with_errno_reset`]).
    pub fn classify(ret: c_int, record: Option<T>, errno: Errno) -> Self {
        if ret == 0 {
            if let Some(record) = record {
                return LookupOutcome::Found(record);
            }
        }
        let code = if ret != 0 { Errno::from_i32(ret) } else { errno };
        match code {
            // Documented "not found" spellings of getpwnam_r(3) and friends
            Errno::UnknownErrno | Errno::ENOENT | Errno::ESRCH | Errno::EBADF | Errno::EPERM => {
                LookupOutcome::NotFound
            }
            code => LookupOutcome::SystemError(code),
        }
    }

    /// Convert into the crate-wide `Ok(Some)` / `Ok(None)` / `Err` convention
    pub fn into_result(self) -> Result<Option<T>, PosixError> {
        match self {
            LookupOutcome::Found(record) => Ok(Some(record)),
            LookupOutcome::NotFound => Ok(None),
            LookupOutcome::SystemError(e) => Err(e.into()),
        }
    }

    pub(crate) fn as_ref(&self) -> LookupOutcome<&T> {
        match self {
            LookupOutcome::Found(record) => LookupOutcome::Found(record),
            LookupOutcome::NotFound => LookupOutcome::NotFound,
            LookupOutcome::SystemError(e) => LookupOutcome::SystemError(*e),
        }
    }

    pub(crate) fn map<U, F: FnOnce(T) -> U>(self, f: F) -> LookupOutcome<U> {
        match self {
            LookupOutcome::Found(record) => LookupOutcome::Found(f(record)),
            LookupOutcome::NotFound => LookupOutcome::NotFound,
            LookupOutcome::SystemError(e) => LookupOutcome::SystemError(e),
        }
    }
}

/// Reset `errno`, run `call`, and sample `errno` immediately afterwards.
///
/// `errno` is thread-local, so the sample must be taken on the calling
/// thread before anything else can overwrite it.
pub fn with_errno_reset<R, F: FnOnce() -> R>(call: F) -> (R, Errno) {
    Errno::clear();
    let ret = call();
    (ret, Errno::last())
}

/// Allocate a scratch buffer for a reentrant lookup, sized from `sysconf(key)`
pub(crate) fn scratch_buffer(key: c_int) -> Vec<c_char> {
    let suggested = unsafe { libc::sysconf(key) };
    let size = if suggested <= 0 {
        DEFAULT_SCRATCH_SIZE
    } else {
        (suggested as usize).min(MAX_SCRATCH_SIZE)
    };
    vec![0; size]
}

pub(crate) fn to_cstring(name: &str) -> Result<CString, PosixError> {
    CString::new(name).map_err(|_| {
        PosixError::from((ErrorKind::UsageError, "Name contains a NUL byte"))
    })
}

/// Copy a C string owned by a database entry, tolerating NULL
pub(crate) unsafe fn owned_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn found_only_on_success_with_a_record() {
        assert_eq!(
            LookupOutcome::classify(0, Some(7), Errno::UnknownErrno),
            LookupOutcome::Found(7)
        );
        // Stale errno left behind by NSS modules does not spoil a hit
        assert_eq!(
            LookupOutcome::classify(0, Some(7), Errno::ENOENT),
            LookupOutcome::Found(7)
        );
    }

    #[test]
    fn absent_record_without_error_is_not_found() {
        assert_eq!(
            LookupOutcome::<u32>::classify(0, None, Errno::UnknownErrno),
            LookupOutcome::NotFound
        );
        assert_eq!(
            LookupOutcome::<u32>::classify(Errno::ENOENT as c_int, None, Errno::UnknownErrno),
            LookupOutcome::NotFound
        );
    }

    #[test]
    fn failures_carry_the_code() {
        assert_eq!(
            LookupOutcome::<u32>::classify(Errno::ERANGE as c_int, None, Errno::UnknownErrno),
            LookupOutcome::SystemError(Errno::ERANGE)
        );
        assert_eq!(
            LookupOutcome::<u32>::classify(0, None, Errno::EIO),
            LookupOutcome::SystemError(Errno::EIO)
        );
        // The return value wins over errno
        assert_eq!(
            LookupOutcome::<u32>::classify(Errno::EMFILE as c_int, None, Errno::EIO),
            LookupOutcome::SystemError(Errno::EMFILE)
        );
    }

    #[test]
    fn into_result_maps_all_three_states() {
        assert_eq!(LookupOutcome::Found(1).into_result().unwrap(), Some(1));
        assert_eq!(LookupOutcome::<u8>::NotFound.into_result().unwrap(), None);
        let e = LookupOutcome::<u8>::SystemError(Errno::EIO)
            .into_result()
            .unwrap_err();
        assert_eq!(e.errno(), Some(Errno::EIO));
    }

    #[test]
    fn map_keeps_the_state() {
        assert_eq!(LookupOutcome::Found(2).map(|x| x * 2), LookupOutcome::Found(4));
        assert_eq!(LookupOutcome::<u8>::NotFound.map(|x| x), LookupOutcome::NotFound);
    }

    #[test]
    fn errno_is_reset_before_the_call() {
        let (_, errno) = with_errno_reset(|| {});
        assert_eq!(errno, Errno::UnknownErrno);
        let (ret, errno) = with_errno_reset(|| unsafe { libc::close(-1) });
        assert_eq!(ret, -1);
        assert_eq!(errno, Errno::EBADF);
    }

    #[test]
    fn scratch_buffer_is_never_empty() {
        assert!(!scratch_buffer(libc::_SC_GETPW_R_SIZE_MAX).is_empty());
        assert!(scratch_buffer(libc::_SC_GETPW_R_SIZE_MAX).len() <= MAX_SCRATCH_SIZE);
    }

    #[test]
    fn interior_nul_is_a_usage_error() {
        let e = to_cstring("ro\0ot").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::UsageError);
    }
}
