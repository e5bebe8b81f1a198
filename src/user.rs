use crate::errors::*;
use crate::lookup::*;
use libc::{c_char, c_int};
use log::debug;
use nix::unistd::{self, Gid, Uid};
use std::mem::MaybeUninit;
use std::path::PathBuf;
use std::ptr;

/// A snapshot of one entry of the passwd database
///
/// # Example
/// ```no_run
/// use posixhost::UserRecord;
///
/// match UserRecord::from_name("nobody").unwrap() {
///     Some(user) => println!("{} lives in {}", user.name, user.home.display()),
///     None => println!("no such user"),
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    /// Password placeholder, usually `x` or `*`
    pub passwd: String,
    pub uid: Uid,
    pub gid: Gid,
    pub gecos: String,
    pub home: PathBuf,
    pub shell: PathBuf,
}

impl UserRecord {
    /// Look up a user by name
    ///
    /// Returns `Ok(None)` if the database has no such user.
    pub fn from_name(name: &str) -> Result<Option<UserRecord>, PosixError> {
        let cname = to_cstring(name)?;
        let outcome = Self::lookup(|pwd, buf, result| unsafe {
            libc::getpwnam_r(cname.as_ptr(), pwd, buf.as_mut_ptr(), buf.len(), result)
        });
        debug!("getpwnam_r({}) -> {:?}", name, outcome.as_ref().map(|_| ()));
        outcome.into_result()
    }

    /// Look up a user by numeric id
    ///
    /// Returns `Ok(None)` if the database has no such user.
    pub fn from_uid(uid: Uid) -> Result<Option<UserRecord>, PosixError> {
        let outcome = Self::lookup(|pwd, buf, result| unsafe {
            libc::getpwuid_r(uid.as_raw(), pwd, buf.as_mut_ptr(), buf.len(), result)
        });
        debug!("getpwuid_r({}) -> {:?}", uid, outcome.as_ref().map(|_| ()));
        outcome.into_result()
    }

    // A single attempt: getpw*_r reports a short buffer as ERANGE, which is
    // surfaced to the caller rather than retried.
    fn lookup<F>(call: F) -> LookupOutcome<UserRecord>
    where
        F: FnOnce(*mut libc::passwd, &mut [c_char], *mut *mut libc::passwd) -> c_int,
    {
        let mut buf = scratch_buffer(libc::_SC_GETPW_R_SIZE_MAX);
        let mut pwd = MaybeUninit::<libc::passwd>::zeroed();
        let mut result: *mut libc::passwd = ptr::null_mut();
        let (ret, errno) = with_errno_reset(|| call(pwd.as_mut_ptr(), &mut buf, &mut result));
        let record = if result.is_null() {
            None
        } else {
            Some(unsafe { Self::from_raw(&*result) })
        };
        LookupOutcome::classify(ret, record, errno)
    }

    unsafe fn from_raw(pwd: &libc::passwd) -> UserRecord {
        UserRecord {
            name: owned_string(pwd.pw_name),
            passwd: owned_string(pwd.pw_passwd),
            uid: Uid::from_raw(pwd.pw_uid),
            gid: Gid::from_raw(pwd.pw_gid),
            gecos: owned_string(pwd.pw_gecos),
            home: PathBuf::from(owned_string(pwd.pw_dir)),
            shell: PathBuf::from(owned_string(pwd.pw_shell)),
        }
    }
}

/// Whether the process runs with an effective uid of 0
///
/// The effective uid is what the kernel checks when the process changes
/// credentials, so a set-uid process counts as the superuser here even
/// though its real uid is not 0.
pub fn is_superuser() -> bool {
    unistd::geteuid().is_root()
}

/// Name of the user the process runs as (real uid)
///
/// Returns `Ok(None)` if the uid has no passwd entry.
pub fn process_user_name() -> Result<Option<String>, PosixError> {
    Ok(UserRecord::from_uid(unistd::getuid())?.map(|user| user.name))
}

/// Whether the process may spawn work as `user`
///
/// This is the case for the superuser, and for the user the process already runs as.
pub fn can_run_as(user: &str) -> Result<bool, PosixError> {
    if is_superuser() {
        return Ok(true);
    }
    Ok(process_user_name()?.as_deref() == Some(user))
}
