use crate::errors::*;
use crate::group::group_list;
use crate::lookup::to_cstring;
use crate::user::UserRecord;
use libc::gid_t;
use log::{debug, warn};
use nix::errno::Errno;
use nix::unistd;

/// Give the calling process the group credentials of `user`
///
/// The user's primary group becomes the real and effective group id if
/// `also_set_primary_gid` is set, then the complete list of groups the
/// user belongs to replaces the supplementary groups.
///
/// Returns `Ok(None)` if the user does not exist, in which case nothing
/// was changed. An error after the primary group was changed leaves the
/// process with partially changed credentials; callers should not keep
/// running in that state.
///
/// Credentials are process-wide: no other thread should depend on the
/// previous groups while this runs.
///
/// # Example
/// ```no_run
/// posixhost::set_supplementary_groups("www-data", true)
///     .unwrap_or_else(|e| panic!("Failed to change groups: {}", e))
///     .unwrap_or_else(|| panic!("User not found"));
/// ```
pub fn set_supplementary_groups(
    user: &str,
    also_set_primary_gid: bool,
) -> Result<Option<()>, PosixError> {
    let cuser = to_cstring(user)?;
    let pwent = match UserRecord::from_name(user)? {
        None => return Ok(None),
        Some(pwent) => pwent,
    };
    let groups: Vec<gid_t> = group_list(&cuser, pwent.gid)?
        .iter()
        .map(|gid| gid.as_raw())
        .collect();

    // The primary group goes first: setgroups() may check against it, and
    // setgid() can be refused once the supplementary groups are gone.
    if also_set_primary_gid {
        unistd::setgid(pwent.gid)?;
    }
    if unsafe { libc::setgroups(groups.len() as _, groups.as_ptr()) } != 0 {
        let e = Errno::last();
        if also_set_primary_gid {
            warn!(
                "Primary group of {} was set but its supplementary groups were not: {}",
                user, e
            );
        }
        return Err(e.into());
    }
    debug!("Installed {} groups of {}", groups.len(), user);
    Ok(Some(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_changes_nothing() {
        let before = unistd::getegid();
        assert_eq!(
            set_supplementary_groups("posixhost-no-such-user-4f1c", true).unwrap(),
            None
        );
        assert_eq!(unistd::getegid(), before);
    }

    #[test]
    fn nul_in_name_is_a_usage_error() {
        let e = set_supplementary_groups("ro\0ot", false).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::UsageError);
    }
}
