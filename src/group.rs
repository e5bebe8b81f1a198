use crate::errors::*;
use crate::lookup::*;
use crate::user::UserRecord;
use libc::{c_char, c_int, gid_t};
use log::debug;
use nix::errno::Errno;
use nix::unistd::Gid;
use std::ffi::CStr;
use std::mem::MaybeUninit;
use std::ptr;

/// Number of group ids requested from `getgrouplist()` on the first attempt
pub const INITIAL_GROUP_CAPACITY: usize = 64;

/// Number of `getgrouplist()` calls before giving up
pub const MAX_ENUMERATION_ATTEMPTS: usize = 3;

/// Members read from a single group entry at most
const MAX_GROUP_MEMBERS: usize = 1 << 16;

/// A snapshot of one entry of the group database
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupRecord {
    pub name: String,
    /// Password placeholder, usually `x` or `*`
    pub passwd: String,
    pub gid: Gid,
    /// Member user names, in database order
    pub members: Vec<String>,
}

impl GroupRecord {
    /// Look up a group by name
    ///
    /// Returns `Ok(None)` if the database has no such group.
    ///
    /// The lookup is made once, with a buffer sized by `sysconf(_SC_GETGR_R_SIZE_MAX)`.
    /// A member list that does not fit is reported as an `ERANGE` error.
    pub fn from_name(name: &str) -> Result<Option<GroupRecord>, PosixError> {
        let cname = to_cstring(name)?;
        let outcome = Self::lookup(|grp, buf, result| unsafe {
            libc::getgrnam_r(cname.as_ptr(), grp, buf.as_mut_ptr(), buf.len(), result)
        });
        debug!("getgrnam_r({}) -> {:?}", name, outcome.as_ref().map(|_| ()));
        outcome.into_result()
    }

    /// Look up a group by numeric id
    ///
    /// Same single attempt as [`GroupRecord::from_name`]: an oversized entry is an `ERANGE` error.
    pub fn from_gid(gid: Gid) -> Result<Option<GroupRecord>, PosixError> {
        let outcome = Self::lookup(|grp, buf, result| unsafe {
            libc::getgrgid_r(gid.as_raw(), grp, buf.as_mut_ptr(), buf.len(), result)
        });
        debug!("getgrgid_r({}) -> {:?}", gid, outcome.as_ref().map(|_| ()));
        outcome.into_result()
    }

    fn lookup<F>(call: F) -> LookupOutcome<GroupRecord>
    where
        F: FnOnce(*mut libc::group, &mut [c_char], *mut *mut libc::group) -> c_int,
    {
        let mut buf = scratch_buffer(libc::_SC_GETGR_R_SIZE_MAX);
        let mut grp = MaybeUninit::<libc::group>::zeroed();
        let mut result: *mut libc::group = ptr::null_mut();
        let (ret, errno) = with_errno_reset(|| call(grp.as_mut_ptr(), &mut buf, &mut result));
        let record = if result.is_null() {
            None
        } else {
            Some(unsafe { Self::from_raw(&*result) })
        };
        LookupOutcome::classify(ret, record, errno)
    }

    unsafe fn from_raw(grp: &libc::group) -> GroupRecord {
        let mut members = Vec::new();
        if !grp.gr_mem.is_null() {
            for i in 0..MAX_GROUP_MEMBERS {
                let member = *grp.gr_mem.add(i);
                if member.is_null() {
                    break;
                }
                members.push(owned_string(member));
            }
        }
        GroupRecord {
            name: owned_string(grp.gr_name),
            passwd: owned_string(grp.gr_passwd),
            gid: Gid::from_raw(grp.gr_gid),
            members,
        }
    }
}

/// Portable reading of a `getgrouplist()` return value
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum Enumeration {
    Success,
    TooSmall,
    Failed(Errno),
}

// glibc and musl return the number of groups, or -1 if they did not fit.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn classify_enumeration(ret: c_int) -> Enumeration {
    match ret {
        -1 => Enumeration::TooSmall,
        n if n >= 0 => Enumeration::Success,
        _ => Enumeration::Failed(Errno::last()),
    }
}

// The BSDs return 0, or -1 if the groups did not fit.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn classify_enumeration(ret: c_int) -> Enumeration {
    match ret {
        0 => Enumeration::Success,
        -1 => Enumeration::TooSmall,
        code => Enumeration::Failed(Errno::from_i32(code)),
    }
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
unsafe fn getgrouplist(user: &CStr, group: Gid, groups: &mut [gid_t], ngroups: &mut c_int) -> c_int {
    libc::getgrouplist(user.as_ptr(), group.as_raw(), groups.as_mut_ptr(), ngroups)
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
unsafe fn getgrouplist(user: &CStr, group: Gid, groups: &mut [gid_t], ngroups: &mut c_int) -> c_int {
    libc::getgrouplist(
        user.as_ptr(),
        group.as_raw() as c_int,
        groups.as_mut_ptr() as *mut c_int,
        ngroups,
    )
}

fn ngroups_max() -> usize {
    match unsafe { libc::sysconf(libc::_SC_NGROUPS_MAX) } {
        n if n > 0 => n as usize,
        _ => 65536,
    }
}

/// Run a group enumeration primitive with a growing buffer.
///
/// `fetch` receives a buffer and its capacity in `ngroups`, and must leave
/// the number of groups (or the required capacity) in `ngroups`.
pub(crate) fn grow_group_list<F>(mut fetch: F) -> Result<Vec<gid_t>, PosixError>
where
    F: FnMut(&mut [gid_t], &mut c_int) -> Enumeration,
{
    let mut capacity = INITIAL_GROUP_CAPACITY;
    for attempt in 1..=MAX_ENUMERATION_ATTEMPTS {
        let mut groups: Vec<gid_t> = vec![0; capacity];
        let mut ngroups = capacity as c_int;
        match fetch(&mut groups, &mut ngroups) {
            Enumeration::Success => {
                groups.truncate((ngroups.max(0) as usize).min(capacity));
                return Ok(groups);
            }
            Enumeration::TooSmall => {
                let required = ngroups.max(0) as usize;
                // Some platforms do not report the required size
                capacity = if required > capacity {
                    required
                } else {
                    (capacity * 2).max(ngroups_max())
                };
                debug!(
                    "Group list did not fit (attempt {}), retrying with {} entries",
                    attempt, capacity
                );
            }
            Enumeration::Failed(e) => return Err(e.into()),
        }
    }
    Err(PosixError::from((
        ErrorKind::UnexpectedEnumeration,
        "The group list kept growing while being enumerated",
    )))
}

/// All the groups `user` belongs to, including its primary group
///
/// Returns `Ok(None)` if the user does not exist.
pub fn supplementary_group_ids(user: &str) -> Result<Option<Vec<Gid>>, PosixError> {
    let cuser = to_cstring(user)?;
    match UserRecord::from_name(user)? {
        None => Ok(None),
        Some(pwent) => Ok(Some(group_list(&cuser, pwent.gid)?)),
    }
}

pub(crate) fn group_list(user: &CStr, primary: Gid) -> Result<Vec<Gid>, PosixError> {
    let groups = grow_group_list(|groups, ngroups| {
        let ret = unsafe { getgrouplist(user, primary, groups, ngroups) };
        classify_enumeration(ret)
    })?;
    debug!("{:?} belongs to {} groups", user, groups.len());
    Ok(groups.into_iter().map(Gid::from_raw).collect())
}

/// The supplementary groups of the calling process
pub fn current_supplementary_group_ids() -> Result<Vec<Gid>, PosixError> {
    let groups = read_process_groups(|groups| {
        Errno::result(unsafe { libc::getgroups(groups.len() as c_int, groups.as_mut_ptr()) })
    })?;
    Ok(groups.into_iter().map(Gid::from_raw).collect())
}

/// Count the groups with an empty buffer, then fetch them.
///
/// If the set grew in between, `getgroups` fails with EINVAL and the
/// fetch is repeated once with room for `NGROUPS_MAX` entries.
pub(crate) fn read_process_groups<F>(mut getgroups: F) -> Result<Vec<gid_t>, PosixError>
where
    F: FnMut(&mut [gid_t]) -> Result<c_int, Errno>,
{
    let count = getgroups(&mut [])?;
    let mut groups: Vec<gid_t> = vec![0; count.max(0) as usize];
    let fetched = match getgroups(&mut groups) {
        Ok(n) => n,
        Err(Errno::EINVAL) => {
            debug!("Process groups changed after being counted ({})", count);
            groups = vec![0; ngroups_max()];
            getgroups(&mut groups)?
        }
        Err(e) => return Err(e.into()),
    };
    groups.truncate((fetched.max(0) as usize).min(groups.len()));
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A fake `getgrouplist()` for a user with `members` groups, counting its calls
    fn fake_enumeration(
        members: usize,
        calls: &mut usize,
    ) -> impl FnMut(&mut [gid_t], &mut c_int) -> Enumeration + '_ {
        move |groups, ngroups| {
            *calls += 1;
            if members > groups.len() {
                *ngroups = members as c_int;
                return Enumeration::TooSmall;
            }
            for (i, slot) in groups.iter_mut().take(members).enumerate() {
                *slot = 1000 + i as gid_t;
            }
            *ngroups = members as c_int;
            Enumeration::Success
        }
    }

    #[test]
    fn growth_loop_uses_the_fewest_attempts() {
        for &(members, expected_calls) in &[(0, 1), (1, 1), (64, 1), (65, 2), (500, 2)] {
            let mut calls = 0;
            let groups = grow_group_list(fake_enumeration(members, &mut calls)).unwrap();
            assert_eq!(groups.len(), members);
            assert_eq!(calls, expected_calls, "{} members", members);
            if let Some(&last) = groups.last() {
                assert_eq!(last, 1000 + members as gid_t - 1);
            }
        }
    }

    #[test]
    fn growth_loop_gives_up_on_a_racing_database() {
        let mut calls = 0;
        let result = grow_group_list(|groups, ngroups| {
            calls += 1;
            *ngroups = (groups.len() + 1) as c_int;
            Enumeration::TooSmall
        });
        assert_eq!(
            result.unwrap_err().kind(),
            ErrorKind::UnexpectedEnumeration
        );
        assert_eq!(calls, MAX_ENUMERATION_ATTEMPTS);
    }

    #[test]
    fn growth_loop_grows_without_a_size_hint() {
        let mut sizes = Vec::new();
        let groups = grow_group_list(|groups, ngroups| {
            sizes.push(groups.len());
            if groups.len() < 100 {
                return Enumeration::TooSmall;
            }
            *ngroups = 100;
            Enumeration::Success
        })
        .unwrap();
        assert_eq!(groups.len(), 100);
        assert_eq!(sizes.len(), 2);
        assert!(sizes[1] > sizes[0]);
    }

    #[test]
    fn growth_loop_surfaces_other_errors() {
        let e = grow_group_list(|_, _| Enumeration::Failed(Errno::EIO)).unwrap_err();
        assert_eq!(e.errno(), Some(Errno::EIO));
    }

    #[test]
    fn return_codes_map_to_the_portable_states() {
        assert_eq!(classify_enumeration(-1), Enumeration::TooSmall);
        assert_eq!(classify_enumeration(0), Enumeration::Success);
    }

    #[test]
    fn gid_zero_resolves_both_ways() {
        let by_gid = GroupRecord::from_gid(Gid::from_raw(0)).unwrap().unwrap();
        let by_name = GroupRecord::from_name(&by_gid.name).unwrap().unwrap();
        assert_eq!(by_name.gid, Gid::from_raw(0));
        assert_eq!(by_name.name, by_gid.name);
    }

    #[test]
    fn unknown_group_is_not_an_error() {
        assert_eq!(GroupRecord::from_name("posixhost-no-such-group-4f1c").unwrap(), None);
    }

    #[test]
    fn root_belongs_to_its_primary_group() {
        let root = UserRecord::from_name("root").unwrap().unwrap();
        let groups = supplementary_group_ids("root").unwrap().unwrap();
        assert!(groups.contains(&root.gid));
    }

    #[test]
    fn unknown_user_has_no_group_list() {
        assert_eq!(supplementary_group_ids("posixhost-no-such-user-4f1c").unwrap(), None);
    }

    /// A fake `getgroups()` for a process whose set grows from `counted` to `actual` groups
    fn growing_process_groups(
        counted: usize,
        actual: usize,
        sizes: &mut Vec<usize>,
    ) -> impl FnMut(&mut [gid_t]) -> Result<c_int, Errno> + '_ {
        move |groups| {
            sizes.push(groups.len());
            if groups.is_empty() {
                return Ok(counted as c_int);
            }
            if groups.len() < actual {
                return Err(Errno::EINVAL);
            }
            for (i, slot) in groups.iter_mut().take(actual).enumerate() {
                *slot = 100 + i as gid_t;
            }
            Ok(actual as c_int)
        }
    }

    #[test]
    fn process_groups_are_counted_then_fetched() {
        let mut sizes = Vec::new();
        let groups = read_process_groups(growing_process_groups(3, 3, &mut sizes)).unwrap();
        assert_eq!(groups, [100, 101, 102]);
        assert_eq!(sizes, [0, 3]);
    }

    #[test]
    fn process_groups_that_grew_are_fetched_again() {
        let mut sizes = Vec::new();
        let groups = read_process_groups(growing_process_groups(3, 5, &mut sizes)).unwrap();
        assert_eq!(groups.len(), 5);
        assert_eq!(groups[4], 104);
        assert_eq!(sizes, [0, 3, ngroups_max()]);
    }

    #[test]
    fn process_groups_surface_other_errors() {
        let e = read_process_groups(|groups| {
            if groups.is_empty() {
                Ok(2)
            } else {
                Err(Errno::EFAULT)
            }
        })
        .unwrap_err();
        assert_eq!(e.errno(), Some(Errno::EFAULT));
    }

    #[test]
    fn short_group_buffer_is_an_error() {
        let outcome = GroupRecord::lookup(|_, _, _| Errno::ERANGE as c_int);
        assert_eq!(outcome, LookupOutcome::SystemError(Errno::ERANGE));
        let e = outcome.into_result().unwrap_err();
        assert_eq!(e.errno(), Some(Errno::ERANGE));
    }

    #[test]
    fn current_groups_match_the_reported_count() {
        let count = unsafe { libc::getgroups(0, ptr::null_mut()) };
        let groups = current_supplementary_group_ids().unwrap();
        assert_eq!(groups.len(), count as usize);
    }
}
