use crate::errors::*;
use log::debug;
use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;
use std::fs::File;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};

/// Type of an advisory record lock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockKind {
    /// Read lock, compatible with other shared locks
    Shared,
    /// Write lock, compatible with nothing
    Exclusive,
    /// Release whatever this process holds on the range
    Unlock,
}

/// Origin of `LockRequest::start`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// A byte range to lock, and how
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockRequest {
    pub kind: LockKind,
    pub whence: Whence,
    pub start: i64,
    /// Number of bytes; 0 extends the range to the end of the file, however large it grows
    pub len: i64,
}

impl LockRequest {
    pub fn new(kind: LockKind, whence: Whence, start: i64, len: i64) -> Self {
        LockRequest {
            kind,
            whence,
            start,
            len,
        }
    }

    /// A request covering the whole file
    pub fn whole_file(kind: LockKind) -> Self {
        Self::new(kind, Whence::Start, 0, 0)
    }

    fn to_flock(&self) -> libc::flock {
        let mut flock: libc::flock = unsafe { mem::zeroed() };
        flock.l_type = match self.kind {
            LockKind::Shared => libc::F_RDLCK,
            LockKind::Exclusive => libc::F_WRLCK,
            LockKind::Unlock => libc::F_UNLCK,
        } as libc::c_short;
        flock.l_whence = match self.whence {
            Whence::Start => libc::SEEK_SET,
            Whence::Current => libc::SEEK_CUR,
            Whence::End => libc::SEEK_END,
        } as libc::c_short;
        flock.l_start = self.start as libc::off_t;
        flock.l_len = self.len as libc::off_t;
        flock
    }
}

/// Request an advisory record lock on `fd` without waiting
///
/// Returns `Ok(false)` if another process holds a conflicting lock; any
/// other failure is an error. Locks belong to the process, so asking again
/// for a range it already holds succeeds and does not stack.
///
/// # Example
/// ```no_run
/// use posixhost::{acquire_record_lock, LockKind, LockRequest};
/// use std::os::unix::io::AsRawFd;
///
/// let file = std::fs::OpenOptions::new().write(true).open("/var/run/app.lock").unwrap();
/// let request = LockRequest::whole_file(LockKind::Exclusive);
/// if !acquire_record_lock(file.as_raw_fd(), &request).unwrap() {
///     println!("Already locked, trying again later");
/// }
/// ```
pub fn acquire_record_lock(fd: RawFd, request: &LockRequest) -> Result<bool, PosixError> {
    let flock = request.to_flock();
    match fcntl::fcntl(fd, FcntlArg::F_SETLK(&flock)) {
        Ok(_) => {
            debug!("Lock {:?} granted on fd {}", request, fd);
            Ok(true)
        }
        Err(Errno::EACCES) | Err(Errno::EAGAIN) => {
            debug!("Lock {:?} denied on fd {}", request, fd);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// A pid file, locked for as long as it stays open
///
/// Closing any other descriptor of the same file in this process also
/// releases the lock.
#[derive(Debug)]
pub struct PidFile {
    file: File,
    path: PathBuf,
}

impl PidFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

/// Create or reuse a pid file, and write the current pid into it
///
/// Returns `Ok(None)` if another process holds the file.
pub fn create_pid_file<P: AsRef<Path>>(path: P) -> Result<Option<PidFile>, PosixError> {
    let path = path.as_ref();
    let fd = fcntl::open(
        path,
        OFlag::O_RDWR | OFlag::O_APPEND | OFlag::O_CREAT | OFlag::O_CLOEXEC,
        Mode::S_IRUSR | Mode::S_IWUSR,
    )?;
    let file = unsafe { File::from_raw_fd(fd) };
    if !acquire_record_lock(file.as_raw_fd(), &LockRequest::whole_file(LockKind::Exclusive))? {
        return Ok(None);
    }
    unistd::ftruncate(file.as_raw_fd(), 0)?;
    let pid = unistd::getpid().to_string();
    let buf = pid.as_bytes();
    let mut pos = 0;
    while pos < buf.len() {
        pos += unistd::write(file.as_raw_fd(), &buf[pos..])?;
    }
    debug!("Wrote pid {} to {}", pid, path.display());
    Ok(Some(PidFile {
        file,
        path: path.to_owned(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn whole_file_request_covers_everything() {
        let flock = LockRequest::whole_file(LockKind::Exclusive).to_flock();
        assert_eq!(flock.l_type, libc::F_WRLCK as libc::c_short);
        assert_eq!(flock.l_whence, libc::SEEK_SET as libc::c_short);
        assert_eq!(flock.l_start, 0);
        assert_eq!(flock.l_len, 0);
    }

    #[test]
    fn bad_descriptor_is_an_error_not_a_denial() {
        let e = acquire_record_lock(-1, &LockRequest::whole_file(LockKind::Shared)).unwrap_err();
        assert_eq!(e.errno(), Some(Errno::EBADF));
    }

    #[test]
    fn repeated_requests_do_not_stack() {
        let file = tempfile::tempfile().unwrap();
        let request = LockRequest::new(LockKind::Exclusive, Whence::Start, 0, 10);
        assert!(acquire_record_lock(file.as_raw_fd(), &request).unwrap());
        assert!(acquire_record_lock(file.as_raw_fd(), &request).unwrap());
        let unlock = LockRequest::new(LockKind::Unlock, Whence::Start, 0, 10);
        assert!(acquire_record_lock(file.as_raw_fd(), &unlock).unwrap());
    }

    #[test]
    fn pid_file_holds_the_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.pid");
        fs::write(&path, "a much longer stale pid file").unwrap();
        let pid_file = create_pid_file(&path).unwrap().unwrap();
        assert_eq!(pid_file.path(), path.as_path());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            unistd::getpid().to_string()
        );
    }
}
