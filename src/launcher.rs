//! Self-locating launcher
//!
//! The launcher binary lives inside an installation tree. At startup it
//! finds its own path through the process image link, derives the root
//! of the installation from it, and replaces itself with the real
//! interpreter running the application's entry point. Optionally it
//! detaches from the terminal first.

use log::{debug, info};
use nix::errno::Errno;
use nix::sys::stat;
use nix::unistd;
use std::error::Error;
use std::ffi::{CString, OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

/// Argument requesting detachment from the terminal
pub const DAEMONIZE_FLAG: &str = "--daemonize";

/// Interpreter, relative to the installation root
pub const INTERPRETER_PATH: &str = "ext/node/bin/shiny-server";

/// Application entry point, relative to the installation root
pub const ENTRY_POINT_PATH: &str = "lib/main.js";

/// Directories between the installation root and the directory holding the launcher
pub const ROOT_DEPTH: usize = 2;

/// Reasons the launcher cannot hand over to the application
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LauncherError {
    /// The path of the process image link does not fit in a path
    PathOverflow,
    /// The process image link does not exist
    MissingLink(PathBuf),
    /// The process image link is not a symbolic link
    NotASymlink(PathBuf),
    /// The process image link points to an overly long path
    TargetTooLong,
    /// The executable is not deep enough to have an installation root
    NoInstallationRoot(PathBuf),
    /// A system call failed
    Io(Errno),
}

impl LauncherError {
    /// Process exit status reported for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            LauncherError::PathOverflow | LauncherError::TargetTooLong => 2,
            _ => 1,
        }
    }
}

impl Error for LauncherError {}

impl fmt::Display for LauncherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            LauncherError::PathOverflow => write!(f, "Process image link path is too long"),
            LauncherError::MissingLink(link) => {
                write!(f, "{} doesn't exist--got Linux?", link.display())
            }
            LauncherError::NotASymlink(link) => write!(f, "{} was not a symlink", link.display()),
            LauncherError::TargetTooLong => write!(f, "Link resolved to an unexpectedly long path"),
            LauncherError::NoInstallationRoot(exe) => {
                write!(f, "No installation root above {}", exe.display())
            }
            LauncherError::Io(e) => write!(f, "Launcher error: {}", e),
        }
    }
}

/// Launcher configuration
///
/// # Example
/// ```no_run
/// use posixhost::launcher::Launcher;
///
/// let args: Vec<_> = std::env::args_os().collect();
/// let e = Launcher::default().run(&args);
/// std::process::exit(e.exit_code());
/// ```
#[derive(Clone, Debug)]
pub struct Launcher {
    daemonize_flag: OsString,
    self_link: Option<PathBuf>,
    interpreter: PathBuf,
    entry_point: PathBuf,
    root_depth: usize,
    max_path_len: usize,
}

impl Default for Launcher {
    fn default() -> Self {
        Launcher {
            daemonize_flag: OsString::from(DAEMONIZE_FLAG),
            self_link: None,
            interpreter: PathBuf::from(INTERPRETER_PATH),
            entry_point: PathBuf::from(ENTRY_POINT_PATH),
            root_depth: ROOT_DEPTH,
            max_path_len: libc::PATH_MAX as usize,
        }
    }
}

impl Launcher {
    /// Argument that requests daemonization
    pub fn daemonize_flag<T: AsRef<OsStr>>(mut self, flag: T) -> Self {
        self.daemonize_flag = flag.as_ref().to_owned();
        self
    }

    /// Link to read the executable path from, instead of `/proc/<pid>/exe`
    pub fn self_link<T: AsRef<Path>>(mut self, link: T) -> Self {
        self.self_link = Some(link.as_ref().to_owned());
        self
    }

    /// Interpreter to execute, relative to the installation root
    pub fn interpreter<T: AsRef<Path>>(mut self, path: T) -> Self {
        self.interpreter = path.as_ref().to_owned();
        self
    }

    /// Script handed to the interpreter, relative to the installation root
    pub fn entry_point<T: AsRef<Path>>(mut self, path: T) -> Self {
        self.entry_point = path.as_ref().to_owned();
        self
    }

    /// Number of directories between the installation root and the launcher's directory
    pub fn root_depth(mut self, depth: usize) -> Self {
        self.root_depth = depth;
        self
    }

    /// Longest path accepted for the link and its target
    pub fn max_path_len(mut self, len: usize) -> Self {
        self.max_path_len = len;
        self
    }

    /// Whether the daemonize flag is among `args` (`args[0]` is the program name)
    pub fn wants_daemon<S: AsRef<OsStr>>(&self, args: &[S]) -> bool {
        args.iter()
            .skip(1)
            .any(|arg| arg.as_ref() == self.daemonize_flag.as_os_str())
    }

    fn link_path(&self) -> Result<PathBuf, LauncherError> {
        let link = match &self.self_link {
            Some(link) => link.clone(),
            None => PathBuf::from(format!("/proc/{}/exe", unistd::getpid())),
        };
        if link.as_os_str().len() > self.max_path_len {
            return Err(LauncherError::PathOverflow);
        }
        Ok(link)
    }

    /// Absolute path of the running executable
    pub fn executable_path(&self) -> Result<PathBuf, LauncherError> {
        let link = self.link_path()?;
        let st = stat::lstat(link.as_path()).map_err(|e| match e {
            Errno::ENOENT => LauncherError::MissingLink(link.clone()),
            e => LauncherError::Io(e),
        })?;
        if st.st_mode & libc::S_IFMT != libc::S_IFLNK {
            return Err(LauncherError::NotASymlink(link));
        }
        if st.st_size < 0 || st.st_size as u64 > self.max_path_len as u64 {
            return Err(LauncherError::TargetTooLong);
        }
        // procfs links report a size of 0
        let needed = if st.st_size > 0 {
            st.st_size as usize
        } else {
            self.max_path_len
        };
        let clink = to_cstring(link.as_os_str())?;
        let mut buf = vec![0u8; needed + 1];
        let len = unsafe {
            libc::readlink(
                clink.as_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
            )
        };
        if len < 0 {
            return Err(LauncherError::Io(Errno::last()));
        }
        let len = len as usize;
        if len > needed {
            return Err(LauncherError::TargetTooLong);
        }
        buf.truncate(len);
        let executable = PathBuf::from(OsString::from_vec(buf));
        debug!("{} -> {}", link.display(), executable.display());
        Ok(executable)
    }

    /// Compute what to execute for a launcher installed at `executable`
    pub fn plan_for<S: AsRef<OsStr>>(
        &self,
        executable: &Path,
        args: &[S],
    ) -> Result<LaunchPlan, LauncherError> {
        let root = installation_root(executable, self.root_depth)
            .ok_or_else(|| LauncherError::NoInstallationRoot(executable.to_owned()))?
            .to_owned();
        let program = root.join(&self.interpreter);
        let entry_point = root.join(&self.entry_point);
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(to_cstring(program.as_os_str())?);
        argv.push(to_cstring(entry_point.as_os_str())?);
        for arg in args.iter().skip(1) {
            argv.push(to_cstring(arg.as_ref())?);
        }
        Ok(LaunchPlan {
            root,
            program,
            entry_point,
            argv,
        })
    }

    /// Locate the running executable and compute what to execute
    pub fn plan<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<LaunchPlan, LauncherError> {
        let executable = self.executable_path()?;
        self.plan_for(&executable, args)
    }

    /// Daemonize if requested, then replace the process with the application
    ///
    /// Only returns on failure.
    pub fn run<S: AsRef<OsStr>>(&self, args: &[S]) -> LauncherError {
        if self.wants_daemon(args) {
            if let Err(e) = daemonize() {
                return LauncherError::Io(e);
            }
        }
        match self.plan(args) {
            Ok(plan) => plan.exec(),
            Err(e) => e,
        }
    }
}

/// The directory `depth` levels above the one holding `executable`
pub fn installation_root(executable: &Path, depth: usize) -> Option<&Path> {
    let mut dir = executable.parent()?;
    for _ in 0..depth {
        dir = dir.parent()?;
    }
    if dir.as_os_str().is_empty() {
        return None;
    }
    Some(dir)
}

/// What the launcher is about to execute
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchPlan {
    pub root: PathBuf,
    pub program: PathBuf,
    pub entry_point: PathBuf,
    /// Complete argument vector, starting with the program itself
    pub argv: Vec<CString>,
}

impl LaunchPlan {
    /// Replace the current process image
    ///
    /// Descriptors without close-on-exec, signal dispositions set to
    /// ignore, and the session set up by daemonization carry over.
    /// Only returns on failure.
    pub fn exec(&self) -> LauncherError {
        let program = match self.argv.first() {
            Some(program) => program,
            None => return LauncherError::Io(Errno::EINVAL),
        };
        info!("Executing {}", self.program.display());
        match unistd::execv(program, &self.argv) {
            Ok(never) => match never {},
            Err(e) => LauncherError::Io(e),
        }
    }
}

fn to_cstring(s: &OsStr) -> Result<CString, LauncherError> {
    CString::new(s.as_bytes()).map_err(|_| LauncherError::Io(Errno::EINVAL))
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
fn daemonize() -> Result<(), Errno> {
    // Keep the working directory, point the standard streams to /dev/null
    unistd::daemon(true, false)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
fn daemonize() -> Result<(), Errno> {
    Err(Errno::ENOSYS)
}
