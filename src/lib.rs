/*!
# posixhost

POSIX primitives for a scripting host that runs applications on behalf
of other users.

## Overview

The host needs a handful of operating system services that its own
runtime does not expose, and that are easy to get subtly wrong:

- Looking up users and groups with the reentrant `*_r` functions, telling
  "no such entry" apart from "the lookup failed"
- Listing every group a user belongs to, whatever the size of the list
- Giving the process the group credentials of a user
- Taking non-blocking advisory record locks, e.g. on a pid file
- Locating the installation from the launcher's own path, and handing
  over to the real application (see [`launcher`])

Lookups return `Ok(Some(record))` when an entry exists, `Ok(None)` when
it doesn't, and an error only when the system could not answer.

## Example

```no_run
use posixhost::{set_supplementary_groups, supplementary_group_ids, UserRecord};

fn main() {
    let user = UserRecord::from_name("www-data")
        .unwrap_or_else(|e| panic!("Failed to look up the user: {}", e))
        .unwrap_or_else(|| panic!("No such user"));
    println!("{} uses {}", user.name, user.shell.display());

    let groups = supplementary_group_ids(&user.name).unwrap().unwrap_or_default();
    println!("Member of {} groups", groups.len());

    set_supplementary_groups(&user.name, true)
        .unwrap_or_else(|e| panic!("Failed to change groups: {}", e));
}
```

## Threads

Lookups are safe to run concurrently. Group credentials and record locks
belong to the whole process: changing the groups affects every thread.
*/

pub use self::errors::*;
pub use self::group::*;
pub use self::lock::*;
pub use self::lookup::*;
pub use self::privilege::*;
pub use self::user::*;

mod errors;
mod group;
pub mod launcher;
mod lock;
mod lookup;
mod privilege;
mod user;

/// Reexported dependencies for use in consuming crates.
///
/// - `libc`: Low-level bindings to the C standard library
/// - `nix`: Rust friendly bindings to *nix APIs (`Uid`, `Gid`, `Errno`)
pub mod reexports {
    pub use {libc, nix};
}
