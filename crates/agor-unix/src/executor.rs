//! The command-executor seam and its backends.
//!
//! The controller never touches the host directly; it issues argv
//! vectors through [`CommandExecutor`]. The production backend spawns a
//! privileged helper; tests use [`FakeHost`], an in-memory model of
//! users, groups, files, and modes, or [`NoopExecutor`].

use crate::error::{UnixError, UnixResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// Executes host commands on behalf of the controller.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command; return its stdout.
    ///
    /// # Errors
    ///
    /// Returns [`UnixError::OpFailed`] on non-zero exit.
    async fn exec(&self, argv: &[&str]) -> UnixResult<String>;

    /// Run a command; report whether it exited zero.
    async fn check(&self, argv: &[&str]) -> bool;

    /// Run a command with data piped to stdin; return its stdout.
    ///
    /// Used for values that must never appear on a command line
    /// (`chpasswd`).
    ///
    /// # Errors
    ///
    /// Returns [`UnixError::OpFailed`] on non-zero exit.
    async fn exec_with_input(&self, argv: &[&str], stdin: &str) -> UnixResult<String>;
}

/// Production backend: spawns each command, optionally prefixed with a
/// privileged helper (e.g. `["sudo", "-n"]`).
#[derive(Debug, Default)]
pub struct HelperExecutor {
    prefix: Vec<String>,
}

impl HelperExecutor {
    /// Run commands directly (the daemon itself is privileged).
    #[must_use]
    pub fn new() -> Self {
        Self { prefix: Vec::new() }
    }

    /// Run commands through a helper prefix.
    #[must_use]
    pub fn with_helper(prefix: Vec<String>) -> Self {
        Self { prefix }
    }

    fn command(&self, argv: &[&str]) -> tokio::process::Command {
        let mut full: Vec<&str> = self.prefix.iter().map(String::as_str).collect();
        full.extend_from_slice(argv);
        let mut cmd = tokio::process::Command::new(full[0]);
        cmd.args(&full[1..]);
        cmd
    }

    async fn run(&self, argv: &[&str], stdin: Option<&str>) -> UnixResult<String> {
        let op = argv.join(" ");
        let mut cmd = self.command(argv);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.stdin(if stdin.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|e| UnixError::OpFailed {
            op: op.clone(),
            exitcode: -1,
            stderr: e.to_string(),
        })?;

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            use tokio::io::AsyncWriteExt as _;
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| UnixError::OpFailed {
                    op: op.clone(),
                    exitcode: -1,
                    stderr: e.to_string(),
                })?;
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| UnixError::OpFailed {
                op: op.clone(),
                exitcode: -1,
                stderr: e.to_string(),
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(UnixError::OpFailed {
                op,
                exitcode: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

#[async_trait]
impl CommandExecutor for HelperExecutor {
    async fn exec(&self, argv: &[&str]) -> UnixResult<String> {
        debug!(op = %argv.join(" "), "exec");
        self.run(argv, None).await
    }

    async fn check(&self, argv: &[&str]) -> bool {
        self.run(argv, None).await.is_ok()
    }

    async fn exec_with_input(&self, argv: &[&str], stdin: &str) -> UnixResult<String> {
        debug!(op = %argv.join(" "), "exec (stdin)");
        self.run(argv, Some(stdin)).await
    }
}

/// A backend that records commands and succeeds without doing anything.
#[derive(Debug, Default)]
pub struct NoopExecutor {
    log: Mutex<Vec<String>>,
}

impl NoopExecutor {
    /// Create a no-op executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command line issued so far.
    ///
    /// # Panics
    ///
    /// Panics if the log mutex is poisoned (test-only type).
    #[must_use]
    pub fn log(&self) -> Vec<String> {
        self.log.lock().expect("noop log lock").clone()
    }
}

#[async_trait]
impl CommandExecutor for NoopExecutor {
    async fn exec(&self, argv: &[&str]) -> UnixResult<String> {
        self.log.lock().expect("noop log lock").push(argv.join(" "));
        Ok(String::new())
    }

    async fn check(&self, argv: &[&str]) -> bool {
        self.log.lock().expect("noop log lock").push(argv.join(" "));
        false
    }

    async fn exec_with_input(&self, argv: &[&str], _stdin: &str) -> UnixResult<String> {
        // The input is deliberately not logged; it may be a password.
        self.log.lock().expect("noop log lock").push(argv.join(" "));
        Ok(String::new())
    }
}

/// A recorded user account in the fake host.
#[derive(Debug, Clone)]
pub struct FakeUser {
    /// Assigned uid.
    pub uid: u32,
    /// Home directory.
    pub home: PathBuf,
    /// Supplementary group memberships.
    pub groups: BTreeSet<String>,
}

#[derive(Debug)]
struct HostState {
    users: BTreeMap<String, FakeUser>,
    groups: BTreeMap<String, u32>,
    next_gid: u32,
    files: BTreeMap<PathBuf, String>,
    dirs: BTreeSet<PathBuf>,
    modes: BTreeMap<PathBuf, u32>,
    group_of: BTreeMap<PathBuf, String>,
    symlinks: BTreeMap<PathBuf, PathBuf>,
    passwords: BTreeMap<String, String>,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            groups: BTreeMap::new(),
            next_gid: 5_000,
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
            modes: BTreeMap::new(),
            group_of: BTreeMap::new(),
            symlinks: BTreeMap::new(),
            passwords: BTreeMap::new(),
        }
    }
}

/// An in-memory host model implementing the executor vocabulary the
/// controller uses: `getent`, `test`, `groupadd`, `useradd`, `usermod`,
/// `gpasswd`, `chgrp`, `chmod`, `mkdir`, `chown`, `ln`, `rm`, `id`,
/// `tee`, `chpasswd`.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
    log: Mutex<Vec<String>>,
}

impl FakeHost {
    /// Create an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, argv: &[&str]) {
        self.log.lock().expect("fake log lock").push(argv.join(" "));
    }

    /// Every command line issued so far.
    ///
    /// # Panics
    ///
    /// Panics if the log mutex is poisoned (test-only type).
    #[must_use]
    pub fn log(&self) -> Vec<String> {
        self.log.lock().expect("fake log lock").clone()
    }

    /// Count of issued commands whose line starts with `prefix`.
    #[must_use]
    pub fn invocations(&self, prefix: &str) -> usize {
        self.log().iter().filter(|l| l.starts_with(prefix)).count()
    }

    /// Look up a provisioned user.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned (test-only type).
    #[must_use]
    pub fn user(&self, name: &str) -> Option<FakeUser> {
        self.state.lock().expect("fake state lock").users.get(name).cloned()
    }

    /// Whether a group exists.
    #[must_use]
    pub fn has_group(&self, name: &str) -> bool {
        self.state
            .lock()
            .expect("fake state lock")
            .groups
            .contains_key(name)
    }

    /// The gid of a group, if it exists.
    #[must_use]
    pub fn gid_of(&self, name: &str) -> Option<u32> {
        self.state
            .lock()
            .expect("fake state lock")
            .groups
            .get(name)
            .copied()
    }

    /// The mode applied to a path, if any.
    #[must_use]
    pub fn mode_of(&self, path: &std::path::Path) -> Option<u32> {
        self.state.lock().expect("fake state lock").modes.get(path).copied()
    }

    /// The group a path was chgrp'd to, if any.
    #[must_use]
    pub fn group_of(&self, path: &std::path::Path) -> Option<String> {
        self.state
            .lock()
            .expect("fake state lock")
            .group_of
            .get(path)
            .cloned()
    }

    /// The contents of a written file, if any.
    #[must_use]
    pub fn file(&self, path: &std::path::Path) -> Option<String> {
        self.state.lock().expect("fake state lock").files.get(path).cloned()
    }

    /// The target of a symlink, if any.
    #[must_use]
    pub fn symlink(&self, path: &std::path::Path) -> Option<PathBuf> {
        self.state
            .lock()
            .expect("fake state lock")
            .symlinks
            .get(path)
            .cloned()
    }

    /// The last password synced for a user, if any.
    #[must_use]
    pub fn password(&self, user: &str) -> Option<String> {
        self.state
            .lock()
            .expect("fake state lock")
            .passwords
            .get(user)
            .cloned()
    }

    /// Pre-seed a user account (for OS-query paths).
    ///
    /// # Panics
    ///
    /// Panics if the state mutex is poisoned (test-only type).
    pub fn seed_user(&self, name: &str, uid: u32, home: impl Into<PathBuf>) {
        self.state.lock().expect("fake state lock").users.insert(
            name.to_string(),
            FakeUser {
                uid,
                home: home.into(),
                groups: BTreeSet::new(),
            },
        );
    }

    #[allow(clippy::too_many_lines)]
    fn apply(&self, argv: &[&str], stdin: Option<&str>) -> UnixResult<String> {
        let op = argv.join(" ");
        let fail = |stderr: &str| UnixError::OpFailed {
            op: op.clone(),
            exitcode: 1,
            stderr: stderr.to_string(),
        };

        let mut state = self.state.lock().expect("fake state lock");
        match argv {
            ["getent", "group", name] => match state.groups.get(*name) {
                Some(gid) => Ok(format!("{name}:x:{gid}:")),
                None => Err(fail("no such group")),
            },
            ["getent", "passwd", name] => state
                .users
                .get(*name)
                .map(|u| format!("{name}:x:{}:{}::{}:/bin/bash", u.uid, u.uid, u.home.display()))
                .ok_or_else(|| fail("no such user")),
            ["test", "-f", path] => {
                if state.files.contains_key(&PathBuf::from(path)) {
                    Ok(String::new())
                } else {
                    Err(fail(""))
                }
            },
            ["test", "-L", path] => {
                if state.symlinks.contains_key(&PathBuf::from(path)) {
                    Ok(String::new())
                } else {
                    Err(fail(""))
                }
            },
            ["groupadd", "--system", name] | ["groupadd", name] => {
                if state.groups.contains_key(*name) {
                    return Err(fail("group exists"));
                }
                let gid = state.next_gid;
                state.next_gid = state.next_gid.saturating_add(1);
                state.groups.insert((*name).to_string(), gid);
                Ok(String::new())
            },
            ["useradd", "--uid", uid, "--create-home", "--home-dir", home, "--shell", _, name] => {
                if state.users.contains_key(*name) {
                    return Err(fail("user exists"));
                }
                let uid: u32 = uid.parse().map_err(|_| fail("bad uid"))?;
                if state.users.values().any(|u| u.uid == uid) {
                    return Err(fail("uid in use"));
                }
                state.users.insert(
                    (*name).to_string(),
                    FakeUser {
                        uid,
                        home: PathBuf::from(home),
                        groups: BTreeSet::new(),
                    },
                );
                state.dirs.insert(PathBuf::from(home));
                Ok(String::new())
            },
            ["usermod", "-aG", group, user] => {
                if !state.groups.contains_key(*group) {
                    return Err(fail("no such group"));
                }
                state
                    .users
                    .get_mut(*user)
                    .ok_or_else(|| fail("no such user"))?
                    .groups
                    .insert((*group).to_string());
                Ok(String::new())
            },
            ["gpasswd", "-d", user, group] => {
                state
                    .users
                    .get_mut(*user)
                    .ok_or_else(|| fail("no such user"))?
                    .groups
                    .remove(*group);
                Ok(String::new())
            },
            ["chgrp", group, path] => {
                if !state.groups.contains_key(*group) {
                    return Err(fail("no such group"));
                }
                state.group_of.insert(PathBuf::from(path), (*group).to_string());
                Ok(String::new())
            },
            ["chmod", mode, path] => {
                let parsed = u32::from_str_radix(mode, 8).map_err(|_| fail("bad mode"))?;
                state.modes.insert(PathBuf::from(path), parsed);
                Ok(String::new())
            },
            ["mkdir", "-p", path] => {
                state.dirs.insert(PathBuf::from(path));
                Ok(String::new())
            },
            ["chown", _owner, path] => {
                let path = PathBuf::from(path);
                if !state.dirs.contains(&path) && !state.files.contains_key(&path) {
                    return Err(fail("no such path"));
                }
                Ok(String::new())
            },
            ["ln", "-sfn", target, link] => {
                state
                    .symlinks
                    .insert(PathBuf::from(link), PathBuf::from(target));
                Ok(String::new())
            },
            ["rm", "-f", path] => {
                let path = PathBuf::from(path);
                state.symlinks.remove(&path);
                state.files.remove(&path);
                Ok(String::new())
            },
            ["id", "-u", name] => state
                .users
                .get(*name)
                .map(|u| format!("{}\n", u.uid))
                .ok_or_else(|| fail("no such user")),
            ["tee", path] => {
                let content = stdin.ok_or_else(|| fail("tee without stdin"))?;
                state
                    .files
                    .insert(PathBuf::from(path), content.to_string());
                Ok(content.to_string())
            },
            ["chpasswd"] => {
                let input = stdin.ok_or_else(|| fail("chpasswd without stdin"))?;
                for line in input.lines() {
                    let (user, pass) = line
                        .split_once(':')
                        .ok_or_else(|| fail("malformed chpasswd line"))?;
                    if !state.users.contains_key(user) {
                        return Err(fail("no such user"));
                    }
                    state
                        .passwords
                        .insert(user.to_string(), pass.to_string());
                }
                Ok(String::new())
            },
            _ => Err(fail("unknown command in fake host")),
        }
    }
}

#[async_trait]
impl CommandExecutor for FakeHost {
    async fn exec(&self, argv: &[&str]) -> UnixResult<String> {
        self.record(argv);
        self.apply(argv, None)
    }

    async fn check(&self, argv: &[&str]) -> bool {
        self.record(argv);
        self.apply(argv, None).is_ok()
    }

    async fn exec_with_input(&self, argv: &[&str], stdin: &str) -> UnixResult<String> {
        // Never log stdin: it may be a password.
        self.record(argv);
        self.apply(argv, Some(stdin))
    }
}
