//! In-memory stand-in for the `btrfs` tool
//!
//! [`FakeBtrfs`] implements [`CommandRunner`] by emulating the handful of
//! `btrfs subvolume` commands the driver issues, so driver and protocol
//! behavior can be exercised without a real filesystem or root privileges.

use async_trait::async_trait;
use snapsync_types::{CommandFailure, CommandOutput, CommandRunner, CommandSpec};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const TOP_LEVEL_ID: u64 = 5;
const FIRST_SUBVOLUME_ID: u64 = 256;

/// Operation of the emulated tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    /// `btrfs subvolume show`
    Show,
    /// `btrfs subvolume list`
    List,
    /// `btrfs subvolume create`
    Create,
    /// `btrfs subvolume snapshot`
    Snapshot,
    /// `sync`
    Sync,
}

impl FakeOp {
    fn of(command: &CommandSpec) -> Option<Self> {
        match command.program.as_str() {
            "sync" => Some(Self::Sync),
            "btrfs" if command.arg_str(0) == Some("subvolume") => {
                match command.arg_str(1) {
                    Some("show") => Some(Self::Show),
                    Some("list") => Some(Self::List),
                    Some("create") => Some(Self::Create),
                    Some("snapshot") => Some(Self::Snapshot),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Subvolume {
    id: u64,
    generation: u64,
    path: PathBuf,
    read_only: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    subvolumes: Vec<Subvolume>,
    next_id: u64,
    generation: u64,
    failures: HashMap<FakeOp, CommandFailure>,
    delays: HashMap<FakeOp, Duration>,
    raw_list_output: Option<String>,
    commands: Vec<CommandSpec>,
}

impl FakeState {
    fn find(&self, path: &Path) -> Option<&Subvolume> {
        self.subvolumes.iter().find(|s| s.path == path)
    }

    fn add(&mut self, path: &Path, read_only: bool) {
        let id = if self.subvolumes.is_empty() {
            TOP_LEVEL_ID
        } else {
            self.next_id.max(FIRST_SUBVOLUME_ID)
        };
        self.next_id = (id + 1).max(FIRST_SUBVOLUME_ID);
        self.generation += 1;
        self.subvolumes.push(Subvolume {
            id,
            generation: self.generation,
            path: path.to_path_buf(),
            read_only,
        });
    }

    fn parent_id(&self, path: &Path) -> u64 {
        path.ancestors()
            .skip(1)
            .find_map(|ancestor| self.find(ancestor).map(|s| s.id))
            .unwrap_or(TOP_LEVEL_ID)
    }
}

/// Emulated `btrfs` command runner
///
/// Clones share state, so a test can keep a handle while the driver owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct FakeBtrfs {
    state: Arc<Mutex<FakeState>>,
}

fn path_at(args: &[OsString], index: usize) -> PathBuf {
    args.get(index).map(PathBuf::from).unwrap_or_default()
}

fn exit(stderr: String) -> CommandFailure {
    CommandFailure::Exit {
        code: Some(1),
        stderr,
    }
}

impl FakeBtrfs {
    /// Create a fake with no subvolumes at all
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subvolume, builder style
    pub fn with_volume<P: AsRef<Path>>(self, path: P) -> Self {
        self.add_subvolume(path);
        self
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a writable subvolume at `path`
    pub fn add_subvolume<P: AsRef<Path>>(&self, path: P) {
        self.state().add(path.as_ref(), false);
    }

    /// Whether a subvolume exists at `path`
    pub fn has_subvolume<P: AsRef<Path>>(&self, path: P) -> bool {
        self.state().find(path.as_ref()).is_some()
    }

    /// Whether the subvolume at `path` exists and is read-only
    pub fn is_read_only<P: AsRef<Path>>(&self, path: P) -> bool {
        self.state()
            .find(path.as_ref())
            .is_some_and(|s| s.read_only)
    }

    /// Paths of all subvolumes in creation order
    pub fn subvolumes(&self) -> Vec<PathBuf> {
        self.state()
            .subvolumes
            .iter()
            .map(|s| s.path.clone())
            .collect()
    }

    /// Make every call of `op` exit with `stderr`
    pub fn fail(&self, op: FakeOp, stderr: &str) {
        self.fail_with(op, exit(stderr.to_string()));
    }

    /// Make every call of `op` fail with `failure`
    pub fn fail_with(&self, op: FakeOp, failure: CommandFailure) {
        self.state().failures.insert(op, failure);
    }

    /// Stop failing `op`
    pub fn recover(&self, op: FakeOp) {
        self.state().failures.remove(&op);
    }

    /// Make every call of `op` take `delay` before completing
    pub fn delay(&self, op: FakeOp, delay: Duration) {
        self.state().delays.insert(op, delay);
    }

    /// Return `output` verbatim from `list` instead of the emulated listing
    pub fn set_list_output<S: Into<String>>(&self, output: S) {
        self.state().raw_list_output = Some(output.into());
    }

    /// Every command seen so far, rendered as a command line
    pub fn commands(&self) -> Vec<String> {
        self.state()
            .commands
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// How many times `op` was invoked
    pub fn count(&self, op: FakeOp) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|command| FakeOp::of(command) == Some(op))
            .count()
    }

    fn execute(&self, op: FakeOp, args: &[OsString]) -> Result<CommandOutput, CommandFailure> {
        let mut state = self.state();
        if let Some(failure) = state.failures.get(&op) {
            return Err(failure.clone());
        }

        let stdout = match op {
            FakeOp::Show => {
                let path = path_at(args, 2);
                let subvolume = state.find(&path).ok_or_else(|| {
                    exit(format!(
                        "ERROR: Not a Btrfs subvolume: {}",
                        path.display()
                    ))
                })?;
                format!(
                    "{}\n\tSubvolume ID: \t\t{}\n\tGeneration: \t\t{}\n\tFlags: \t\t\t{}\n",
                    path.display(),
                    subvolume.id,
                    subvolume.generation,
                    if subvolume.read_only { "readonly" } else { "-" }
                )
            }
            FakeOp::List => {
                let root = path_at(args, 2);
                if state.find(&root).is_none() {
                    return Err(exit(format!(
                        "ERROR: can't access '{}': Not a Btrfs subvolume",
                        root.display()
                    )));
                }
                if let Some(raw) = &state.raw_list_output {
                    raw.clone()
                } else {
                    let mut out = String::new();
                    for subvolume in &state.subvolumes {
                        let Ok(relative) = subvolume.path.strip_prefix(&root) else {
                            continue;
                        };
                        if relative.as_os_str().is_empty() {
                            continue;
                        }
                        let _ = writeln!(
                            out,
                            "ID {} gen {} top level {} path {}",
                            subvolume.id,
                            subvolume.generation,
                            state.parent_id(&subvolume.path),
                            relative.display()
                        );
                    }
                    out
                }
            }
            FakeOp::Create => {
                let path = path_at(args, 2);
                if state.find(&path).is_some() {
                    return Err(exit(format!(
                        "ERROR: target path already exists: {}",
                        path.display()
                    )));
                }
                state.add(&path, false);
                format!("Create subvolume '{}'\n", path.display())
            }
            FakeOp::Snapshot => {
                let read_only = args.iter().any(|a| a == "-r");
                let mut paths = args
                    .iter()
                    .skip(2)
                    .filter(|a| !a.to_str().is_some_and(|a| a.starts_with('-')));
                let source = paths.next().map(PathBuf::from).unwrap_or_default();
                let dest = paths.next().map(PathBuf::from).unwrap_or_default();

                if state.find(&source).is_none() {
                    return Err(exit(format!(
                        "ERROR: Not a Btrfs subvolume: {}",
                        source.display()
                    )));
                }
                if state.find(&dest).is_some() {
                    return Err(exit(format!(
                        "ERROR: target path already exists: {}",
                        dest.display()
                    )));
                }
                let parent_exists = dest
                    .parent()
                    .is_some_and(|parent| state.find(parent).is_some());
                if !parent_exists {
                    return Err(exit(format!(
                        "ERROR: cannot snapshot '{}': No such file or directory",
                        dest.display()
                    )));
                }
                state.add(&dest, read_only);
                format!(
                    "Create a readonly snapshot of '{}' in '{}'\n",
                    source.display(),
                    dest.display()
                )
            }
            FakeOp::Sync => String::new(),
        };

        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
        })
    }
}

#[async_trait]
impl CommandRunner for FakeBtrfs {
    async fn run(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandFailure> {
        let op = {
            let mut state = self.state();
            state.commands.push(command.clone());
            FakeOp::of(command)
        };

        let Some(op) = op else {
            return Err(CommandFailure::Spawn {
                message: format!("{}: unsupported by fake", command.program),
            });
        };

        let delay = self.state().delays.get(&op).copied();
        if let Some(delay) = delay {
            if tokio::time::timeout(timeout, tokio::time::sleep(delay))
                .await
                .is_err()
            {
                return Err(CommandFailure::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
        }

        self.execute(op, &command.args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btrfs(args: &[&str]) -> CommandSpec {
        args.iter()
            .fold(CommandSpec::new("btrfs").arg("subvolume"), |c, a| c.arg(*a))
    }

    #[tokio::test]
    async fn test_show_known_and_unknown() {
        let fake = FakeBtrfs::new().with_volume("/data");
        let timeout = Duration::from_secs(1);

        assert!(fake.run(&btrfs(&["show", "/data"]), timeout).await.is_ok());
        let failure = fake
            .run(&btrfs(&["show", "/tmp"]), timeout)
            .await
            .unwrap_err();
        assert!(failure.to_string().contains("Not a Btrfs subvolume"));
    }

    #[tokio::test]
    async fn test_create_then_snapshot_then_list() {
        let fake = FakeBtrfs::new().with_volume("/data");
        let timeout = Duration::from_secs(1);

        fake.run(&btrfs(&["create", "/data/.snapshots"]), timeout)
            .await
            .unwrap();
        fake.run(
            &btrfs(&["snapshot", "-r", "/data", "/data/.snapshots/s1"]),
            timeout,
        )
        .await
        .unwrap();

        let output = fake
            .run(&btrfs(&["list", "/data"]), timeout)
            .await
            .unwrap();
        assert_eq!(
            output.stdout,
            "ID 256 gen 2 top level 5 path .snapshots\n\
             ID 257 gen 3 top level 256 path .snapshots/s1\n"
        );
        assert!(fake.is_read_only("/data/.snapshots/s1"));
        assert_eq!(fake.count(FakeOp::Snapshot), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_and_recovery() {
        let fake = FakeBtrfs::new().with_volume("/data");
        let timeout = Duration::from_secs(1);

        fake.fail(FakeOp::List, "ERROR: boom");
        assert!(fake.run(&btrfs(&["list", "/data"]), timeout).await.is_err());

        fake.recover(FakeOp::List);
        assert!(fake.run(&btrfs(&["list", "/data"]), timeout).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_beyond_timeout() {
        let fake = FakeBtrfs::new().with_volume("/data");
        fake.delay(FakeOp::Sync, Duration::from_secs(30));

        let failure = fake
            .run(&CommandSpec::new("sync").arg("/data"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(failure, CommandFailure::Timeout { seconds: 2 });
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let fake = FakeBtrfs::new();
        let failure = fake
            .run(&CommandSpec::new("zfs"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(failure, CommandFailure::Spawn { .. }));
    }
}
