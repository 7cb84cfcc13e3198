//! Actions bound to the watched ref: shell commands or in-process callbacks

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, Weak};
use tokio::process::{Child, Command};
use tracing::{self, debug, info};

use crate::error::BoxError;
use crate::events::{Event, EventBus, Listener, SPAWN_EVENT, listener};
use crate::payload::WebhookPayload;

const DEFAULT_POSIX_SHELL: &str = "/bin/sh";
const DEFAULT_WINDOWS_SHELL: &str = "cmd.exe";
const CYGWIN_ROOT: &str = "C:\\cygwin";

/// What to run when the watched ref fires
#[derive(Clone)]
pub enum Action {
    /// Command line handed to the host shell
    Shell(String),
    /// Listener invoked synchronously with the ref event
    Callback(Listener),
}

impl Action {
    pub fn shell(command: impl Into<String>) -> Self {
        Action::Shell(command.into())
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&Event) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Action::Callback(listener(f))
    }
}

impl From<&str> for Action {
    fn from(command: &str) -> Self {
        Action::shell(command)
    }
}

impl From<String> for Action {
    fn from(command: String) -> Self {
        Action::Shell(command)
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Shell(command) => f.debug_tuple("Shell").field(command).finish(),
            Action::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Operating system family relevant to shell selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Posix,
    Windows,
}

/// Environment values consulted when picking a shell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnv {
    pub shell: Option<String>,
    pub home: Option<String>,
    pub comspec: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatform {
    pub os: OsFamily,
    pub env: HostEnv,
}

impl HostPlatform {
    pub fn current() -> Self {
        let os = if cfg!(windows) {
            OsFamily::Windows
        } else {
            OsFamily::Posix
        };
        Self {
            os,
            env: HostEnv {
                shell: non_empty_var("SHELL"),
                home: non_empty_var("HOME"),
                comspec: non_empty_var("ComSpec"),
            },
        }
    }

    /// Windows host whose HOME points into a cygwin tree
    pub fn is_cygwin(&self) -> bool {
        self.os == OsFamily::Windows
            && self
                .env
                .home
                .as_deref()
                .is_some_and(|home| home.to_ascii_lowercase().contains("cygwin"))
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Program and argument vector used to run a shell command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Arguments are appended untouched (cmd.exe does its own parsing)
    pub verbatim: bool,
}

impl ShellInvocation {
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

pub fn resolve_shell_invocation(platform: &HostPlatform, command: &str) -> ShellInvocation {
    let posix = |program: String| ShellInvocation {
        program,
        args: vec!["-c".to_string(), command.to_string()],
        verbatim: false,
    };

    match (platform.os, platform.env.shell.as_deref()) {
        (OsFamily::Posix, shell) => posix(shell.unwrap_or(DEFAULT_POSIX_SHELL).to_string()),
        (OsFamily::Windows, Some(shell)) if platform.is_cygwin() => posix(cygpath(shell)),
        (OsFamily::Windows, _) => ShellInvocation {
            program: platform
                .env
                .comspec
                .clone()
                .unwrap_or_else(|| DEFAULT_WINDOWS_SHELL.to_string()),
            args: vec![
                "/s".to_string(),
                "/c".to_string(),
                format!("\"{}\"", command),
            ],
            verbatim: true,
        },
    }
}

/// Converts a cygwin path such as `/bin/bash` to `C:\cygwin\bin\bash`.
pub fn cygpath(path: &str) -> String {
    let rooted = path.starts_with(['/', '\\']);
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }

    let joined = parts.join("\\");
    if rooted {
        format!("{}\\{}", CYGWIN_ROOT, joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

#[derive(Debug)]
struct ProcessInner {
    pid: Option<u32>,
    command: String,
    started_at: DateTime<Utc>,
    child: Mutex<Option<Child>>,
}

/// Live child process published with the `spawn` event.
///
/// The first listener to call [`ProcessHandle::take`] owns the child.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    inner: Arc<ProcessInner>,
}

impl ProcessHandle {
    pub fn new(child: Child, command: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ProcessInner {
                pid: child.id(),
                command: command.into(),
                started_at: Utc::now(),
                child: Mutex::new(Some(child)),
            }),
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.inner.pid
    }

    pub fn command(&self) -> &str {
        &self.inner.command
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    pub fn take(&self) -> Option<Child> {
        match self.inner.child.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Starts the shell with inherited stdio and payload details in the environment.
pub fn spawn_shell(
    invocation: &ShellInvocation,
    working_dir: Option<&Path>,
    payload: &WebhookPayload,
) -> std::io::Result<Child> {
    let mut cmd = Command::new(&invocation.program);
    push_args(&mut cmd, invocation);
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let vars = [
        ("HOOK_REF", payload.git_ref()),
        ("HOOK_BRANCH", payload.branch()),
        ("HOOK_COMMIT_SHA", payload.commit_sha()),
        ("HOOK_PUSHER", payload.pusher_name()),
        ("HOOK_REPOSITORY", payload.repository()),
    ];
    for (key, value) in vars {
        if let Some(value) = value {
            cmd.env(key, value);
        }
    }

    cmd.spawn()
}

#[cfg(windows)]
fn push_args(cmd: &mut Command, invocation: &ShellInvocation) {
    if invocation.verbatim {
        for arg in &invocation.args {
            cmd.raw_arg(arg);
        }
    } else {
        cmd.args(&invocation.args);
    }
}

#[cfg(not(windows))]
fn push_args(cmd: &mut Command, invocation: &ShellInvocation) {
    cmd.args(&invocation.args);
}

/// Registers `action` as a listener on `git_ref`.
///
/// Shell actions never wait for the child; the handle goes out with `spawn`.
pub fn bind(bus: &Arc<EventBus>, git_ref: &str, action: Action, working_dir: Option<PathBuf>) {
    match action {
        Action::Callback(callback) => bus.subscribe(git_ref, callback),
        Action::Shell(command) => {
            let weak: Weak<EventBus> = Arc::downgrade(bus);
            bus.subscribe(
                git_ref,
                listener(move |event| {
                    let Some(payload) = event.payload() else {
                        return Ok(());
                    };
                    run_shell(&weak, &command, working_dir.as_deref(), payload)
                }),
            );
        }
    }
}

fn run_shell(
    bus: &Weak<EventBus>,
    command: &str,
    working_dir: Option<&Path>,
    payload: &WebhookPayload,
) -> Result<(), BoxError> {
    // tokio's child reaper needs a runtime; spawning without one panics
    if tokio::runtime::Handle::try_current().is_err() {
        return Err(format!("cannot run '{}': no tokio runtime on this thread", command).into());
    }

    let invocation = resolve_shell_invocation(&HostPlatform::current(), command);
    info!("Running: {}", invocation.command_line());

    let child = spawn_shell(&invocation, working_dir, payload)
        .map_err(|e| format!("failed to spawn '{}': {}", invocation.program, e))?;
    let handle = ProcessHandle::new(child, command);
    debug!("Spawned pid {:?} for '{}'", handle.id(), command);

    if let Some(bus) = bus.upgrade() {
        bus.publish(SPAWN_EVENT, &Event::Spawn(handle))?;
    }
    Ok(())
}
