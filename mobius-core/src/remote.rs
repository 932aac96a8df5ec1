//! Remote pool mirroring
//!
//! A locator is classified by prefix into one transport kind. Git kinds
//! keep a working mirror that is cloned once and fast-forwarded afterwards;
//! file and HTTP(S) kinds copy the remote `pool.db`. Every transfer lands in
//! a temporary sibling first, so a failed transfer never replaces what was
//! already on disk.

use crate::config::{write_atomic, PoolConfig};
use crate::error::{PoolError, Result};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const REMOTE_DATABASE: &str = "pool.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteKind {
    File,
    GitSsh,
    GitHttps,
    GitFile,
    Http,
    Https,
    Unknown,
}

impl RemoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteKind::File => "file",
            RemoteKind::GitSsh => "git-ssh",
            RemoteKind::GitHttps => "git-https",
            RemoteKind::GitFile => "git-file",
            RemoteKind::Http => "http",
            RemoteKind::Https => "https",
            RemoteKind::Unknown => "unknown",
        }
    }

    pub fn is_git(&self) -> bool {
        matches!(
            self,
            RemoteKind::GitSsh | RemoteKind::GitHttps | RemoteKind::GitFile
        )
    }
}

impl fmt::Display for RemoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a remote locator by its prefix
///
/// Relative paths (`./pool`, `../pool`) and existing local directories are
/// file remotes.
pub fn classify_remote(locator: &str) -> RemoteKind {
    if locator.starts_with("git+https://") {
        RemoteKind::GitHttps
    } else if locator.starts_with("git+file://") {
        RemoteKind::GitFile
    } else if locator.starts_with("git@") {
        RemoteKind::GitSsh
    } else if locator.starts_with("file://") || locator.starts_with('/') {
        RemoteKind::File
    } else if locator.starts_with("https://") {
        RemoteKind::Https
    } else if locator.starts_with("http://") {
        RemoteKind::Http
    } else if is_local_path(locator) {
        RemoteKind::File
    } else {
        RemoteKind::Unknown
    }
}

fn is_local_path(locator: &str) -> bool {
    let relative = ["./", "../"].iter().any(|p| locator.starts_with(p));
    relative || matches!(locator, "." | "..") || (!locator.is_empty() && Path::new(locator).is_dir())
}

/// Components of a git locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    /// `ssh`, `https` or `file`
    pub protocol: String,
    /// Empty for local repositories
    pub host: String,
    pub path: String,
    /// What gets handed to `git clone`
    pub git_url: String,
}

impl GitUrl {
    pub fn parse(locator: &str) -> Result<Self> {
        if let Some(rest) = locator.strip_prefix("git@") {
            let (host, path) = rest
                .split_once(':')
                .ok_or_else(|| PoolError::invalid("remote", format!("missing ':' in {}", locator)))?;
            return Self::build("ssh", host, path, locator.to_string(), locator);
        }
        if let Some(rest) = locator.strip_prefix("git+https://") {
            let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
            return Self::build("https", host, path, format!("https://{}", rest), locator);
        }
        if let Some(path) = locator.strip_prefix("git+file://") {
            return Self::build("file", "", path, format!("file://{}", path), locator);
        }
        Err(PoolError::invalid(
            "remote",
            format!("not a git locator: {}", locator),
        ))
    }

    fn build(protocol: &str, host: &str, path: &str, git_url: String, locator: &str) -> Result<Self> {
        if path.is_empty() || (protocol != "file" && host.is_empty()) {
            return Err(PoolError::invalid(
                "remote",
                format!("incomplete git locator: {}", locator),
            ));
        }
        Ok(Self {
            protocol: protocol.to_string(),
            host: host.to_string(),
            path: path.to_string(),
            git_url,
        })
    }
}

/// Captured result of one git invocation
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run `git <args>` in `cwd`, killing it once `timeout` elapses
///
/// Spawn failures and timeouts are `Transport` errors; a non-zero exit is
/// reported through `GitOutput::success`.
pub fn run_git(args: &[&str], cwd: Option<&Path>, timeout: Duration) -> Result<GitOutput> {
    let mut command = Command::new("git");
    command
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command
        .spawn()
        .map_err(|e| PoolError::Transport(format!("Failed to execute git: {}", e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = thread::spawn(move || drain(stdout));
    let stderr_reader = thread::spawn(move || drain(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PoolError::Transport(format!(
                    "git {} timed out after {:?}",
                    args.join(" "),
                    timeout
                )));
            }
            None => thread::sleep(Duration::from_millis(10)),
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();
    Ok(GitOutput {
        success: status.success(),
        code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

fn drain<R: Read>(source: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut source) = source {
        let _ = source.read_to_end(&mut buf);
    }
    buf
}

/// Mirrors remote pools into local directories
#[derive(Debug, Clone)]
pub struct RemoteSync {
    cache_dir: PathBuf,
    timeout: Duration,
}

impl RemoteSync {
    pub fn new(cache_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            timeout,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.cache_dir(), config.transport_timeout())
    }

    /// Mirror directory for the remote called `name`
    pub fn git_cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join("git").join(name)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Bring `local` up to date with `locator`
    ///
    /// Unclassifiable locators are rejected before any transfer. A failed
    /// transfer returns `Ok(false)` and leaves `local` as it was.
    pub fn sync(&self, locator: &str, local: &Path) -> Result<bool> {
        let kind = classify_remote(locator);
        tracing::info!("Syncing {} remote {} into {:?}", kind, locator, local);

        let outcome = match kind {
            RemoteKind::Unknown => {
                return Err(PoolError::Transport(format!(
                    "unsupported remote: {}",
                    locator
                )));
            }
            RemoteKind::GitSsh | RemoteKind::GitHttps | RemoteKind::GitFile => {
                let url = GitUrl::parse(locator)?;
                self.git_clone_or_fetch(&url.git_url, local)
            }
            RemoteKind::File => self.copy_file_pool(locator, local),
            RemoteKind::Http | RemoteKind::Https => self.download_pool(locator, local),
        };

        match outcome {
            Ok(()) => {
                tracing::info!("Synced {} into {:?}", locator, local);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!("Sync of {} failed: {}", locator, e);
                Ok(false)
            }
        }
    }

    /// Clone into a temporary sibling when `local` has no repository yet,
    /// otherwise fetch and fast-forward
    ///
    /// A mirror whose origin is not `git_url` is replaced by a fresh clone.
    pub fn git_clone_or_fetch(&self, git_url: &str, local: &Path) -> Result<()> {
        if local.join(".git").exists() {
            let origin = self
                .git(&["config", "--get", "remote.origin.url"], Some(local))
                .map(|o| o.stdout.trim().to_string())
                .unwrap_or_default();
            if origin != git_url {
                tracing::info!(
                    "Mirror {:?} tracks {:?}, re-cloning from {}",
                    local,
                    origin,
                    git_url
                );
                return self.clone_into(git_url, local);
            }

            let fetched = self.git(&["fetch", "--prune", "origin"], Some(local))?;
            if !has_fetch_head(local) {
                tracing::debug!("Nothing fetched for {:?}: {}", local, fetched.stdout.trim());
                return Ok(());
            }
            self.git(&["merge", "--ff-only", "FETCH_HEAD"], Some(local))?;
            return Ok(());
        }

        if local.exists() && fs::read_dir(local)?.next().is_some() {
            return Err(PoolError::Transport(format!(
                "{:?} exists and is not a git mirror",
                local
            )));
        }
        self.clone_into(git_url, local)
    }

    /// Clone into a staging sibling, then move it over `local`
    fn clone_into(&self, git_url: &str, local: &Path) -> Result<()> {
        let parent = local.parent().unwrap_or_else(|| Path::new("."));
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
        let staging = sibling(local, "clone");
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        let staging_arg = staging.to_string_lossy().into_owned();
        if let Err(e) = self.git(&["clone", git_url, &staging_arg], None) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
        if local.exists() {
            fs::remove_dir_all(local)?;
        }
        fs::rename(&staging, local)?;
        Ok(())
    }

    fn git(&self, args: &[&str], cwd: Option<&Path>) -> Result<GitOutput> {
        let output = run_git(args, cwd, self.timeout)?;
        if output.success {
            return Ok(output);
        }
        tracing::warn!(
            "git {} exited with {:?}: {}",
            args.join(" "),
            output.code,
            output.stderr.trim()
        );
        Err(PoolError::Transport(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            output.stderr.trim()
        )))
    }

    fn copy_file_pool(&self, locator: &str, local: &Path) -> Result<()> {
        let remote = PathBuf::from(locator.strip_prefix("file://").unwrap_or(locator));
        let source = if remote.is_dir() {
            remote.join(REMOTE_DATABASE)
        } else {
            remote
        };
        let data = fs::read(&source).map_err(|e| {
            PoolError::Transport(format!("Failed to read {:?}: {}", source, e))
        })?;
        write_atomic(&local.join(REMOTE_DATABASE), &data)?;
        tracing::debug!("Copied {} bytes from {:?}", data.len(), source);
        Ok(())
    }

    fn download_pool(&self, locator: &str, local: &Path) -> Result<()> {
        let url = format!("{}/{}", locator.trim_end_matches('/'), REMOTE_DATABASE);
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PoolError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        let response = client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| PoolError::Transport(format!("GET {} failed: {}", url, e)))?;
        let body = response
            .bytes()
            .map_err(|e| PoolError::Transport(format!("Failed to read {}: {}", url, e)))?;
        write_atomic(&local.join(REMOTE_DATABASE), &body)?;
        tracing::debug!("Downloaded {} bytes from {}", body.len(), url);
        Ok(())
    }
}

fn has_fetch_head(repo: &Path) -> bool {
    fs::metadata(repo.join(".git").join("FETCH_HEAD"))
        .map(|m| m.len() > 0)
        .unwrap_or(false)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}-tmp", suffix));
    path.with_file_name(name)
}
