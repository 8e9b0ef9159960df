//! Host facilities used by steps: platform facts, local server discovery,
//! service control and the collector process.

use crate::errors::HostError;
use std::ffi::{CString, OsString};
use std::os::unix::fs::MetadataExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Operating system facts, read once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformInfo {
    /// Kernel family, e.g. `linux`.
    pub os: String,
    /// Distribution id from os-release, e.g. `ubuntu`.
    pub id: String,
    pub id_like: Vec<String>,
    /// Distribution version, e.g. `22.04`.
    pub version: String,
    pub pretty_name: String,
}

impl PlatformInfo {
    /// Parse the contents of `/etc/os-release`.
    pub fn from_os_release(os: &str, content: &str) -> Self {
        let mut info = PlatformInfo {
            os: os.to_string(),
            ..Default::default()
        };
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "ID" => info.id = value,
                "ID_LIKE" => info.id_like = value.split_whitespace().map(str::to_string).collect(),
                "VERSION_ID" => info.version = value,
                "PRETTY_NAME" => info.pretty_name = value,
                _ => {}
            }
        }
        info
    }

    /// Distribution family: the id itself or the first id it is like.
    pub fn family(&self) -> &str {
        if self.id == "debian" || self.id_like.iter().any(|l| l == "debian") {
            "debian"
        } else if let Some(first) = self.id_like.first() {
            first.as_str()
        } else {
            self.id.as_str()
        }
    }

    /// Numeric `(major, minor)` of the distribution version.
    pub fn version_tuple(&self) -> Option<(u32, u32)> {
        let mut parts = self.version.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().map_or(Some(0), |m| m.parse().ok())?;
        Some((major, minor))
    }
}

/// A Postgres server listening on a local socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalServer {
    pub socket_dir: String,
    pub port: u16,
}

impl std::fmt::Display for LocalServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port {} (socket in {})", self.port, self.socket_dir)
    }
}

/// How to restart Postgres.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartMethod {
    Systemd,
    /// `pg_ctl restart`, run as the owner of the data directory.
    PgCtl { data_dir: PathBuf },
}

/// Host-side effects, kept behind a trait so steps can be exercised with fakes.
pub trait Host {
    fn platform(&self) -> Result<PlatformInfo, HostError>;

    fn local_servers(&self, socket_dirs: &[String]) -> Result<Vec<LocalServer>, HostError>;

    /// Pid of the oldest `postgres` process.
    fn postmaster_pid(&self) -> Result<u32, HostError>;

    fn resolve_link(&self, path: &Path) -> Result<PathBuf, HostError>;

    fn path_exists(&self, path: &Path) -> bool;

    fn restart_postgres(&self, method: &RestartMethod) -> Result<(), HostError>;

    /// Send a reload signal to the running collector; returns its pid.
    fn reload_collector(&self, process_name: &str) -> Result<u32, HostError>;

    /// Run the collector binary and return its combined output.
    fn run_collector(&self, program: &str, args: &[String]) -> Result<String, HostError>;
}

/// The machine setup runs on.
pub struct LocalHost;

impl LocalHost {
    fn output(cmd: &mut Command, program: &str) -> Result<String, HostError> {
        tracing::debug!(program, "running command");
        let output = cmd.output().map_err(|source| HostError::Spawn {
            program: program.to_string(),
            source,
        })?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if output.status.success() {
            Ok(text)
        } else {
            Err(HostError::Command {
                program: program.to_string(),
                message: format!("{}; {}", output.status, text.trim()),
            })
        }
    }

    fn pg_ctl_path() -> Result<String, HostError> {
        if let Some(path) = pg_ctl_on_path(std::env::var_os("PATH")) {
            return Ok(path.display().to_string());
        }
        let out = Self::output(Command::new("pg_config").arg("--bindir"), "pg_config")?;
        let bindir = out.lines().next().unwrap_or_default().trim();
        if bindir.is_empty() {
            return Err(HostError::Command {
                program: "pg_config".to_string(),
                message: "could not find pg_ctl".to_string(),
            });
        }
        Ok(Path::new(bindir).join("pg_ctl").display().to_string())
    }
}

impl Host for LocalHost {
    fn platform(&self) -> Result<PlatformInfo, HostError> {
        let path = Path::new("/etc/os-release");
        let content = std::fs::read_to_string(path).map_err(|source| HostError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(PlatformInfo::from_os_release(std::env::consts::OS, &content))
    }

    fn local_servers(&self, socket_dirs: &[String]) -> Result<Vec<LocalServer>, HostError> {
        let mut servers = Vec::new();
        for dir in socket_dirs {
            let pattern = format!("{}/.s.PGSQL.*", dir.trim_end_matches('/'));
            let paths = glob::glob(&pattern).map_err(|e| HostError::Command {
                program: "glob".to_string(),
                message: e.to_string(),
            })?;
            for path in paths.flatten() {
                let Some(port) = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(socket_port)
                else {
                    continue;
                };
                servers.push(LocalServer {
                    socket_dir: dir.clone(),
                    port,
                });
            }
        }
        Ok(servers)
    }

    fn postmaster_pid(&self) -> Result<u32, HostError> {
        let out = Self::output(
            Command::new("pgrep").args(["-U", "postgres", "-o", "postgres"]),
            "pgrep",
        )?;
        out.trim().parse().map_err(|_| HostError::Command {
            program: "pgrep".to_string(),
            message: format!("postmaster pid {:?} is not an integer", out.trim()),
        })
    }

    fn resolve_link(&self, path: &Path) -> Result<PathBuf, HostError> {
        std::fs::canonicalize(path).map_err(|source| HostError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn restart_postgres(&self, method: &RestartMethod) -> Result<(), HostError> {
        match method {
            RestartMethod::Systemd => {
                Self::output(
                    Command::new("systemctl").args(["restart", "postgresql"]),
                    "systemctl",
                )?;
            }
            RestartMethod::PgCtl { data_dir } => {
                let meta = std::fs::metadata(data_dir).map_err(|source| HostError::Io {
                    path: data_dir.clone(),
                    source,
                })?;
                let pg_ctl = Self::pg_ctl_path()?;
                let mut cmd = Command::new(&pg_ctl);
                cmd.arg("--pgdata")
                    .arg(data_dir)
                    .args(["--wait", "--mode", "fast", "restart"])
                    .uid(meta.uid())
                    .gid(meta.gid());
                Self::output(&mut cmd, &pg_ctl)?;
            }
        }
        Ok(())
    }

    fn reload_collector(&self, process_name: &str) -> Result<u32, HostError> {
        let out = Command::new("pgrep")
            .args(["-x", process_name])
            .output()
            .map_err(|source| HostError::Spawn {
                program: "pgrep".to_string(),
                source,
            })?;
        let own_pid = std::process::id();
        let pid = String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter_map(|l| l.trim().parse::<u32>().ok())
            .find(|pid| *pid != own_pid)
            .ok_or_else(|| HostError::ProcessNotFound(process_name.to_string()))?;

        Self::output(
            Command::new("kill").args(["-s", "HUP", &pid.to_string()]),
            "kill",
        )?;
        tracing::info!(pid, "sent reload signal to collector");
        Ok(pid)
    }

    fn run_collector(&self, program: &str, args: &[String]) -> Result<String, HostError> {
        Self::output(Command::new(program).args(args), program)
    }
}

/// Port number from a socket file name such as `.s.PGSQL.5432`.
pub fn socket_port(file_name: &str) -> Option<u16> {
    file_name.strip_prefix(".s.PGSQL.")?.parse().ok()
}

pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

fn pg_ctl_on_path(paths: Option<OsString>) -> Option<PathBuf> {
    which::which_in("pg_ctl", paths, "/").ok()
}

/// Uid and gid of a local OS account, as the system user database
/// (including NSS sources such as LDAP) reports them.
pub fn lookup_os_user(name: &str) -> Option<(u32, u32)> {
    let name = CString::new(name).ok()?;
    // SAFETY: passwd is plain data; an all-zero value is valid before the call fills it.
    let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
    let mut found: *mut libc::passwd = std::ptr::null_mut();
    let mut buf = vec![0 as libc::c_char; 16 * 1024];
    // SAFETY: every pointer is valid for the call and buf.len() is its real size.
    let rc = unsafe {
        libc::getpwnam_r(
            name.as_ptr(),
            &mut entry,
            buf.as_mut_ptr(),
            buf.len(),
            &mut found,
        )
    };
    if rc != 0 || found.is_null() {
        return None;
    }
    Some((entry.pw_uid, entry.pw_gid))
}
