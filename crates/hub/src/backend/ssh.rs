//! SSH backend
//!
//! Starts the single-user server on a remote host over an `ssh2` session.
//! The remote host picks a free port, the server is launched in the
//! background with `bash -s`, and its pid is kept to poll and signal it
//! later. Every remote command opens its own session on a blocking thread.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ssh2::Session;
use tracing::{debug, info, warn};

use super::{invalid_parameters, Backend, BackendArgs, Endpoint, Parameters, WorkloadStatus};
use crate::error::{DossierError, Result};

pub const SSH_CLASS: &str = "dossier.spawners.ssh.SSHSpawner";

const IO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshSettings {
    /// Host the server runs on
    pub remote_host: String,

    #[serde(default = "default_remote_port")]
    pub remote_port: String,

    /// Login user on the remote host, defaults to the hub user
    #[serde(default)]
    pub remote_user: Option<String>,

    /// `PATH` exported before launching the server
    #[serde(default)]
    pub path: Option<String>,

    /// Prints a free port on the remote host
    #[serde(default = "default_remote_port_command")]
    pub remote_port_command: String,

    /// Private key, `{username}` is replaced with the hub user
    #[serde(default = "default_ssh_keyfile")]
    pub ssh_keyfile: String,
}

fn default_remote_port() -> String {
    "22".to_string()
}

fn default_remote_port_command() -> String {
    "/usr/bin/python /usr/local/bin/get_port.py".to_string()
}

fn default_ssh_keyfile() -> String {
    "~/.ssh/id_rsa".to_string()
}

/// Where and as whom remote commands run
#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteTarget {
    addr: String,
    user: String,
    keyfile: PathBuf,
}

#[derive(Debug, Default)]
struct RemoteOutput {
    status: i32,
    stdout: String,
    stderr: String,
}

impl RemoteOutput {
    const fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run one command over a fresh session. Blocks the calling thread.
fn exec_blocking(target: &RemoteTarget, command: &str, stdin: Option<&str>) -> anyhow::Result<RemoteOutput> {
    let tcp = TcpStream::connect(&target.addr)
        .with_context(|| format!("Failed to connect to {}", target.addr))?;
    let _ = tcp.set_read_timeout(Some(IO_TIMEOUT));

    let mut session = Session::new().context("Failed to create SSH session")?;
    session.set_tcp_stream(tcp);
    session.handshake().context("SSH handshake failed")?;
    session
        .userauth_pubkey_file(&target.user, None, &target.keyfile, None)
        .with_context(|| {
            format!(
                "SSH authentication failed for {} with key {}",
                target.user,
                target.keyfile.display()
            )
        })?;
    if !session.authenticated() {
        bail!("SSH authentication failed for {}", target.user);
    }

    let mut channel = session
        .channel_session()
        .context("Failed to open SSH channel")?;
    channel
        .exec(command)
        .with_context(|| format!("Failed to execute {command:?}"))?;
    if let Some(input) = stdin {
        channel
            .write_all(input.as_bytes())
            .context("Failed to send launch script")?;
    }
    channel.send_eof().context("Failed to close remote stdin")?;

    let mut output = RemoteOutput::default();
    channel
        .read_to_string(&mut output.stdout)
        .context("Failed to read remote output")?;
    channel
        .stderr()
        .read_to_string(&mut output.stderr)
        .context("Failed to read remote errors")?;
    channel.wait_close().context("Failed to close SSH channel")?;
    output.status = channel.exit_status().context("Missing remote exit status")?;
    Ok(output)
}

pub struct SshBackend {
    args: BackendArgs,
    settings: SshSettings,
    pid: Option<u32>,
}

impl SshBackend {
    pub const fn new(args: BackendArgs, settings: SshSettings) -> Self {
        Self {
            args,
            settings,
            pid: None,
        }
    }

    pub fn from_parameters(params: &Parameters) -> Result<Self> {
        let args = BackendArgs::from_parameters(SSH_CLASS, params)?;
        let settings: SshSettings = serde_json::from_value(serde_json::Value::Object(params.clone()))
            .map_err(|e| invalid_parameters(SSH_CLASS, &e))?;
        Ok(Self::new(args, settings))
    }

    pub const fn settings(&self) -> &SshSettings {
        &self.settings
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn keyfile(&self) -> PathBuf {
        let keyfile = self.settings.ssh_keyfile.replace("{username}", &self.args.user);
        match keyfile.strip_prefix("~/") {
            Some(rest) => dirs::home_dir().map_or_else(|| PathBuf::from(&keyfile), |home| home.join(rest)),
            None => PathBuf::from(keyfile),
        }
    }

    fn target(&self) -> RemoteTarget {
        RemoteTarget {
            addr: format!("{}:{}", self.settings.remote_host, self.settings.remote_port),
            user: self
                .settings
                .remote_user
                .clone()
                .unwrap_or_else(|| self.args.user.clone()),
            keyfile: self.keyfile(),
        }
    }

    /// Run a command on the remote host, optionally feeding it stdin
    async fn remote(&self, command: &str, stdin: Option<&str>) -> anyhow::Result<RemoteOutput> {
        debug!(host = %self.settings.remote_host, command = %command, "Running remote command");
        let target = self.target();
        let command = command.to_string();
        let stdin = stdin.map(str::to_string);
        tokio::task::spawn_blocking(move || exec_blocking(&target, &command, stdin.as_deref()))
            .await
            .context("SSH task did not complete")?
    }

    async fn remote_random_port(&self) -> anyhow::Result<u16> {
        let output = self.remote(&self.settings.remote_port_command, None).await?;
        if !output.success() {
            bail!("port command failed: {}", output.stderr.trim());
        }
        output
            .stdout
            .trim()
            .parse()
            .with_context(|| format!("Port command printed {:?}", output.stdout.trim()))
    }

    async fn launch(&self, port: u16) -> anyhow::Result<u32> {
        let command = rewrite_command(&self.args.command_line(), port, &self.args.hub_api_url);
        let script = launch_script(&self.args.env, self.settings.path.as_deref(), &command);
        let output = self.remote("bash -s", Some(&script)).await?;
        if !output.success() {
            bail!("launch failed: {}", output.stderr.trim());
        }
        let stdout = output.stdout.trim();
        stdout
            .lines()
            .last()
            .unwrap_or_default()
            .trim()
            .parse()
            .with_context(|| format!("Launch script printed {stdout:?}"))
    }

    async fn signal(&self, pid: u32, signal: &str) -> anyhow::Result<bool> {
        let output = self.remote(&format!("kill -s {signal} {pid}"), None).await?;
        Ok(output.success())
    }
}

/// Point the server at the chosen port and the hub API.
///
/// Existing `--port=` and `--hub-api-url=` arguments are replaced, missing
/// ones are appended.
pub fn rewrite_command(command: &[String], port: u16, hub_api_url: &str) -> Vec<String> {
    let mut rewritten: Vec<String> = command
        .iter()
        .filter(|arg| !arg.starts_with("--port=") && !arg.starts_with("--hub-api-url="))
        .cloned()
        .collect();
    rewritten.push(format!("--port={port}"));
    if !hub_api_url.is_empty() {
        rewritten.push(format!("--hub-api-url={hub_api_url}"));
    }
    rewritten
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Script run by `bash -s` on the remote host. Prints the server pid.
pub fn launch_script(env: &BTreeMap<String, String>, path: Option<&str>, command: &[String]) -> String {
    let mut script = String::new();
    for (name, value) in env {
        script.push_str(&format!("export {name}={}\n", shell_quote(value)));
    }
    if let Some(path) = path {
        script.push_str(&format!("export PATH={}\n", shell_quote(path)));
    }
    let command: Vec<String> = command.iter().map(|arg| shell_quote(arg)).collect();
    script.push_str(&format!(
        "{} < /dev/null >> .jupyter.log 2>&1 & pid=$!\necho $pid\n",
        command.join(" ")
    ));
    script
}

#[async_trait]
impl Backend for SshBackend {
    fn class(&self) -> &str {
        SSH_CLASS
    }

    fn args(&self) -> &BackendArgs {
        &self.args
    }

    async fn start(&mut self) -> Result<Endpoint> {
        let port = self
            .remote_random_port()
            .await
            .map_err(|e| DossierError::backend(SSH_CLASS, &e))?;
        let pid = self
            .launch(port)
            .await
            .map_err(|e| DossierError::backend(SSH_CLASS, &e))?;

        info!(
            user = %self.args.user,
            host = %self.settings.remote_host,
            port,
            pid,
            "Started remote server"
        );
        self.pid = Some(pid);
        Ok(Endpoint {
            host: self.settings.remote_host.clone(),
            port,
        })
    }

    async fn poll(&mut self) -> Result<WorkloadStatus> {
        let Some(pid) = self.pid else {
            return Ok(WorkloadStatus::Stopped);
        };
        let alive = self
            .signal(pid, "0")
            .await
            .map_err(|e| DossierError::backend(SSH_CLASS, &e))?;
        if alive {
            Ok(WorkloadStatus::Running)
        } else {
            self.pid = None;
            Ok(WorkloadStatus::Stopped)
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(pid) = self.pid.take() else {
            return Ok(());
        };
        match self.signal(pid, "TERM").await {
            Ok(true) => info!(host = %self.settings.remote_host, pid, "Stopped remote server"),
            Ok(false) => warn!(host = %self.settings.remote_host, pid, "Remote server was not running"),
            Err(e) => return Err(DossierError::backend(SSH_CLASS, &e)),
        }
        Ok(())
    }

    fn state(&self) -> Parameters {
        let mut state = Parameters::new();
        if let Some(pid) = self.pid {
            state.insert("pid".to_string(), pid.into());
            state.insert(
                "remote_host".to_string(),
                self.settings.remote_host.clone().into(),
            );
        }
        state
    }

    fn load_state(&mut self, state: &Parameters) {
        self.pid = state
            .get("pid")
            .and_then(serde_json::Value::as_u64)
            .and_then(|pid| u32::try_from(pid).ok())
            .filter(|pid| *pid != 0);
        if let Some(host) = state.get("remote_host").and_then(|v| v.as_str()) {
            self.settings.remote_host = host.to_string();
        }
    }
}
