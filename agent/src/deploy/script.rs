//! External script execution with an enforced deadline

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::environment::Platform;
use crate::errors::AgentError;
use crate::filesys::file::File;

/// Exit code reported when the process did not yield one
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Program plus arguments, ready to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ScriptCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Platform invocation of a lifecycle script, optionally as another user
    pub fn for_script(path: &Path, run_as: Option<&str>, platform: Platform) -> Self {
        let path = path.display().to_string();
        match platform {
            Platform::Windows => Self::new(
                "powershell.exe",
                vec![
                    "-ExecutionPolicy".to_string(),
                    "Unrestricted".to_string(),
                    "-File".to_string(),
                    path,
                ],
            ),
            Platform::Linux => match run_as {
                Some(user) if !user.is_empty() && user != "root" => Self::new(
                    "su",
                    vec![user.to_string(), "-c".to_string(), path],
                ),
                _ => Self::new(path, Vec::new()),
            },
        }
    }
}

impl std::fmt::Display for ScriptCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of one script run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutcome {
    pub exit_code: i32,

    /// Stdout and stderr, merged
    pub output: String,

    pub timed_out: bool,
}

impl ScriptOutcome {
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// Convert a timeout or non-zero exit into the matching error
    pub fn into_result(self, label: &str) -> Result<ScriptOutcome, AgentError> {
        if self.timed_out {
            return Err(AgentError::ScriptTimeout(format!(
                "{} did not complete in time",
                label
            )));
        }
        if self.exit_code != 0 {
            return Err(AgentError::StageError(format!(
                "{} script execution failed with exit code {}",
                label, self.exit_code
            )));
        }
        Ok(self)
    }
}

/// Script executor options
#[derive(Debug, Clone)]
pub struct Options {
    /// How long to keep collecting output after the process is gone
    pub output_grace: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            output_grace: Duration::from_secs(2),
        }
    }
}

/// Runs external commands with a deadline
#[derive(Debug, Clone, Default)]
pub struct ScriptExecutor {
    options: Options,
}

impl ScriptExecutor {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    /// Mark `path` executable and run it the way the platform expects
    pub async fn run_script(
        &self,
        path: &Path,
        run_as: Option<&str>,
        platform: Platform,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<ScriptOutcome, AgentError> {
        if platform == Platform::Linux {
            File::new(path).set_executable().await?;
        }
        let command = ScriptCommand::for_script(path, run_as, platform);
        self.execute(&command, env, timeout).await
    }

    /// Spawn `command` and wait for it at most `timeout`.
    ///
    /// On expiry the process (its whole process group on unix) is killed and
    /// whatever it printed so far is returned with `timed_out` set.
    pub async fn execute(
        &self,
        command: &ScriptCommand,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<ScriptOutcome, AgentError> {
        info!(
            "Starting execution of {}. Will timeout after {:?} if not completed.",
            command, timeout
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            AgentError::StageError(format!("Failed to start {}: {}", command.program, e))
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx.clone()));
        }
        drop(tx);

        let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => (Some(status?), false),
            Err(_) => {
                error!("Process {} killed after {:?}", command.program, timeout);
                kill(&mut child);
                let status = tokio::time::timeout(self.options.output_grace, child.wait())
                    .await
                    .ok()
                    .and_then(Result::ok);
                (status, true)
            }
        };

        let mut output = Vec::new();
        let drained = tokio::time::timeout(self.options.output_grace, async {
            while let Some(chunk) = rx.recv().await {
                output.extend_from_slice(&chunk);
            }
        })
        .await;
        if drained.is_err() {
            warn!("Output of {} still open after exit, truncating", command.program);
        }

        let exit_code = status
            .and_then(|s| s.code())
            .unwrap_or(UNKNOWN_EXIT_CODE);
        debug!("{} exited with code {}", command.program, exit_code);

        Ok(ScriptOutcome {
            exit_code,
            output: String::from_utf8_lossy(&output).into_owned(),
            timed_out,
        })
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

/// Kill the child and, on unix, every process in its group. A process that
/// already exited is not an error.
fn kill(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
    if let Err(e) = child.start_kill() {
        debug!("kill failed: {}", e);
    }
}

/// Resolve a manifest location against a bundle directory
pub fn resolve_location(base_dir: &Path, location: &str) -> PathBuf {
    base_dir.join(location.trim_start_matches(['/', '\\']))
}
