//! steamcmd process invocation.
//!
//! Two commands are used: an app info query to resolve the app's name, and
//! the download script that uninstalls the app, downloads it again, and
//! prints the content servers used. The download runs alongside the log
//! monitor; its stdout is drained in the background so a full pipe never
//! stalls it.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SteamConfig;

static APP_NAME: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"\s+"common"\s+\{\s+"name"\s+"([^"]+)""#));
static SOURCES_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?s)(Download sources.*failed = \d+)"));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("steamcmd output patterns are valid")
}

/// Builds and runs steamcmd commands for one app.
#[derive(Debug, Clone)]
pub struct SteamCmd {
    program: PathBuf,
    app_id: String,
    username: String,
    password: String,
    platform: String,
}

impl SteamCmd {
    /// Create from the `[steam]` config section.
    pub fn new(config: &SteamConfig) -> Self {
        Self {
            program: config.steamcmd.clone(),
            app_id: config.app_id.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            platform: config.platform.clone(),
        }
    }

    /// Steam application ID.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Arguments for the app info query.
    pub fn info_args(&self) -> Vec<String> {
        let mut args = self.login_args();
        args.extend([
            "+app_info_print".to_owned(),
            self.app_id.clone(),
            "+quit".to_owned(),
        ]);
        args
    }

    /// Arguments for the uninstall-then-download script.
    pub fn download_args(&self) -> Vec<String> {
        let mut args = self.login_args();
        args.extend([
            "+@sSteamCmdForcePlatformType".to_owned(),
            self.platform.clone(),
            "+app_uninstall".to_owned(),
            "-complete".to_owned(),
            self.app_id.clone(),
            "+app_update".to_owned(),
            self.app_id.clone(),
            "+download_sources".to_owned(),
            "+quit".to_owned(),
        ]);
        args
    }

    fn login_args(&self) -> Vec<String> {
        let mut args = vec!["+login".to_owned(), self.username.clone()];
        if !self.password.is_empty() {
            args.push(self.password.clone());
        }
        args
    }

    /// Query steamcmd for the app's display name.
    ///
    /// # Errors
    ///
    /// Returns an error if steamcmd cannot be run, exits unsuccessfully, or
    /// prints no name for the app.
    pub async fn app_name(&self) -> anyhow::Result<String> {
        debug!(app_id = %self.app_id, "querying app info");

        let output = Command::new(&self.program)
            .args(self.info_args())
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program.display()))?;

        anyhow::ensure!(
            output.status.success(),
            "app info query for {} exited with {}",
            self.app_id,
            output.status
        );

        let text = String::from_utf8_lossy(&output.stdout);
        parse_app_name(&text)
            .map(str::to_owned)
            .with_context(|| format!("no name found in app info for {}", self.app_id))
    }

    /// Start the download script.
    ///
    /// The child is killed if the returned handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if steamcmd cannot be spawned.
    pub fn spawn_download(&self) -> anyhow::Result<DownloadProcess> {
        let mut child = Command::new(&self.program)
            .args(self.download_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;

        let mut stdout = child
            .stdout
            .take()
            .context("failed to capture steamcmd stdout")?;

        let drain = tokio::spawn(async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        });

        info!(app_id = %self.app_id, pid = ?child.id(), "steamcmd download started");

        Ok(DownloadProcess { child, drain })
    }
}

/// A running download script.
pub struct DownloadProcess {
    child: Child,
    drain: JoinHandle<std::io::Result<Vec<u8>>>,
}

impl DownloadProcess {
    /// Wait for steamcmd to exit and return everything it printed.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails or the output could not be read.
    pub async fn finish(mut self) -> anyhow::Result<String> {
        let status = self
            .child
            .wait()
            .await
            .context("failed to wait for steamcmd")?;

        let output = self
            .drain
            .await
            .context("steamcmd output task panicked")?
            .context("failed to read steamcmd output")?;

        if !status.success() {
            warn!(%status, "steamcmd exited unsuccessfully");
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Kill steamcmd and reap it.
    ///
    /// # Errors
    ///
    /// Returns an error if the child cannot be killed.
    pub async fn abort(mut self) -> anyhow::Result<()> {
        self.drain.abort();
        self.child
            .kill()
            .await
            .context("failed to kill steamcmd")?;
        info!("steamcmd download aborted");
        Ok(())
    }
}

/// Extract the app name from `+app_info_print` output.
pub fn parse_app_name(output: &str) -> Option<&str> {
    APP_NAME
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Extract the download sources report, from its header to the
/// `failed = N` footer.
pub fn extract_sources_block(output: &str) -> Option<&str> {
    SOURCES_BLOCK
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
