//! Shell-command jobs declared in the daemon config.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cronlock_scheduler::Job;

use crate::settings::CommandJobConfig;

/// Runs `sh -c <command>` on every trigger.
///
/// A non-zero exit is a job error carrying the last line of stderr. When
/// the trigger's token fires, the child is killed.
#[derive(Debug, Clone)]
pub struct CommandJob {
    config: CommandJobConfig,
}

impl CommandJob {
    pub fn new(config: CommandJobConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.config.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(shellexpand::tilde(dir).as_ref());
        }
        cmd
    }
}

#[async_trait]
impl Job for CommandJob {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn schedule(&self) -> &str {
        &self.config.schedule
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let child = self
            .command()
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.config.command))?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output.context("failed to wait for command")?,
            _ = cancel.cancelled() => anyhow::bail!("command interrupted"),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            debug!(job = %self.config.name, "{}", line);
        }

        if output.status.success() {
            info!(job = %self.config.name, "Command succeeded");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| format!(": {}", l.trim()))
            .unwrap_or_default();

        match output.status.code() {
            Some(code) => anyhow::bail!("command exited with status {}{}", code, detail),
            None => anyhow::bail!("command terminated by signal{}", detail),
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.timeout_secs.map(Duration::from_secs)
    }

    fn retry_count(&self) -> u32 {
        self.config.retry_count
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.config.retry_delay_ms)
    }
}
