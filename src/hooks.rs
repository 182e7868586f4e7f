//! Shell commands run on job lifecycle events
//!
//! Hooks are fire-and-forget: the command is spawned and its exit status
//! only logged, so a slow hook never holds up the machine link.

use machlink_communication::JobHooks;
use machlink_settings::JobSettings;
use tokio::process::Command;

/// Job hooks backed by configured shell commands
#[derive(Debug, Clone, Default)]
pub struct ShellHooks {
    on_start: Option<String>,
    on_finish: Option<String>,
    on_abort: Option<String>,
}

impl ShellHooks {
    pub fn new(settings: &JobSettings) -> Self {
        let keep = |cmd: &Option<String>| cmd.clone().filter(|c| !c.trim().is_empty());
        Self {
            on_start: keep(&settings.on_start),
            on_finish: keep(&settings.on_finish),
            on_abort: keep(&settings.on_abort),
        }
    }
}

impl JobHooks for ShellHooks {
    fn on_start(&mut self) {
        run("start", self.on_start.as_deref());
    }

    fn on_finish(&mut self) {
        run("finish", self.on_finish.as_deref());
    }

    fn on_abort(&mut self) {
        run("abort", self.on_abort.as_deref());
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn run(hook: &'static str, command: Option<&str>) {
    let Some(command) = command else {
        return;
    };
    tracing::info!("Running job {} hook: {}", hook, command);

    let mut child = match shell(command).kill_on_drop(false).spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!("Job {} hook failed to start: {}", hook, e);
            return;
        }
    };
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if !status.success() => {
                tracing::warn!("Job {} hook exited with {}", hook, status)
            }
            Ok(_) => tracing::debug!("Job {} hook done", hook),
            Err(e) => tracing::warn!("Job {} hook: {}", hook, e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_blank_commands_are_ignored() {
        let hooks = ShellHooks::new(&JobSettings {
            on_start: Some("  ".to_string()),
            on_finish: Some("echo done".to_string()),
            ..Default::default()
        });
        assert_eq!(hooks.on_start, None);
        assert_eq!(hooks.on_finish.as_deref(), Some("echo done"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_finish_hook_runs_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let mut hooks = ShellHooks::new(&JobSettings {
            on_finish: Some(format!("touch {}", marker.display())),
            ..Default::default()
        });

        hooks.on_finish();

        for _ in 0..50 {
            if marker.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("hook did not run");
    }
}
