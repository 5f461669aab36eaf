use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, anyhow};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    QuestAdded,
    TaskAdded,
    TaskCompleted,
    DataSaved,
    DataLoaded,
}

impl HookEvent {
    pub fn script_prefix(self) -> &'static str {
        match self {
            HookEvent::QuestAdded => "on-quest-added",
            HookEvent::TaskAdded => "on-task-added",
            HookEvent::TaskCompleted => "on-task-completed",
            HookEvent::DataSaved => "on-data-saved",
            HookEvent::DataLoaded => "on-data-loaded",
        }
    }
}

/// Runs executable scripts from `<data_dir>/hooks` named `<event>.*`.
#[derive(Debug, Clone)]
pub struct HookRunner {
    enabled: bool,
    hooks_dir: PathBuf,
}

impl HookRunner {
    pub fn new(cfg: &Config, data_dir: &Path) -> Self {
        let enabled = cfg.get_bool("hooks").unwrap_or(true);
        let hooks_dir = data_dir.join("hooks");
        debug!(
            enabled,
            hooks_dir = %hooks_dir.display(),
            "initialized hook runner"
        );
        Self { enabled, hooks_dir }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            hooks_dir: PathBuf::new(),
        }
    }

    pub fn hooks_dir(&self) -> &Path {
        &self.hooks_dir
    }

    /// Feeds `payload` as a single JSON line to every matching script. All
    /// scripts run even when an earlier one fails; the error names each
    /// failed script.
    #[instrument(skip(self, payload))]
    pub fn fire<T: Serialize>(&self, event: HookEvent, payload: &T) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let scripts = self.list_scripts(event.script_prefix())?;
        if scripts.is_empty() {
            return Ok(());
        }

        let line = serde_json::to_string(payload).context("failed to encode hook payload")?;
        debug!(count = scripts.len(), "running hooks");
        let failures: Vec<String> = scripts
            .iter()
            .filter_map(|script| run_script(script, &line).err())
            .map(|err| format!("{err:#}"))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(failures.join("; ")))
        }
    }

    #[instrument(skip(self))]
    fn list_scripts(&self, event: &str) -> anyhow::Result<Vec<PathBuf>> {
        if !self.hooks_dir.exists() {
            return Ok(Vec::new());
        }

        let mut scripts = Vec::new();
        for entry in fs::read_dir(&self.hooks_dir)
            .with_context(|| format!("failed to read hooks dir {}", self.hooks_dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !name.starts_with(&format!("{event}.")) {
                continue;
            }

            if !is_executable(&path)? {
                debug!(path = %path.display(), "skipping non-executable hook");
                continue;
            }

            debug!(event, path = %path.display(), "selected hook script");
            scripts.push(path);
        }

        scripts.sort();
        Ok(scripts)
    }
}

fn script_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("hook")
}

fn run_script(path: &Path, line: &str) -> anyhow::Result<()> {
    info!(hook = %path.display(), "running hook");
    let mut child = Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("{} could not start", script_name(path)))?;

    // A script may exit without reading its payload.
    if let Some(mut stdin) = child.stdin.take()
        && let Err(err) = writeln!(stdin, "{line}")
    {
        debug!(hook = %path.display(), error = %err, "hook did not read its payload");
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("{} did not finish", script_name(path)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
        debug!(hook = %path.display(), stdout = %stdout.trim(), "hook output");
    }
    if !stderr.trim().is_empty() {
        warn!(hook = %path.display(), stderr = %stderr.trim(), "hook wrote to stderr");
    }

    match output.status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(anyhow!("{} exited with {code}", script_name(path))),
        None => Err(anyhow!("{} was killed by a signal", script_name(path))),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> anyhow::Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)?.permissions().mode();
    Ok(mode & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> anyhow::Result<bool> {
    Ok(path.is_file())
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use tempfile::tempdir;

    use super::{HookEvent, HookRunner};
    use crate::config::Config;

    fn write_script(path: &std::path::Path, body: &str) {
        fs::write(path, body).expect("write script");
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod");
    }

    #[test]
    fn matching_script_receives_payload() {
        let temp = tempdir().expect("tempdir");
        let runner = HookRunner::new(&Config::default(), temp.path());
        fs::create_dir_all(runner.hooks_dir()).expect("hooks dir");

        let captured = temp.path().join("captured.json");
        write_script(
            &runner.hooks_dir().join("on-quest-added.log"),
            &format!("#!/bin/sh\ncat > '{}'\n", captured.display()),
        );
        write_script(
            &runner.hooks_dir().join("on-task-added.fail"),
            "#!/bin/sh\nexit 3\n",
        );

        runner
            .fire(HookEvent::QuestAdded, &serde_json::json!({"name": "Main"}))
            .expect("hook runs");
        let written = fs::read_to_string(&captured).expect("captured payload");
        assert_eq!(written.trim(), r#"{"name":"Main"}"#);

        let err = runner
            .fire(HookEvent::TaskAdded, &serde_json::json!({}))
            .expect_err("failing hook");
        assert_eq!(err.to_string(), "on-task-added.fail exited with 3");
    }

    #[test]
    fn later_scripts_run_after_a_failure() {
        let temp = tempdir().expect("tempdir");
        let runner = HookRunner::new(&Config::default(), temp.path());
        fs::create_dir_all(runner.hooks_dir()).expect("hooks dir");

        let marker = temp.path().join("second-ran");
        write_script(
            &runner.hooks_dir().join("on-data-saved.1-fail"),
            "#!/bin/sh\nexit 1\n",
        );
        write_script(
            &runner.hooks_dir().join("on-data-saved.2-mark"),
            &format!("#!/bin/sh\ncat > /dev/null\ntouch '{}'\n", marker.display()),
        );
        fs::write(runner.hooks_dir().join("on-data-saved.3-plain"), "not run")
            .expect("non-executable");

        let err = runner
            .fire(HookEvent::DataSaved, &serde_json::json!({"quests": []}))
            .expect_err("first hook fails");
        assert!(err.to_string().contains("on-data-saved.1-fail"));
        assert!(marker.exists());
    }

    #[test]
    fn disabled_runner_skips_everything() {
        let runner = HookRunner::disabled();
        runner
            .fire(HookEvent::DataSaved, &serde_json::json!({}))
            .expect("noop");
    }
}
