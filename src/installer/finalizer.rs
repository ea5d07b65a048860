// src/installer/finalizer.rs

//! Finalizer execution
//!
//! Each command of a finalizer phase runs through the finalizer's shell
//! (`sh -c` by default) with the rootfs as working directory, stdin
//! closed and a timeout. Finalizers act on the host, so they are skipped
//! for a rootfs other than `/` unless `general.finalizers_outside_root`
//! is set.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::package::{Finalizer, Package};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Install,
    Uninstall,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Uninstall => write!(f, "uninstall"),
        }
    }
}

pub struct FinalizerRunner {
    rootfs: PathBuf,
    timeout: Duration,
    outside_root: bool,
}

impl FinalizerRunner {
    pub fn new(rootfs: &Path, timeout: Duration, outside_root: bool) -> Self {
        Self {
            rootfs: rootfs.to_path_buf(),
            timeout,
            outside_root,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.system.rootfs,
            Duration::from_secs(config.general.finalizer_timeout_secs),
            config.general.finalizers_outside_root,
        )
    }

    pub fn run(&self, pkg: &Package, finalizer: &Finalizer, phase: Phase) -> Result<()> {
        let commands = match phase {
            Phase::Install => &finalizer.install,
            Phase::Uninstall => &finalizer.uninstall,
        };
        if commands.is_empty() {
            return Ok(());
        }

        if self.rootfs != Path::new("/") && !self.outside_root {
            warn!(
                "Skipping {} finalizer of {}: rootfs is {}",
                phase,
                pkg,
                self.rootfs.display()
            );
            return Ok(());
        }

        info!("Running {} finalizer for {}", phase, pkg);
        let shell = finalizer.shell();
        let Some((program, shell_args)) = shell.split_first() else {
            return Err(Error::FinalizerError(format!("{}: empty shell", pkg)));
        };

        for command in commands {
            debug!("[{}] {} {:?} {}", pkg, program, shell_args, command);
            let mut child = Command::new(program)
                .args(shell_args)
                .arg(command)
                .current_dir(&self.rootfs)
                .env("QUARRY_ROOTFS", &self.rootfs)
                .env("QUARRY_PACKAGE", pkg.fingerprint())
                .env("QUARRY_PHASE", phase.to_string())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| {
                    Error::FinalizerError(format!("{}: failed to spawn {}: {}", pkg, program, e))
                })?;

            match child.wait_timeout(self.timeout)? {
                Some(status) => {
                    let output = child.wait_with_output()?;
                    for line in String::from_utf8_lossy(&output.stdout).lines() {
                        info!("[{}] {}", pkg, line);
                    }
                    for line in String::from_utf8_lossy(&output.stderr).lines() {
                        warn!("[{}] {}", pkg, line);
                    }
                    if !status.success() {
                        return Err(Error::FinalizerError(format!(
                            "{} {} finalizer failed with exit code {}",
                            pkg,
                            phase,
                            status.code().unwrap_or(-1)
                        )));
                    }
                }
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::FinalizerError(format!(
                        "{} {} finalizer timed out after {} seconds",
                        pkg,
                        phase,
                        self.timeout.as_secs()
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn pkg() -> Package {
        Package::parse("app/foo@1.0").unwrap()
    }

    fn finalizer(install: &[&str]) -> Finalizer {
        Finalizer {
            install: install.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_runs_in_rootfs_when_allowed() {
        let root = TempDir::new().unwrap();
        let runner = FinalizerRunner::new(root.path(), Duration::from_secs(10), true);
        runner
            .run(&pkg(), &finalizer(&["echo \"$QUARRY_PACKAGE\" > marker"]), Phase::Install)
            .unwrap();
        assert_eq!(
            fs::read_to_string(root.path().join("marker")).unwrap().trim(),
            "app/foo@1.0"
        );
    }

    #[test]
    fn test_skipped_outside_root() {
        let root = TempDir::new().unwrap();
        let runner = FinalizerRunner::new(root.path(), Duration::from_secs(10), false);
        runner
            .run(&pkg(), &finalizer(&["touch marker"]), Phase::Install)
            .unwrap();
        assert!(!root.path().join("marker").exists());
    }

    #[test]
    fn test_failure_and_timeout() {
        let root = TempDir::new().unwrap();
        let runner = FinalizerRunner::new(root.path(), Duration::from_secs(10), true);
        assert!(matches!(
            runner.run(&pkg(), &finalizer(&["exit 3"]), Phase::Install),
            Err(Error::FinalizerError(_))
        ));

        let quick = FinalizerRunner::new(root.path(), Duration::from_millis(200), true);
        assert!(quick.run(&pkg(), &finalizer(&["sleep 5"]), Phase::Install).is_err());
    }

    #[test]
    fn test_uninstall_phase_uses_uninstall_commands() {
        let root = TempDir::new().unwrap();
        let runner = FinalizerRunner::new(root.path(), Duration::from_secs(10), true);
        let f = Finalizer {
            uninstall: vec!["touch gone".to_string()],
            ..Default::default()
        };
        runner.run(&pkg(), &f, Phase::Install).unwrap();
        assert!(!root.path().join("gone").exists());
        runner.run(&pkg(), &f, Phase::Uninstall).unwrap();
        assert!(root.path().join("gone").exists());
    }
}
