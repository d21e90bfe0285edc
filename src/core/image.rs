//! Pull build container images before they are advertised in the registry.

use crate::defaults::ImageConfig;
use crate::error::{Error, ImagePullDetails, Result};
use std::process::{Command, Output};

pub struct ImagePuller {
    runtime: String,
    use_sudo: bool,
}

impl ImagePuller {
    pub fn new(runtime: impl Into<String>, use_sudo: bool) -> Self {
        Self {
            runtime: runtime.into(),
            use_sudo,
        }
    }

    pub fn from_config(config: &ImageConfig) -> Self {
        Self::new(config.runtime.clone(), config.use_sudo)
    }

    fn command(&self, args: &[&str], privileged: bool) -> (Command, String) {
        let mut display = Vec::with_capacity(args.len() + 2);
        let mut cmd = if privileged && self.use_sudo {
            display.push("sudo".to_string());
            let mut cmd = Command::new("sudo");
            cmd.arg(&self.runtime);
            cmd
        } else {
            Command::new(&self.runtime)
        };
        display.push(self.runtime.clone());
        display.extend(args.iter().map(|a| a.to_string()));
        cmd.args(args);
        (cmd, display.join(" "))
    }

    /// Make sure the container runtime can be invoked at all.
    pub fn check_runtime(&self) -> Result<()> {
        let (mut cmd, display) = self.command(&["-v"], false);
        let output = cmd.output().map_err(|e| {
            runtime_missing(&self.runtime, &display, None, e.to_string())
        })?;

        if !output.status.success() {
            return Err(runtime_missing(
                &self.runtime,
                &display,
                output.status.code(),
                error_text(&output),
            ));
        }
        Ok(())
    }

    /// Pull `image`, failing if the runtime is unavailable or the pull fails.
    pub fn pull(&self, image: &str) -> Result<()> {
        self.check_runtime()?;

        let (mut cmd, display) = self.command(&["pull", image], true);
        log_status!("image", "Pulling {}", image);

        let output = cmd.output().map_err(|e| {
            Error::image_pull_failed(
                format!("Failed to pull {} using {}", image, self.runtime),
                ImagePullDetails {
                    image: image.to_string(),
                    command: display.clone(),
                    exit_code: None,
                    stderr: e.to_string(),
                },
            )
        })?;

        if !output.status.success() {
            return Err(Error::image_pull_failed(
                format!("Failed to pull {} using {}", image, self.runtime),
                ImagePullDetails {
                    image: image.to_string(),
                    command: display,
                    exit_code: output.status.code(),
                    stderr: error_text(&output),
                },
            ));
        }
        Ok(())
    }
}

fn runtime_missing(runtime: &str, command: &str, exit_code: Option<i32>, stderr: String) -> Error {
    Error::image_pull_failed(
        format!("Container runtime '{}' is not available", runtime),
        ImagePullDetails {
            image: String::new(),
            command: command.to_string(),
            exit_code,
            stderr,
        },
    )
    .with_hint(format!("Please install {} on this host", runtime))
}

fn error_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else if !stdout.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        format!("exit code {}", output.status.code().unwrap_or(1))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn successful_runtime_pulls() {
        let puller = ImagePuller::new("true", false);
        assert!(puller.pull("quay.example/ceph:abc").is_ok());
    }

    #[test]
    fn failing_runtime_is_reported() {
        let err = ImagePuller::new("false", false)
            .pull("quay.example/ceph:abc")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ImagePullFailed);
        assert_eq!(err.details["command"], "false -v");
        assert_eq!(err.details["exitCode"], 1);
    }

    #[test]
    fn missing_runtime_suggests_install() {
        let err = ImagePuller::new("buildreg-no-such-runtime", false)
            .check_runtime()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ImagePullFailed);
        assert!(err.hints[0].message.contains("buildreg-no-such-runtime"));
    }

    #[test]
    fn pull_is_prefixed_with_sudo_when_configured() {
        let (_, display) = ImagePuller::new("podman", true).command(&["pull", "img"], true);
        assert_eq!(display, "sudo podman pull img");

        let (_, display) = ImagePuller::new("podman", true).command(&["-v"], false);
        assert_eq!(display, "podman -v");
    }
}
