use std::io::{Read, Write};
use std::process::{Command, Output, Stdio};
use std::thread;

use super::{ContainerRuntime, ImageDetails, RuntimeError};
use crate::config::RuntimeKind;

/// Drives the `docker`/`podman` CLI. Connection settings (`DOCKER_HOST`,
/// `CONTAINER_HOST`, registry credentials) come from the environment.
pub struct CliRuntime {
    cmd: String,
    kind: RuntimeKind,
}

impl CliRuntime {
    pub fn new(cmd: impl Into<String>, kind: RuntimeKind) -> Self {
        Self {
            cmd: cmd.into(),
            kind,
        }
    }

    fn output(&self, args: &[&str]) -> Result<Output, RuntimeError> {
        log::debug!("running {} {}", self.cmd, args.join(" "));
        Command::new(&self.cmd)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| RuntimeError::Spawn {
                cmd: self.cmd.clone(),
                source,
            })
    }

    fn failed(&self, action: &'static str, reference: &str, stderr: &[u8]) -> RuntimeError {
        RuntimeError::Failed {
            cmd: self.cmd.clone(),
            action,
            reference: reference.to_string(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }
}

impl ContainerRuntime for CliRuntime {
    fn inspect(&self, reference: &str) -> Result<ImageDetails, RuntimeError> {
        let out = self.output(&["image", "inspect", "--format", "{{json .}}", "--", reference])?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            if is_not_found(&stderr) {
                return Err(RuntimeError::ImageNotFound(reference.to_string()));
            }
            return Err(self.failed("image inspect", reference, &out.stderr));
        }

        parse_details(reference, &String::from_utf8_lossy(&out.stdout))
    }

    fn pull(&self, reference: &str) -> Result<(), RuntimeError> {
        let out = self.output(&["pull", "--", reference])?;
        if !out.status.success() {
            return Err(self.failed("pull", reference, &out.stderr));
        }
        Ok(())
    }

    fn save(&self, reference: &str, sink: &mut dyn Write) -> Result<u64, RuntimeError> {
        let mut cmd = Command::new(&self.cmd);
        cmd.arg("save");
        if matches!(self.kind, RuntimeKind::Podman) {
            cmd.arg("--format=docker-archive");
        }
        cmd.args(["--", reference]);
        log::debug!("running {} save {reference}", self.cmd);

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                cmd: self.cmd.clone(),
                source,
            })?;

        // Drained concurrently so a chatty runtime cannot block on a full pipe.
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });

        let copied = match child.stdout.take() {
            Some(mut stdout) => std::io::copy(&mut stdout, sink),
            None => Err(std::io::Error::other("stdout was not captured")),
        };

        let written = match copied {
            Ok(n) => n,
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RuntimeError::Stream {
                    reference: reference.to_string(),
                    source,
                });
            }
        };

        let status = child.wait().map_err(|source| RuntimeError::Stream {
            reference: reference.to_string(),
            source,
        })?;
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(self.failed("save", reference, &stderr));
        }

        Ok(written)
    }
}

/// docker: "No such image: x"; podman: "x: image not known".
fn is_not_found(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such image") || stderr.contains("image not known")
}

fn parse_details(reference: &str, stdout: &str) -> Result<ImageDetails, RuntimeError> {
    serde_json::from_str(stdout.trim()).map_err(|source| RuntimeError::Decode {
        reference: reference.to_string(),
        source,
    })
}
