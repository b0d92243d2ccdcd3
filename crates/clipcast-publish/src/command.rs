//! Publisher implementation that shells out to a configured upload command.

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::publisher::{PublishError, Publisher};
use crate::types::{ClipRef, Platform, PublishMetadata};

/// Runs a per-platform argv template to perform the upload.
///
/// Placeholders in the template are substituted before spawning:
/// `{platform}`, `{clip}`, `{title}`, `{caption}`, and `{tags}`
/// (comma-joined hashtags). The full request is also written to the child's
/// stdin as JSON, so richer uploaders can ignore the argv entirely.
///
/// Exit status maps to the attempt outcome: zero is success, anything else
/// is a rejection carrying the command's stderr. Timeout enforcement belongs
/// to the caller; the child is killed if the publish future is dropped.
#[derive(Debug, Clone)]
pub struct CommandPublisher {
    commands: BTreeMap<Platform, Vec<String>>,
}

#[derive(Serialize)]
struct UploadPayload<'a> {
    platform: &'a Platform,
    clip: &'a ClipRef,
    metadata: &'a PublishMetadata,
}

impl CommandPublisher {
    pub fn new(commands: BTreeMap<Platform, Vec<String>>) -> Self {
        Self { commands }
    }
}

/// Substitute request fields into an argv template.
fn render_argv(
    template: &[String],
    platform: &Platform,
    clip: &ClipRef,
    metadata: &PublishMetadata,
) -> Vec<String> {
    let tags = metadata.hashtags.join(",");
    template
        .iter()
        .map(|arg| {
            arg.replace("{platform}", platform.as_str())
                .replace("{clip}", clip.as_str())
                .replace("{title}", metadata.title.as_deref().unwrap_or(""))
                .replace("{caption}", metadata.caption.as_deref().unwrap_or(""))
                .replace("{tags}", &tags)
        })
        .collect()
}

#[async_trait]
impl Publisher for CommandPublisher {
    async fn publish(
        &self,
        platform: &Platform,
        clip: &ClipRef,
        metadata: &PublishMetadata,
    ) -> Result<(), PublishError> {
        let template = self
            .commands
            .get(platform)
            .filter(|argv| !argv.is_empty())
            .ok_or_else(|| PublishError::NotConfigured(platform.clone()))?;

        let argv = render_argv(template, platform, clip, metadata);
        debug!(platform = %platform, command = %argv[0], "spawning upload command");

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PublishError::CommandNotFound(argv[0].clone())
            } else {
                PublishError::Io(e)
            }
        })?;

        let payload = serde_json::to_string(&UploadPayload {
            platform,
            clip,
            metadata,
        })?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                match output.status.code() {
                    Some(code) => format!("exit code {code}"),
                    None => "terminated by signal".to_string(),
                }
            } else {
                stderr.trim().to_string()
            };
            warn!(
                platform = %platform,
                exit_code = ?output.status.code(),
                "upload command failed"
            );
            return Err(PublishError::Rejected(detail));
        }

        Ok(())
    }
}
