use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::{StageError, StageResult};

/// Spanish neural voices offered by shorthand name
pub const SPANISH_VOICES: &[(&str, &str)] = &[
    ("elena", "es-ES-ElviraNeural"),
    ("alvaro", "es-ES-AlvaroNeural"),
    ("jorge", "es-MX-JorgeNeural"),
    ("dalia", "es-MX-DaliaNeural"),
];

/// Synthesizes spoken narration for a clip
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NarrationSynthesizer: Send + Sync {
    /// Write spoken audio for `text` to `output`
    async fn synthesize(&self, text: &str, output: &Path) -> StageResult<PathBuf>;
}

/// edge-tts subprocess wrapper
pub struct EdgeTtsSynthesizer {
    edge_tts_path: String,
    voice: String,
}

impl EdgeTtsSynthesizer {
    pub fn new(voice: &str) -> Self {
        Self {
            edge_tts_path: "edge-tts".to_string(),
            voice: resolve_voice(voice),
        }
    }

    /// Check if edge-tts is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.edge_tts_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }
}

#[async_trait]
impl NarrationSynthesizer for EdgeTtsSynthesizer {
    async fn synthesize(&self, text: &str, output: &Path) -> StageResult<PathBuf> {
        let text = text.trim();
        if text.is_empty() {
            return Err(StageError::content("narration text is empty"));
        }

        tracing::debug!("synthesizing {} chars with voice {}", text.chars().count(), self.voice);

        let result = Command::new(&self.edge_tts_path)
            .args([
                "--voice",
                &self.voice,
                "--text",
                text,
                "--write-media",
                &output.to_string_lossy(),
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StageError::transient(format!("failed to spawn edge-tts: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let excerpt: String = stderr.trim().chars().take(400).collect();
            // The service runs remotely, so failures are usually network trouble
            return Err(StageError::transient(format!("edge-tts failed: {excerpt}")));
        }

        if !output.exists() {
            return Err(StageError::transient("edge-tts exited cleanly but wrote no audio"));
        }

        Ok(output.to_path_buf())
    }
}

/// Map a shorthand voice name to its edge-tts id; full ids pass through
pub fn resolve_voice(name: &str) -> String {
    let key = name.to_lowercase();
    SPANISH_VOICES
        .iter()
        .find(|(short, _)| *short == key)
        .map(|(_, id)| id.to_string())
        .unwrap_or_else(|| name.to_string())
}
