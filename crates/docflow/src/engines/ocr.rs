//! OCR engines: plain text files, or an external command such as tesseract.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use docflow_pipeline::{CollaboratorError, OcrEngine};

/// Treats the document as already-extracted UTF-8 text.
#[derive(Debug, Default)]
pub struct TextFileOcr;

#[async_trait]
impl OcrEngine for TextFileOcr {
    async fn extract_text(&self, path: &Path) -> Result<String, CollaboratorError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            CollaboratorError::failed(format!("cannot read {}: {}", path.display(), e))
        })?;
        if text.trim().is_empty() {
            return Err(CollaboratorError::failed(format!(
                "{} contains no text",
                path.display()
            )));
        }
        Ok(text)
    }
}

/// Runs `program args...` with `{path}` substituted and reads text from
/// stdout. The child is killed if the stage deadline drops the future.
#[derive(Debug, Clone)]
pub struct CommandOcr {
    program: String,
    args: Vec<String>,
}

impl Default for CommandOcr {
    fn default() -> Self {
        Self {
            program: "tesseract".to_string(),
            args: vec!["{path}".to_string(), "stdout".to_string()],
        }
    }
}

impl CommandOcr {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn command_args(&self, path: &Path) -> Vec<String> {
        let path = path.display().to_string();
        self.args.iter().map(|arg| arg.replace("{path}", &path)).collect()
    }
}

#[async_trait]
impl OcrEngine for CommandOcr {
    async fn extract_text(&self, path: &Path) -> Result<String, CollaboratorError> {
        let args = self.command_args(path);
        debug!(program = %self.program, ?args, "Running OCR command");
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CollaboratorError::failed(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollaboratorError::failed(format!(
                "{} exited with {:?}: {}",
                self.program,
                output.status.code(),
                stderr.trim()
            )));
        }
        let text = String::from_utf8(output.stdout)
            .map_err(|_| CollaboratorError::failed(format!("{} printed non UTF-8 output", self.program)))?;
        if text.trim().is_empty() {
            return Err(CollaboratorError::failed(format!(
                "no text recognized in {}",
                path.display()
            )));
        }
        Ok(text)
    }
}
