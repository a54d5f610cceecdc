use crate::traits::{Tool, ToolError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB

/// Confines file tool paths to one directory tree.
#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    root: PathBuf,
}

impl WorkspaceGuard {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = std::fs::canonicalize(root.as_ref()).map_err(|e| {
            ToolError::execution("workspace", format!("Invalid workspace root {:?}: {}", root.as_ref(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_relative(&self, tool: &str, path: &Path) -> Result<PathBuf, ToolError> {
        if path.is_absolute() {
            return Err(ToolError::validation(tool, "Absolute paths not allowed"));
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ToolError::validation(tool, "Path traversal detected"));
        }
        Ok(self.root.join(path))
    }

    /// Resolve a path that must already exist.
    pub fn resolve_existing(&self, tool: &str, path: &str) -> Result<PathBuf, ToolError> {
        let full_path = self.check_relative(tool, Path::new(path))?;

        // Canonicalize to resolve symlinks
        let canonical = std::fs::canonicalize(&full_path)
            .map_err(|e| ToolError::execution(tool, format!("Cannot open '{}': {}", path, e)))?;
        if !canonical.starts_with(&self.root) {
            return Err(ToolError::validation(tool, "Path escapes workspace"));
        }
        Ok(canonical)
    }

    /// Resolve a path that may not exist yet; its parent must.
    pub fn resolve_new(&self, tool: &str, path: &str) -> Result<PathBuf, ToolError> {
        let full_path = self.check_relative(tool, Path::new(path))?;

        if full_path.exists() {
            return self.resolve_existing(tool, path);
        }

        let parent = full_path
            .parent()
            .ok_or_else(|| ToolError::validation(tool, "Path has no parent directory"))?;
        let canonical_parent = std::fs::canonicalize(parent).map_err(|e| {
            ToolError::execution(tool, format!("Parent directory of '{}' unavailable: {}", path, e))
        })?;
        if !canonical_parent.starts_with(&self.root) {
            return Err(ToolError::validation(tool, "Path escapes workspace"));
        }

        let file_name = full_path
            .file_name()
            .ok_or_else(|| ToolError::validation(tool, "Path has no file name"))?;
        Ok(canonical_parent.join(file_name))
    }
}

#[derive(Deserialize)]
struct ReadFileInput {
    file_path: String,
}

pub struct ReadFileTool {
    guard: WorkspaceGuard,
}

impl ReadFileTool {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file in the workspace"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "File path relative to the workspace"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<String, ToolError> {
        let input: ReadFileInput = serde_json::from_value(Value::Object(args))
            .map_err(|e| ToolError::validation(self.name(), e))?;

        let path = self.guard.resolve_existing(self.name(), &input.file_path)?;

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(ToolError::execution(self.name(), "File too large"));
        }

        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::execution(self.name(), format!("Read failed: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
enum WriteMode {
    #[serde(rename = "w")]
    Overwrite,
    #[serde(rename = "a")]
    Append,
}

#[derive(Deserialize)]
struct WriteFileInput {
    file_path: String,
    content: String,
    mode: WriteMode,
}

pub struct WriteFileTool {
    guard: WorkspaceGuard,
}

impl WriteFileTool {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text to a file in the workspace, overwriting or appending"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "File path relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Text to write"
                },
                "mode": {
                    "type": "string",
                    "enum": ["w", "a"],
                    "description": "'w' overwrites the file, 'a' appends to it"
                }
            },
            "required": ["file_path", "content", "mode"]
        })
    }

    fn validate(&self, args: &Map<String, Value>) -> Result<(), ToolError> {
        match args.get("mode").and_then(Value::as_str) {
            Some("w") | Some("a") => Ok(()),
            other => Err(ToolError::validation(
                self.name(),
                format!("mode must be 'w' or 'a', got {:?}", other.unwrap_or_default()),
            )),
        }
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<String, ToolError> {
        let input: WriteFileInput = serde_json::from_value(Value::Object(args))
            .map_err(|e| ToolError::validation(self.name(), e))?;

        let path = self.guard.resolve_new(self.name(), &input.file_path)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(input.mode == WriteMode::Append)
            .truncate(input.mode == WriteMode::Overwrite)
            .open(&path)
            .await
            .map_err(|e| ToolError::execution(self.name(), format!("Open failed: {}", e)))?;

        file.write_all(input.content.as_bytes())
            .await
            .map_err(|e| ToolError::execution(self.name(), format!("Write failed: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| ToolError::execution(self.name(), e))?;

        Ok(format!(
            "Wrote {} bytes to '{}'",
            input.content.len(),
            input.file_path
        ))
    }
}
