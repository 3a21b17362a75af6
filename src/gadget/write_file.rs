//! `write_file` — writes/creates a file confined to a configured root
//! directory. Grounded on `tools/write_file.rs`'s `WriteFileTool`.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{
    CancelSignal, Gadget, GadgetExample, GadgetExecutionContext, GadgetOutput, ParameterField,
    ParameterKind, ParameterSchema,
};
use crate::error::{Error, Result};
use crate::markers::ParameterTree;

pub struct WriteFileGadget {
    allowed_dir: PathBuf,
}

impl WriteFileGadget {
    pub fn new(allowed_dir: PathBuf) -> Self {
        Self { allowed_dir }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let full_path = self.allowed_dir.join(relative);
        let normalized = crate::gadget::normalize_lexically(&full_path);
        if !normalized.starts_with(&self.allowed_dir) {
            return Err(Error::GadgetThrew {
                name: "write_file".to_string(),
                invocation_id: String::new(),
                message: "path escapes the allowed directory".to_string(),
            });
        }
        Ok(normalized)
    }
}

#[async_trait]
impl Gadget for WriteFileGadget {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Writes (creating or overwriting) a file, confined to a configured root directory."
    }

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![
            ParameterField {
                path: "path".to_string(),
                description: "path relative to the configured root".to_string(),
                required: true,
                kind: ParameterKind::String,
            },
            ParameterField {
                path: "content".to_string(),
                description: "file content to write".to_string(),
                required: true,
                kind: ParameterKind::String,
            },
        ])
    }

    fn category(&self) -> Option<&str> {
        Some("File Tools")
    }

    fn examples(&self) -> Vec<GadgetExample> {
        vec![GadgetExample {
            description: "Write a note".to_string(),
            parameters: vec![
                ("path".to_string(), "notes/todo.md".to_string()),
                ("content".to_string(), "- buy milk".to_string()),
            ],
        }]
    }

    async fn execute(
        &self,
        params: ParameterTree,
        _cancel: CancelSignal,
        _context: GadgetExecutionContext,
    ) -> Result<GadgetOutput> {
        let obj = params
            .as_object()
            .ok_or_else(|| Error::InvalidInput("write_file requires 'path' and 'content'".to_string()))?;
        let path = obj
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("write_file requires a 'path' parameter".to_string()))?;
        let content = obj
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("write_file requires a 'content' parameter".to_string()))?;

        let full_path = self.resolve(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| Error::GadgetThrew {
                name: "write_file".to_string(),
                invocation_id: String::new(),
                message: e.to_string(),
            })?;
        }
        tokio::fs::write(&full_path, content)
            .await
            .map_err(|e| Error::GadgetThrew {
                name: "write_file".to_string(),
                invocation_id: String::new(),
                message: e.to_string(),
            })?;
        Ok(GadgetOutput::text(format!("wrote {} bytes to {}", content.len(), path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ExecutionTree;
    use std::sync::Arc;
    use tokio::sync::watch;

    fn test_context() -> GadgetExecutionContext {
        GadgetExecutionContext {
            tree: Arc::new(ExecutionTree::new()),
            node_id: crate::tree::NodeId("test".to_string()),
        }
    }

    #[tokio::test]
    async fn writes_file_within_root() {
        let dir = tempfile::tempdir().unwrap();
        let gadget = WriteFileGadget::new(dir.path().to_path_buf());
        let params = crate::markers::resolve_parameters(&[
            ("path".to_string(), "sub/a.txt".to_string()),
            ("content".to_string(), "hi".to_string()),
        ])
        .unwrap();
        let (_tx, rx) = watch::channel(false);
        gadget.execute(params, rx, test_context()).await.unwrap();
        let written = tokio::fs::read_to_string(dir.path().join("sub/a.txt")).await.unwrap();
        assert_eq!(written, "hi");
    }

    #[tokio::test]
    async fn rejects_path_escaping_root() {
        let dir = tempfile::tempdir().unwrap();
        let gadget = WriteFileGadget::new(dir.path().to_path_buf());
        let params = crate::markers::resolve_parameters(&[
            ("path".to_string(), "../escape.txt".to_string()),
            ("content".to_string(), "x".to_string()),
        ])
        .unwrap();
        let (_tx, rx) = watch::channel(false);
        assert!(gadget.execute(params, rx, test_context()).await.is_err());
    }
}
