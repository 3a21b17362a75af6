//! `read_file` — reads a file confined to a configured root directory.
//!
//! Grounded on `tools/read_file.rs`'s `ReadFileTool`, including its
//! `allowed_dir` confinement check (`full_path.starts_with(&self.allowed_dir)`).

use std::path::PathBuf;

use async_trait::async_trait;

use super::{
    CancelSignal, Gadget, GadgetExample, GadgetExecutionContext, GadgetOutput, ParameterField,
    ParameterKind, ParameterSchema,
};
use crate::error::{Error, Result};
use crate::markers::ParameterTree;

pub struct ReadFileGadget {
    allowed_dir: PathBuf,
}

impl ReadFileGadget {
    pub fn new(allowed_dir: PathBuf) -> Self {
        Self { allowed_dir }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let full_path = self.allowed_dir.join(relative);
        let full_path = full_path
            .canonicalize()
            .map_err(|e| Error::GadgetThrew {
                name: "read_file".to_string(),
                invocation_id: String::new(),
                message: format!("cannot resolve path: {e}"),
            })?;
        if !full_path.starts_with(&self.allowed_dir) {
            return Err(Error::GadgetThrew {
                name: "read_file".to_string(),
                invocation_id: String::new(),
                message: "path escapes the allowed directory".to_string(),
            });
        }
        Ok(full_path)
    }
}

#[async_trait]
impl Gadget for ReadFileGadget {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads the contents of a file, confined to a configured root directory."
    }

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![ParameterField {
            path: "path".to_string(),
            description: "path relative to the configured root".to_string(),
            required: true,
            kind: ParameterKind::String,
        }])
    }

    fn category(&self) -> Option<&str> {
        Some("File Tools")
    }

    fn examples(&self) -> Vec<GadgetExample> {
        vec![GadgetExample {
            description: "Read a text file".to_string(),
            parameters: vec![("path".to_string(), "notes/todo.md".to_string())],
        }]
    }

    async fn execute(
        &self,
        params: ParameterTree,
        _cancel: CancelSignal,
        _context: GadgetExecutionContext,
    ) -> Result<GadgetOutput> {
        let path = params
            .as_object()
            .and_then(|o| o.get("path"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("read_file requires a 'path' parameter".to_string()))?;

        let full_path = self.resolve(path)?;
        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| Error::GadgetThrew {
                name: "read_file".to_string(),
                invocation_id: String::new(),
                message: e.to_string(),
            })?;
        Ok(GadgetOutput::text(content))
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
    async fn reads_file_within_root() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "hello").await.unwrap();
        let gadget = ReadFileGadget::new(dir.path().to_path_buf());
        let params =
            crate::markers::resolve_parameters(&[("path".to_string(), "a.txt".to_string())]).unwrap();
        let (_tx, rx) = watch::channel(false);
        let out = gadget.execute(params, rx, test_context()).await.unwrap();
        assert_eq!(out.result, "hello");
    }

    #[tokio::test]
    async fn rejects_path_escaping_root() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "hello").await.unwrap();
        let gadget = ReadFileGadget::new(dir.path().to_path_buf());
        let params =
            crate::markers::resolve_parameters(&[("path".to_string(), "../a.txt".to_string())]).unwrap();
        let (_tx, rx) = watch::channel(false);
        assert!(gadget.execute(params, rx, test_context()).await.is_err());
    }
}
