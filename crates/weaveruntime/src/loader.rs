use crate::{CapabilityRegistry, Orchestrator};
use std::path::{Path, PathBuf};
use weavecore::{EngineError, WorkflowDocument, WorkflowId};

/// Loads every `*.json` workflow document in a directory
pub struct WorkflowLoader {
    dir: PathBuf,
}

impl WorkflowLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Build each document with `registry` and register it. Files are loaded
    /// in name order; the first failure stops the load.
    pub async fn load_into(
        &self,
        registry: &CapabilityRegistry,
        orchestrator: &Orchestrator,
    ) -> Result<Vec<WorkflowId>, EngineError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension() == Some("json".as_ref()) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            let document = WorkflowDocument::from_file(&path)?;
            let definition = registry.build(&document)?;
            orchestrator.register(definition).await?;
            tracing::info!("Loaded workflow {} from {}", document.id, path.display());
            loaded.push(document.id);
        }
        Ok(loaded)
    }
}
