//! Isolated staging area for mutated artifacts. Originals are never written.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::EngineError;

/// Mirror directory holding mutated file copies and their diffs, distinct
/// from the working tree. The committing collaborator decides whether these
/// ever reach the real sources.
#[derive(Clone, Debug)]
pub struct MutationWorkspace {
    root: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedArtifact {
    pub mutated_path: PathBuf,
    pub diff_path: PathBuf,
}

impl MutationWorkspace {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the mutated text and its diff under the workspace mirror,
    /// preserving the file's relative path.
    pub fn stage(
        &self,
        rel_path: &str,
        mutated: &str,
        diff: &str,
    ) -> Result<StagedArtifact, EngineError> {
        let rel = sanitize_relative(rel_path)?;
        let mutated_path = self.root.join(&rel);
        if let Some(parent) = mutated_path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut diff_name = mutated_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        diff_name.push_str(".diff");
        let diff_path = mutated_path.with_file_name(diff_name);

        fs::write(&mutated_path, mutated.as_bytes()).map_err(io_err)?;
        fs::write(&diff_path, diff.as_bytes()).map_err(io_err)?;
        Ok(StagedArtifact {
            mutated_path,
            diff_path,
        })
    }
}

/// Staged paths must stay inside the workspace root.
fn sanitize_relative(rel_path: &str) -> Result<PathBuf, EngineError> {
    let path = Path::new(rel_path);
    if rel_path.is_empty() || path.is_absolute() {
        return Err(EngineError::PathViolation(rel_path.to_string()));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(EngineError::PathViolation(rel_path.to_string())),
        }
    }
    Ok(path.to_path_buf())
}

fn io_err(err: std::io::Error) -> EngineError {
    EngineError::Io(err.to_string())
}
