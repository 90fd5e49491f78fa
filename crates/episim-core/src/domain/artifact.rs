//! Artifact sets: one complete candidate implementation of a model.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{EpisimError, Result};

/// How to launch an artifact set: a program plus its arguments.
///
/// The program is resolved through `PATH` unless it is a relative path into
/// the artifact's own files (e.g. `./run.sh`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entrypoint {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Entrypoint {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Build from a command line already split into words.
    pub fn from_words(words: &[String]) -> Result<Self> {
        let (program, args) = words.split_first().ok_or_else(|| {
            EpisimError::InvalidArtifactSet("entrypoint command cannot be empty".to_string())
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

/// Named bundle of generated source files plus the entrypoint that runs them.
///
/// Artifact sets are never patched in place: a repair produces a complete
/// replacement set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactSet {
    pub name: String,
    /// Relative path to file content.
    pub files: BTreeMap<String, String>,
    pub entrypoint: Entrypoint,
}

fn relative_path_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*(/[A-Za-z0-9_][A-Za-z0-9_.\-]*)*$").ok()
        })
        .as_ref()
}

impl ArtifactSet {
    pub fn new(name: impl Into<String>, entrypoint: Entrypoint) -> Self {
        Self {
            name: name.into(),
            files: BTreeMap::new(),
            entrypoint,
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    /// Reject empty entrypoints and any filename that could escape the working directory.
    pub fn validate(&self) -> Result<()> {
        if self.entrypoint.program.trim().is_empty() {
            return Err(EpisimError::InvalidArtifactSet(
                "entrypoint program cannot be empty".to_string(),
            ));
        }
        for path in self.files.keys() {
            let unsafe_segment = path.split('/').any(|seg| seg == "." || seg == "..");
            let well_formed = relative_path_pattern().is_some_and(|re| re.is_match(path));
            if unsafe_segment || !well_formed {
                return Err(EpisimError::InvalidArtifactSet(format!(
                    "unsafe artifact filename `{path}`"
                )));
            }
        }
        Ok(())
    }

    /// SHA-256 over the name, entrypoint and key-sorted files.
    ///
    /// Every field is length-prefixed, so content cannot shift across a
    /// field boundary without changing the digest.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        let mut field = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };
        field(self.name.as_bytes());
        field(self.entrypoint.program.as_bytes());
        field(&(self.entrypoint.args.len() as u64).to_le_bytes());
        for arg in &self.entrypoint.args {
            field(arg.as_bytes());
        }
        field(&(self.files.len() as u64).to_le_bytes());
        for (path, content) in &self.files {
            field(path.as_bytes());
            field(content.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Write every file below `dir`, creating parent directories as needed.
    pub fn materialize(&self, dir: &Path) -> Result<()> {
        self.validate()?;
        for (rel, content) in &self.files {
            let path = dir.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, content)?;
        }
        Ok(())
    }

    /// Load every UTF-8 file under `dir` (recursively) into a new set.
    pub fn from_directory(
        name: impl Into<String>,
        dir: &Path,
        entrypoint: Entrypoint,
    ) -> Result<Self> {
        let mut set = Self::new(name, entrypoint);
        let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            for entry in std::fs::read_dir(&current)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let rel = path
                    .strip_prefix(dir)
                    .map_err(|e| EpisimError::InvalidArtifactSet(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                let content = std::fs::read_to_string(&path)?;
                set.files.insert(rel, content);
            }
        }
        set.validate()?;
        Ok(set)
    }
}
