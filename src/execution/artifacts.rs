//! Artifact archiver - snapshots files produced by a job instance
//!
//! Layout on disk:
//!
//! ```text
//! <root>/<run-id>/<instance-key>/<name>/manifest.json
//! <root>/<run-id>/<instance-key>/<name>/files/...
//! ```
//!
//! The instance key is a readable slug of the instance name followed by a
//! hash of the exact name, so instances differing only in case or
//! punctuation never share a directory.
//!
//! A capture is written under a `.partial` directory and renamed into place,
//! so an artifact directory exists only for captures that completed.

use crate::core::config::{INVALID_ARTIFACT_NAME_CHARS, MAX_RETENTION_DAYS};
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

/// Retention when a capture step declares none
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";

/// Error types for artifact capture and retrieval
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact name is not valid: '{0}'")]
    InvalidName(String),

    #[error("Artifact step is missing input '{0}'")]
    MissingInput(&'static str),

    #[error("Path does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Artifact '{name}' already exists for {instance}")]
    AlreadyExists { instance: String, name: String },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to walk artifact directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Inputs of an artifact capture step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRequest {
    pub name: String,
    pub path: PathBuf,
    pub retention_days: u32,
}

impl ArtifactRequest {
    /// Read `name`, `path` and `retention-days` from rendered step inputs
    pub fn from_inputs(with: &IndexMap<String, String>) -> Result<Self, ArtifactError> {
        let name = with
            .get("name")
            .map(|n| n.trim().to_string())
            .ok_or(ArtifactError::MissingInput("name"))?;
        validate_name(&name)?;

        let path = with
            .get("path")
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .ok_or(ArtifactError::MissingInput("path"))?;

        let retention_days = with
            .get("retention-days")
            .and_then(|days| days.trim().parse().ok())
            .unwrap_or(DEFAULT_RETENTION_DAYS)
            .min(MAX_RETENTION_DAYS);

        Ok(Self {
            name,
            path: PathBuf::from(path),
            retention_days,
        })
    }
}

fn validate_name(name: &str) -> Result<(), ArtifactError> {
    if name.is_empty() || name.contains(INVALID_ARTIFACT_NAME_CHARS) || name.starts_with('.') {
        return Err(ArtifactError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// A stored artifact, as recorded in its manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub run_id: Uuid,

    /// Display name of the producing job instance
    pub instance: String,

    /// Path that was captured
    pub source: PathBuf,

    /// Directory holding the captured files
    pub stored_at: PathBuf,

    pub file_count: usize,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Artifact {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Filesystem-safe directory key for an instance display name
pub fn instance_key(instance: &str) -> String {
    let mut slug = String::with_capacity(instance.len());
    for c in instance.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }

    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, instance.as_bytes()).simple().to_string();
    format!("{}-{}", slug.trim_matches('-'), &digest[..12])
}

/// Captures and retrieves artifacts under one root directory
#[derive(Debug, Clone)]
pub struct ArtifactArchiver {
    root: PathBuf,
}

impl ArtifactArchiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, run_id: Uuid, instance: &str, name: &str) -> PathBuf {
        self.root
            .join(run_id.to_string())
            .join(instance_key(instance))
            .join(name)
    }

    /// Snapshot `request.path` (a file or a directory) for one instance.
    ///
    /// Relative paths resolve against `working_dir`, or the current directory.
    pub fn capture(
        &self,
        run_id: Uuid,
        instance: &str,
        request: &ArtifactRequest,
        working_dir: Option<&Path>,
        now: DateTime<Utc>,
    ) -> Result<Artifact, ArtifactError> {
        validate_name(&request.name)?;

        let source = match working_dir {
            Some(dir) if request.path.is_relative() => dir.join(&request.path),
            _ => request.path.clone(),
        };
        if !source.exists() {
            return Err(ArtifactError::SourceMissing(source));
        }

        let target = self.artifact_dir(run_id, instance, &request.name);
        if target.exists() {
            return Err(ArtifactError::AlreadyExists {
                instance: instance.to_string(),
                name: request.name.clone(),
            });
        }

        let parent = target
            .parent()
            .ok_or_else(|| ArtifactError::InvalidName(request.name.clone()))?;
        fs::create_dir_all(parent).map_err(io_error(parent))?;

        let partial = parent.join(format!(".{}.partial", request.name));
        if partial.exists() {
            fs::remove_dir_all(&partial).map_err(io_error(&partial))?;
        }

        let copied = copy_into(&source, &partial.join(FILES_DIR));
        let (file_count, size_bytes) = match copied {
            Ok(totals) => totals,
            Err(e) => {
                let _ = fs::remove_dir_all(&partial);
                return Err(e);
            }
        };

        let artifact = Artifact {
            name: request.name.clone(),
            run_id,
            instance: instance.to_string(),
            source: source.clone(),
            stored_at: target.join(FILES_DIR),
            file_count,
            size_bytes,
            created_at: now,
            expires_at: now + retention(request.retention_days),
        };

        let manifest_path = partial.join(MANIFEST_FILE);
        let manifest = serde_json::to_vec_pretty(&artifact)?;
        fs::write(&manifest_path, manifest).map_err(io_error(&manifest_path))?;
        fs::rename(&partial, &target).map_err(io_error(&target))?;

        info!(
            "Captured artifact '{}' for {} ({} files, {} bytes)",
            artifact.name, instance, file_count, size_bytes
        );

        Ok(artifact)
    }

    /// Look up one artifact by run, instance and name
    pub fn get(
        &self,
        run_id: Uuid,
        instance: &str,
        name: &str,
    ) -> Result<Option<Artifact>, ArtifactError> {
        let manifest = self.artifact_dir(run_id, instance, name).join(MANIFEST_FILE);
        if !manifest.is_file() {
            return Ok(None);
        }
        let artifact = read_manifest(&manifest)?;
        Ok((artifact.instance == instance && artifact.name == name).then_some(artifact))
    }

    /// Every artifact of a run, ordered by instance then name
    pub fn list(&self, run_id: Uuid) -> Result<Vec<Artifact>, ArtifactError> {
        let run_dir = self.root.join(run_id.to_string());
        if !run_dir.is_dir() {
            return Ok(Vec::new());
        }
        self.manifests_under(&run_dir, 3)
    }

    /// Delete every artifact whose retention has expired at `now`
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Result<Vec<Artifact>, ArtifactError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut pruned = Vec::new();
        for artifact in self.manifests_under(&self.root, 4)? {
            if !artifact.is_expired(now) {
                continue;
            }
            let dir = self.artifact_dir(artifact.run_id, &artifact.instance, &artifact.name);
            fs::remove_dir_all(&dir).map_err(io_error(&dir))?;
            debug!("Pruned expired artifact '{}' of {}", artifact.name, artifact.instance);
            pruned.push(artifact);
        }

        Ok(pruned)
    }

    /// Manifests sit exactly `depth` levels below `dir`
    fn manifests_under(&self, dir: &Path, depth: usize) -> Result<Vec<Artifact>, ArtifactError> {
        let mut artifacts = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(depth)
            .max_depth(depth)
            .sort_by_file_name()
        {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.file_name() == MANIFEST_FILE
                && !is_partial(entry.path())
            {
                artifacts.push(read_manifest(entry.path())?);
            }
        }
        Ok(artifacts)
    }
}

fn retention(days: u32) -> Duration {
    Duration::try_days(i64::from(days.min(MAX_RETENTION_DAYS)))
        .unwrap_or_else(|| Duration::days(i64::from(DEFAULT_RETENTION_DAYS)))
}

fn is_partial(manifest: &Path) -> bool {
    manifest
        .parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(".partial"))
}

fn read_manifest(path: &Path) -> Result<Artifact, ArtifactError> {
    let content = fs::read(path).map_err(io_error(path))?;
    Ok(serde_json::from_slice(&content)?)
}

/// Copy a file or directory tree into `dest`, returning (files, bytes)
fn copy_into(source: &Path, dest: &Path) -> Result<(usize, u64), ArtifactError> {
    fs::create_dir_all(dest).map_err(io_error(dest))?;

    if source.is_file() {
        let file_name = source
            .file_name()
            .ok_or_else(|| ArtifactError::SourceMissing(source.to_path_buf()))?;
        let target = dest.join(file_name);
        let bytes = fs::copy(source, &target).map_err(io_error(source))?;
        return Ok((1, bytes));
    }

    let mut files = 0;
    let mut bytes = 0;
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| ArtifactError::SourceMissing(entry.path().to_path_buf()))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(io_error(&target))?;
        } else if entry.file_type().is_file() {
            bytes += fs::copy(entry.path(), &target).map_err(io_error(entry.path()))?;
            files += 1;
        }
    }

    Ok((files, bytes))
}
