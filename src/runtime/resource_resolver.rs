// src/runtime/resource_resolver.rs
//! Ordered resource search paths
//!
//! Engines look up script resources (libraries, archives, data files)
//! through this resolver. Paths are added at runtime with
//! [`ResourceResolver::add_path`]; a reload closes the resolver and the new
//! runtime starts with an empty one.
//!
//! Accepted entries:
//! - a directory: resources are looked up by relative path inside it
//! - a readable file: matched by its file name
//! - `dir/*.ext`: every matching file in `dir` (sub-directories skipped)

use crate::utils::errors::{Result, ScriptError};
use globset::{Glob, GlobMatcher};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// One search path entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPath {
    Directory(PathBuf),
    File(PathBuf),
}

impl SearchPath {
    pub fn path(&self) -> &Path {
        match self {
            SearchPath::Directory(p) | SearchPath::File(p) => p,
        }
    }
}

#[derive(Debug, Default)]
struct ResolverState {
    paths: Vec<SearchPath>,
    closed: bool,
}

pub struct ResourceResolver {
    state: Arc<RwLock<ResolverState>>,
}

impl ResourceResolver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ResolverState::default())),
        }
    }

    /// Add a file, directory or wildcard pattern. Returns the entries added.
    pub async fn add_path(&self, path: impl AsRef<Path>) -> Result<Vec<SearchPath>> {
        let path = path.as_ref();
        if self.state.read().await.closed {
            return Err(ScriptError::ResolverClosed);
        }

        let entries = match wildcard_pattern(path) {
            Some(pattern) => expand_wildcard(path, pattern).await?,
            None => single_entry(path).await?.into_iter().collect(),
        };

        let mut state = self.state.write().await;
        if state.closed {
            return Err(ScriptError::ResolverClosed);
        }

        let mut added = Vec::with_capacity(entries.len());
        for entry in entries {
            if state.paths.contains(&entry) {
                continue;
            }
            info!("Adding resource path: {}", entry.path().display());
            state.paths.push(entry.clone());
            added.push(entry);
        }

        Ok(added)
    }

    /// Find `name` in the search paths, first match wins
    ///
    /// `name` must be relative and made of plain components only, so a
    /// lookup never leaves the directory it is resolved in.
    pub async fn resolve(&self, name: &str) -> Option<PathBuf> {
        if !is_confined(name) {
            debug!("Rejected resource name outside search paths: {}", name);
            return None;
        }

        let paths = self.state.read().await.paths.clone();

        for entry in &paths {
            match entry {
                SearchPath::Directory(dir) => {
                    let candidate = dir.join(name);
                    if tokio::fs::metadata(&candidate)
                        .await
                        .map(|m| m.is_file())
                        .unwrap_or(false)
                    {
                        debug!("Resolved {} in {}", name, dir.display());
                        return Some(candidate);
                    }
                }
                SearchPath::File(file) => {
                    if file.file_name().map(|f| f == name).unwrap_or(false) {
                        return Some(file.clone());
                    }
                }
            }
        }

        debug!("Resource not found: {}", name);
        None
    }

    pub async fn paths(&self) -> Vec<SearchPath> {
        self.state.read().await.paths.clone()
    }

    /// Drop every search path and refuse further additions
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        state.paths.clear();
        state.closed = true;
        info!("Resource resolver closed");
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }
}

impl Default for ResourceResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn wildcard_pattern(path: &Path) -> Option<&str> {
    path.file_name()
        .and_then(|f| f.to_str())
        .filter(|f| f.contains('*') || f.contains('?'))
}

async fn single_entry(path: &Path) -> Result<Option<SearchPath>> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ScriptError::ClasspathAccessDenied(absolute(path)));
        }
        Err(_) => return Err(ScriptError::ClasspathNotFound(absolute(path))),
    };

    if metadata.is_dir() {
        check_readable_dir(path).await?;
        Ok(Some(SearchPath::Directory(path.to_path_buf())))
    } else if metadata.is_file() {
        check_readable_file(path).await?;
        Ok(Some(SearchPath::File(path.to_path_buf())))
    } else {
        info!("Ignored: {}", path.display());
        Ok(None)
    }
}

async fn expand_wildcard(path: &Path, pattern: &str) -> Result<Vec<SearchPath>> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let matcher = wildcard_matcher(path, pattern)?;

    let mut dir = tokio::fs::read_dir(&parent).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ScriptError::ClasspathAccessDenied(absolute(&parent)),
        _ => ScriptError::ClasspathNotFound(absolute(&parent)),
    })?;

    let mut matches = Vec::new();
    while let Ok(Some(entry)) = dir.next_entry().await {
        let name = entry.file_name();
        if let Some(name) = name.to_str() {
            if matcher.is_match(name) {
                matches.push(entry.path());
            }
        }
    }
    matches.sort();

    let mut entries = Vec::with_capacity(matches.len());
    for file in matches {
        let metadata = tokio::fs::metadata(&file)
            .await
            .map_err(|_| ScriptError::ClasspathNotFound(absolute(&file)))?;
        if metadata.is_dir() {
            continue;
        }
        check_readable_file(&file).await?;
        entries.push(SearchPath::File(file));
    }
    Ok(entries)
}

async fn check_readable_file(path: &Path) -> Result<()> {
    tokio::fs::File::open(path)
        .await
        .map(|_| ())
        .map_err(|_| ScriptError::ClasspathAccessDenied(absolute(path)))
}

async fn check_readable_dir(path: &Path) -> Result<()> {
    tokio::fs::read_dir(path)
        .await
        .map(|_| ())
        .map_err(|_| ScriptError::ClasspathAccessDenied(absolute(path)))
}

fn absolute(path: &Path) -> PathBuf {
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn wildcard_matcher(path: &Path, pattern: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| {
            debug!("Invalid classpath pattern {}: {}", pattern, e);
            ScriptError::ClasspathNotFound(absolute(path))
        })
}

fn is_confined(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
