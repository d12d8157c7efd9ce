//! Local keyword corpus used when the remote search service is unavailable
//!
//! Contract: keyword in, at most `limit` lines out. A line may carry a
//! `source:` prefix, which the controller splits off at the first colon.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub trait LocalCorpus: Send + Sync {
    /// Case-insensitive keyword scan returning at most `limit` lines
    fn scan(&self, keyword: &str, limit: usize) -> Vec<String>;
}

fn keyword_pattern(keyword: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(keyword))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Fixed set of lines held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    lines: Vec<String>,
}

impl InMemoryCorpus {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl LocalCorpus for InMemoryCorpus {
    fn scan(&self, keyword: &str, limit: usize) -> Vec<String> {
        let Some(pattern) = keyword_pattern(keyword) else {
            return Vec::new();
        };
        self.lines
            .iter()
            .filter(|line| pattern.is_match(line))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Text files under a directory, scanned recursively like `grep -ri`
///
/// Matching lines are reported as `<path>:<line>`.
#[derive(Debug, Clone)]
pub struct DirectoryCorpus {
    root: PathBuf,
}

impl DirectoryCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Regular files under the root in name order; symlinks are not followed
    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.with_context(|| format!("walking corpus directory {:?}", self.root))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

impl LocalCorpus for DirectoryCorpus {
    fn scan(&self, keyword: &str, limit: usize) -> Vec<String> {
        let Some(pattern) = keyword_pattern(keyword) else {
            return Vec::new();
        };

        let files = match self.collect_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Local corpus unavailable: {:#}", e);
                return Vec::new();
            }
        };

        let mut matches = Vec::new();
        for path in files {
            // Binary or unreadable files are skipped, as grep would
            let Ok(content) = fs::read_to_string(&path) else {
                debug!("Skipping unreadable corpus file {:?}", path);
                continue;
            };
            for line in content.lines().filter(|l| pattern.is_match(l)) {
                matches.push(format!("{}:{}", path.display(), line));
                if matches.len() >= limit {
                    return matches;
                }
            }
        }
        matches
    }
}
