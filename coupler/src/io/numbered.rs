//! Discovery of solver files that gain a restart number on each restart
//! (`restart.rst`, `restart0001.rst`, `transfer.out`, `transfer2.out`, ...).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

/// A canonical (unnumbered) or numbered variant of a solver file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedFile {
    pub path: PathBuf,
    /// `None` for the canonical file.
    pub number: Option<u32>,
}

impl NumberedFile {
    pub fn is_canonical(&self) -> bool {
        self.number.is_none()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Name of the numbered variant used for archived checkpoints (`restart0003.rst`).
pub fn numbered_name(stem: &str, ext: &str, number: u32) -> String {
    format!("{stem}{number:04}.{ext}")
}

/// List `<stem>[digits].<ext>` files in `dir`: canonical first, then ascending number.
///
/// A missing directory yields an empty list.
pub fn list_numbered(dir: &Path, stem: &str, ext: &str) -> Result<Vec<NumberedFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let pattern = Regex::new(&format!(
        r"^{}(\d*)\.{}$",
        regex::escape(stem),
        regex::escape(ext)
    ))
    .context("compile numbered file pattern")?;

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let os_name = entry.file_name();
        let name = os_name.to_string_lossy();
        let Some(caps) = pattern.captures(&name) else {
            continue;
        };
        let digits = caps.get(1).map_or("", |m| m.as_str());
        let number = if digits.is_empty() {
            None
        } else {
            match digits.parse::<u32>() {
                Ok(n) => Some(n),
                Err(_) => continue,
            }
        };
        files.push(NumberedFile {
            path: entry.path(),
            number,
        });
    }
    files.sort_by_key(|f| f.number.map_or(0, |n| u64::from(n) + 1));
    Ok(files)
}
