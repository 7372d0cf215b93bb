//! Bundle discovery.
//!
//! A bundle is a directory named `<name><suffix>` (`blur.ofx.bundle`) whose
//! binary for this platform lives at `Contents/<arch>/<name>` with the
//! trailing `.bundle` removed (`blur.ofx`). Directory entries are visited in
//! name order so discovery is deterministic; entries starting with `@` are
//! skipped and bundles are never descended into.

use crate::config::SearchPath;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// A bundle found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleLocation {
    /// Bundle directory.
    pub bundle_path: PathBuf,
    /// Binary for this platform inside the bundle.
    pub binary_path: PathBuf,
}

/// Platform binary path inside a bundle directory.
pub fn bundle_binary_path(bundle_path: &Path, arch: &str) -> Option<PathBuf> {
    let binary_name = bundle_path.file_stem()?;
    Some(bundle_path.join("Contents").join(arch).join(binary_name))
}

/// Walks search paths and collects bundles.
#[derive(Debug)]
pub struct BundleScanner<'a> {
    bundle_suffix: &'a str,
    arch: &'a str,
    visited: HashSet<PathBuf>,
    plugin_dirs: Vec<PathBuf>,
    bundles: Vec<BundleLocation>,
}

impl<'a> BundleScanner<'a> {
    /// A scanner for bundles ending in `bundle_suffix`, reading `arch` binaries.
    pub fn new(bundle_suffix: &'a str, arch: &'a str) -> Self {
        Self {
            bundle_suffix,
            arch,
            visited: HashSet::new(),
            plugin_dirs: Vec::new(),
            bundles: Vec::new(),
        }
    }

    /// Scan one search path. Missing roots are skipped.
    pub fn scan(&mut self, root: &SearchPath) {
        if !root.dir.is_dir() {
            tracing::debug!(dir = %root.dir.display(), "search path missing, skipped");
            return;
        }
        self.scan_dir(&root.dir, root.max_depth);
    }

    /// Directories visited so far, in visit order.
    pub fn plugin_dirs(&self) -> &[PathBuf] {
        &self.plugin_dirs
    }

    /// Finish and return `(bundles, visited directories)`.
    pub fn finish(self) -> (Vec<BundleLocation>, Vec<PathBuf>) {
        (self.bundles, self.plugin_dirs)
    }

    fn scan_dir(&mut self, dir: &Path, depth_left: Option<usize>) {
        // symlinked directories may point back up the tree
        let canonical = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        if !self.visited.insert(canonical) {
            return;
        }
        self.plugin_dirs.push(dir.to_path_buf());

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(dir = %dir.display(), error = %err, "can't read directory");
                return;
            }
        };
        let mut names: Vec<_> = entries.filter_map(|entry| entry.ok().map(|e| e.file_name())).collect();
        names.sort();

        for name in names {
            let Some(name_str) = name.to_str() else {
                continue;
            };
            if name_str.starts_with('@') || name_str == "." || name_str == ".." {
                continue;
            }
            let path = dir.join(&name);
            if !path.is_dir() {
                continue;
            }

            if name_str.ends_with(self.bundle_suffix) {
                if let Some(binary_path) = bundle_binary_path(&path, self.arch) {
                    tracing::trace!(bundle = %path.display(), "bundle found");
                    self.bundles.push(BundleLocation {
                        bundle_path: path,
                        binary_path,
                    });
                }
            } else {
                match depth_left {
                    Some(0) => {}
                    Some(depth) => self.scan_dir(&path, Some(depth - 1)),
                    None => self.scan_dir(&path, None),
                }
            }
        }
    }
}
