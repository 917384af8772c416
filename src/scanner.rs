use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::lock::StopSignal;

/// Enumerates candidate files under a set of roots by extension.
///
/// Every file counts: hidden files are included and ignore files are not
/// honoured. Entries that cannot be read are logged and skipped.
#[derive(Debug, Clone)]
pub struct FileScanner {
    roots: Vec<PathBuf>,
    extensions: HashSet<String>,
}

impl FileScanner {
    pub fn new<S: AsRef<str>>(roots: Vec<PathBuf>, extensions: &[S]) -> Self {
        let roots = roots
            .into_iter()
            .map(|root| std::path::absolute(&root).unwrap_or(root))
            .collect();

        let extensions = extensions
            .iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect();

        Self { roots, extensions }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| self.extensions.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    }

    /// Lazily walk every root. Each call starts a fresh traversal.
    pub fn scan(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.walk(None)
    }

    /// Like [`FileScanner::scan`], but the walk ends as soon as `stop` is
    /// set, also in the middle of a subtree with no matching files.
    pub fn scan_until<'a>(&'a self, stop: &'a StopSignal) -> impl Iterator<Item = PathBuf> + 'a {
        self.walk(Some(stop))
    }

    fn walk<'a>(&'a self, stop: Option<&'a StopSignal>) -> impl Iterator<Item = PathBuf> + 'a {
        self.roots.iter().flat_map(move |root| {
            if !root.exists() {
                log::warn!("scan root {} does not exist", root.display());
            }

            WalkBuilder::new(root)
                .standard_filters(false)
                .follow_links(true)
                .build()
                .take_while(move |_| !stop.is_some_and(StopSignal::is_stopped))
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        log::warn!("skipping unreadable entry: {err}");
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
                .map(|entry| entry.into_path())
                .filter(move |path| self.matches(path))
        })
    }
}
