use std::path::PathBuf;
use walkdir::WalkDir;

/// Finds the product photo for a public identifier.
pub trait ImageLocator: Send + Sync {
    fn find_image(&self, barcode: &str) -> Option<PathBuf>;
}

/// Photos filed under `<root>/<first letter of barcode>/...`.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
}

impl ImageFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ImageLocator for ImageFolder {
    /// Last matching `.JPG` in path order, case-insensitive.
    fn find_image(&self, barcode: &str) -> Option<PathBuf> {
        let barcode = barcode.trim().to_uppercase();
        let first = barcode.chars().next()?;
        let dir = self.root.join(first.to_string());
        let mut candidates: Vec<PathBuf> = WalkDir::new(&dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                let upper = path.to_string_lossy().to_uppercase();
                upper.contains(&barcode) && upper.contains(".JPG")
            })
            .collect();
        candidates.sort();
        candidates.pop()
    }
}

/// Locator for runs without an image folder.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImages;

impl ImageLocator for NoImages {
    fn find_image(&self, _barcode: &str) -> Option<PathBuf> {
        None
    }
}
