//! Device node operations under `/dev`.

use crate::HalResult;
use std::path::Path;

pub trait DeviceOps {
    /// Whether a node (or symlink to one) exists at `path`.
    fn device_exists(&self, path: &Path) -> bool;

    /// Create `link` pointing at `target`.
    fn create_symlink(&self, target: &Path, link: &Path) -> HalResult<()>;

    /// Remove `link` if it is a symlink. Regular nodes are left alone.
    fn remove_symlink(&self, link: &Path) -> HalResult<()>;

    /// Sorted entry names of `dir`, for diagnostics.
    fn list_dir(&self, dir: &Path) -> HalResult<Vec<String>>;
}
