//! Asset path resolution.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

/// Finds `relative` under the current directory or one of its first
/// `max_levels` ancestors.
///
/// Absolute paths are returned unchanged when they exist.
pub fn locate(relative: impl AsRef<Path>, max_levels: usize) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    locate_from(&cwd, relative.as_ref(), max_levels)
}

fn locate_from(start: &Path, relative: &Path, max_levels: usize) -> Result<PathBuf> {
    if relative.is_absolute() {
        if relative.exists() {
            return Ok(relative.to_path_buf());
        }
        bail!("asset not found: {}", relative.display());
    }

    for dir in start.ancestors().take(max_levels + 1) {
        let candidate = dir.join(relative);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    bail!(
        "asset not found: {} (searched {} and {} parent directories)",
        relative.display(),
        start.display(),
        max_levels
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("prism-assets-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("a/b/c")).unwrap();
        std::fs::create_dir_all(dir.join("assets/shaders")).unwrap();
        dir
    }

    #[test]
    fn finds_asset_in_ancestor() {
        let root = scratch("ancestor");
        let found = locate_from(&root.join("a/b/c"), Path::new("assets/shaders"), 3).unwrap();
        assert_eq!(found, root.join("assets/shaders"));
    }

    #[test]
    fn respects_level_limit() {
        let root = scratch("limit");
        assert!(locate_from(&root.join("a/b/c"), Path::new("assets/shaders"), 2).is_err());
    }

    #[test]
    fn absolute_paths_pass_through() {
        let root = scratch("absolute");
        let abs = root.join("assets");
        assert_eq!(locate_from(Path::new("/"), &abs, 0).unwrap(), abs);
        assert!(locate_from(Path::new("/"), &root.join("missing"), 0).is_err());
    }
}
