//! Cleanup executor — best-effort, non-throwing path removal.
//!
//! This is the only place in the core that deletes anything. Removal runs
//! inside failure-handling paths, so errors here are logged and reported as
//! `false`, never propagated — a secondary error must not mask the primary
//! one.

use std::path::Path;

use tracing::{debug, info, warn};

/// Remove a file or directory tree. Returns true when the path no longer
/// exists afterwards (a missing path counts as already clean).
pub fn remove_path(path: &Path) -> bool {
    if path.as_os_str().is_empty() || !path.exists() {
        debug!(path = %path.display(), "nothing to clean");
        return true;
    }

    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Ok(()) => {
            info!(path = %path.display(), "cleaned up");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), err = %e, "cleanup failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_reports_success_twice() {
        let dir = tempfile::tempdir().unwrap();
        let ghost = dir.path().join("never-created.bin");
        assert!(remove_path(&ghost));
        assert!(remove_path(&ghost));
    }

    #[test]
    fn removes_a_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.pdf");
        std::fs::write(&file, b"partial").unwrap();
        assert!(remove_path(&file));
        assert!(!file.exists());
    }

    #[test]
    fn removes_a_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("pages");
        std::fs::create_dir_all(out.join("nested")).unwrap();
        std::fs::write(out.join("nested/p1.png"), b"x").unwrap();
        assert!(remove_path(&out));
        assert!(!out.exists());
    }

    #[test]
    fn empty_path_is_a_no_op_success() {
        assert!(remove_path(Path::new("")));
    }
}
