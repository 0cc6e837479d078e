//! Best-effort git metadata detection for schema/IDL sources.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Repository metadata attached to GraphQL/Thrift service records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    /// Repository root directory.
    pub root: String,
    /// Checked-out branch, or `HEAD` when detached.
    pub branch: String,
    /// Commit sha the branch points at.
    pub head: String,
}

/// Walk up from `start` looking for a `.git` directory and read `HEAD`.
///
/// Returns `None` when the path is not inside a repository or the metadata
/// cannot be read; callers treat absence as "not versioned", never an error.
pub fn detect_git(start: &Path) -> Option<GitInfo> {
    let mut dir = if start.is_dir() {
        start
    } else {
        start.parent()?
    };
    loop {
        let git_dir = dir.join(".git");
        if git_dir.is_dir() {
            return read_head(dir, &git_dir);
        }
        dir = dir.parent()?;
    }
}

fn read_head(root: &Path, git_dir: &Path) -> Option<GitInfo> {
    let head = fs::read_to_string(git_dir.join("HEAD")).ok()?;
    let head = head.trim();
    let (branch, sha) = match head.strip_prefix("ref: ") {
        Some(reference) => {
            let branch = reference
                .strip_prefix("refs/heads/")
                .unwrap_or(reference)
                .to_string();
            let sha = fs::read_to_string(git_dir.join(reference))
                .ok()
                .map(|s| s.trim().to_string())
                .or_else(|| packed_ref(git_dir, reference))?;
            (branch, sha)
        }
        // Detached HEAD stores the sha directly.
        None => ("HEAD".to_string(), head.to_string()),
    };
    Some(GitInfo {
        root: root.to_string_lossy().into_owned(),
        branch,
        head: sha,
    })
}

fn packed_ref(git_dir: &Path, reference: &str) -> Option<String> {
    let packed = fs::read_to_string(git_dir.join("packed-refs")).ok()?;
    packed.lines().find_map(|line| {
        let (sha, name) = line.split_once(' ')?;
        (name == reference).then(|| sha.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_detect_git_reads_branch_and_head() {
        let dir = tempfile::tempdir().unwrap();
        let git = dir.path().join(".git");
        fs::create_dir_all(git.join("refs/heads")).unwrap();
        fs::write(git.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(git.join("refs/heads/main"), "abc123\n").unwrap();
        let nested = dir.path().join("idl");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("svc.thrift"), "").unwrap();

        let info = detect_git(&nested.join("svc.thrift")).unwrap();
        assert_eq!(info.branch, "main");
        assert_eq!(info.head, "abc123");
        assert_eq!(info.root, dir.path().to_string_lossy());
    }

    #[test]
    fn test_detect_git_outside_repository() {
        let dir = tempfile::tempdir().unwrap();
        assert!(detect_git(dir.path()).is_none());
    }
}
