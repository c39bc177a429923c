//! Path Walking Algorithm
//!
//! Converts `/`-separated path strings into nodes, one `find_dir` per
//! component. Symbolic links are expanded in place: the link's target is
//! spliced onto the pending component stack and resolved relative to the
//! directory containing the link, so the walk stays iterative and one counter
//! bounds every link followed during a resolution.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use super::core::NodeRef;
use crate::fs::{
    FileSystemError, FileSystemErrorKind, MAXIMUM_SYMLINK_AMOUNT, NAME_MAX, PATH_MAX, Result,
};

/// Path walking context for resolving paths to nodes
pub struct PathWalkContext {
    /// Node absolute paths start from
    root: NodeRef,
}

impl PathWalkContext {
    /// Create a new path walking context with the given root
    pub fn new(root: NodeRef) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    /// Resolve `path` to a node
    ///
    /// Relative paths start at `working_dir`, or at the root when none is
    /// given. Symlinks met before the last component are always followed; a
    /// symlink in the last component is followed only if `follow_symlinks` is
    /// set.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - empty path
    /// * `NameTooLong` - path longer than `PATH_MAX` or a component longer than `NAME_MAX`
    /// * `NotFound` - a component does not exist
    /// * `NotADirectory` - a non-final component is not a directory
    /// * `TooManySymlinks` - more than `MAXIMUM_SYMLINK_AMOUNT` links followed
    pub fn resolve(
        &self,
        path: &str,
        working_dir: Option<&NodeRef>,
        follow_symlinks: bool,
    ) -> Result<NodeRef> {
        validate_path(path)?;
        let start = self.start_node(path, working_dir);
        let mut links_followed = 0;
        self.walk(start, split_components(path), follow_symlinks, &mut links_followed)
    }

    /// Resolve `path` against a working directory given as a path
    pub fn resolve_in(&self, path: &str, working_dir: &str, follow_symlinks: bool) -> Result<NodeRef> {
        if path.starts_with('/') {
            return self.resolve(path, None, follow_symlinks);
        }
        let working_dir = self.resolve(working_dir, None, true)?;
        self.resolve(path, Some(&working_dir), follow_symlinks)
    }

    /// Resolve everything but the last component of `path`
    ///
    /// Returns the containing directory and the bare name of the last
    /// component. Trailing slashes are ignored.
    pub fn resolve_parent(
        &self,
        path: &str,
        working_dir: Option<&NodeRef>,
    ) -> Result<(NodeRef, String)> {
        validate_path(path)?;
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::InvalidArgument,
                "Path has no final component",
            ));
        }

        let (directory, name) = match trimmed.rfind('/') {
            Some(index) => (&trimmed[..index], &trimmed[index + 1..]),
            None => ("", trimmed),
        };

        let parent = if directory.is_empty() {
            self.start_node(trimmed, working_dir)
        } else {
            self.resolve(directory, working_dir, true)?
        };

        if !parent.is_directory() {
            return Err(FileSystemError::new(
                FileSystemErrorKind::NotADirectory,
                "Not a directory",
            ));
        }
        Ok((parent, name.to_string()))
    }

    /// Resolve the target of `link`, which lives in `containing_dir`
    ///
    /// The link itself counts towards the symlink limit.
    pub fn follow_link(&self, link: &NodeRef, containing_dir: &NodeRef) -> Result<NodeRef> {
        let mut links_followed = 1;
        let target = read_link_target(link)?;
        let start = self.start_node(&target, Some(containing_dir));
        self.walk(start, split_components(&target), true, &mut links_followed)
    }

    fn start_node(&self, path: &str, working_dir: Option<&NodeRef>) -> NodeRef {
        match working_dir {
            Some(working_dir) if !path.starts_with('/') => working_dir.clone(),
            _ => self.root.clone(),
        }
    }

    /// Walk `components` (stored last-first) starting at `current`
    fn walk(
        &self,
        mut current: NodeRef,
        mut pending: Vec<String>,
        follow_last: bool,
        links_followed: &mut usize,
    ) -> Result<NodeRef> {
        while let Some(component) = pending.pop() {
            if !current.is_directory() {
                return Err(FileSystemError::new(
                    FileSystemErrorKind::NotADirectory,
                    "Not a directory",
                ));
            }

            let next = current.find_dir(&component)?;
            let is_last = pending.is_empty();
            if next.is_symlink() && (!is_last || follow_last) {
                *links_followed += 1;
                if *links_followed > MAXIMUM_SYMLINK_AMOUNT {
                    return Err(FileSystemError::new(
                        FileSystemErrorKind::TooManySymlinks,
                        "Too many levels of symbolic links",
                    ));
                }

                let target = read_link_target(&next)?;
                if target.starts_with('/') {
                    current = self.root.clone();
                }
                pending.extend(split_components(&target));
                continue;
            }

            current = next;
        }

        Ok(current)
    }
}

fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(FileSystemError::new(
            FileSystemErrorKind::InvalidArgument,
            "Empty path",
        ));
    }
    if path.len() > PATH_MAX || path.split('/').any(|component| component.len() > NAME_MAX) {
        return Err(FileSystemError::new(
            FileSystemErrorKind::NameTooLong,
            "Path too long",
        ));
    }
    Ok(())
}

/// Non-empty components of `path`, last component first
fn split_components(path: &str) -> Vec<String> {
    path.split('/')
        .rev()
        .filter(|component| !component.is_empty())
        .map(String::from)
        .collect()
}

/// Read the full target of a symlink node
fn read_link_target(link: &NodeRef) -> Result<String> {
    let mut buffer = vec![0u8; PATH_MAX];
    let length = link.read_link(&mut buffer)?;
    buffer.truncate(length);
    let target = String::from_utf8(buffer).map_err(|_| {
        FileSystemError::new(FileSystemErrorKind::InvalidArgument, "Symlink target is not UTF-8")
    })?;
    if target.is_empty() {
        return Err(FileSystemError::new(
            FileSystemErrorKind::NotFound,
            "Empty symlink target",
        ));
    }
    Ok(target)
}

/// Lexically normalize `path` into an absolute path
///
/// Relative paths are taken relative to `working_dir` (or `/`). Empty and `.`
/// components are dropped, and `..` removes the component before it or is
/// dropped at the start. No node is consulted, so `..` after a symlink is not
/// the link target's parent.
pub fn canonicalize_path(path: &str, working_dir: Option<&str>) -> String {
    let joined;
    let path = match working_dir {
        Some(working_dir) if !path.starts_with('/') => {
            joined = format!("{}/{}", working_dir, path);
            joined.as_str()
        }
        _ => path,
    };

    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                components.pop();
            }
            name => components.push(name),
        }
    }

    if components.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", components.join("/"))
    }
}

/// Last component of `path`, ignoring trailing slashes
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(index) => &trimmed[index + 1..],
        None => trimmed,
    }
}
