//! Per-process namespaces
//!
//! A namespace is an ordered list of prefix bindings applied to every path
//! before it reaches the VFS. `bind(source, target)` makes `target` show
//! `source`'s contents: the binding rewrites a leading `target` into
//! `source`. The first matching binding wins; unmatched paths pass through
//! untouched. Namespaces are inherited on fork and preserved across exec.

use alloc::vec::Vec;

use crate::types::{KernelError, PathBuf};

/// Longest bindable prefix.
pub const MAX_PREFIX: usize = 128;

type Prefix = heapless::String<MAX_PREFIX>;

/// How a binding combines with what was already visible at the target
///
/// Only `Replace` is implemented; `Before`/`After` union ordering is kept at
/// the type level for the wire but rejected by [`Namespace::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    Replace = 0,
    Before = 1,
    After = 2,
}

/// One `(new_prefix -> old_prefix)` rewrite rule
#[derive(Debug, Clone)]
pub struct Binding {
    new_prefix: Prefix,
    old_prefix: Prefix,
    mode: BindMode,
}

impl Binding {
    pub fn new_prefix(&self) -> &str {
        &self.new_prefix
    }

    pub fn old_prefix(&self) -> &str {
        &self.old_prefix
    }

    pub fn mode(&self) -> BindMode {
        self.mode
    }
}

/// Ordered binding list for one process
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    bindings: Vec<Binding>,
}

impl Namespace {
    pub const fn new() -> Self {
        Namespace {
            bindings: Vec::new(),
        }
    }

    /// Install a binding making `new_prefix` show `old_prefix`'s contents.
    ///
    /// Newer bindings shadow older ones for the same prefix, so insertion
    /// is at the front of the list.
    pub fn bind(
        &mut self,
        new_prefix: &str,
        old_prefix: &str,
        mode: BindMode,
    ) -> Result<(), KernelError> {
        if new_prefix.is_empty() || old_prefix.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        if mode != BindMode::Replace {
            return Err(KernelError::Unsupported);
        }

        let mut binding = Binding {
            new_prefix: Prefix::new(),
            old_prefix: Prefix::new(),
            mode,
        };
        binding
            .new_prefix
            .push_str(new_prefix)
            .map_err(|_| KernelError::InvalidArgument)?;
        binding
            .old_prefix
            .push_str(old_prefix)
            .map_err(|_| KernelError::InvalidArgument)?;

        self.bindings.insert(0, binding);
        Ok(())
    }

    /// Remove every binding whose `new_prefix` equals `prefix`.
    ///
    /// Returns the number removed.
    pub fn unbind(&mut self, prefix: &str) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|b| b.new_prefix.as_str() != prefix);
        before - self.bindings.len()
    }

    /// Rewrite `path` through the first matching binding.
    ///
    /// The matched prefix is replaced by `old_prefix` with exactly one `/`
    /// preserved at the join. No binding matching returns the path
    /// unchanged.
    pub fn resolve(&self, path: &str) -> PathBuf {
        for binding in &self.bindings {
            let prefix = binding.new_prefix.as_str();
            if !prefix_matches(prefix, path) {
                continue;
            }

            let mut resolved = PathBuf::new();
            let old = binding.old_prefix.as_str();
            let tail = &path[prefix.len()..];
            // Exactly one separator at the join: the tail is either empty
            // or starts with '/', so strip any trailing '/' from the head.
            let _ = resolved.push_str(old.trim_end_matches('/'));
            if tail.is_empty() {
                if resolved.is_empty() {
                    let _ = resolved.push('/');
                }
            } else {
                let _ = resolved.push_str(tail);
            }
            return resolved;
        }

        let mut out = PathBuf::new();
        let _ = out.push_str(path);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}

/// Prefix match on whole path segments, so `/tmp` does not claim `/tmpfoo`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    if !path.starts_with(prefix) {
        return false;
    }
    path.len() == prefix.len() || path.as_bytes()[prefix.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_binding_rewrites_prefix() {
        let mut ns = Namespace::new();
        ns.bind("/private", "/tmp", BindMode::Replace).unwrap();

        assert_eq!(ns.resolve("/private/a.txt").as_str(), "/tmp/a.txt");
        assert_eq!(ns.resolve("/private").as_str(), "/tmp");
    }

    #[test]
    fn unmatched_path_is_identity() {
        let mut ns = Namespace::new();
        ns.bind("/private", "/tmp", BindMode::Replace).unwrap();

        assert_eq!(ns.resolve("/usr/data").as_str(), "/usr/data");
        assert_eq!(Namespace::new().resolve("/x").as_str(), "/x");
    }

    #[test]
    fn match_is_segment_aware() {
        let mut ns = Namespace::new();
        ns.bind("/private", "/tmp", BindMode::Replace).unwrap();

        assert_eq!(ns.resolve("/privateer").as_str(), "/privateer");
    }

    #[test]
    fn join_has_exactly_one_separator() {
        let mut ns = Namespace::new();
        ns.bind("/mnt", "/", BindMode::Replace).unwrap();
        assert_eq!(ns.resolve("/mnt/a").as_str(), "/a");

        let mut ns = Namespace::new();
        ns.bind("/a", "/b/", BindMode::Replace).unwrap();
        assert_eq!(ns.resolve("/a/c").as_str(), "/b/c");
    }

    #[test]
    fn newest_binding_wins() {
        let mut ns = Namespace::new();
        ns.bind("/p", "/first", BindMode::Replace).unwrap();
        ns.bind("/p", "/second", BindMode::Replace).unwrap();

        assert_eq!(ns.resolve("/p/x").as_str(), "/second/x");
    }

    #[test]
    fn unbind_removes_all_matching_prefixes() {
        let mut ns = Namespace::new();
        ns.bind("/p", "/first", BindMode::Replace).unwrap();
        ns.bind("/p", "/second", BindMode::Replace).unwrap();
        ns.bind("/q", "/other", BindMode::Replace).unwrap();

        assert_eq!(ns.unbind("/p"), 2);
        assert_eq!(ns.len(), 1);
        assert_eq!(ns.resolve("/p/x").as_str(), "/p/x");
        assert_eq!(ns.unbind("/p"), 0);
    }

    #[test]
    fn empty_prefixes_are_rejected() {
        let mut ns = Namespace::new();
        assert_eq!(
            ns.bind("", "/tmp", BindMode::Replace),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            ns.bind("/p", "", BindMode::Replace),
            Err(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn union_modes_are_unsupported() {
        let mut ns = Namespace::new();
        assert_eq!(
            ns.bind("/p", "/q", BindMode::Before),
            Err(KernelError::Unsupported)
        );
        assert_eq!(
            ns.bind("/p", "/q", BindMode::After),
            Err(KernelError::Unsupported)
        );
    }

    #[test]
    fn clone_is_a_deep_copy() {
        let mut ns = Namespace::new();
        ns.bind("/p", "/tmp", BindMode::Replace).unwrap();
        let mut child = ns.clone();
        child.unbind("/p");

        assert_eq!(ns.len(), 1);
        assert!(child.is_empty());
    }
}
