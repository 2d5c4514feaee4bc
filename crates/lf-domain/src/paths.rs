//! Path validation for externally-supplied names.
//!
//! Every boundary that accepts a user-controlled name (dataset names,
//! uploaded filenames, model lookups for deletion) goes through
//! [`safe_join`].  Containment is decided on normalized path components,
//! never by string-prefix comparison.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Characters never allowed in a user-supplied path component: Windows
/// separators, drive/identifier colons, and glob metacharacters.
const FORBIDDEN_CHARS: &[char] = &['\\', ':', '*', '?', '[', ']', '{', '}'];

/// Join `component` onto `base`, rejecting anything that could escape it.
///
/// Rejected: empty strings, absolute paths, `.`/`..` segments, forbidden
/// characters (see [`FORBIDDEN_CHARS`]), and NUL bytes.  On success the
/// returned path is verified to be a strict descendant of `base` by
/// comparing normalized components.
pub fn safe_join(base: &Path, component: &str) -> Result<PathBuf> {
    if component.is_empty() {
        return Err(Error::InvalidPath("empty path component".into()));
    }
    if component.contains('\0') {
        return Err(Error::InvalidPath("NUL byte in path component".into()));
    }
    if let Some(c) = component.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(Error::InvalidPath(format!(
            "forbidden character {c:?} in {component:?}"
        )));
    }

    let rel = Path::new(component);
    if rel.is_absolute() {
        return Err(Error::InvalidPath(format!(
            "absolute path not allowed: {component:?}"
        )));
    }
    for part in rel.components() {
        match part {
            Component::Normal(_) => {}
            _ => {
                return Err(Error::InvalidPath(format!(
                    "path traversal segment in {component:?}"
                )));
            }
        }
    }

    let joined = base.join(rel);
    if !is_within(base, &joined) {
        return Err(Error::InvalidPath(format!(
            "{component:?} escapes its base directory"
        )));
    }
    Ok(joined)
}

/// True if `path` is `base` or a descendant of it, judged on normalized
/// components (`.` dropped, `..` resolved lexically).
pub fn is_within(base: &Path, path: &Path) -> bool {
    let base = normalize(base);
    let path = normalize(path);
    path.starts_with(&base)
}

/// Lexical normalization: drop `.` segments and resolve `..` against the
/// stack.  Does not touch the filesystem, so it also works for paths that
/// do not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for part in path.components() {
        match part {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Reduce an uploaded filename to its basename.  Folder uploads arrive with
/// embedded directories; only the final component is kept.
pub fn upload_basename(filename: &str) -> String {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> PathBuf {
        PathBuf::from("/data/projects/default/demo")
    }

    #[test]
    fn plain_name_joins() {
        let joined = safe_join(&base(), "report.pdf").unwrap();
        assert_eq!(joined, base().join("report.pdf"));
    }

    #[test]
    fn nested_name_joins() {
        let joined = safe_join(&base(), "sub/report.pdf").unwrap();
        assert_eq!(joined, base().join("sub/report.pdf"));
    }

    #[test]
    fn empty_rejected() {
        assert!(safe_join(&base(), "").is_err());
    }

    #[test]
    fn absolute_rejected() {
        assert!(safe_join(&base(), "/etc/passwd").is_err());
    }

    #[test]
    fn parent_traversal_rejected() {
        assert!(safe_join(&base(), "../other").is_err());
        assert!(safe_join(&base(), "a/../../b").is_err());
    }

    #[test]
    fn backslash_rejected() {
        assert!(safe_join(&base(), "a\\b").is_err());
    }

    #[test]
    fn colon_rejected() {
        assert!(safe_join(&base(), "C:evil").is_err());
    }

    #[test]
    fn glob_metacharacters_rejected() {
        for name in ["*", "a?", "a[0]", "{a,b}"] {
            assert!(safe_join(&base(), name).is_err(), "{name} should fail");
        }
    }

    #[test]
    fn error_kind_is_invalid_path() {
        let err = safe_join(&base(), "..").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidPath);
    }

    #[test]
    fn containment_is_component_wise() {
        // "/data/projects/default/demo-other" shares a string prefix with
        // the base but is not inside it.
        assert!(!is_within(&base(), Path::new("/data/projects/default/demo-other/x")));
        assert!(is_within(&base(), Path::new("/data/projects/default/demo/raw/x")));
    }

    #[test]
    fn normalize_resolves_dots() {
        assert!(is_within(
            &base(),
            Path::new("/data/projects/default/demo/a/./b")
        ));
        assert!(!is_within(
            &base(),
            Path::new("/data/projects/default/demo/../escape")
        ));
    }

    #[test]
    fn upload_basename_strips_directories() {
        assert_eq!(upload_basename("folder/sub/file.txt"), "file.txt");
        assert_eq!(upload_basename("win\\style\\file.txt"), "file.txt");
        assert_eq!(upload_basename("plain.txt"), "plain.txt");
    }
}
