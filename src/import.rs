// ==============================================================================
// Include Resolution
// ==============================================================================
//
// `include "other.fbs";` is resolved first relative to the directory of the
// including file, then against each configured include directory in order.
// Every file parsed in a session is remembered by canonical path, so a file
// included twice (directly, through a diamond, or through a cycle) is only
// parsed once.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Search paths and the set of files already parsed in one session.
#[derive(Debug, Default)]
pub struct IncludeContext {
    /// Files already parsed (canonical paths).
    parsed: HashSet<PathBuf>,
    /// Directories searched after the including file's own directory.
    include_dirs: Vec<PathBuf>,
}

impl IncludeContext {
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        IncludeContext {
            parsed: HashSet::new(),
            include_dirs,
        }
    }

    /// Resolve an include path. Returns the canonical path on success and a
    /// message describing where the file was looked for on failure.
    pub fn resolve(&self, include: &str, current_dir: &Path) -> Result<PathBuf, String> {
        let candidates = std::iter::once(current_dir).chain(self.include_dirs.iter().map(PathBuf::as_path));
        for dir in candidates {
            let candidate = dir.join(include);
            if candidate.is_file() {
                return candidate
                    .canonicalize()
                    .map_err(|e| format!("unable to resolve include {include}: {e}"));
            }
        }
        Err(format!(
            "unable to locate include file: {include} (searched {} and {} include dir(s))",
            current_dir.display(),
            self.include_dirs.len()
        ))
    }

    /// Mark `path` as parsed. Returns `true` if it had been parsed already and
    /// should be skipped.
    pub fn mark_parsed(&mut self, path: &Path) -> bool {
        !self.parsed.insert(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn resolves_relative_to_current_dir_first() {
        let dir = tempfile::tempdir().unwrap();
        let extra = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("common.fbs"), "").unwrap();
        fs::write(extra.path().join("common.fbs"), "").unwrap();

        let ctx = IncludeContext::new(vec![extra.path().to_path_buf()]);
        let resolved = ctx.resolve("common.fbs", dir.path()).unwrap();
        assert_eq!(resolved, dir.path().join("common.fbs").canonicalize().unwrap());
    }

    #[test]
    fn falls_back_to_include_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let extra = tempfile::tempdir().unwrap();
        fs::create_dir(extra.path().join("shared")).unwrap();
        fs::write(extra.path().join("shared/vec.fbs"), "").unwrap();

        let ctx = IncludeContext::new(vec![extra.path().to_path_buf()]);
        let resolved = ctx.resolve("shared/vec.fbs", dir.path()).unwrap();
        assert!(resolved.ends_with("shared/vec.fbs"));
    }

    #[test]
    fn missing_include_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = IncludeContext::new(Vec::new());
        let err = ctx.resolve("nope.fbs", dir.path()).unwrap_err();
        assert!(err.starts_with("unable to locate include file: nope.fbs"), "{err}");
    }

    #[test]
    fn files_are_parsed_once() {
        let mut ctx = IncludeContext::default();
        let path = Path::new("/schemas/a.fbs");
        assert!(!ctx.mark_parsed(path));
        assert!(ctx.mark_parsed(path));
        assert!(!ctx.mark_parsed(Path::new("/schemas/b.fbs")));
    }
}
