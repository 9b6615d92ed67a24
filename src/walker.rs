use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

/// A discovered document file.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the documents directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

/// Supported file extensions for document discovery.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["pdf", "docx", "doc", "txt", "md", "xlsx", "pptx"];

fn supported_matcher() -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for ext in SUPPORTED_EXTENSIONS {
        let glob = GlobBuilder::new(&format!("*.{ext}"))
            .case_insensitive(true)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::Config(format!("invalid glob: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid glob set: {e}")))
}

/// Find every loadable document under `root`.
///
/// Only direct children are considered unless `recursive` is set. Hidden
/// files and directories (names starting with `.`) are skipped.
pub fn discover_files(
    root: &Path,
    recursive: bool,
) -> Result<Vec<DiscoveredFile>> {
    if !root.exists() {
        return Err(Error::Config(format!(
            "directory does not exist: {}",
            root.display()
        )));
    }
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "path is not a directory: {}",
            root.display()
        )));
    }

    let matcher = supported_matcher()?;
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(
        &canonical_root,
        &canonical_root,
        recursive,
        &matcher,
        &mut results,
    )?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    tracing::debug!(
        root = %canonical_root.display(),
        count = results.len(),
        "discovered documents"
    );
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    recursive: bool,
    matcher: &GlobSet,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_dir() {
            if recursive {
                walk_dir(root, &path, recursive, matcher, results)?;
            }
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue; // broken symlink
            };
            // Directory links are never followed, which rules out cycles.
            if resolved.is_file() && matcher.is_match(&file_name) {
                results.push(discovered(root, &path, resolved));
            }
        } else if file_type.is_file() && matcher.is_match(&file_name) {
            let abs = path.canonicalize()?;
            results.push(discovered(root, &path, abs));
        }
    }

    Ok(())
}

fn discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: PathBuf,
) -> DiscoveredFile {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    DiscoveredFile {
        relative_path,
        absolute_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn discovers_supported_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        for name in [
            "a.pdf", "b.docx", "c.doc", "d.txt", "e.xlsx", "f.pptx", "g.md",
            "image.png", "script.py",
        ] {
            std::fs::write(tmp.path().join(name), "x").unwrap();
        }

        let files = discover_files(tmp.path(), false).unwrap();
        assert_eq!(
            names(&files),
            vec![
                "a.pdf", "b.docx", "c.doc", "d.txt", "e.xlsx", "f.pptx",
                "g.md"
            ]
        );
    }

    #[test]
    fn extension_match_ignores_case() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("REPORT.PDF"), "x").unwrap();

        let files = discover_files(tmp.path(), false).unwrap();
        assert_eq!(names(&files), vec!["REPORT.PDF"]);
    }

    #[test]
    fn skips_hidden_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(".hidden.txt"), "secret").unwrap();
        std::fs::write(tmp.path().join("visible.txt"), "hello").unwrap();

        let files = discover_files(tmp.path(), false).unwrap();
        assert_eq!(names(&files), vec!["visible.txt"]);
    }

    #[test]
    fn flat_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("subdir");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.txt"), "deep").unwrap();
        std::fs::write(tmp.path().join("top.txt"), "top").unwrap();

        let files = discover_files(tmp.path(), false).unwrap();
        assert_eq!(names(&files), vec!["top.txt"]);
    }

    #[test]
    fn recursive_walks_subdirectories_but_not_hidden_ones() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("subdir");
        let hidden = tmp.path().join(".git");
        std::fs::create_dir(&sub).unwrap();
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(sub.join("deep.txt"), "deep").unwrap();
        std::fs::write(hidden.join("config.txt"), "git").unwrap();
        std::fs::write(tmp.path().join("top.txt"), "top").unwrap();

        let files = discover_files(tmp.path(), true).unwrap();
        assert_eq!(names(&files), vec!["subdir/deep.txt", "top.txt"]);
    }

    #[test]
    fn results_are_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("z.txt"), "z").unwrap();
        std::fs::write(tmp.path().join("a.pdf"), "a").unwrap();
        std::fs::write(tmp.path().join("m.docx"), "m").unwrap();

        let files = discover_files(tmp.path(), false).unwrap();
        assert_eq!(names(&files), vec!["a.pdf", "m.docx", "z.txt"]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = discover_files(&tmp.path().join("nope"), false).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn file_instead_of_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.txt");
        std::fs::write(&file, "a").unwrap();
        assert!(matches!(
            discover_files(&file, false),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_files(tmp.path(), false).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn skips_broken_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("real.txt"), "real").unwrap();
        std::os::unix::fs::symlink(
            tmp.path().join("gone.txt"),
            tmp.path().join("dangling.txt"),
        )
        .unwrap();

        let files = discover_files(tmp.path(), false).unwrap();
        assert_eq!(names(&files), vec!["real.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn file_symlinks_resolve_to_their_target() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("target.md");
        std::fs::write(&target, "# title").unwrap();
        std::os::unix::fs::symlink(&target, tmp.path().join("alias.md"))
            .unwrap();

        let files = discover_files(tmp.path(), false).unwrap();
        assert_eq!(names(&files), vec!["alias.md", "target.md"]);
        assert_eq!(files[0].absolute_path, target.canonicalize().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn directory_symlinks_are_not_followed() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.txt"), "deep").unwrap();
        std::fs::write(tmp.path().join("top.txt"), "top").unwrap();
        std::os::unix::fs::symlink(tmp.path(), sub.join("loop")).unwrap();
        std::os::unix::fs::symlink(&sub, tmp.path().join("sub-link.txt"))
            .unwrap();

        let files = discover_files(tmp.path(), true).unwrap();
        assert_eq!(names(&files), vec!["sub/deep.txt", "top.txt"]);
    }
}
