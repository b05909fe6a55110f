//! Archive inclusion policy.
//!
//! Decides, purely from a relative path, whether an archive entry is an
//! analyzable unit. Build output, dependency caches, version-control metadata
//! and editor state are excluded by directory segment; everything else must
//! carry a recognized source/config/doc/script extension (or none at all).

/// Directory segments that disqualify an entry wherever they appear in its
/// path, compared case-insensitively.
const EXCLUDED_DIR_SEGMENTS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    ".git",
    ".svn",
    ".hg",
    "vendor",
    "__pycache__",
    ".venv",
    ".idea",
    ".vscode",
    ".gradle",
    "bin",
    "obj",
    "coverage",
    ".next",
    ".cache",
];

/// Extensions (lower-cased, leading dot) accepted for analysis.
const ALLOWED_EXTENSIONS: &[&str] = &[
    ".rs", ".py", ".js", ".jsx", ".ts", ".tsx", ".go", ".java", ".kt", ".c", ".h", ".cc", ".cpp",
    ".hpp", ".cs", ".rb", ".php", ".swift", ".scala", ".ex", ".exs", ".sh", ".bash", ".zsh",
    ".ps1", ".sql", ".html", ".css", ".scss", ".vue", ".svelte", ".toml", ".yaml", ".yml", ".json",
    ".xml", ".ini", ".cfg", ".md", ".txt",
];

/// Whether an archive entry at `path` survives the inclusion policy.
///
/// Pure function of the path string; repeated evaluation of the same path is
/// always identical.
pub fn should_include(path: &str) -> bool {
    let lowered = path.to_lowercase();

    for segment in lowered.split(['/', '\\']) {
        if EXCLUDED_DIR_SEGMENTS.contains(&segment) {
            return false;
        }
    }

    match extension_of(&lowered) {
        Some(ext) => ALLOWED_EXTENSIONS.contains(&ext),
        None => true,
    }
}

/// Lower-cased extension of the final path component, including the leading
/// dot. `None` when the component has no dot at all; a leading-dot file name
/// such as `.gitignore` is treated as being all extension.
fn extension_of(lowered_path: &str) -> Option<&str> {
    let file_name = lowered_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(lowered_path);
    file_name.rfind('.').map(|idx| &file_name[idx..])
}
