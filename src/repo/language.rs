use std::path::Path;

/// Language tag for unknown files; gets the comment-only generic parser.
pub const GENERIC: &str = "generic";

/// Extension to language tag. Language choice is by extension only, never by
/// content sniffing, so identical inputs always produce identical documents.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let tag = match ext {
        "rs" => "rust",
        "go" => "go",
        "py" | "pyi" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescript",
        "java" => "java",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "sh" | "bash" | "zsh" => "shell",
        "html" | "htm" => "html",
        "css" | "scss" | "less" => "css",
        "sql" => "sql",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "toml" => "toml",
        "md" | "markdown" => "markdown",
        "xml" => "xml",
        "proto" => "proto",
        "lua" => "lua",
        "r" => "r",
        "pl" | "pm" => "perl",
        "ex" | "exs" => "elixir",
        "zig" => "zig",
        _ => return None,
    };
    Some(tag)
}

/// Filenames that are indexable despite having no extension.
pub fn language_for_bare_filename(name: &str) -> Option<&'static str> {
    let tag = match name {
        "Dockerfile" | "Containerfile" => "dockerfile",
        "Makefile" | "GNUmakefile" => "makefile",
        "Rakefile" => "ruby",
        "Gemfile" => "ruby",
        "Justfile" | "justfile" => "makefile",
        "CMakeLists.txt" => "cmake",
        _ => return None,
    };
    Some(tag)
}

/// Language tag for a path: extension first, then the known bare filenames,
/// `generic` otherwise.
pub fn language_of(path: &Path) -> &'static str {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if let Some(tag) = language_for_extension(&ext.to_ascii_lowercase()) {
            return tag;
        }
    }
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if let Some(tag) = language_for_bare_filename(name) {
            return tag;
        }
    }
    GENERIC
}
