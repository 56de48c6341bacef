use anyhow::Context;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SKIPPED_DIRS: &[&str] = &["node_modules"];

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String, // workspace-relative, '/'-separated
    pub name: String,
}

/// The folder the assistant is attached to. Selected-file paths are relative to it.
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves a selected-file path; absolute paths are returned unchanged.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    /// Lists every file under the root, honoring `.gitignore` and skipping `node_modules`.
    pub async fn list_files(&self) -> anyhow::Result<Vec<FileEntry>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || walk_files(&root))
            .await
            .context("Workspace listing task panicked")?
    }
}

fn walk_files(root: &Path) -> anyhow::Result<Vec<FileEntry>> {
    log::debug!("Listing workspace files under {}", root.display());
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        // Respect .gitignore even outside a git checkout
        .require_git(false)
        .filter_entry(|entry| {
            !entry
                .file_name()
                .to_str()
                .map(|name| SKIPPED_DIRS.contains(&name) || name == ".git")
                .unwrap_or(false)
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable workspace entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| relative.clone());

        files.push(FileEntry {
            path: relative,
            name,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    log::info!("Found {} workspace files", files.len());
    Ok(files)
}

/// Maps a file extension to the language tag used on fenced context blocks.
pub fn detect_language(path: &str) -> &'static str {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| match ext {
            "rs" => "rust",
            "py" => "python",
            "js" | "jsx" | "mjs" | "cjs" => "javascript",
            "ts" | "tsx" => "typescript",
            "go" => "go",
            "java" => "java",
            "c" => "c",
            "cpp" | "cc" | "cxx" | "h" | "hpp" => "cpp",
            "cs" => "csharp",
            "rb" => "ruby",
            "php" => "php",
            "swift" => "swift",
            "kt" => "kotlin",
            "scala" => "scala",
            "sql" => "sql",
            "sh" | "bash" | "zsh" => "shellscript",
            "yaml" | "yml" => "yaml",
            "toml" => "toml",
            "json" => "json",
            "xml" => "xml",
            "html" => "html",
            "css" => "css",
            "scss" => "scss",
            "md" => "markdown",
            _ => "plaintext",
        })
        .unwrap_or("plaintext")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_files_skips_node_modules_and_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/left-pad")).unwrap();
        fs::create_dir_all(root.join("target")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("README.md"), "# hi").unwrap();
        fs::write(root.join("node_modules/left-pad/index.js"), "").unwrap();
        fs::write(root.join("target/out.bin"), "").unwrap();
        fs::write(root.join(".gitignore"), "target/\n").unwrap();

        let files = Workspace::new(root).list_files().await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();

        assert_eq!(paths, vec![".gitignore", "README.md", "src/main.rs"]);
        let main = files.iter().find(|f| f.path == "src/main.rs").unwrap();
        assert_eq!(main.name, "main.rs");
    }

    #[test]
    fn test_resolve_keeps_absolute_paths() {
        let workspace = Workspace::new("/work");
        assert_eq!(workspace.resolve("src/lib.rs"), PathBuf::from("/work/src/lib.rs"));
        #[cfg(unix)]
        assert_eq!(workspace.resolve("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("src/lib.rs"), "rust");
        assert_eq!(detect_language("app.tsx"), "typescript");
        assert_eq!(detect_language("Makefile"), "plaintext");
    }
}
