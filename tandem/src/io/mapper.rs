//! Codebase mapper: a deterministic structural summary of a project tree.
//!
//! Produces a sorted listing of recognized source files annotated with
//! their top-level declarations, shallow enough to stay cheap and regular
//! enough to ground the planning agent. Parse failures degrade to a
//! placeholder marker instead of aborting the map.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

/// Directory names never descended into.
const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    ".git",
    ".brain",
    "__pycache__",
    "venv",
    ".venv",
    "dist",
    "build",
    ".pytest_cache",
    ".idea",
    ".vscode",
];

/// Extensions recognized as source files.
const SOURCE_EXTS: &[&str] = &["rs", "py", "js", "ts", "jsx", "tsx", "go"];

static RUST_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(fn|struct|enum|trait|const|static|mod)\s+([A-Za-z_]\w*)").unwrap()
});
static PYTHON_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:async\s+)?(def|class)\s+([A-Za-z_]\w*)").unwrap());
static JS_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:export\s+)?(?:default\s+)?(class|function|const)\s+([A-Za-z_$]\w*)").unwrap()
});
static GO_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(func|type|const|var)\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)").unwrap());

/// Generate the map as text: one line per source file (root-relative path),
/// followed by indented top-level declarations.
pub fn generate_map(root: &Path) -> Result<String> {
    let mut lines = Vec::new();
    walk(root, Path::new(""), &mut lines)
        .with_context(|| format!("map tree at {}", root.display()))?;
    debug!(root = %root.display(), lines = lines.len(), "codebase map generated");
    Ok(lines.join("\n"))
}

/// Generate the map and persist it to `.brain/repo_map.txt` for reuse by
/// later mission phases. Returns the path written.
pub fn save_map(root: &Path) -> Result<PathBuf> {
    let content = generate_map(root)?;
    let map_path = map_path(root);
    if let Some(parent) = map_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create map dir {}", parent.display()))?;
    }
    fs::write(&map_path, content).with_context(|| format!("write {}", map_path.display()))?;
    Ok(map_path)
}

/// Well-known location of the persisted map.
pub fn map_path(root: &Path) -> PathBuf {
    root.join(".brain").join("repo_map.txt")
}

fn walk(dir: &Path, rel: &Path, lines: &mut Vec<String>) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("read dir {}", dir.display()))?
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("list dir {}", dir.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let path = entry.path();
        if path.is_dir() {
            if IGNORED_DIRS.contains(&name.as_ref()) {
                continue;
            }
            walk(&path, &rel.join(name.as_ref()), lines)?;
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str())
            && SOURCE_EXTS.contains(&ext)
        {
            lines.push(rel.join(name.as_ref()).display().to_string());
            for symbol in parse_symbols(&path, ext) {
                lines.push(format!("  {symbol}"));
            }
        }
    }
    Ok(())
}

/// Shallow parse of a file's top-level declarations. A file that cannot be
/// read degrades to a placeholder rather than failing the map.
fn parse_symbols(path: &Path, ext: &str) -> Vec<String> {
    let Ok(contents) = fs::read_to_string(path) else {
        return vec!["(parse error)".to_string()];
    };
    let decl: &Regex = match ext {
        "rs" => &RUST_DECL,
        "py" => &PYTHON_DECL,
        "go" => &GO_DECL,
        _ => &JS_DECL,
    };
    contents
        .lines()
        .filter_map(|line| {
            decl.captures(line)
                .map(|caps| format!("{} {}", &caps[1], &caps[2]))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    #[test]
    fn map_lists_source_files_with_symbols() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "src/lib.rs", "pub fn run() {}\nstruct Inner;\n");
        write(root, "app.py", "class App:\n    pass\n\ndef main():\n    pass\n");
        write(root, "notes.txt", "not source\n");

        let map = generate_map(root).expect("map");
        assert!(map.contains("app.py"));
        assert!(map.contains("  class App"));
        assert!(map.contains("  def main"));
        assert!(map.contains("src/lib.rs"));
        assert!(map.contains("  fn run"));
        assert!(map.contains("  struct Inner"));
        assert!(!map.contains("notes.txt"));
    }

    #[test]
    fn map_skips_ignored_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "src/main.rs", "fn main() {}\n");
        write(root, "node_modules/pkg/index.js", "function hidden() {}\n");
        write(root, "target/debug/junk.rs", "fn hidden() {}\n");

        let map = generate_map(root).expect("map");
        assert!(map.contains("src/main.rs"));
        assert!(!map.contains("hidden"));
        assert!(!map.contains("node_modules"));
    }

    /// Nested declarations are not top-level and stay out of the map.
    #[test]
    fn indented_declarations_are_not_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(
            root,
            "svc.py",
            "class Service:\n    def handle(self):\n        pass\n",
        );

        let map = generate_map(root).expect("map");
        assert!(map.contains("  class Service"));
        assert!(!map.contains("def handle"));
    }

    #[test]
    fn unreadable_file_degrades_to_placeholder() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("bad.rs"), [0xff, 0xfe, 0x00, 0x9f]).expect("write binary");

        let map = generate_map(root).expect("map");
        assert!(map.contains("bad.rs"));
        assert!(map.contains("  (parse error)"));
    }

    #[test]
    fn map_output_is_deterministic() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "b.js", "const b = 1;\n");
        write(root, "a.ts", "export function a() {}\n");

        let first = generate_map(root).expect("map");
        let second = generate_map(root).expect("map");
        assert_eq!(first, second);
        let a_pos = first.find("a.ts").expect("a.ts listed");
        let b_pos = first.find("b.js").expect("b.js listed");
        assert!(a_pos < b_pos);
    }

    #[test]
    fn save_map_persists_to_well_known_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "main.go", "func main() {}\n");

        let path = save_map(root).expect("save");
        assert_eq!(path, root.join(".brain/repo_map.txt"));
        let persisted = fs::read_to_string(path).expect("read");
        assert!(persisted.contains("main.go"));
        assert!(persisted.contains("  func main"));
    }
}
