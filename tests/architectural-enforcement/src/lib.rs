//! Architectural Enforcement
//!
//! Source scanners used by this package's integration tests to enforce
//! architectural rules on the orchestrator's production code:
//! - No sleep() calls: waiting is done on channels, tokens, and deadlines
//! - No unwrap()/expect(): errors are propagated or handled
//!
//! Test modules (`#[cfg(test)]` items) and comments are excluded.

use std::fs;
use std::path::{Path, PathBuf};

/// Root of the production sources under inspection
#[must_use]
pub fn production_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../orchestrator/core/src")
}

/// All `.rs` files below `root`
#[must_use]
pub fn rust_sources(root: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Lines of `content` that belong to production code
///
/// Returns `(line_number, code)` pairs with comments removed and every
/// `#[cfg(test)]` item skipped.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut skipping = false;
    let mut depth: i32 = 0;
    let mut opened = false;

    for (idx, line) in content.lines().enumerate() {
        let code = strip_comment(line);

        if !skipping && code.trim_start().starts_with("#[cfg(test)]") {
            skipping = true;
            depth = 0;
            opened = false;
            continue;
        }

        if skipping {
            for c in code.chars() {
                match c {
                    '{' => {
                        depth += 1;
                        opened = true;
                    }
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            // A braceless item (e.g. `use`) ends at its semicolon
            if (opened && depth <= 0) || (!opened && code.trim_end().ends_with(';')) {
                skipping = false;
            }
            continue;
        }

        if !code.trim().is_empty() {
            out.push((idx + 1, code.to_string()));
        }
    }

    out
}

/// `line` without its trailing `//` comment
///
/// A `//` inside a string or char literal (`"http://..."`) is code.
#[must_use]
pub fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b'\'' if !in_string => {
                // Char literal: 'x' or '\x'; anything else is a lifetime
                if bytes.get(i + 1) == Some(&b'\\') {
                    if let Some(len) = bytes[i + 2..].iter().position(|&b| b == b'\'') {
                        i += len + 2;
                    }
                } else if bytes.get(i + 2) == Some(&b'\'') {
                    i += 2;
                }
            }
            b'/' if !in_string && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
        i += 1;
    }

    line
}

/// Find production lines matching any of `patterns`
///
/// Each violation is reported as `path:line - code`.
#[must_use]
pub fn find_violations(root: &Path, patterns: &[&str]) -> Vec<String> {
    let mut violations = Vec::new();

    for path in rust_sources(root) {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for (line_number, code) in production_lines(&content) {
            if patterns.iter().any(|p| code.contains(p)) {
                violations.push(format!("{}:{} - {}", path.display(), line_number, code.trim()));
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_skip_test_module() {
        let source = r#"
fn real() -> u8 {
    compute().unwrap_or(0) // trailing .unwrap()
}

#[cfg(test)]
mod tests {
    fn helper() {
        thing().unwrap();
    }
}

fn after() {}
"#;
        let lines: Vec<String> = production_lines(source).into_iter().map(|(_, c)| c).collect();

        assert!(lines.iter().any(|l| l.contains("fn real")));
        assert!(lines.iter().any(|l| l.contains("fn after")));
        assert!(!lines.iter().any(|l| l.contains(".unwrap()")));
    }

    #[test]
    fn test_url_in_string_is_not_a_comment() {
        let line = r#"    let url = format!("http://{}:{}", host, port).parse().unwrap(); // note"#;
        assert_eq!(
            strip_comment(line),
            r#"    let url = format!("http://{}:{}", host, port).parse().unwrap(); "#
        );

        let lines = production_lines(line);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].1.contains(".unwrap()"));
    }

    #[test]
    fn test_strip_comment_literals() {
        assert_eq!(strip_comment("let s = \"a \\\" // b\"; // c"), "let s = \"a \\\" // b\"; ");
        assert_eq!(strip_comment("let q = '\"'; // c"), "let q = '\"'; ");
        assert_eq!(strip_comment("let q = '\\''; x // c"), "let q = '\\''; x ");
        assert_eq!(strip_comment("fn f<'a>(s: &'a str) // c"), "fn f<'a>(s: &'a str) ");
        assert_eq!(strip_comment("/// docs"), "");
    }

    #[test]
    fn test_cfg_test_use_statement() {
        let source = "#[cfg(test)]\nuse std::thread::sleep;\nfn f() { std::thread::sleep(d); }\n";
        let lines = production_lines(source);

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, 3);
    }

    #[test]
    fn test_production_root_exists() {
        assert!(production_root().join("lib.rs").exists());
    }
}
