//! Glob patterns for spec discovery
//!
//! Supports `**` (any number of directories), `*` and `?` within one path
//! segment, and `{a,b}` alternation. Patterns are compiled to a [`Regex`]
//! matched against `/`-separated paths relative to the project root.

use regex::Regex;
use std::path::{Path, PathBuf};

use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone)]
pub struct SpecPattern {
    regex: Regex,
}

impl SpecPattern {
    pub fn new(pattern: &str) -> E2eResult<Self> {
        let translated = translate(pattern).map_err(|reason| E2eError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        })?;
        let regex = Regex::new(&translated).map_err(|e| E2eError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { regex })
    }

    /// Match a path relative to the discovery root
    pub fn matches(&self, relative: &Path) -> bool {
        let normalized = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        self.regex.is_match(&normalized)
    }

    /// Walk `root` and return every matching file in lexical path order
    pub fn discover(&self, root: &Path) -> E2eResult<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in walkdir::WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if self.matches(relative) {
                found.push(path.to_path_buf());
            }
        }
        found.sort();
        Ok(found)
    }
}

fn translate(pattern: &str) -> Result<String, String> {
    let pattern = pattern.trim_start_matches("./");
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut in_group = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                // `**/` spans zero or more directories, a trailing `**` spans everything
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:[^/]+/)*");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '{' => {
                if in_group {
                    return Err("nested '{' is not supported".to_string());
                }
                in_group = true;
                out.push_str("(?:");
            }
            '}' => {
                if !in_group {
                    return Err("unbalanced '}'".to_string());
                }
                in_group = false;
                out.push(')');
            }
            ',' if in_group => out.push('|'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    if in_group {
        return Err("unclosed '{'".to_string());
    }
    out.push('$');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_star_matches_nested_and_flat() {
        let pattern = SpecPattern::new("specs/**/*.spec.{yaml,yml}").unwrap();
        assert!(pattern.matches(Path::new("specs/counter/basic.spec.yaml")));
        assert!(pattern.matches(Path::new("specs/basic.spec.yml")));
        assert!(pattern.matches(Path::new("specs/a/b/c/deep.spec.yaml")));
        assert!(!pattern.matches(Path::new("specs/support.yaml")));
        assert!(!pattern.matches(Path::new("other/basic.spec.yaml")));
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let pattern = SpecPattern::new("specs/*.yaml").unwrap();
        assert!(pattern.matches(Path::new("specs/a.yaml")));
        assert!(!pattern.matches(Path::new("specs/nested/a.yaml")));
    }

    #[test]
    fn test_dots_are_literal() {
        let pattern = SpecPattern::new("a.spec.yaml").unwrap();
        assert!(!pattern.matches(Path::new("aXspecXyaml")));
    }

    #[test]
    fn test_unbalanced_braces_rejected() {
        assert!(matches!(
            SpecPattern::new("specs/{a,b"),
            Err(E2eError::InvalidPattern { .. })
        ));
        assert!(SpecPattern::new("specs/a}").is_err());
    }

    #[test]
    fn test_discover_is_lexically_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let specs = dir.path().join("specs");
        std::fs::create_dir_all(specs.join("b")).unwrap();
        std::fs::create_dir_all(specs.join("a")).unwrap();
        for name in ["b/z.spec.yaml", "a/y.spec.yaml", "a/x.spec.yml", "a/notes.txt"] {
            std::fs::write(specs.join(name), "children: []").unwrap();
        }
        let pattern = SpecPattern::new("specs/**/*.spec.{yaml,yml}").unwrap();
        let found: Vec<_> = pattern
            .discover(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            found,
            vec![
                PathBuf::from("specs/a/x.spec.yml"),
                PathBuf::from("specs/a/y.spec.yaml"),
                PathBuf::from("specs/b/z.spec.yaml"),
            ]
        );
    }
}
