//! Declarative YAML test specification
//!
//! A spec file is parsed into an explicit tree of [`Node`]s before anything
//! runs. The runner walks that tree; nothing registers itself at load time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{E2eError, E2eResult};

/// One node of a spec tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Suite(SuiteNode),
    Test(TestNode),
    Hook(HookNode),
}

/// A `describe` block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteNode {
    pub describe: String,
    #[serde(default)]
    pub children: Vec<Node>,
}

/// An `it` block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestNode {
    pub it: String,
    #[serde(default)]
    pub steps: Vec<TestStep>,
    /// Overrides the mode's retry budget for this test
    #[serde(default)]
    pub retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookNode {
    pub hook: HookKind,
    #[serde(default)]
    pub steps: Vec<TestStep>,
}

/// Where a hook node sits relative to the tests of its scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Before,
    After,
    BeforeEach,
    AfterEach,
}

/// A single step in a test or hook body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Navigate to a path relative to the base URL
    Visit {
        #[serde(default = "default_path")]
        path: String,
    },

    /// Counter display shows exactly this value
    AssertValue { value: u64 },

    /// Click the increment control `times` times
    Increment {
        #[serde(default = "default_times")]
        times: u32,
    },

    /// Click the decrement control `times` times
    Decrement {
        #[serde(default = "default_times")]
        times: u32,
    },

    /// Click an element
    Click {
        selector: String,
        #[serde(default)]
        force: bool,
    },

    /// Double-click an element
    Dblclick { selector: String },

    /// Focus an element
    Focus { selector: String },

    /// The focused element has this id
    AssertFocused { id: String },

    /// Type text into an element; `{enter}`-style sequences press keys
    Type { selector: String, text: String },

    AssertVisible { selector: String },

    AssertEnabled { selector: String },

    AssertText { selector: String, text: String },

    /// Send a message to the host console through the task bridge
    Log { message: String },

    /// Run a named host task
    Task {
        name: String,
        #[serde(default)]
        arg: serde_json::Value,
    },
}

fn default_path() -> String {
    "/".to_string()
}

fn default_times() -> u32 {
    1
}

impl TestStep {
    /// Short label used in logs and step results
    pub fn label(&self) -> String {
        match self {
            TestStep::Visit { path } => format!("visit:{}", path),
            TestStep::AssertValue { value } => format!("assert_value:{}", value),
            TestStep::Increment { times } => format!("increment:{}", times),
            TestStep::Decrement { times } => format!("decrement:{}", times),
            TestStep::Click { selector, force } => {
                if *force {
                    format!("click!:{}", selector)
                } else {
                    format!("click:{}", selector)
                }
            }
            TestStep::Dblclick { selector } => format!("dblclick:{}", selector),
            TestStep::Focus { selector } => format!("focus:{}", selector),
            TestStep::AssertFocused { id } => format!("assert_focused:{}", id),
            TestStep::Type { selector, .. } => format!("type:{}", selector),
            TestStep::AssertVisible { selector } => format!("assert_visible:{}", selector),
            TestStep::AssertEnabled { selector } => format!("assert_enabled:{}", selector),
            TestStep::AssertText { selector, .. } => format!("assert_text:{}", selector),
            TestStep::Log { message } => {
                format!("log:{}", message.chars().take(30).collect::<String>())
            }
            TestStep::Task { name, .. } => format!("task:{}", name),
        }
    }

    /// Command name used for duration statistics
    pub fn command(&self) -> &'static str {
        match self {
            TestStep::Visit { .. } => "visit",
            TestStep::AssertValue { .. } => "assert_value",
            TestStep::Increment { .. } => "increment",
            TestStep::Decrement { .. } => "decrement",
            TestStep::Click { .. } => "click",
            TestStep::Dblclick { .. } => "dblclick",
            TestStep::Focus { .. } => "focus",
            TestStep::AssertFocused { .. } => "assert_focused",
            TestStep::Type { .. } => "type",
            TestStep::AssertVisible { .. } => "assert_visible",
            TestStep::AssertEnabled { .. } => "assert_enabled",
            TestStep::AssertText { .. } => "assert_text",
            TestStep::Log { .. } => "log",
            TestStep::Task { .. } => "task",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SpecDocument {
    #[serde(default)]
    children: Vec<Node>,
}

/// A discovered, parsed spec file
#[derive(Debug, Clone)]
pub struct SpecFile {
    pub name: String,
    pub path: PathBuf,
    pub children: Vec<Node>,
}

impl SpecFile {
    /// Parse a spec file from a YAML string
    pub fn from_yaml(name: &str, path: &Path, yaml: &str) -> E2eResult<Self> {
        let document: SpecDocument = serde_yaml::from_str(yaml)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            children: document.children,
        })
    }

    /// Parse a spec file from disk
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&spec_name(path), path, &content)
    }

    /// Every test in declaration order, with the titles of its enclosing suites
    pub fn tests(&self) -> Vec<(Vec<String>, &TestNode)> {
        let mut out = Vec::new();
        collect_tests(&self.children, &mut Vec::new(), &mut out);
        out
    }

    pub fn test_count(&self) -> usize {
        self.tests().len()
    }
}

fn collect_tests<'a>(
    nodes: &'a [Node],
    path: &mut Vec<String>,
    out: &mut Vec<(Vec<String>, &'a TestNode)>,
) {
    for node in nodes {
        match node {
            Node::Suite(suite) => {
                path.push(suite.describe.clone());
                collect_tests(&suite.children, path, out);
                path.pop();
            }
            Node::Test(test) => out.push((path.clone(), test)),
            Node::Hook(_) => {}
        }
    }
}

/// Display name of a spec file: file name without `.spec.yaml`/`.yaml`
pub fn spec_name(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    for suffix in [".spec.yaml", ".spec.yml", ".yaml", ".yml"] {
        if let Some(stem) = file.strip_suffix(suffix) {
            return stem.to_string();
        }
    }
    file
}

/// Root-level hooks shared by every spec file
#[derive(Debug, Clone, Default)]
pub struct SupportFile {
    pub path: Option<PathBuf>,
    pub hooks: Vec<HookNode>,
}

impl SupportFile {
    pub fn from_yaml(path: &Path, yaml: &str) -> E2eResult<Self> {
        let document: SpecDocument = serde_yaml::from_str(yaml)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))?;
        let mut hooks = Vec::new();
        for node in document.children {
            match node {
                Node::Hook(hook) => hooks.push(hook),
                Node::Suite(suite) => {
                    return Err(E2eError::SpecParse(format!(
                        "{}: support file may only declare hooks, found suite '{}'",
                        path.display(),
                        suite.describe
                    )))
                }
                Node::Test(test) => {
                    return Err(E2eError::SpecParse(format!(
                        "{}: support file may only declare hooks, found test '{}'",
                        path.display(),
                        test.it
                    )))
                }
            }
        }
        Ok(Self {
            path: Some(path.to_path_buf()),
            hooks,
        })
    }

    /// Load the support file; a missing file means no root hooks
    pub fn load(path: Option<&Path>) -> E2eResult<Self> {
        match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                Self::from_yaml(path, &content)
            }
            _ => Ok(Self::default()),
        }
    }
}
