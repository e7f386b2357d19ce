//! Static import analysis of Python sources.
//!
//! The source is parsed into a syntax tree and every `import x.y` /
//! `from x.y import z` statement is visited, however deeply it is nested
//! (functions, classes, conditionals, loops, `try`, `with`, `match`).
//! Only the first dotted segment is kept. Relative imports name modules of
//! the script's own package and are never reported.

use crate::config::tables::LookupTables;
use crate::error::AnalyzerError;
use rustpython_parser::ast::{self, ExceptHandler, Stmt};
use rustpython_parser::Parse;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Lists the third-party top-level modules a script imports.
#[derive(Debug, Clone)]
pub struct DependencyAnalyzer {
    tables: Arc<LookupTables>,
}

impl DependencyAnalyzer {
    pub fn new(tables: Arc<LookupTables>) -> Self {
        DependencyAnalyzer { tables }
    }

    /// Sorted, de-duplicated non-stdlib imports of the file at `path`.
    pub fn analyze(&self, path: &Path) -> Result<Vec<String>, AnalyzerError> {
        let source = read_source(path)?;
        self.analyze_source(&source, &path.to_string_lossy())
    }

    /// Same as [`analyze`](Self::analyze) on in-memory source.
    pub fn analyze_source(&self, source: &str, label: &str) -> Result<Vec<String>, AnalyzerError> {
        let modules = collect_imports(source, label)?;
        Ok(modules
            .into_iter()
            .filter(|m| !self.tables.is_stdlib(m))
            .collect())
    }

    /// Every absolute top-level import, stdlib included.
    pub fn imported_modules(&self, path: &Path) -> Result<BTreeSet<String>, AnalyzerError> {
        let source = read_source(path)?;
        collect_imports(&source, &path.to_string_lossy())
    }

    pub fn tables(&self) -> &LookupTables {
        &self.tables
    }
}

fn read_source(path: &Path) -> Result<String, AnalyzerError> {
    std::fs::read_to_string(path).map_err(|e| AnalyzerError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Parse `source` and return the top-level names of all absolute imports.
pub fn collect_imports(source: &str, label: &str) -> Result<BTreeSet<String>, AnalyzerError> {
    let suite = ast::Suite::parse(source, label).map_err(|e| {
        let (line, column) = line_column(source, u32::from(e.offset) as usize);
        AnalyzerError::Parse {
            line,
            column,
            message: e.error.to_string(),
        }
    })?;

    let mut modules = BTreeSet::new();
    visit_body(&suite, &mut modules);
    Ok(modules)
}

fn visit_body(body: &[Stmt], out: &mut BTreeSet<String>) {
    for stmt in body {
        visit_stmt(stmt, out);
    }
}

fn visit_stmt(stmt: &Stmt, out: &mut BTreeSet<String>) {
    match stmt {
        Stmt::Import(import) => {
            for alias in &import.names {
                push_top_level(alias.name.as_str(), out);
            }
        }
        Stmt::ImportFrom(import) => {
            let level = import.level.as_ref().map(|l| l.to_u32()).unwrap_or(0);
            if level == 0 {
                if let Some(module) = &import.module {
                    push_top_level(module.as_str(), out);
                }
            }
        }
        Stmt::FunctionDef(def) => visit_body(&def.body, out),
        Stmt::AsyncFunctionDef(def) => visit_body(&def.body, out),
        Stmt::ClassDef(def) => visit_body(&def.body, out),
        Stmt::If(s) => {
            visit_body(&s.body, out);
            visit_body(&s.orelse, out);
        }
        Stmt::For(s) => {
            visit_body(&s.body, out);
            visit_body(&s.orelse, out);
        }
        Stmt::AsyncFor(s) => {
            visit_body(&s.body, out);
            visit_body(&s.orelse, out);
        }
        Stmt::While(s) => {
            visit_body(&s.body, out);
            visit_body(&s.orelse, out);
        }
        Stmt::With(s) => visit_body(&s.body, out),
        Stmt::AsyncWith(s) => visit_body(&s.body, out),
        Stmt::Try(s) => {
            visit_body(&s.body, out);
            visit_handlers(&s.handlers, out);
            visit_body(&s.orelse, out);
            visit_body(&s.finalbody, out);
        }
        Stmt::TryStar(s) => {
            visit_body(&s.body, out);
            visit_handlers(&s.handlers, out);
            visit_body(&s.orelse, out);
            visit_body(&s.finalbody, out);
        }
        Stmt::Match(s) => {
            for case in &s.cases {
                visit_body(&case.body, out);
            }
        }
        _ => {}
    }
}

fn visit_handlers(handlers: &[ExceptHandler], out: &mut BTreeSet<String>) {
    for handler in handlers {
        let ExceptHandler::ExceptHandler(h) = handler;
        visit_body(&h.body, out);
    }
}

fn push_top_level(dotted: &str, out: &mut BTreeSet<String>) {
    if let Some(first) = dotted.split('.').next() {
        if !first.is_empty() {
            out.insert(first.to_string());
        }
    }
}

/// 1-based line and column for a byte offset.
fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let prefix = source.get(..offset).unwrap_or(source);
    let line = prefix.matches('\n').count() + 1;
    let line_start = prefix.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = prefix[line_start..].chars().count() + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> DependencyAnalyzer {
        DependencyAnalyzer::new(Arc::new(LookupTables::builtin().unwrap()))
    }

    #[test]
    fn test_stdlib_filtered() {
        let deps = analyzer().analyze_source("import os, sys, PIL\n", "t.py").unwrap();
        assert_eq!(deps, vec!["PIL".to_string()]);
    }

    #[test]
    fn test_sorted_and_deduplicated() {
        let src = "import requests\nimport numpy as np\nfrom requests.adapters import HTTPAdapter\nimport numpy.linalg\n";
        let deps = analyzer().analyze_source(src, "t.py").unwrap();
        assert_eq!(deps, vec!["numpy".to_string(), "requests".to_string()]);
    }

    #[test]
    fn test_nested_imports_found() {
        let src = r#"
def load():
    import yaml
    return yaml

class Viewer:
    def show(self):
        from PyQt6.QtWidgets import QApplication

try:
    import ujson as json
except ImportError:
    import simplejson as json
finally:
    import colorama

if True:
    import rich
else:
    import click

with open("x") as f:
    import toml

for _ in range(1):
    import tqdm

while False:
    import attr
"#;
        let deps = analyzer().analyze_source(src, "t.py").unwrap();
        for expected in [
            "PyQt6", "attr", "click", "colorama", "rich", "simplejson", "toml", "tqdm",
            "ujson", "yaml",
        ] {
            assert!(deps.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[test]
    fn test_relative_imports_ignored() {
        let src = "from . import helpers\nfrom .models import User\nfrom ..core import x\nimport flask\n";
        let deps = analyzer().analyze_source(src, "t.py").unwrap();
        assert_eq!(deps, vec!["flask".to_string()]);
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let err = analyzer()
            .analyze_source("import os\ndef broken(:\n    pass\n", "t.py")
            .unwrap_err();
        match err {
            AnalyzerError::Parse { line, column, .. } => {
                assert_eq!(line, 2);
                assert!(column >= 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_imported_modules_keeps_stdlib() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("main.py");
        std::fs::write(&script, "import tkinter\nimport requests\n").unwrap();

        let all = analyzer().imported_modules(&script).unwrap();
        assert!(all.contains("tkinter"));
        assert!(all.contains("requests"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = analyzer().analyze(Path::new("/nonexistent/script.py"));
        assert!(matches!(result, Err(AnalyzerError::Read { .. })));
    }

    #[test]
    fn test_line_column() {
        assert_eq!(line_column("abc", 0), (1, 1));
        assert_eq!(line_column("ab\ncd", 4), (2, 2));
    }
}
