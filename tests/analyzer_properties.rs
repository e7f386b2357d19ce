use packer_pro::{DependencyAnalyzer, LookupTables};
use proptest::prelude::*;
use std::sync::Arc;

const THIRD_PARTY: &[&str] = &["numpy", "requests", "yaml", "PIL", "cv2", "flask", "rich"];
const STDLIB: &[&str] = &["os", "sys", "json", "re", "pathlib", "subprocess"];

fn analyzer() -> DependencyAnalyzer {
    DependencyAnalyzer::new(Arc::new(LookupTables::builtin().unwrap()))
}

/// One import statement in any of the forms the scanner must understand.
fn import_line() -> impl Strategy<Value = String> {
    let name = prop::sample::select(
        THIRD_PARTY
            .iter()
            .chain(STDLIB.iter())
            .copied()
            .collect::<Vec<_>>(),
    );
    (name, 0..5u8).prop_map(|(name, form)| match form {
        0 => format!("import {}", name),
        1 => format!("import {}.sub as alias", name),
        2 => format!("from {} import thing", name),
        3 => format!("def f():\n    import {}", name),
        _ => format!("from . import {}", name),
    })
}

proptest! {
    #[test]
    fn output_is_sorted_unique_and_free_of_stdlib(lines in prop::collection::vec(import_line(), 0..20)) {
        let source = lines.join("\n") + "\n";
        let deps = analyzer().analyze_source(&source, "gen.py").unwrap();

        let mut expected = deps.clone();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(&deps, &expected);
        for dep in &deps {
            prop_assert!(!STDLIB.contains(&dep.as_str()));
            prop_assert!(THIRD_PARTY.contains(&dep.as_str()));
        }
    }

    #[test]
    fn statement_order_does_not_matter(lines in prop::collection::vec(import_line(), 1..12)) {
        let forward = lines.join("\n") + "\n";
        let mut reversed_lines = lines.clone();
        reversed_lines.reverse();
        let reversed = reversed_lines.join("\n") + "\n";

        let a = analyzer().analyze_source(&forward, "a.py").unwrap();
        let b = analyzer().analyze_source(&reversed, "b.py").unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn relative_imports_are_ignored(names in prop::collection::vec(prop::sample::select(THIRD_PARTY.to_vec()), 1..6)) {
        let source: String = names
            .iter()
            .map(|n| format!("from .{} import thing\nfrom .. import {}\n", n, n))
            .collect();
        let deps = analyzer().analyze_source(&source, "pkg.py").unwrap();
        prop_assert!(deps.is_empty());
    }
}

#[test]
fn test_syntax_error_carries_position() {
    let err = analyzer()
        .analyze_source("import os\ndef broken(:\n", "bad.py")
        .unwrap_err();
    match err {
        packer_pro::AnalyzerError::Parse { line, .. } => assert_eq!(line, 2),
        other => panic!("unexpected error: {:?}", other),
    }
}
