//! Edit Format and Apply Engine Integration Tests
//!
//! Model replies in each edit format, parsed and applied to a real tree.

use editflow::models::edit::EditFormat;
use editflow::services::apply::ApplyEngine;
use editflow::services::edit::ParseContext;

use super::common::*;

fn apply_reply(dir: &tempfile::TempDir, format: EditFormat, reply: &str) -> Vec<String> {
    let ctx = ParseContext::new(["src/util.py"]);
    let ops = format.parse(reply, &ctx).unwrap();
    let result = ApplyEngine::new(dir.path(), true).apply(&ops);
    assert!(result.is_success(), "failed: {:?}", result.failed);
    result.files_touched()
}

// ============================================================================
// Same change, every format
// ============================================================================

#[test]
fn test_search_replace_rename() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    apply_reply(&dir, EditFormat::SearchReplace, RENAME_REPLY);
    assert_eq!(read(&dir, "src/util.py"), RENAMED_UTIL_PY);
}

#[test]
fn test_unified_diff_rename() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let reply = "```diff
--- a/src/util.py
+++ b/src/util.py
@@ -1,2 +1,2 @@
-def foo():
+def bar():
     return 1
@@ -5,2 +5,2 @@
 def main():
-    print(foo())
+    print(bar())
```
";
    apply_reply(&dir, EditFormat::UnifiedDiff, reply);
    assert_eq!(read(&dir, "src/util.py"), RENAMED_UTIL_PY);
}

#[test]
fn test_whole_file_rename() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let reply = format!("src/util.py\n```python\n{}```\n", RENAMED_UTIL_PY);
    apply_reply(&dir, EditFormat::WholeFile, &reply);
    assert_eq!(read(&dir, "src/util.py"), RENAMED_UTIL_PY);
}

#[test]
fn test_structured_patch_rename() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let reply = r#"```json
{"edits": [
  {"path": "src/util.py", "op": "replace", "range": {"start": 1, "end": 1}, "expected": "def foo():\n", "content": "def bar():\n"},
  {"path": "src/util.py", "op": "replace", "range": {"start": 6, "end": 6}, "expected": "    print(foo())\n", "content": "    print(bar())\n"}
]}
```"#;
    apply_reply(&dir, EditFormat::StructuredPatch, reply);
    assert_eq!(read(&dir, "src/util.py"), RENAMED_UTIL_PY);
}

// ============================================================================
// Tree guarantees
// ============================================================================

#[test]
fn test_bytes_outside_edit_are_untouched() {
    let original = "\tkeep  \nold line\n\n  tail\t\n# no newline at end";
    let dir = repo(&[("src/util.py", original)]);
    let reply = "src/util.py\n<<<<<<< SEARCH\nold line\n=======\nnew line\n>>>>>>> REPLACE\n";
    apply_reply(&dir, EditFormat::SearchReplace, reply);
    assert_eq!(
        read(&dir, "src/util.py"),
        "\tkeep  \nnew line\n\n  tail\t\n# no newline at end"
    );
}

#[test]
fn test_stale_anchor_leaves_tree_unchanged() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let reply = "src/util.py\n<<<<<<< SEARCH\ndef foo():\n    return 1\n=======\ndef bar():\n    return 1\n>>>>>>> REPLACE\n\nsrc/util.py\n<<<<<<< SEARCH\n    print(baz())\n=======\n    print(bar())\n>>>>>>> REPLACE\n";
    let ctx = ParseContext::new(["src/util.py"]);
    let ops = EditFormat::SearchReplace.parse(reply, &ctx).unwrap();

    let engine = ApplyEngine::new(dir.path(), true);
    let err = engine.dry_run(&ops).unwrap_err();
    assert_eq!(err.path.as_deref(), Some("src/util.py"));

    let result = engine.apply(&ops);
    assert!(result.applied.is_empty());
    assert_eq!(result.failed.len(), 1);
    assert_eq!(read(&dir, "src/util.py"), UTIL_PY);
}

#[test]
fn test_escaping_path_is_rejected() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let reply = "../outside.py\n```\nx = 1\n```\n";
    let ctx = ParseContext::new(["../outside.py"]);
    let ops = EditFormat::WholeFile.parse(reply, &ctx).unwrap();

    let result = ApplyEngine::new(dir.path(), true).apply(&ops);
    assert!(result.applied.is_empty());
    assert!(!dir.path().join("../outside.py").exists());
}

#[test]
fn test_created_file_and_parent_dirs() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let reply = "src/pkg/new.py\n<<<<<<< SEARCH\n=======\nVALUE = 1\n>>>>>>> REPLACE\n";
    let ctx = ParseContext::new(["src/util.py"]);
    let ops = EditFormat::SearchReplace.parse(reply, &ctx).unwrap();

    let result = ApplyEngine::new(dir.path(), true).apply(&ops);
    assert!(result.is_success());
    assert_eq!(result.files_touched(), vec!["src/pkg/new.py".to_string()]);
    assert_eq!(read(&dir, "src/pkg/new.py"), "VALUE = 1\n");
    assert!(result.diff_summary().contains("src/pkg/new.py"));
}
