//! Context Formatter Integration Tests

use editflow::models::edit::EditFormat;
use editflow::models::turn::Turn;
use editflow::services::context::{ContextFormatter, FileSet, FileSnapshot, SegmentKind};
use editflow::services::repo_map::{FileListRepoMap, RepoMap};
use editflow_llm::Message;

use super::common::*;

fn files() -> FileSet {
    FileSet {
        editable: vec![
            FileSnapshot::new("src/util.py", UTIL_PY),
            FileSnapshot::new("src/app.py", "import util\n"),
        ],
        read_only: vec![FileSnapshot::new("README.md", "# demo\n")],
    }
}

#[test]
fn test_same_inputs_same_bundle() {
    let formatter = ContextFormatter::new(EditFormat::UnifiedDiff, 100_000);
    let history = vec![Message::user("earlier"), Message::assistant("ok")];
    let turn = Turn::new("rename foo to bar");

    let first = formatter
        .build(&turn, Some("docs/guide.md"), &files(), &history)
        .unwrap();
    let mut reordered = files();
    reordered.editable.reverse();
    let second = formatter
        .build(&turn, Some("docs/guide.md"), &reordered, &history)
        .unwrap();

    assert_eq!(first.messages(), second.messages());
    assert_eq!(first.total_tokens(), second.total_tokens());
}

#[test]
fn test_read_only_separate_from_editable() {
    let formatter = ContextFormatter::new(EditFormat::SearchReplace, 100_000);
    let bundle = formatter
        .build(&Turn::new("rename"), None, &files(), &[])
        .unwrap();

    let read_only = bundle.segment(SegmentKind::ReadOnlyFiles).unwrap();
    assert!(read_only.messages[0].content.contains("READ ONLY"));
    assert!(read_only.messages[0].content.contains("README.md"));
    assert!(!read_only.messages[0].content.contains("src/util.py"));

    let editable = bundle.segment(SegmentKind::EditableFiles).unwrap();
    let body = &editable.messages[0].content;
    assert!(body.find("src/app.py").unwrap() < body.find("src/util.py").unwrap());
}

#[test]
fn test_repo_map_lists_files_outside_chat() {
    let dir = repo(&[
        ("src/util.py", UTIL_PY),
        ("src/app.py", "import util\n"),
        ("docs/guide.md", "guide\n"),
    ]);
    let map = FileListRepoMap::new(dir.path(), 100);
    let summary = map.summarize(&["src/util.py".to_string()]);
    assert_eq!(summary, "docs/guide.md\nsrc/app.py");

    let formatter = ContextFormatter::new(EditFormat::WholeFile, 100_000);
    let bundle = formatter
        .build(&Turn::new("rename"), Some(&summary), &files(), &[])
        .unwrap();
    let segment = bundle.segment(SegmentKind::RepoMap).unwrap();
    assert!(segment.messages[0].content.contains("docs/guide.md"));
}
