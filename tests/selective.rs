mod common;

use pretty_assertions::assert_eq;

use common::{context_with, pseudo_random};
use spanzip::{MemoryContext, ZipEngine};

fn archive() -> MemoryContext {
    let files = [
        ("docs/a.md", b"# A".to_vec()),
        ("docs/b.md", b"# B".to_vec()),
        ("bin/tool", pseudo_random(30_000, 21)),
        ("logs/run.log", b"started\nstopped\n".to_vec()),
    ];
    let names: Vec<&str> = files.iter().map(|(n, _)| *n).collect();
    let mut context = context_with(&files);
    ZipEngine::new().pack(&mut context, &names, 8_192).unwrap();
    context
}

#[test]
fn test_predicate_matching_nothing_opens_nothing() {
    let mut context = archive();
    let none = |_: &str| false;
    let summary = ZipEngine::new().unpack(&mut context, Some(&none)).unwrap();

    assert_eq!(summary.extracted, 0);
    assert_eq!(context.file_write_opens(), 0);
    assert!(context.extracted().is_empty());
}

#[test]
fn test_subset_extraction_is_repeatable() {
    let mut context = archive();
    let engine = ZipEngine::new();
    let docs = |name: &str| name.starts_with("docs/") || name == "bin/tool";

    engine.unpack(&mut context, Some(&docs)).unwrap();
    let first = context.extracted().clone();
    assert_eq!(
        first.keys().map(String::as_str).collect::<Vec<_>>(),
        ["bin/tool", "docs/a.md", "docs/b.md"]
    );

    context.clear_extracted();
    engine.unpack(&mut context, Some(&docs)).unwrap();
    assert_eq!(*context.extracted(), first);
    assert_eq!(context.file_write_opens(), 3);
}

#[test]
fn test_list_reports_every_entry() {
    let mut context = archive();
    let entries = ZipEngine::new().list(&mut context).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["docs/a.md", "docs/b.md", "bin/tool", "logs/run.log"]);

    let tool = &entries[2];
    assert_eq!(tool.length, 30_000);
    assert!(tool.compressed_length > 0);
    // The compressed tool data does not fit on the first volume
    assert!(entries.iter().any(|e| e.volume > 0));
}
