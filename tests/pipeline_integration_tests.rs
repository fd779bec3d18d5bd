//! End-to-end batch tests over generated container archives.
//!
//! The external tools are stand-ins with the same contract: `cat` as the
//! formatter (reformat-only becomes identity) and `echo` as the
//! generator, printing the report line the bridge pattern-matches.

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use inline_foxml::{NormalizeEngine, Output, PipelineConfig, VerbosityLevel};

const INLINE_FOXML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<foxml:digitalObject xmlns:foxml="info:fedora/fedora-system:def/foxml#" PID="coll:1">
  <foxml:datastream ID="MODS" CONTROL_GROUP="X">
    <foxml:datastreamVersion ID="MODS.0"/>
  </foxml:datastream>
</foxml:digitalObject>"#;

const MANAGED_FOXML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<foxml:digitalObject xmlns:foxml="info:fedora/fedora-system:def/foxml#" PID="coll:1">
  <foxml:datastream ID="MODS" CONTROL_GROUP="M">
    <foxml:datastreamVersion ID="MODS.0">
      <foxml:contentLocation TYPE="INTERNAL_ID" REF="coll:1+MODS+MODS.0"/>
    </foxml:datastreamVersion>
  </foxml:datastream>
</foxml:digitalObject>"#;

const MODS_CONTENT: &str = r#"<?xml version="1.0"?>
<mods:mods xmlns:mods="http://www.loc.gov/mods/v3">
  <mods:titleInfo><mods:title>A title</mods:title></mods:titleInfo>
</mods:mods>"#;

fn build_zip(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in members {
        writer
            .start_file(name.to_string(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A container holding one atomzip bag member (the record nested inside)
/// plus any extra members.
fn build_container(bag: &str, foxml: &str, extra_members: &[(&str, &[u8])]) -> Vec<u8> {
    let atomzip = build_zip(&[("foxml.xml", foxml.as_bytes())]);
    let member_name = format!("data/{}_foxml_atomzip.zip", bag);
    let mut members: Vec<(&str, &[u8])> = vec![(member_name.as_str(), atomzip.as_slice())];
    members.extend_from_slice(extra_members);
    build_zip(&members)
}

fn write_archive(dir: &Path, name: &str, bytes: &[u8]) {
    std::fs::write(dir.join(name), bytes).unwrap();
}

fn test_engine(config: PipelineConfig) -> NormalizeEngine {
    NormalizeEngine::new(config, Arc::new(Output::new(VerbosityLevel::Quiet)))
}

fn cat_formatter_config() -> PipelineConfig {
    PipelineConfig {
        max_concurrent_archives: 2,
        formatter_command: vec!["cat".to_string()],
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn test_batch_isolates_a_failing_archive() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    write_archive(
        input.path(),
        "one.zip",
        &build_container("COLL_obj1", INLINE_FOXML, &[]),
    );
    // The record in archive two is unparseable even after repair.
    write_archive(
        input.path(),
        "two.zip",
        &build_container("COLL_obj2", "<digitalObject><unclosed>", &[]),
    );
    write_archive(
        input.path(),
        "three.zip",
        &build_container("COLL_obj3", INLINE_FOXML, &[]),
    );

    let archives = vec![
        input.path().join("one.zip"),
        input.path().join("two.zip"),
        input.path().join("three.zip"),
    ];

    let engine = test_engine(cat_formatter_config());
    let results = engine.run(archives, out.path(), None).await.unwrap();

    assert_eq!(results.total_archives, 3);
    assert_eq!(results.total_bags, 3);
    assert_eq!(results.failed_bags, 1);
    assert_eq!(results.index.len(), 2);

    let bag_names: Vec<&str> = results
        .index
        .entries()
        .iter()
        .map(|entry| entry.bag_name.as_str())
        .collect();
    assert!(bag_names.contains(&"COLL_obj1"));
    assert!(bag_names.contains(&"COLL_obj3"));
    assert!(!bag_names.contains(&"COLL_obj2"));

    // Successful bags have their formatted record on disk.
    for entry in results.index.entries() {
        let contents = std::fs::read_to_string(&entry.converted_foxml_path).unwrap();
        assert!(contents.contains("digitalObject"));
    }
    // The failed bag left no output file behind.
    assert!(!out.path().join("two/COLL_obj2/foxml.xml").exists());
}

#[tokio::test]
async fn test_managed_record_is_rewritten_end_to_end() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    write_archive(
        input.path(),
        "managed.zip",
        &build_container(
            "COLL_obj1",
            MANAGED_FOXML,
            &[("data/MODS.0.xml", MODS_CONTENT.as_bytes())],
        ),
    );

    let engine = test_engine(cat_formatter_config());
    let results = engine
        .run(vec![input.path().join("managed.zip")], out.path(), None)
        .await
        .unwrap();

    assert_eq!(results.inlined_bags, 1);
    assert_eq!(results.failed_bags, 0);
    assert_eq!(results.index.len(), 1);

    let entry = &results.index.entries()[0];
    assert_eq!(entry.bag_name, "COLL_obj1");
    assert!(entry.converted_foxml_path.ends_with("managed/COLL_obj1/foxml.xml"));

    let contents = std::fs::read_to_string(&entry.converted_foxml_path).unwrap();
    assert!(contents.contains(r#"CONTROL_GROUP="X""#));
    assert!(!contents.contains("contentLocation"));
    assert!(contents.contains("xmlContent"));
    assert!(contents.contains("A title"));
}

#[tokio::test]
async fn test_second_bag_uses_generated_companion_archive() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let bags = TempDir::new().unwrap();

    // Pre-create the companion archive the fake generator reports.
    let companion_path = bags.path().join("companion.zip");
    std::fs::write(
        &companion_path,
        build_zip(&[("data/foxml.xml", INLINE_FOXML.as_bytes())]),
    )
    .unwrap();

    // Two atomzip members: the first record comes from the container, the
    // second requires generation (its atomzip holds no record).
    let first_atomzip = build_zip(&[("foxml.xml", INLINE_FOXML.as_bytes())]);
    let second_atomzip = build_zip(&[("payload.dat", b"opaque".as_slice())]);
    let container = build_zip(&[
        ("data/COLL_obj1_foxml_atomzip.zip", first_atomzip.as_slice()),
        ("data/COLL_obj2_foxml_atomzip.zip", second_atomzip.as_slice()),
    ]);
    write_archive(input.path(), "pair.zip", &container);

    let config = PipelineConfig {
        generator_command: vec![
            "echo".to_string(),
            "Bag created and saved at".to_string(),
            companion_path.to_string_lossy().into_owned(),
        ],
        ..cat_formatter_config()
    };

    let engine = test_engine(config);
    let results = engine
        .run(vec![input.path().join("pair.zip")], out.path(), None)
        .await
        .unwrap();

    assert_eq!(results.total_bags, 2);
    assert_eq!(results.failed_bags, 0);
    assert_eq!(results.index.len(), 2);

    let bag_names: Vec<&str> = results
        .index
        .entries()
        .iter()
        .map(|entry| entry.bag_name.as_str())
        .collect();
    assert!(bag_names.contains(&"COLL_obj1"));
    assert!(bag_names.contains(&"COLL_obj2"));
}

#[tokio::test]
async fn test_generator_timeout_fails_only_its_bag() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    write_archive(
        input.path(),
        "one.zip",
        &build_container("COLL_obj1", INLINE_FOXML, &[]),
    );
    // The second bag of this archive needs the generator, which hangs.
    let first_atomzip = build_zip(&[("foxml.xml", INLINE_FOXML.as_bytes())]);
    let second_atomzip = build_zip(&[("payload.dat", b"opaque".as_slice())]);
    let container = build_zip(&[
        ("data/COLL_obj2_foxml_atomzip.zip", first_atomzip.as_slice()),
        ("data/COLL_obj3_foxml_atomzip.zip", second_atomzip.as_slice()),
    ]);
    write_archive(input.path(), "two.zip", &container);
    write_archive(
        input.path(),
        "three.zip",
        &build_container("COLL_obj4", INLINE_FOXML, &[]),
    );

    // The appended object ID lands in $0, so the generator really hangs.
    let config = PipelineConfig {
        generator_command: vec![
            "sh".to_string(),
            "-c".to_string(),
            "sleep 60".to_string(),
        ],
        generator_timeout: Duration::from_millis(200),
        ..cat_formatter_config()
    };

    let archives = vec![
        input.path().join("one.zip"),
        input.path().join("two.zip"),
        input.path().join("three.zip"),
    ];

    let started = Instant::now();
    let engine = test_engine(config);
    let results = engine.run(archives, out.path(), None).await.unwrap();

    // The hung generator is bounded: no hang beyond the fixed timeout.
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(results.total_bags, 4);
    assert_eq!(results.failed_bags, 1);
    assert_eq!(results.index.len(), 3);

    let bag_names: Vec<&str> = results
        .index
        .entries()
        .iter()
        .map(|entry| entry.bag_name.as_str())
        .collect();
    assert!(!bag_names.contains(&"COLL_obj3"));
}

#[tokio::test]
async fn test_empty_batch_yields_empty_index() {
    let out = TempDir::new().unwrap();
    let engine = test_engine(cat_formatter_config());
    let results = engine.run(Vec::new(), out.path(), None).await.unwrap();

    assert_eq!(results.total_archives, 0);
    assert!(results.index.is_empty());
    assert!(!results.has_failures());

    // The index file still materializes with its header row.
    let index_path = out.path().join("map.csv");
    results.index.write_csv(&index_path).unwrap();
    let contents = std::fs::read_to_string(&index_path).unwrap();
    assert!(contents.starts_with("bag_name,converted_foxml_path"));
}

#[tokio::test]
async fn test_progress_advances_once_per_archive() {
    let input = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    for n in 1..=3 {
        write_archive(
            input.path(),
            &format!("a{}.zip", n),
            &build_container(&format!("COLL_obj{}", n), INLINE_FOXML, &[]),
        );
    }
    let archives = (1..=3)
        .map(|n| input.path().join(format!("a{}.zip", n)))
        .collect();

    let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let ticks_in_callback = Arc::clone(&ticks);
    let callback: inline_foxml::ProgressCallback = Arc::new(move |progress| {
        ticks_in_callback.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(progress.total, 3);
    });

    let engine = test_engine(cat_formatter_config());
    let results = engine.run(archives, out.path(), Some(callback)).await.unwrap();

    assert_eq!(results.total_archives, 3);
    assert_eq!(ticks.load(std::sync::atomic::Ordering::SeqCst), 3);
}
