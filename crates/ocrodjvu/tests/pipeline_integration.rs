//! Pipeline integration tests.
//!
//! Runs the `_dummy` engine from the global registry over in-memory pages
//! and saves the results as a `djvused` script.

use ocrodjvu::core::config::{ErrorPolicy, OutputMode, PipelineConfig};
use ocrodjvu::core::pipeline::Pipeline;
use ocrodjvu::document::{DjvuSaver, MemoryDocument, MemoryTextLayer};
use ocrodjvu::engines::{EngineProperties, registry};
use ocrodjvu::{OcrodjvuError, Zone};
use std::sync::Arc;

fn document(pages: usize) -> Arc<MemoryDocument> {
    let mut document = MemoryDocument::new();
    for _ in 0..pages {
        document.push_page((100, 40), Some(b"P4\n100 40\n".to_vec()));
    }
    Arc::new(document)
}

async fn dummy_pipeline(jobs: usize) -> Pipeline {
    let engine = registry::load_engine("_dummy", EngineProperties::new()).await.unwrap();
    let config = PipelineConfig {
        engine: "_dummy".to_string(),
        jobs: Some(jobs),
        on_error: ErrorPolicy::Resume,
        ..Default::default()
    };
    Pipeline::new(engine, &config).unwrap()
}

#[tokio::test]
async fn test_dummy_engine_fills_every_page() {
    let pipeline = dummy_pipeline(3).await;
    let mut layer = MemoryTextLayer::new();
    let report = pipeline.run(document(4), &mut layer, None).await.unwrap();
    assert_eq!(report.pages, 4);
    assert_eq!(report.recognized, 4);
    assert_eq!(report.exit_code(), 0);

    let committed = layer.committed().unwrap();
    let numbers: Vec<usize> = committed.iter().map(|(n, _)| *n).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    assert!(committed.iter().all(|(_, zone)| zone.as_ref().is_some_and(|z| z.children.is_empty())));
}

#[tokio::test]
async fn test_script_saved_in_page_order() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("result.djvused");
    let mut saver = DjvuSaver::new(
        dir.path().join("input.djvu"),
        true,
        OutputMode::Script(script.clone()),
        true,
        false,
        dir.path(),
    );
    let pipeline = dummy_pipeline(2).await;
    pipeline.run(document(3), &mut saver, Some(&[3, 1])).await.unwrap();

    let written = std::fs::read_to_string(&script).unwrap();
    assert!(written.starts_with("remove-txt\nselect 3\nset-txt\n"));
    let third = written.find("select 3").unwrap();
    let first = written.find("select 1").unwrap();
    assert!(third < first);
    assert!(!written.contains("select 2"));

    let body = written.split("set-txt\n").nth(1).unwrap().split("\n.\n").next().unwrap();
    assert!(Zone::parse_sexpr(body).is_ok());
}

#[tokio::test]
async fn test_unknown_engine() {
    let err = registry::load_engine("no-such-engine", EngineProperties::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, OcrodjvuError::Validation { .. }));
}

#[tokio::test]
async fn test_dummy_rejects_properties() {
    let properties: EngineProperties = [("fix-html", "1")].into_iter().collect();
    let err = registry::load_engine("_dummy", properties).await.err().unwrap();
    assert!(err.to_string().contains("'fix-html' is not a valid property for the _dummy engine"));
}
