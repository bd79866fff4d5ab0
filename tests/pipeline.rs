//! Pipeline behaviour against a scripted remote and both cache backends.
//!
//! The fake remote counts calls so each test can assert exactly how many
//! billable requests a sequence of uploads costs.

use ade_extract::{
    CacheStore, ExtractionPipeline, ExtractionSchema, FsCacheStore, MemoryCacheStore,
    ParseRequest, ParsedDocument, PipelineConfig, PipelineOutcome, PipelineProgressCallback,
    RemoteError, RemoteExtractor, StageError,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

const MODEL: &str = "dpt-2-latest";

#[derive(Clone, Copy, PartialEq)]
enum Behaviour {
    Ok,
    Fail,
    Empty,
}

struct FakeRemote {
    parse_calls: AtomicUsize,
    extract_calls: AtomicUsize,
    parse: Mutex<Behaviour>,
    extract: Mutex<Behaviour>,
    parse_delay: Duration,
    seen_markdown: Mutex<Vec<String>>,
}

impl FakeRemote {
    fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(parse_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            parse_calls: AtomicUsize::new(0),
            extract_calls: AtomicUsize::new(0),
            parse: Mutex::new(Behaviour::Ok),
            extract: Mutex::new(Behaviour::Ok),
            parse_delay,
            seen_markdown: Mutex::new(Vec::new()),
        })
    }

    fn set_parse(&self, b: Behaviour) {
        *self.parse.lock().unwrap() = b;
    }

    fn set_extract(&self, b: Behaviour) {
        *self.extract.lock().unwrap() = b;
    }

    fn parses(&self) -> usize {
        self.parse_calls.load(Ordering::SeqCst)
    }

    fn extracts(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteExtractor for FakeRemote {
    async fn parse(&self, request: ParseRequest<'_>) -> Result<ParsedDocument, RemoteError> {
        self.parse_calls.fetch_add(1, Ordering::SeqCst);
        if !self.parse_delay.is_zero() {
            tokio::time::sleep(self.parse_delay).await;
        }
        let behaviour = *self.parse.lock().unwrap();
        match behaviour {
            Behaviour::Ok => Ok(ParsedDocument {
                markdown: format!(
                    "<::logo: lab header::>\n# Lab Report\n\nPatient: {} <::chunk-7\n::>\n",
                    String::from_utf8_lossy(request.bytes)
                ),
                metadata: json!({"page_count": 1, "filename": request.filename}),
            }),
            Behaviour::Empty => Ok(ParsedDocument {
                markdown: String::new(),
                metadata: json!({"page_count": 0}),
            }),
            Behaviour::Fail => Err(RemoteError::Status {
                status: 401,
                body: "invalid api key".into(),
            }),
        }
    }

    async fn extract(
        &self,
        markdown: &str,
        schema: &ExtractionSchema,
    ) -> Result<Value, RemoteError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_markdown.lock().unwrap().push(markdown.to_string());
        let behaviour = *self.extract.lock().unwrap();
        match behaviour {
            Behaviour::Fail => Err(RemoteError::Status {
                status: 422,
                body: "schema rejected".into(),
            }),
            _ => Ok(json!({
                "extraction": {"fields": schema.required_fields()},
                "metadata": {"credit_usage": 1}
            })),
        }
    }
}

fn schema_a() -> ExtractionSchema {
    ExtractionSchema::lab_report()
}

fn schema_b() -> ExtractionSchema {
    ExtractionSchema::new(json!({
        "type": "object",
        "required": ["patient_name"],
        "properties": {"patient_name": {"type": "string"}}
    }))
    .unwrap()
}

fn pipeline_with(remote: Arc<FakeRemote>, store: Arc<dyn CacheStore>) -> ExtractionPipeline {
    let config = PipelineConfig::builder()
        .remote(remote)
        .store(store)
        .max_retries(0)
        .build()
        .unwrap();
    ExtractionPipeline::new(config).unwrap()
}

fn memory_pipeline(remote: Arc<FakeRemote>) -> ExtractionPipeline {
    pipeline_with(remote, Arc::new(MemoryCacheStore::new()))
}

// ── Caching ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reupload_and_schema_change_scenario() {
    let remote = FakeRemote::new();
    let p = memory_pipeline(remote.clone());

    let first = p.process(b"Jane", "cbc.pdf", MODEL, &schema_a()).await;
    assert_eq!((remote.parses(), remote.extracts()), (1, 1));
    assert_eq!(first.outcome, PipelineOutcome::Done);
    assert!(!first.stats.parse_cached && !first.stats.extract_cached);

    let second = p.process(b"Jane", "cbc.pdf", MODEL, &schema_a()).await;
    assert_eq!((remote.parses(), remote.extracts()), (1, 1));
    assert!(second.stats.parse_cached && second.stats.extract_cached);
    assert_eq!(second.markdown, first.markdown);
    assert_eq!(second.extraction, first.extraction);
    assert_eq!(second.parse_metadata, first.parse_metadata);

    let third = p.process(b"Jane", "cbc.pdf", MODEL, &schema_b()).await;
    assert_eq!((remote.parses(), remote.extracts()), (1, 2));
    assert!(third.stats.parse_cached && !third.stats.extract_cached);
    assert_eq!(third.extraction, json!({"fields": ["patient_name"]}));
}

#[tokio::test]
async fn test_alternating_schemas_reextract_each_time() {
    let remote = FakeRemote::new();
    let p = memory_pipeline(remote.clone());

    p.process(b"doc", "a.pdf", MODEL, &schema_a()).await;
    p.process(b"doc", "a.pdf", MODEL, &schema_b()).await;
    p.process(b"doc", "a.pdf", MODEL, &schema_a()).await;

    assert_eq!(remote.parses(), 1);
    assert_eq!(remote.extracts(), 3);
}

#[tokio::test]
async fn test_same_bytes_different_filename_share_cache() {
    let remote = FakeRemote::new();
    let p = memory_pipeline(remote.clone());

    let a = p.process(b"same", "first.pdf", MODEL, &schema_a()).await;
    let b = p.process(b"same", "renamed.pdf", MODEL, &schema_a()).await;

    assert_eq!(a.fingerprint, b.fingerprint);
    assert_eq!(b.filename, "renamed.pdf");
    assert_eq!((remote.parses(), remote.extracts()), (1, 1));
}

#[tokio::test]
async fn test_different_bytes_are_independent() {
    let remote = FakeRemote::new();
    let p = memory_pipeline(remote.clone());

    let a = p.process(b"alpha", "x.pdf", MODEL, &schema_a()).await;
    let b = p.process(b"beta", "x.pdf", MODEL, &schema_a()).await;

    assert_ne!(a.fingerprint, b.fingerprint);
    assert_eq!((remote.parses(), remote.extracts()), (2, 2));
}

#[tokio::test]
async fn test_schema_key_order_does_not_invalidate() {
    let remote = FakeRemote::new();
    let p = memory_pipeline(remote.clone());
    let reordered = ExtractionSchema::from_json_str(
        r#"{"properties":{"patient_name":{"type":"string"}},"required":["patient_name"],"type":"object"}"#,
    )
    .unwrap();

    p.process(b"doc", "a.pdf", MODEL, &schema_b()).await;
    let r = p.process(b"doc", "a.pdf", MODEL, &reordered).await;

    assert!(r.stats.extract_cached);
    assert_eq!(remote.extracts(), 1);
}

// ── Post-processing ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tags_stripped_on_fresh_and_cached_reads() {
    let remote = FakeRemote::new();
    let p = memory_pipeline(remote.clone());

    let fresh = p.process(b"Jane", "a.pdf", MODEL, &schema_a()).await;
    let cached = p.process(b"Jane", "a.pdf", MODEL, &schema_a()).await;

    for r in [&fresh, &cached] {
        assert!(!r.markdown.contains("<::"), "markdown: {:?}", r.markdown);
        assert_eq!(r.markdown, "# Lab Report\n\nPatient: Jane");
    }
}

#[tokio::test]
async fn test_extract_receives_tagged_markdown() {
    let remote = FakeRemote::new();
    let p = memory_pipeline(remote.clone());

    p.process(b"Jane", "a.pdf", MODEL, &schema_a()).await;

    let seen = remote.seen_markdown.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("<::logo: lab header::>"));
}

// ── Degradation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_parse_failure_degrades_and_is_not_cached() {
    let remote = FakeRemote::new();
    remote.set_parse(Behaviour::Fail);
    let p = memory_pipeline(remote.clone());

    let r = p.process(b"doc", "a.pdf", MODEL, &schema_a()).await;
    assert_eq!(r.outcome, PipelineOutcome::ParseFailed);
    assert_eq!(r.markdown, "");
    assert_eq!(r.parse_metadata, json!({}));
    assert_eq!(
        r.extraction,
        json!({"error": "Parse failed: HTTP 401: invalid api key"})
    );
    assert_eq!(remote.extracts(), 0);

    remote.set_parse(Behaviour::Ok);
    let retry = p.process(b"doc", "a.pdf", MODEL, &schema_a()).await;
    assert_eq!(retry.outcome, PipelineOutcome::Done);
    assert_eq!(remote.parses(), 2);
}

#[tokio::test]
async fn test_extract_failure_keeps_markdown_and_is_not_cached() {
    let remote = FakeRemote::new();
    remote.set_extract(Behaviour::Fail);
    let p = memory_pipeline(remote.clone());

    let r = p.process(b"Jane", "a.pdf", MODEL, &schema_a()).await;
    assert_eq!(r.outcome, PipelineOutcome::ExtractFailed);
    assert_eq!(r.markdown, "# Lab Report\n\nPatient: Jane");
    assert_eq!(r.parse_metadata["page_count"], 1);
    assert_eq!(
        r.error().as_deref(),
        Some("Extract failed: HTTP 422: schema rejected")
    );
    assert_eq!(r.extraction["error"], "Extract failed: HTTP 422: schema rejected");

    remote.set_extract(Behaviour::Ok);
    let again = p.process(b"Jane", "a.pdf", MODEL, &schema_a()).await;
    assert_eq!(again.outcome, PipelineOutcome::Done);
    assert!(again.stats.parse_cached);
    assert_eq!((remote.parses(), remote.extracts()), (1, 2));
}

#[tokio::test]
async fn test_missing_markdown_skips_extract() {
    let remote = FakeRemote::new();
    remote.set_parse(Behaviour::Empty);
    let p = memory_pipeline(remote.clone());

    let r = p.process(b"blank", "blank.png", MODEL, &schema_a()).await;
    assert_eq!(r.outcome, PipelineOutcome::ExtractSkipped);
    assert_eq!(r.stage_error, Some(StageError::MissingMarkdown));
    assert_eq!(r.extraction, json!({"error": "No markdown returned from parse"}));
    assert_eq!(r.parse_metadata["page_count"], 0);
    assert_eq!(remote.extracts(), 0);

    // Empty parse output is cached: no second parse.
    p.process(b"blank", "blank.png", MODEL, &schema_a()).await;
    assert_eq!(remote.parses(), 1);
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_document_parses_once() {
    let remote = FakeRemote::with_delay(Duration::from_millis(50));
    let p = Arc::new(memory_pipeline(remote.clone()));

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let p = Arc::clone(&p);
            tokio::spawn(async move { p.process(b"shared", "s.pdf", MODEL, &schema_a()).await })
        })
        .collect();

    let mut results = Vec::new();
    for t in tasks {
        results.push(t.await.unwrap());
    }

    assert_eq!(remote.parses(), 1);
    assert_eq!(remote.extracts(), 1);
    assert!(results.iter().all(|r| r.outcome == PipelineOutcome::Done));
    assert_eq!(results.iter().filter(|r| !r.stats.parse_cached).count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_different_documents_do_not_serialise() {
    let remote = FakeRemote::with_delay(Duration::from_millis(100));
    let p = Arc::new(memory_pipeline(remote.clone()));

    let started = std::time::Instant::now();
    let tasks: Vec<_> = (0..4u8)
        .map(|i| {
            let p = Arc::clone(&p);
            tokio::spawn(async move { p.process(&[i], "d.pdf", MODEL, &schema_a()).await })
        })
        .collect();
    for t in tasks {
        t.await.unwrap();
    }

    assert_eq!(remote.parses(), 4);
    assert!(started.elapsed() < Duration::from_millis(350));
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Events(Mutex<Vec<String>>);

impl PipelineProgressCallback for Events {
    fn on_parse_start(&self, _f: &str) {
        self.0.lock().unwrap().push("parse_start".into());
    }
    fn on_parse_cached(&self, _f: &str) {
        self.0.lock().unwrap().push("parse_cached".into());
    }
    fn on_extract_start(&self, _f: &str) {
        self.0.lock().unwrap().push("extract_start".into());
    }
    fn on_extract_cached(&self, _f: &str) {
        self.0.lock().unwrap().push("extract_cached".into());
    }
    fn on_document_complete(&self, _f: &str, _fp: &str, outcome: PipelineOutcome) {
        self.0.lock().unwrap().push(format!("complete:{outcome:?}"));
    }
}

/// Records `(filename, fingerprint)` for every start and completion.
#[derive(Default)]
struct Lifecycle {
    started: Mutex<Vec<(String, String)>>,
    completed: Mutex<Vec<(String, String)>>,
}

impl PipelineProgressCallback for Lifecycle {
    fn on_document_start(&self, f: &str, fp: &str) {
        self.started.lock().unwrap().push((f.into(), fp.into()));
    }
    fn on_document_complete(&self, f: &str, fp: &str, _outcome: PipelineOutcome) {
        self.completed.lock().unwrap().push((f.into(), fp.into()));
    }
}

#[tokio::test]
async fn test_progress_events_follow_cache_state() {
    let events = Arc::new(Events::default());
    let config = PipelineConfig::builder()
        .remote(FakeRemote::new())
        .store(Arc::new(MemoryCacheStore::new()))
        .progress_callback(events.clone())
        .build()
        .unwrap();
    let p = ExtractionPipeline::new(config).unwrap();

    p.process(b"doc", "a.pdf", MODEL, &schema_a()).await;
    p.process(b"doc", "a.pdf", MODEL, &schema_a()).await;

    assert_eq!(
        *events.0.lock().unwrap(),
        vec![
            "parse_start",
            "extract_start",
            "complete:Done",
            "parse_cached",
            "extract_cached",
            "complete:Done",
        ]
    );
}

#[tokio::test]
async fn test_completion_carries_the_start_fingerprint() {
    let lifecycle = Arc::new(Lifecycle::default());
    let remote = FakeRemote::new();
    remote.set_extract(Behaviour::Fail);
    let config = PipelineConfig::builder()
        .remote(remote)
        .store(Arc::new(MemoryCacheStore::new()))
        .progress_callback(lifecycle.clone())
        .build()
        .unwrap();
    let p = ExtractionPipeline::new(config).unwrap();

    let a = p.process(b"first", "report.pdf", MODEL, &schema_a()).await;
    let b = p.process(b"second", "report.pdf", MODEL, &schema_a()).await;
    assert_ne!(a.fingerprint, b.fingerprint);

    let started = lifecycle.started.lock().unwrap().clone();
    let completed = lifecycle.completed.lock().unwrap().clone();
    assert_eq!(started, completed);
    assert_eq!(
        completed,
        vec![
            ("report.pdf".to_string(), a.fingerprint.clone()),
            ("report.pdf".to_string(), b.fingerprint.clone()),
        ]
    );
}

// ── Filesystem backend ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_fs_cache_survives_pipeline_restart() {
    let dir = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();

    let first = pipeline_with(remote.clone(), Arc::new(FsCacheStore::open(dir.path()).unwrap()));
    let r1 = first.process(b"Jane", "cbc.pdf", MODEL, &schema_a()).await;
    drop(first);

    let entry = dir.path().join(&r1.fingerprint);
    for name in ["parsed.md", "parse_meta.json", "schema.hash", "extracted.json"] {
        assert!(entry.join(name).is_file(), "missing {name}");
    }
    let on_disk = std::fs::read_to_string(entry.join("parsed.md")).unwrap();
    assert!(on_disk.contains("<::"), "cache must keep the tagged original");

    let second = pipeline_with(remote.clone(), Arc::new(FsCacheStore::open(dir.path()).unwrap()));
    let r2 = second.process(b"Jane", "cbc.pdf", MODEL, &schema_a()).await;

    assert_eq!((remote.parses(), remote.extracts()), (1, 1));
    assert_eq!(r2.extraction, r1.extraction);
    assert_eq!(r2.markdown, r1.markdown);
}

#[tokio::test]
async fn test_fs_corrupt_extraction_is_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();
    let p = pipeline_with(remote.clone(), Arc::new(FsCacheStore::open(dir.path()).unwrap()));

    let r = p.process(b"Jane", "cbc.pdf", MODEL, &schema_a()).await;
    std::fs::write(dir.path().join(&r.fingerprint).join("extracted.json"), b"{not json").unwrap();

    let again = p.process(b"Jane", "cbc.pdf", MODEL, &schema_a()).await;
    assert_eq!(again.outcome, PipelineOutcome::Done);
    assert_eq!((remote.parses(), remote.extracts()), (1, 2));
}

#[tokio::test]
async fn test_config_cache_dir_builds_fs_store() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("nested/cache");
    let config = PipelineConfig::builder()
        .remote(FakeRemote::new())
        .cache_dir(&root)
        .build()
        .unwrap();
    let p = ExtractionPipeline::new(config).unwrap();

    let r = p.process(b"doc", "a.pdf", MODEL, &schema_a()).await;
    assert!(root.join(&r.fingerprint).join("parsed.md").is_file());
}

// ── Logging ──────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8(self.buf.lock().unwrap().clone()).unwrap()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    (capture, tracing::subscriber::set_default(subscriber))
}

#[tokio::test]
async fn test_stage_failure_is_logged_as_warning() {
    let (logs, _guard) = capture_logs();
    let remote = FakeRemote::new();
    remote.set_parse(Behaviour::Fail);
    let p = memory_pipeline(remote.clone());

    let r = p.process(b"doc", "bad.pdf", MODEL, &schema_a()).await;
    assert_eq!(r.outcome, PipelineOutcome::ParseFailed);

    let out = logs.contents();
    let line = out
        .lines()
        .find(|l| l.contains("bad.pdf: Parse failed"))
        .unwrap_or_else(|| panic!("no failure line in:\n{out}"));
    assert!(line.contains("WARN"), "got: {line}");
    assert!(line.contains("401"), "got: {line}");
}

#[tokio::test]
async fn test_cache_hit_is_logged() {
    let (logs, _guard) = capture_logs();
    let remote = FakeRemote::new();
    let p = memory_pipeline(remote.clone());

    p.process(b"doc", "a.pdf", MODEL, &schema_a()).await;
    assert!(!logs.contents().contains("Parse cache hit"));
    p.process(b"doc", "a.pdf", MODEL, &schema_a()).await;
    assert!(logs.contents().contains("Parse cache hit"));
}
