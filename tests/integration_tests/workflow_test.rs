//! End-to-end workspace tests
//!
//! Local volume -> registry -> workers -> translated chapters back on disk.

use novel_relay::models::{BackendId, Glossary};
use novel_relay::source::{ChapterSources, LocalVolumeStore};
use novel_relay::translator::{
    ChatBackend, SegmentTranslator, TranslatorError, TranslatorSettings, UploadPolicy,
};
use novel_relay::workspace::{Worker, WorkerReport, WorkspaceError, WorkspaceRegistry};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::fixtures::{create_volume, EchoBackend};

struct Harness {
    _dir: TempDir,
    store: Arc<LocalVolumeStore>,
    registry: WorkspaceRegistry,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalVolumeStore::new(dir.path()));
        let registry = WorkspaceRegistry::new(ChapterSources::new().with_local(store.clone()));
        Self {
            _dir: dir,
            store,
            registry,
        }
    }

    fn translator(&self, backend: Arc<dyn ChatBackend>) -> SegmentTranslator {
        SegmentTranslator::new(backend, TranslatorSettings::default())
    }

    /// Run `workers` workers until the registry drains
    async fn run(
        &self,
        descriptor: &str,
        translators: Vec<SegmentTranslator>,
    ) -> Vec<Result<WorkerReport, WorkspaceError>> {
        let cancel = CancellationToken::new();
        let handles: Vec<_> = translators
            .into_iter()
            .enumerate()
            .map(|(i, translator)| {
                let worker =
                    Worker::new(format!("worker-{i}"), translator, self.registry.clone());
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.run(cancel).await })
            })
            .collect();

        self.registry
            .add_job(descriptor.parse().unwrap(), "test volume")
            .await;
        tokio::time::timeout(
            Duration::from_secs(10),
            self.registry.wait_until_idle(&cancel),
        )
        .await
        .expect("registry did not drain");

        cancel.cancel();
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    async fn translation(&self, chapter_id: &str) -> Option<Vec<String>> {
        self.store
            .get_chapter("vol", chapter_id)
            .await
            .unwrap()
            .translations
            .remove(&BackendId::Sakura)
            .map(|t| t.paragraphs)
    }
}

#[tokio::test]
async fn test_volume_translated_end_to_end() {
    let harness = Harness::new();
    create_volume(
        &harness.store,
        "vol",
        Glossary::new(),
        &[
            ("c1", &["一行目", "", "<图片>cover.png", "二行目"]),
            ("c2", &["三行目"]),
            ("c3", &["", "  "]),
        ],
    )
    .await;

    let backend = EchoBackend::new();
    let translators = vec![
        harness.translator(backend.clone()),
        harness.translator(backend.clone()),
    ];
    let results = harness.run("sakura/local/vol", translators).await;

    let translated: usize = results
        .into_iter()
        .map(|r| r.unwrap().translated)
        .sum();
    assert_eq!(translated, 2);

    assert_eq!(
        harness.translation("c1").await.unwrap(),
        vec!["译一行目", "", "<图片>cover.png", "译二行目"]
    );
    assert_eq!(harness.translation("c2").await.unwrap(), vec!["译三行目"]);
    // Nothing to translate still counts as translated
    assert_eq!(harness.translation("c3").await.unwrap(), vec!["", "  "]);

    let records = harness.registry.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!((records[0].finished, records[0].failed, records[0].total), (3, 0, 3));

    let volume = harness.store.get_volume("vol").await.unwrap();
    assert!(volume
        .toc
        .iter()
        .all(|e| e.translations.get(&BackendId::Sakura).map(String::as_str) == Some("glossary-1")));
}

#[tokio::test]
async fn test_normal_level_skips_translated_chapters() {
    let harness = Harness::new();
    create_volume(&harness.store, "vol", Glossary::new(), &[("c1", &["一"]), ("c2", &["二"])]).await;

    let backend = EchoBackend::new();
    harness
        .run("sakura/local/vol?end=1", vec![harness.translator(backend.clone())])
        .await;
    assert_eq!(backend.calls(), 1);
    assert!(harness.translation("c2").await.is_none());

    harness
        .run("sakura/local/vol", vec![harness.translator(backend.clone())])
        .await;
    assert_eq!(backend.calls(), 2);
    assert_eq!(harness.translation("c2").await.unwrap(), vec!["译二"]);

    // Everything translated: the job is dropped without a record
    harness
        .run("sakura/local/vol", vec![harness.translator(backend.clone())])
        .await;
    assert_eq!(backend.calls(), 2);
    assert_eq!(harness.registry.records().await.len(), 2);

    // level=all forces a re-translation
    harness
        .run("sakura/local/vol?level=all", vec![harness.translator(backend.clone())])
        .await;
    assert_eq!(backend.calls(), 4);
}

#[tokio::test]
async fn test_glossary_stored_with_translation() {
    let harness = Harness::new();
    let mut glossary = Glossary::new();
    glossary.insert("魔王".to_string(), "魔王大人".to_string());
    create_volume(&harness.store, "vol", glossary, &[("c1", &["魔王が来た"])]).await;

    let backend = EchoBackend::new();
    harness
        .run("sakura/local/vol", vec![harness.translator(backend.clone())])
        .await;

    let chapter = harness.store.get_chapter("vol", "c1").await.unwrap();
    let stored = &chapter.translations[&BackendId::Sakura];
    assert_eq!(stored.glossary.get("魔王").map(String::as_str), Some("魔王大人"));
    assert_eq!(stored.paragraphs, vec!["译魔王が来た"]);
}

#[tokio::test]
async fn test_degraded_line_keeps_source_text() {
    let harness = Harness::new();
    create_volume(&harness.store, "vol", Glossary::new(), &[("c1", &["壊れた", "普通"])]).await;

    let backend = EchoBackend::degrading(&["壊れた"]);
    let results = harness
        .run("sakura/local/vol", vec![harness.translator(backend.clone())])
        .await;
    assert_eq!(results[0].as_ref().unwrap().translated, 1);

    // Three whole-segment attempts, then one request per line
    assert_eq!(backend.calls(), 5);
    assert_eq!(harness.translation("c1").await.unwrap(), vec!["壊れた", "译普通"]);
}

#[tokio::test]
async fn test_malfunctioning_backend_stops_worker() {
    let harness = Harness::new();
    create_volume(&harness.store, "vol", Glossary::new(), &[("c1", &["壊一", "壊二"])]).await;

    let backend = EchoBackend::degrading(&["壊"]);
    let results = harness
        .run("sakura/local/vol", vec![harness.translator(backend)])
        .await;

    assert!(matches!(
        results[0],
        Err(WorkspaceError::Translator(TranslatorError::BackendMalfunction(_)))
    ));
    assert!(harness.translation("c1").await.is_none());

    let records = harness.registry.records().await;
    assert_eq!((records[0].finished, records[0].failed), (0, 1));
}

#[tokio::test]
async fn test_blocked_translator_refuses_to_start() {
    let harness = Harness::new();
    let translator = harness
        .translator(EchoBackend::with_model("some-other-model"))
        .with_policy(UploadPolicy::murasaki());

    let worker = Worker::new("w", translator, harness.registry.clone());
    let result = worker.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(WorkspaceError::UploadBlocked(_))));
}
