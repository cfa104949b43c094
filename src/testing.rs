//! Scripted collaborators and a wired-up harness for unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use crate::clients::{
    AnalysisRequest, CompositionRequest, GenerationClient, RenderingRequest, Structurer,
    StructuringPhase, StructuringRequest, Vectorizer,
};
use crate::model::{
    AnalysisPayload, AnalysisRecord, Composition, ElementSpec, ElementTree, RenderedImage, Row,
    RowId,
};
use crate::observability::{ActivityLog, Metrics};
use crate::pipeline::stage::Stage;
use crate::pipeline::{CancellationRegistry, StageProcessor};
use crate::error::PersistenceError;
use crate::store::{KeyValueStore, MemoryStore, Workspace};

pub(crate) fn sample_analysis() -> AnalysisPayload {
    AnalysisPayload::Parsed(AnalysisRecord::with_frames(vec![json!({
        "verb": "querer",
        "object": "agua"
    })]))
}

pub(crate) fn sample_composition() -> Composition {
    Composition::new(
        ElementTree::from_specs(&[ElementSpec::branch(
            "person",
            vec![ElementSpec::leaf("glass")],
        )]),
        "a person holding a glass of water",
    )
}

pub(crate) fn sample_image() -> RenderedImage {
    RenderedImage::new("image/png", vec![0x89, b'P', b'N', b'G'])
}

/// Lets a test act while a collaborator call is in flight.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    pub(crate) entered: Notify,
    pub(crate) release: Notify,
}

/// Generation stub returning fixed payloads, with per-stage failures and an
/// optional pause point.
#[derive(Default)]
pub(crate) struct ScriptedGeneration {
    failures: Mutex<HashSet<Stage>>,
    pause: Option<(Stage, Arc<Gate>)>,
    calls: Mutex<Vec<Stage>>,
}

impl ScriptedGeneration {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn pause_at(mut self, stage: Stage, gate: Arc<Gate>) -> Self {
        self.pause = Some((stage, gate));
        self
    }

    pub(crate) fn fail_at(&self, stage: Stage) {
        self.failures.lock().expect("failures lock").insert(stage);
    }

    pub(crate) fn calls(&self) -> Vec<Stage> {
        self.calls.lock().expect("calls lock").clone()
    }

    async fn enter(&self, stage: Stage) -> Result<()> {
        self.calls.lock().expect("calls lock").push(stage);
        if let Some((paused, gate)) = &self.pause {
            if *paused == stage {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
        }
        if self.failures.lock().expect("failures lock").contains(&stage) {
            return Err(anyhow!("{stage} service unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl GenerationClient for ScriptedGeneration {
    async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisPayload> {
        self.enter(Stage::Analysis).await?;
        Ok(sample_analysis())
    }

    async fn compose(&self, _request: &CompositionRequest) -> Result<Composition> {
        self.enter(Stage::Composition).await?;
        Ok(sample_composition())
    }

    async fn render(&self, _request: &RenderingRequest) -> Result<RenderedImage> {
        self.enter(Stage::Rendering).await?;
        Ok(sample_image())
    }
}

pub(crate) struct StubVectorizer;

#[async_trait]
impl Vectorizer for StubVectorizer {
    async fn trace(
        &self,
        image: &RenderedImage,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<String> {
        progress(0);
        progress(100);
        Ok(format!("<svg data-bytes=\"{}\"><path d=\"M0 0\"/></svg>", image.data.len()))
    }
}

#[derive(Default)]
pub(crate) struct StubStructurer {
    pub(crate) phases: Mutex<Vec<StructuringPhase>>,
}

#[async_trait]
impl Structurer for StubStructurer {
    async fn structure(
        &self,
        request: &StructuringRequest,
        phase: &(dyn Fn(StructuringPhase) + Send + Sync),
    ) -> Result<String> {
        for current in [
            StructuringPhase::Sending,
            StructuringPhase::Receiving,
            StructuringPhase::Sanitizing,
        ] {
            self.phases.lock().expect("phases lock").push(current);
            phase(current);
        }
        Ok(format!(
            "<svg><title>{}</title><g id=\"person\"/></svg>",
            request.utterance
        ))
    }
}

/// In-memory storage that can hold one write on a [`Gate`], so a test can
/// act between a commit and the step that follows it.
#[derive(Default)]
pub(crate) struct PausingStore {
    inner: MemoryStore,
    /// Writes still let through before holding, and the gate to hold on.
    armed: Mutex<Option<(usize, Arc<Gate>)>>,
}

impl PausingStore {
    /// Lets `skip` writes through, then holds the next one until the
    /// returned gate is released.
    pub(crate) fn pause_write_after(&self, skip: usize) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.armed.lock().expect("armed lock") = Some((skip, Arc::clone(&gate)));
        gate
    }

    fn take_gate(&self) -> Option<Arc<Gate>> {
        let mut armed = self.armed.lock().expect("armed lock");
        let hold = match armed.as_mut() {
            Some((skip, _)) if *skip > 0 => {
                *skip -= 1;
                false
            }
            Some(_) => true,
            None => false,
        };
        if hold {
            armed.take().map(|(_, gate)| gate)
        } else {
            None
        }
    }
}

#[async_trait]
impl KeyValueStore for PausingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        if let Some(gate) = self.take_gate() {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.inner.remove(key).await
    }
}

/// Workspace, registry and processor over in-memory storage.
pub(crate) struct Harness {
    pub(crate) workspace: Arc<Workspace>,
    pub(crate) cancellations: Arc<CancellationRegistry>,
    pub(crate) activity: Arc<ActivityLog>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) generation: Arc<ScriptedGeneration>,
    pub(crate) processor: Arc<StageProcessor>,
}

impl Harness {
    pub(crate) async fn new(generation: ScriptedGeneration) -> Self {
        Self::with_storage(generation, Arc::new(MemoryStore::new())).await
    }

    pub(crate) async fn with_storage(
        generation: ScriptedGeneration,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        let activity = Arc::new(ActivityLog::default());
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let workspace = Arc::new(
            Workspace::load(storage, Arc::clone(&activity), Arc::clone(&metrics)).await,
        );
        let cancellations = Arc::new(CancellationRegistry::new());
        let generation = Arc::new(generation);
        let processor = Arc::new(StageProcessor::new(
            Arc::clone(&workspace),
            Arc::clone(&generation) as Arc<dyn GenerationClient>,
            Arc::clone(&cancellations),
            Arc::clone(&metrics),
        ));
        Self {
            workspace,
            cancellations,
            activity,
            metrics,
            generation,
            processor,
        }
    }

    pub(crate) async fn create_row(&self, utterance: &str) -> RowId {
        self.workspace.write(|rows| rows.create(utterance)).await
    }

    pub(crate) fn row(&self, id: &RowId) -> Row {
        self.workspace.row(id).expect("row exists")
    }
}
