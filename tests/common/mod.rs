//! 統合テスト用の共有スタブ。
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use picto_studio::Studio;
use picto_studio::clients::{
    AnalysisRequest, CompositionRequest, GenerationClient, RenderingRequest, Structurer,
    StructuringPhase, StructuringRequest, Vectorizer,
};
use picto_studio::model::{
    AnalysisPayload, AnalysisRecord, Composition, ElementSpec, ElementTree, RenderedImage,
};
use picto_studio::pipeline::Stage;
use picto_studio::store::KeyValueStore;

#[derive(Debug, Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// Fixed payloads per stage; stages can be made to fail or to wait on a
/// [`Gate`].
#[derive(Default)]
pub struct StubGeneration {
    failures: Mutex<HashSet<Stage>>,
    pause: Mutex<Option<(Stage, Arc<Gate>)>>,
    calls: Mutex<Vec<Stage>>,
}

impl StubGeneration {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_at(&self, stage: Stage) {
        self.failures.lock().expect("failures lock").insert(stage);
    }

    pub fn heal(&self) {
        self.failures.lock().expect("failures lock").clear();
    }

    pub fn pause_at(&self, stage: Stage) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.pause.lock().expect("pause lock") = Some((stage, Arc::clone(&gate)));
        gate
    }

    pub fn calls(&self) -> Vec<Stage> {
        self.calls.lock().expect("calls lock").clone()
    }

    async fn enter(&self, stage: Stage) -> Result<()> {
        self.calls.lock().expect("calls lock").push(stage);
        let gate = self
            .pause
            .lock()
            .expect("pause lock")
            .as_ref()
            .filter(|(paused, _)| *paused == stage)
            .map(|(_, gate)| Arc::clone(gate));
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.failures.lock().expect("failures lock").contains(&stage) {
            return Err(anyhow!("{stage} backend returned 503"));
        }
        Ok(())
    }
}

#[async_trait]
impl GenerationClient for StubGeneration {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisPayload> {
        self.enter(Stage::Analysis).await?;
        Ok(AnalysisPayload::Parsed(AnalysisRecord::with_frames(vec![
            json!({ "utterance": request.utterance }),
        ])))
    }

    async fn compose(&self, _request: &CompositionRequest) -> Result<Composition> {
        self.enter(Stage::Composition).await?;
        Ok(Composition::new(
            ElementTree::from_specs(&[ElementSpec::branch(
                "person",
                vec![ElementSpec::leaf("glass")],
            )]),
            "a person holding a glass",
        ))
    }

    async fn render(&self, _request: &RenderingRequest) -> Result<RenderedImage> {
        self.enter(Stage::Rendering).await?;
        Ok(RenderedImage::new("image/png", vec![0x89, b'P', b'N', b'G']))
    }
}

pub struct StubVectorizer;

#[async_trait]
impl Vectorizer for StubVectorizer {
    async fn trace(
        &self,
        _image: &RenderedImage,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<String> {
        progress(100);
        Ok("<svg><path d=\"M0 0L1 1\"/></svg>".to_string())
    }
}

pub struct StubStructurer;

#[async_trait]
impl Structurer for StubStructurer {
    async fn structure(
        &self,
        request: &StructuringRequest,
        phase: &(dyn Fn(StructuringPhase) + Send + Sync),
    ) -> Result<String> {
        phase(StructuringPhase::Sending);
        phase(StructuringPhase::Receiving);
        phase(StructuringPhase::Sanitizing);
        Ok(format!(
            "```svg\n<svg><title>{}</title><g id=\"person\"/></svg>\n```",
            request.utterance
        ))
    }
}

pub async fn studio(generation: Arc<StubGeneration>) -> Studio {
    Studio::builder(generation)
        .with_vectorizer(Arc::new(StubVectorizer))
        .with_structurer(Arc::new(StubStructurer))
        .build()
        .await
        .expect("studio builds")
}

pub async fn studio_on(generation: Arc<StubGeneration>, storage: Arc<dyn KeyValueStore>) -> Studio {
    Studio::builder(generation)
        .with_storage(storage)
        .build()
        .await
        .expect("studio builds")
}
