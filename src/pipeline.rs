//! The classification pipeline turns one image into one outcome. Conversion,
//! model loading and inference run on tokio's blocking pool, so the caller's
//! task is never blocked on decoding or the forward pass.

use crate::classifier::{Classification, Classifier, ModelLoader};
use crate::error::ClassifyError;
use crate::input::{self, Image};
use crate::settings::Settings;
use once_cell::sync::OnceCell;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::*;

/// The result of one classification request
pub type Outcome = Result<Classification, ClassifyError>;

/// Owns the classifier, created on the first request and kept for the
/// lifetime of the pipeline. Cloning shares the same classifier.
///
/// Work is spawned on the runtime the pipeline was built with, so requests
/// can be submitted from threads that are not part of it (a UI thread).
#[derive(Clone)]
pub struct ClassificationPipeline {
    runtime: Handle,
    loader: Arc<dyn ModelLoader>,
    model: Arc<OnceCell<Arc<dyn Classifier>>>,
    input_size: (u32, u32),
    top_n: usize,
}

impl Debug for ClassificationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ClassificationPipeline {{ loaded: {}, input_size: {:?}, top_n: {} }}",
            self.is_loaded(),
            self.input_size,
            self.top_n
        )
    }
}

impl ClassificationPipeline {
    /// A pipeline on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// When called outside a tokio runtime; use `new_in` there.
    pub fn new<L: ModelLoader + 'static>(loader: L, settings: &Settings) -> Self {
        Self::new_in(loader, settings, Handle::current())
    }

    /// A pipeline whose requests run on `runtime`
    pub fn new_in<L: ModelLoader + 'static>(loader: L, settings: &Settings, runtime: Handle) -> Self {
        ClassificationPipeline {
            runtime,
            loader: Arc::new(loader),
            model: Arc::new(OnceCell::new()),
            input_size: (settings.input_width, settings.input_height),
            top_n: settings.top_n,
        }
    }

    /// A pipeline over the TorchScript model named in `settings`
    #[cfg(feature = "torch")]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(crate::torch::TorchLoader::new(settings.clone()), settings)
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Whether the classifier has been created yet
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Start classifying `image` on a worker and return immediately. May be
    /// called from any thread.
    pub fn submit(&self, image: Image) -> JoinHandle<Outcome> {
        let pipeline = self.clone();
        self.runtime.spawn(async move { pipeline.classify(image).await })
    }

    /// Classify `image`. Always resolves to exactly one outcome, even if the
    /// classifier panics.
    #[tracing::instrument(skip_all, fields(bytes = image.len()))]
    pub async fn classify(&self, image: Image) -> Outcome {
        info!("classifying image");
        let pipeline = self.clone();
        let outcome = match self.runtime.spawn_blocking(move || pipeline.run(&image)).await {
            Ok(outcome) => outcome,
            Err(e) => Err(ClassifyError::Inference(format!("classifier worker failed: {e}"))),
        };

        match &outcome {
            Ok(classification) => info!("classified as {classification}"),
            Err(e) => warn!(kind = ?e.kind(), "classification failed: {e}"),
        }
        outcome
    }

    fn run(&self, image: &Image) -> Outcome {
        let (width, height) = self.input_size;
        let input = input::convert(image, width, height)?;

        let model = self.model.get_or_try_init(|| {
            debug!("loading classifier");
            self.loader.load()
        })?;

        let predictions = model.classify(&input)?;
        debug!("classifier returned {} predictions", predictions.len());
        Classification::ranked(predictions, self.top_n)
    }
}
