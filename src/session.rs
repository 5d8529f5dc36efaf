//! The presentation side of classification: one result slot that the user
//! watches, fed by whichever image was selected last.
//!
//! Every selection gets the next selection number. A finished request only
//! lands in the slot if its number is still the current one; results of
//! images the user has since replaced are dropped.

use crate::input::Image;
use crate::pipeline::{ClassificationPipeline, Outcome};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::*;

/// What the user currently sees
#[derive(Debug, Clone, Default)]
pub enum View {
    /// Nothing selected yet
    #[default]
    Idle,

    /// Waiting on the classifier for `selection`
    Classifying { selection: u64 },

    /// The outcome for `selection`
    Done { selection: u64, outcome: Outcome },
}

impl View {
    /// The selection this view belongs to, 0 before the first one
    pub fn selection(&self) -> u64 {
        match self {
            View::Idle => 0,
            View::Classifying { selection } | View::Done { selection, .. } => *selection,
        }
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            View::Done { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            View::Idle => write!(f, "Select an image to classify"),
            View::Classifying { .. } => write!(f, "Classifying..."),
            View::Done {
                outcome: Ok(classification),
                ..
            } => write!(f, "{classification}"),
            View::Done { outcome: Err(e), .. } => write!(f, "{e}"),
        }
    }
}

type ResultCallback = Box<dyn Fn(u64, &Outcome) + Send + Sync>;

struct Inner {
    pipeline: ClassificationPipeline,
    view: watch::Sender<View>,
    on_result: Option<ResultCallback>,

    /// Held across a selection or a delivery, so the currency check, the slot
    /// write and the callback are not interleaved with a newer selection
    order: Mutex<()>,
}

/// A handle to one selection's request
#[derive(Debug)]
pub struct Ticket {
    pub selection: u64,

    /// Resolves to whether the result was shown (`false` when it was stale)
    pub handle: JoinHandle<bool>,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session {{ view: {:?} }}", *self.inner.view.borrow())
    }
}

impl Session {
    pub fn new(pipeline: ClassificationPipeline) -> Self {
        Self::build(pipeline, None)
    }

    /// A session that also calls `callback` with every outcome it shows, after
    /// the slot has been updated. The callback may read the session but must
    /// not select a new image.
    pub fn with_callback<F>(pipeline: ClassificationPipeline, callback: F) -> Self
    where
        F: Fn(u64, &Outcome) + Send + Sync + 'static,
    {
        Self::build(pipeline, Some(Box::new(callback)))
    }

    fn build(pipeline: ClassificationPipeline, on_result: Option<ResultCallback>) -> Self {
        let (view, _) = watch::channel(View::Idle);
        Session {
            inner: Arc::new(Inner {
                pipeline,
                view,
                on_result,
                order: Mutex::new(()),
            }),
        }
    }

    /// Watch the result slot
    pub fn subscribe(&self) -> watch::Receiver<View> {
        self.inner.view.subscribe()
    }

    /// A snapshot of the result slot
    pub fn view(&self) -> View {
        self.inner.view.borrow().clone()
    }

    /// Make `image` the current selection and classify it in the background.
    /// Returns immediately and may be called from any thread, including ones
    /// outside the pipeline's runtime.
    pub fn select(&self, image: Image) -> Ticket {
        let selection = {
            let _order = self.inner.lock_order();
            let selection = self.inner.view.borrow().selection() + 1;
            self.inner.view.send_replace(View::Classifying { selection });
            selection
        };
        debug!(selection, "image selected");

        let inner = self.inner.clone();
        let handle = self.inner.pipeline.runtime().spawn(async move {
            let outcome = inner.pipeline.classify(image).await;
            inner.deliver(selection, outcome)
        });

        Ticket { selection, handle }
    }
}

impl Inner {
    fn lock_order(&self) -> MutexGuard<'_, ()> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Show `outcome` if `selection` is still current. No newer selection can
    /// slip in between the check and the write, so a stale result never lands
    /// after a newer one.
    fn deliver(&self, selection: u64, outcome: Outcome) -> bool {
        let _order = self.lock_order();
        if self.view.borrow().selection() != selection {
            info!(selection, "discarding stale classification result");
            return false;
        }

        self.view.send_replace(View::Done {
            selection,
            outcome: outcome.clone(),
        });
        if let Some(callback) = &self.on_result {
            callback(selection, &outcome);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classifier, Prediction};
    use crate::error::{ClassifyError, ErrorKind};
    use crate::input::{test::solid_png, ModelInput};
    use crate::settings::Settings;
    use once_cell::sync::OnceCell;
    use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
    use tokio::runtime::{Builder, Handle};

    /// Labels red images "red" and everything else "blue". Red images block
    /// until the gate is opened.
    struct GatedClassifier {
        gate: Mutex<Receiver<()>>,
    }

    impl GatedClassifier {
        fn new() -> (Self, SyncSender<()>) {
            let (tx, rx) = sync_channel(1);
            (GatedClassifier { gate: Mutex::new(rx) }, tx)
        }
    }

    impl Classifier for GatedClassifier {
        fn classify(&self, input: &ModelInput) -> Result<Vec<Prediction>, ClassifyError> {
            if input.at(0, 0, 0) > 0.0 {
                self.gate.lock().unwrap().recv().unwrap();
                Ok(vec![Prediction::new("red", 0.9)])
            } else {
                Ok(vec![Prediction::new("blue", 0.8)])
            }
        }
    }

    fn pipeline_with<C: Classifier + 'static>(classifier: C) -> ClassificationPipeline {
        pipeline_in(classifier, Handle::current())
    }

    fn pipeline_in<C: Classifier + 'static>(classifier: C, runtime: Handle) -> ClassificationPipeline {
        let classifier: Arc<dyn Classifier> = Arc::new(classifier);
        let loader = move || -> Result<Arc<dyn Classifier>, ClassifyError> { Ok(classifier.clone()) };
        ClassificationPipeline::new_in(
            loader,
            &Settings {
                input_width: 16,
                input_height: 16,
                ..Settings::default()
            },
            runtime,
        )
    }

    const RED: [u8; 3] = [255, 0, 0];
    const BLUE: [u8; 3] = [0, 0, 255];

    #[tokio::test]
    async fn test_single_selection() {
        let (classifier, _gate) = GatedClassifier::new();
        let session = Session::new(pipeline_with(classifier));
        assert_eq!(session.view().to_string(), "Select an image to classify");

        let ticket = session.select(solid_png(20, 20, BLUE));
        assert_eq!(ticket.selection, 1);
        assert!(ticket.handle.await.unwrap());

        let view = session.view();
        assert_eq!(view.selection(), 1);
        assert_eq!(view.to_string(), "blue (80%)");
    }

    #[tokio::test]
    async fn test_stale_result_is_discarded() {
        let (classifier, gate) = GatedClassifier::new();
        let session = Session::new(pipeline_with(classifier));
        let mut rx = session.subscribe();

        // A is still running when B is selected and finishes first
        let a = session.select(solid_png(20, 20, RED));
        let b = session.select(solid_png(20, 20, BLUE));
        assert!(b.handle.await.unwrap());
        rx.wait_for(|v| v.outcome().is_some()).await.unwrap();

        gate.send(()).unwrap();
        assert!(!a.handle.await.unwrap());

        let view = session.view();
        assert_eq!(view.selection(), b.selection);
        assert_eq!(view.outcome().unwrap().as_ref().unwrap().top().label, "blue");
    }

    #[tokio::test]
    async fn test_pending_shows_classifying() {
        let (classifier, gate) = GatedClassifier::new();
        let session = Session::new(pipeline_with(classifier));

        let ticket = session.select(solid_png(20, 20, RED));
        assert_eq!(session.view().to_string(), "Classifying...");

        gate.send(()).unwrap();
        assert!(ticket.handle.await.unwrap());
        assert_eq!(session.view().to_string(), "red (90%)");
    }

    #[tokio::test]
    async fn test_callback_only_sees_current_results() {
        let (classifier, gate) = GatedClassifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let session = Session::with_callback(pipeline_with(classifier), move |selection, outcome| {
            sink.lock()
                .unwrap()
                .push((selection, outcome.as_ref().map(|c| c.top().label.clone()).ok()));
        });

        let a = session.select(solid_png(20, 20, RED));
        let b = session.select(solid_png(20, 20, BLUE));
        b.handle.await.unwrap();
        gate.send(()).unwrap();
        a.handle.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(2, Some("blue".to_string()))]);
    }

    #[tokio::test]
    async fn test_failure_is_shown_and_session_stays_usable() {
        let (classifier, _gate) = GatedClassifier::new();
        let session = Session::new(pipeline_with(classifier));

        let ticket = session.select(Image::from_bytes(vec![1, 2, 3]));
        assert!(ticket.handle.await.unwrap());
        let view = session.view();
        let err = view.outcome().unwrap().as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conversion);
        assert!(view.to_string().starts_with("Could not read image"));

        let ticket = session.select(solid_png(20, 20, BLUE));
        assert!(ticket.handle.await.unwrap());
        assert_eq!(session.view().to_string(), "blue (80%)");
    }

    #[test]
    fn test_select_from_thread_outside_runtime() {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let (classifier, _gate) = GatedClassifier::new();
        let session = Session::new(pipeline_in(classifier, runtime.handle().clone()));

        // A UI thread that is not part of the runtime
        let ui = session.clone();
        let ticket = std::thread::spawn(move || ui.select(solid_png(20, 20, BLUE)))
            .join()
            .unwrap();

        assert!(runtime.block_on(ticket.handle).unwrap());
        assert_eq!(session.view().to_string(), "blue (80%)");
    }

    #[tokio::test]
    async fn test_callback_can_read_session() {
        let (classifier, _gate) = GatedClassifier::new();
        let current: Arc<OnceCell<Session>> = Arc::new(OnceCell::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (cell, sink) = (current.clone(), seen.clone());
        let session = Session::with_callback(pipeline_with(classifier), move |selection, _| {
            if let Some(session) = cell.get() {
                let view = session.view();
                let watched = session.subscribe().borrow().to_string();
                sink.lock().unwrap().push((selection, view.to_string(), watched));
            }
        });
        current.set(session.clone()).unwrap();

        let ticket = session.select(solid_png(20, 20, BLUE));
        assert!(ticket.handle.await.unwrap());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, "blue (80%)".to_string(), "blue (80%)".to_string())]
        );
    }
}
