//! Drives one screen session: acquire an image, estimate its weight, show it.
//!
//! State lives in a `watch` channel so the renderer sees every change. Each
//! acquisition bumps a generation counter; a prediction whose generation is no
//! longer current stops at the next checkpoint and never writes state, so the
//! most recently submitted image always wins. Model access is serialized by a
//! mutex.

use crate::{
    image_source::{AcquisitionError, ImageSource, ImageSourceKind},
    model_service::{weight_from_output, InferenceError, WeightModel},
    preprocess::{preprocess, DecodeError},
    screen::{ScreenState, Session, Weight},
};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("model not loaded")]
    ModelNotLoaded,
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error("failed to read image {path:?}: {source}")]
    ReadImage {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not read image: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("model lock poisoned")]
    Poisoned,
}

/// Proof that an image was acquired; consumed by [`PredictionWorkflow::predict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
    image: PathBuf,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn image(&self) -> &PathBuf {
        &self.image
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Committed,
    Superseded,
}

pub struct PredictionWorkflow<M: WeightModel, S: ImageSource> {
    model: Arc<Mutex<Option<M>>>,
    image_source: Arc<S>,
    session: Arc<watch::Sender<Session>>,
    generation: Arc<AtomicU64>,
}

impl<M: WeightModel, S: ImageSource> Clone for PredictionWorkflow<M, S> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            image_source: self.image_source.clone(),
            session: self.session.clone(),
            generation: self.generation.clone(),
        }
    }
}

impl<M: WeightModel, S: ImageSource> PredictionWorkflow<M, S> {
    /// `model` is `None` when loading failed; every prediction then reports
    /// "model not loaded".
    pub fn new(model: Option<M>, image_source: S, session: Session) -> Self {
        match &model {
            Some(model) => tracing::info!(
                input_shape = ?model.input_shape(),
                output_shape = ?model.output_shape(),
                "Prediction workflow ready"
            ),
            None => tracing::warn!("Prediction workflow started without a model"),
        }

        let (session, _) = watch::channel(session);
        Self {
            model: Arc::new(Mutex::new(model)),
            image_source: Arc::new(image_source),
            session: Arc::new(session),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn snapshot(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn toggle_hint(&self) -> bool {
        let mut visible = false;
        self.session.send_modify(|session| visible = session.toggle_hint());
        visible
    }

    /// Asks the image source for a photo. On success the screen switches to
    /// loading and any in-flight prediction is superseded. Cancellation leaves
    /// the screen untouched.
    pub async fn acquire(&self, kind: ImageSourceKind) -> Option<Ticket> {
        match self.image_source.pick(kind).await {
            Ok(Some(image)) => {
                let mut ticket = None;
                self.session.send_modify(|session| {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    session.begin(image.clone());
                    ticket = Some(Ticket { generation, image });
                });
                ticket
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!("Image acquisition failed: {}", e);
                let message = PredictionError::from(e).to_string();
                self.session.send_modify(|session| {
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    session.set_state(ScreenState::Error(message));
                });
                None
            }
        }
    }

    #[instrument(skip(self, ticket), fields(generation = ticket.generation))]
    pub async fn predict(&self, ticket: Ticket) -> Outcome {
        let state = match self.estimate(&ticket).await {
            Ok(Some(weight)) => {
                tracing::info!(weight_kg = weight.kg(), "Estimated weight {}", weight);
                ScreenState::Result(weight)
            }
            Ok(None) => {
                tracing::debug!("Prediction superseded by a newer image");
                return Outcome::Superseded;
            }
            Err(e) => {
                tracing::error!("Prediction failed: {}", e);
                ScreenState::Error(e.to_string())
            }
        };

        self.commit(&ticket, state)
    }

    pub async fn pick_and_predict(&self, kind: ImageSourceKind) -> Option<Outcome> {
        let ticket = self.acquire(kind).await?;
        Some(self.predict(ticket).await)
    }

    /// Closes the model. Returns `false` if it was never loaded or is
    /// already closed.
    pub fn shutdown(&self) -> bool {
        let model = match self.model.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match model {
            Some(model) => {
                model.close();
                true
            }
            None => false,
        }
    }

    fn is_current(&self, ticket: &Ticket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.generation
    }

    fn model_loaded(&self) -> Result<bool, PredictionError> {
        let guard = self.model.lock().map_err(|_| PredictionError::Poisoned)?;
        Ok(guard.is_some())
    }

    // `Ok(None)` means the ticket went stale before a weight was produced.
    async fn estimate(&self, ticket: &Ticket) -> Result<Option<Weight>, PredictionError> {
        if !self.model_loaded()? {
            return Err(PredictionError::ModelNotLoaded);
        }
        if !self.is_current(ticket) {
            return Ok(None);
        }

        let image_data = tokio::fs::read(&ticket.image).await.map_err(|source| {
            PredictionError::ReadImage {
                path: ticket.image.clone(),
                source,
            }
        })?;
        if !self.is_current(ticket) {
            return Ok(None);
        }

        let input = preprocess(&image_data)?;
        drop(image_data);
        if !self.is_current(ticket) {
            return Ok(None);
        }

        let mut guard = self.model.lock().map_err(|_| PredictionError::Poisoned)?;
        let model = guard.as_mut().ok_or(PredictionError::ModelNotLoaded)?;
        let output = model.predict(&input)?;

        Ok(Some(Weight::from_kg(weight_from_output(&output)?)))
    }

    fn commit(&self, ticket: &Ticket, state: ScreenState) -> Outcome {
        let committed = self.session.send_if_modified(|session| {
            if !self.is_current(ticket) {
                return false;
            }
            session.set_state(state);
            true
        });

        if committed {
            Outcome::Committed
        } else {
            tracing::debug!("Discarding result of superseded prediction");
            Outcome::Superseded
        }
    }
}
