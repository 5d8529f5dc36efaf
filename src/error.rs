//! Errors a classification request can end in. Every one of them is terminal
//! for its request and is meant to be shown to the user as text.

use serde::Serialize;
use thiserror::Error;

/// The kind of failure, without its message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// The image could not be turned into model input
    Conversion,

    /// The classifier could not be initialized
    ModelLoad,

    /// The classifier failed while running
    Inference,

    /// The classifier ran but ranked nothing
    EmptyResult,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifyError {
    #[error("Could not read image: {0}")]
    Conversion(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Error: {0}")]
    Inference(String),

    #[error("Could not classify image: the model returned no results")]
    EmptyResult,
}

impl ClassifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassifyError::Conversion(_) => ErrorKind::Conversion,
            ClassifyError::ModelLoad(_) => ErrorKind::ModelLoad,
            ClassifyError::Inference(_) => ErrorKind::Inference,
            ClassifyError::EmptyResult => ErrorKind::EmptyResult,
        }
    }
}

impl From<image::ImageError> for ClassifyError {
    fn from(err: image::ImageError) -> Self {
        ClassifyError::Conversion(err.to_string())
    }
}

#[cfg(feature = "torch")]
impl From<tch::TchError> for ClassifyError {
    fn from(err: tch::TchError) -> Self {
        ClassifyError::Inference(err.to_string())
    }
}
