//! Code for loading and running (trained) TorchScript image classifiers

use crate::classifier::{Classifier, ModelLoader, Prediction};
use crate::error::ClassifyError;
use crate::input::ModelInput;
use crate::settings::Settings;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use tch::vision::imagenet;
use tch::{no_grad, Device, Kind, Tensor};
use tracing::*;

/// Load and run a TorchScript classifier
pub struct TorchModel {
    /// The loaded torch model. libtorch modules are not reentrant, so calls
    /// are serialized
    model: Mutex<tch::CModule>,

    /// Label of each output index
    labels: Vec<String>,

    device: Device,

    top_n: i64,
}

impl Debug for TorchModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TorchModel {{ labels: {}, device: {:?}, top_n: {} }}",
            self.labels.len(),
            self.device,
            self.top_n
        )
    }
}

impl TorchModel {
    pub fn load(settings: &Settings) -> Result<Self, ClassifyError> {
        let device = match settings.cpu_only {
            true => Device::Cpu,
            false => Device::cuda_if_available(),
        };

        let model = tch::CModule::load_on_device(&settings.model_path, device)
            .map_err(|e| ClassifyError::ModelLoad(format!("{}: {e}", settings.model_path)))?;

        let labels = match &settings.labels_path {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|e| ClassifyError::ModelLoad(format!("{path}: {e}")))?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            None => imagenet::CLASSES.iter().map(|c| c.to_string()).collect(),
        };

        info!(
            "loaded model {} on {device:?} with {} labels",
            settings.model_path,
            labels.len()
        );

        Ok(TorchModel {
            model: Mutex::new(model),
            labels,
            device,
            top_n: settings.top_n as i64,
        })
    }

    fn forward(&self, input: &ModelInput) -> Result<Tensor, ClassifyError> {
        let image = Tensor::from_slice(&input.data)
            .f_view(input.shape())?
            .to_device(self.device);

        let model = self
            .model
            .lock()
            .map_err(|_| ClassifyError::Inference("model lock poisoned".into()))?;
        let output = no_grad(|| model.forward_ts(&[image]))?;

        Ok(output.f_softmax(-1, Kind::Float)?.f_view([-1])?)
    }
}

impl Classifier for TorchModel {
    /// Run image classification
    fn classify(&self, input: &ModelInput) -> Result<Vec<Prediction>, ClassifyError> {
        let output = self.forward(input)?;

        let classes = output.size()[0];
        if classes as usize != self.labels.len() {
            return Err(ClassifyError::Inference(format!(
                "model produced {classes} classes but {} labels are known",
                self.labels.len()
            )));
        }

        let (probabilities, indices) = output.f_topk(self.top_n.min(classes), -1, true, true)?;
        (0..probabilities.size()[0])
            .map(|i| -> Result<Prediction, ClassifyError> {
                let index = indices.f_int64_value(&[i])? as usize;
                let probability = probabilities.f_double_value(&[i])?;
                Ok(Prediction::new(
                    self.labels[index].clone(),
                    probability as f32,
                ))
            })
            .collect()
    }
}

/// Loads a `TorchModel` from settings when the pipeline first needs it
#[derive(Debug, Clone)]
pub struct TorchLoader {
    settings: Settings,
}

impl TorchLoader {
    pub fn new(settings: Settings) -> Self {
        TorchLoader { settings }
    }
}

impl ModelLoader for TorchLoader {
    fn load(&self) -> Result<Arc<dyn Classifier>, ClassifyError> {
        Ok(Arc::new(TorchModel::load(&self.settings)?))
    }
}
