use crate::{
    config::ModelSettings,
    model_service::{check_input_shape, InferenceError, OutputTensor, WeightModel, OUTPUT_SHAPE},
    preprocess::InputTensor,
};
use ndarray::Ix2;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("failed to load model: {0}")]
    Ort(#[from] ort::Error),
    #[error("model declares no {0} tensor")]
    MissingTensor(&'static str),
}

pub struct OrtWeightModel {
    session: Session,
    input_name: String,
    output_name: String,
    input_shape: Vec<i64>,
    output_shape: Vec<i64>,
}

impl OrtWeightModel {
    pub fn load(model_settings: &ModelSettings) -> Result<Self, ModelLoadError> {
        let model_path = model_settings.get_path();
        if let Err(e) = model_settings.validate() {
            tracing::error!("Model validation failed: {}", e);
            return Err(ModelLoadError::NotFound(model_path));
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(model_settings.intra_threads)?
            .commit_from_file(&model_path)?;

        let input = session
            .inputs
            .first()
            .ok_or(ModelLoadError::MissingTensor("input"))?;
        let output = session
            .outputs
            .first()
            .ok_or(ModelLoadError::MissingTensor("output"))?;

        let input_name = input.name.clone();
        let output_name = output.name.clone();
        let input_shape = input
            .input_type
            .tensor_shape()
            .map(|shape| shape.to_vec())
            .unwrap_or_default();
        let output_shape = output
            .output_type
            .tensor_shape()
            .map(|shape| shape.to_vec())
            .unwrap_or_default();

        tracing::info!(
            model = %model_path.display(),
            input = %input_name,
            ?input_shape,
            output = %output_name,
            ?output_shape,
            "Loaded weight model"
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            input_shape,
            output_shape,
        })
    }
}

impl WeightModel for OrtWeightModel {
    fn predict(&mut self, input: &InputTensor) -> Result<OutputTensor, InferenceError> {
        check_input_shape(input)?;

        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| InferenceError::Runtime(format!("failed to build tensor: {}", e)))?;

        tracing::debug!("Running weight model on input {}", self.input_name);
        let outputs = self
            .session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Runtime(format!("session run failed: {}", e)))?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Runtime(format!("failed to extract tensor: {}", e)))?;

        let array = ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| InferenceError::Runtime(format!("invalid tensor shape: {}", e)))?;
        let actual = array.shape().to_vec();

        array
            .into_dimensionality::<Ix2>()
            .ok()
            .filter(|output| output.shape() == OUTPUT_SHAPE)
            .ok_or(InferenceError::OutputShape {
                expected: OUTPUT_SHAPE.to_vec(),
                actual,
            })
    }

    fn input_shape(&self) -> &[i64] {
        &self.input_shape
    }

    fn output_shape(&self) -> &[i64] {
        &self.output_shape
    }

    fn close(self) {
        tracing::info!("Releasing weight model session");
        drop(self.session);
    }
}
