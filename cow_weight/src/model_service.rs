use crate::preprocess::{InputTensor, INPUT_SHAPE};
use ndarray::Array2;
use thiserror::Error;

pub const OUTPUT_SHAPE: [usize; 2] = [1, 1];

/// Model output: a single weight in kilograms, shape `(1, 1)`.
pub type OutputTensor = Array2<f32>;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("expected input tensor of shape {expected:?}, got {actual:?}")]
    InputShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("expected output tensor of shape {expected:?}, got {actual:?}")]
    OutputShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("inference failed: {0}")]
    Runtime(String),
}

/// A loaded weight regression model.
///
/// Implementations own the native resources behind the model and free them
/// in [`WeightModel::close`].
pub trait WeightModel: Send + 'static {
    fn predict(&mut self, input: &InputTensor) -> Result<OutputTensor, InferenceError>;

    fn input_shape(&self) -> &[i64];

    fn output_shape(&self) -> &[i64];

    fn close(self)
    where
        Self: Sized;
}

pub fn check_input_shape(input: &InputTensor) -> Result<(), InferenceError> {
    if input.shape() != INPUT_SHAPE {
        return Err(InferenceError::InputShape {
            expected: INPUT_SHAPE.to_vec(),
            actual: input.shape().to_vec(),
        });
    }
    Ok(())
}

pub fn weight_from_output(output: &OutputTensor) -> Result<f32, InferenceError> {
    if output.shape() != OUTPUT_SHAPE {
        return Err(InferenceError::OutputShape {
            expected: OUTPUT_SHAPE.to_vec(),
            actual: output.shape().to_vec(),
        });
    }
    Ok(output[[0, 0]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    #[test]
    fn test_weight_from_output() {
        let output = array![[42.5]];

        assert_eq!(weight_from_output(&output).unwrap(), 42.5);
    }

    #[test]
    fn test_weight_passes_through_unbounded_values() {
        assert_eq!(weight_from_output(&array![[-3.25]]).unwrap(), -3.25);
        assert_eq!(weight_from_output(&array![[12000.0]]).unwrap(), 12000.0);
    }

    #[test]
    fn test_weight_from_wrong_output_shape() {
        let output = array![[1.0, 2.0]];

        let err = weight_from_output(&output).unwrap_err();
        assert!(matches!(err, InferenceError::OutputShape { ref actual, .. } if actual == &[1, 2]));
    }

    #[test]
    fn test_check_input_shape() {
        let input: InputTensor = Array::zeros((1, 128, 128, 3));
        assert!(check_input_shape(&input).is_ok());

        let input: InputTensor = Array::zeros((1, 3, 128, 128));
        assert!(matches!(
            check_input_shape(&input),
            Err(InferenceError::InputShape { .. })
        ));
    }
}
