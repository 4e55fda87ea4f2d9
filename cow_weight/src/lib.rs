mod ort_service;

pub mod app;
pub mod config;
pub mod image_source;
pub mod model_service;
pub mod preprocess;
pub mod screen;
pub mod workflow;

pub use app::start_app;
pub use ort_service::{ModelLoadError, OrtWeightModel};
