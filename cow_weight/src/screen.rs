use std::{
    fmt,
    path::{Path, PathBuf},
};

pub const TITLE: &str = "Cow Weight Estimator";

pub const HINT: &str = "Tips for an accurate estimate:\n\
  - photograph the cow from the side, whole body in frame\n\
  - stand level with the animal on flat ground\n\
  - use daylight and avoid strong shadows";

const EMPTY_PROMPT: &str = "Take or choose a photo of a cow to estimate its weight.";

/// Predicted weight in kilograms, exactly as returned by the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weight(f32);

impl Weight {
    pub fn from_kg(kg: f32) -> Self {
        Self(kg)
    }

    pub fn kg(&self) -> f32 {
        self.0
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} kg", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScreenState {
    #[default]
    Empty,
    Loading,
    Result(Weight),
    Error(String),
}

impl ScreenState {
    pub fn name(&self) -> &'static str {
        match self {
            ScreenState::Empty => "empty",
            ScreenState::Loading => "loading",
            ScreenState::Result(_) => "result",
            ScreenState::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    image: Option<PathBuf>,
    state: ScreenState,
    hint_visible: bool,
}

impl Session {
    pub fn new(hint_visible: bool) -> Self {
        Self {
            hint_visible,
            ..Self::default()
        }
    }

    pub fn state(&self) -> &ScreenState {
        &self.state
    }

    pub fn image(&self) -> Option<&Path> {
        self.image.as_deref()
    }

    pub fn hint_visible(&self) -> bool {
        self.hint_visible
    }

    pub fn set_state(&mut self, state: ScreenState) {
        tracing::debug!(from = self.state.name(), to = state.name(), "Screen state change");
        self.state = state;
    }

    /// Shows a freshly acquired image and drops any previous result or error.
    pub fn begin(&mut self, image: PathBuf) {
        self.image = Some(image);
        self.set_state(ScreenState::Loading);
    }

    pub fn toggle_hint(&mut self) -> bool {
        self.hint_visible = !self.hint_visible;
        self.hint_visible
    }

    pub fn render(&self) -> String {
        let mut lines = vec![format!("== {} ==", TITLE)];

        if self.hint_visible {
            lines.push(HINT.to_string());
        }

        if let Some(image) = &self.image {
            lines.push(format!("Image: {}", image.display()));
        }

        lines.push(match &self.state {
            ScreenState::Empty => EMPTY_PROMPT.to_string(),
            ScreenState::Loading => "Estimating weight...".to_string(),
            ScreenState::Result(weight) => format!("Estimated weight: {}", weight),
            ScreenState::Error(message) => format!("Error: {}", message),
        });

        lines.join("\n")
    }
}
