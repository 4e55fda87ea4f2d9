use async_trait::async_trait;
use std::{
    borrow::Cow,
    fmt,
    io::{self, BufRead},
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

const INPUT_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSourceKind {
    Camera,
    Gallery,
}

impl ImageSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSourceKind::Camera => "camera",
            ImageSourceKind::Gallery => "gallery",
        }
    }
}

impl fmt::Display for ImageSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("failed to pick image from {kind}: {source}")]
    Io {
        kind: ImageSourceKind,
        source: io::Error,
    },
    #[error("{0} picker input is closed")]
    Closed(ImageSourceKind),
}

/// Hands out the path of a photo chosen or captured by the user.
///
/// `Ok(None)` means the user cancelled, which is not an error.
#[async_trait]
pub trait ImageSource: Send + Sync + 'static {
    async fn pick(&self, kind: ImageSourceKind) -> Result<Option<PathBuf>, AcquisitionError>;
}

/// Lines of user input, shared by the command loop and the picker.
pub type InputLines = Arc<Mutex<mpsc::Receiver<io::Result<String>>>>;

/// Reads `reader` line by line on its own thread and forwards the lines.
///
/// A read blocked on the terminal never holds up the runtime, so the session
/// can shut down while the user is idle. Bytes that are not UTF-8 are replaced
/// rather than ending the input. The thread stops at end of input, after
/// forwarding a read error, or once every receiver is gone.
pub fn spawn_line_reader<R>(mut reader: R) -> io::Result<InputLines>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(INPUT_BUFFER);

    std::thread::Builder::new()
        .name("input-reader".to_string())
        .spawn(move || {
            let mut buf = Vec::new();
            loop {
                buf.clear();
                let line = match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => Ok(decode_line(&buf)),
                    Err(e) => Err(e),
                };
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
            tracing::debug!("Input reader finished");
        })?;

    Ok(Arc::new(Mutex::new(rx)))
}

fn decode_line(bytes: &[u8]) -> String {
    let line = String::from_utf8_lossy(bytes);
    if let Cow::Owned(_) = line {
        tracing::warn!("Input line is not valid UTF-8");
    }
    line.trim_end_matches(['\n', '\r']).to_string()
}

/// Terminal picker: asks for a file path on the shared input.
/// An empty answer cancels the pick.
pub struct PromptImageSource {
    lines: InputLines,
}

impl PromptImageSource {
    pub fn new(lines: InputLines) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl ImageSource for PromptImageSource {
    async fn pick(&self, kind: ImageSourceKind) -> Result<Option<PathBuf>, AcquisitionError> {
        println!("{} image path (empty to cancel):", kind);

        let line = self.lines.lock().await.recv().await;
        let line = match line {
            Some(line) => line.map_err(|source| AcquisitionError::Io { kind, source })?,
            None => return Err(AcquisitionError::Closed(kind)),
        };

        match line.trim() {
            "" => {
                tracing::debug!(%kind, "Image pick cancelled");
                Ok(None)
            }
            path => {
                tracing::debug!(%kind, path, "Image picked");
                Ok(Some(PathBuf::from(path)))
            }
        }
    }
}
