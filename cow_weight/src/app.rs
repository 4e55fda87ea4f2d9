use crate::{
    config::Config,
    image_source::{spawn_line_reader, ImageSource, ImageSourceKind, InputLines, PromptImageSource},
    model_service::WeightModel,
    ort_service::OrtWeightModel,
    screen::Session,
    workflow::PredictionWorkflow,
};
use std::{error::Error, future::Future, str::FromStr};
use tokio::{signal, sync::watch};

const HELP: &str = "Commands: camera | gallery | hint | show | help | quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pick(ImageSourceKind),
    ToggleHint,
    Show,
    Help,
    Quit,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown command `{0}`")]
pub struct UnknownCommand(String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "camera" | "c" => Ok(Command::Pick(ImageSourceKind::Camera)),
            "gallery" | "g" => Ok(Command::Pick(ImageSourceKind::Gallery)),
            "hint" | "h" => Ok(Command::ToggleHint),
            "show" | "s" | "" => Ok(Command::Show),
            "help" | "?" => Ok(Command::Help),
            "quit" | "q" | "exit" => Ok(Command::Quit),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model = match OrtWeightModel::load(&config.model) {
        Ok(model) => Some(model),
        Err(e) => {
            tracing::error!("Failed to load weight model: {}", e);
            None
        }
    };

    let input = spawn_line_reader(std::io::BufReader::new(std::io::stdin()))?;
    let workflow = PredictionWorkflow::new(
        model,
        PromptImageSource::new(input.clone()),
        Session::new(config.screen.show_hint_on_start),
    );

    run_session(workflow, input, shutdown_signal()).await
}

/// Runs the screen until `quit`, end of input, or `shutdown` resolves, then
/// closes the model.
pub async fn run_session<M, S>(
    workflow: PredictionWorkflow<M, S>,
    input: InputLines,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Box<dyn Error>>
where
    M: WeightModel,
    S: ImageSource,
{
    let renderer = tokio::spawn(render_updates(workflow.subscribe()));
    println!("{}", HELP);

    let result = tokio::select! {
        result = run_commands(&workflow, input) => result,
        _ = shutdown => {
            tracing::info!("Shutdown signal received, closing session");
            Ok(())
        }
    };

    renderer.abort();
    workflow.shutdown();
    tracing::info!("Session closed");

    result
}

/// Reads commands until `quit` or end of input. Predictions run as their own
/// tasks so a new pick can be made while one is in flight.
pub async fn run_commands<M, S>(
    workflow: &PredictionWorkflow<M, S>,
    input: InputLines,
) -> Result<(), Box<dyn Error>>
where
    M: WeightModel,
    S: ImageSource,
{
    loop {
        let line = input.lock().await.recv().await;
        let Some(line) = line else {
            tracing::debug!("Input closed");
            return Ok(());
        };

        match line?.parse::<Command>() {
            Ok(Command::Pick(kind)) => {
                if let Some(ticket) = workflow.acquire(kind).await {
                    let workflow = workflow.clone();
                    tokio::spawn(async move { workflow.predict(ticket).await });
                }
            }
            Ok(Command::ToggleHint) => {
                workflow.toggle_hint();
            }
            Ok(Command::Show) => println!("{}", workflow.snapshot().render()),
            Ok(Command::Help) => println!("{}", HELP),
            Ok(Command::Quit) => return Ok(()),
            Err(e) => println!("{}. {}", e, HELP),
        }
    }
}

async fn render_updates(mut updates: watch::Receiver<Session>) {
    println!("{}", updates.borrow_and_update().render());
    while updates.changed().await.is_ok() {
        println!("\n{}", updates.borrow_and_update().render());
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
