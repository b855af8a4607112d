use anyhow::Context;
use clap::{Parser, Subcommand};
use livewatch_common::{CameraId, CameraSource};
use livewatch_viewer::overlay::{
    FixedSurface, OverlayRenderer, RenderLoop, SurfaceSize, TracingDrawTarget,
};
use livewatch_viewer::registry::CameraRegistryClient;
use livewatch_viewer::{load_config, LiveContext, SessionController};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (extension optional)
    #[arg(short, long, default_value = "config/livewatch")]
    config: String,

    /// Log level, overrides logging.level from the config
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage cameras registered with the monitoring backend
    #[command(subcommand)]
    Cameras(CameraCommand),

    /// Follow the live view headlessly until Ctrl+C
    Watch {
        /// Camera to select instead of the first one listed
        #[arg(long)]
        camera: Option<String>,

        /// Seconds between view summaries
        #[arg(long, default_value_t = 5)]
        report_interval: u64,
    },
}

#[derive(Subcommand, Debug)]
enum CameraCommand {
    List,
    Add { camera_id: String, source: String },
    Start { camera_id: String },
    Stop { camera_id: String },
    Delete { camera_id: String },
    /// Check whether the backend can open a source
    Test { source: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config).context("failed to load configuration")?;
    init_logging(args.log_level.as_deref().unwrap_or(&config.logging.level))?;
    info!("Using monitoring API at {}", config.api.base_url);

    let context = LiveContext::from_config(config)?;
    match args.command {
        Command::Cameras(command) => run_camera_command(context, command).await,
        Command::Watch {
            camera,
            report_interval,
        } => watch(context, camera, Duration::from_secs(report_interval.max(1))).await,
    }
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to install log subscriber")?;
    Ok(())
}

async fn run_camera_command(context: LiveContext, command: CameraCommand) -> anyhow::Result<()> {
    let mut registry = CameraRegistryClient::new(context.api.clone());

    match command {
        CameraCommand::List => {
            for camera_id in registry.list().await? {
                println!("{}", camera_id);
            }
        }
        CameraCommand::Add { camera_id, source } => {
            let camera_id = CameraId::from(camera_id);
            let source: CameraSource = source.parse()?;
            registry.add(&camera_id, source).await?;
            registry.start(&camera_id).await?;
            println!("{}", context.endpoints.stream_url(&camera_id, context.config.stream.fps));
        }
        CameraCommand::Start { camera_id } => registry.start(&CameraId::from(camera_id)).await?,
        CameraCommand::Stop { camera_id } => registry.stop(&CameraId::from(camera_id)).await?,
        CameraCommand::Delete { camera_id } => registry.delete(&CameraId::from(camera_id)).await?,
        CameraCommand::Test { source } => {
            let source: CameraSource = source.parse()?;
            let reachable = registry.test_connection(&source).await?;
            println!("{}: {}", source, if reachable { "reachable" } else { "unreachable" });
            if !reachable {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}

async fn watch(context: LiveContext, camera: Option<String>, report_interval: Duration) -> anyhow::Result<()> {
    let overlay = context.config.overlay.clone();
    let mut controller = SessionController::mount(context).await;

    if let Some(camera) = camera {
        if let Err(e) = controller.select_camera(&CameraId::from(camera)).await {
            warn!("{}", e);
        }
    }

    let cancel = CancellationToken::new();
    let render = RenderLoop::new(
        OverlayRenderer::from_config(&overlay),
        controller.buffer(),
        controller.active_camera_watch(),
        FixedSurface(SurfaceSize::new(
            f64::from(overlay.surface_width),
            f64::from(overlay.surface_height),
        )),
        TracingDrawTarget::default(),
        overlay.frame_interval(),
    )
    .spawn(cancel.clone());

    let mut health = controller.health_watch();
    let mut report = tokio::time::interval(report_interval);
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = report.tick() => {
                match serde_json::to_string(&controller.view_model()) {
                    Ok(json) => println!("{}", json),
                    Err(e) => error!("Failed to encode view model: {}", e),
                }
            }
            changed = async {
                match health.as_mut() {
                    Some(rx) => rx.changed().await,
                    None => std::future::pending().await,
                }
            } => {
                if changed.is_ok() {
                    controller.sync_health();
                } else {
                    health = None;
                }
            }
        }
    }

    cancel.cancel();
    if let Err(e) = render.await {
        error!("Overlay loop ended abnormally: {}", e);
    }
    controller.unmount().await;
    info!("Shutting down live view");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
