use std::sync::Arc;

use anyhow::{Context, Result};
use facegate_capture::{FrameSource, SyntheticScene, SyntheticSource, V4l2Source};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod error;
mod orchestrator;
mod progress;
mod store;
mod worker;

use config::Config;
use dbus_interface::{AppState, PipelineService};
use orchestrator::spawn_pipeline;
use store::TemplateStore;

const BUS_NAME: &str = "org.facegate.Pipeline1";
const OBJECT_PATH: &str = "/org/facegate/Pipeline1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = Config::from_env();

    let store = TemplateStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening template store at {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "template store opened");

    let source: Box<dyn FrameSource> = if config.synthetic_source {
        tracing::warn!("using synthetic frame source (FACEGATE_SYNTHETIC_SOURCE=1)");
        Box::new(SyntheticSource::new(SyntheticScene::LiveFace))
    } else {
        let camera = V4l2Source::open(&config.camera_device, config.warmup_frames)
            .with_context(|| format!("opening camera {}", config.camera_device))?;
        tracing::info!(device = %config.camera_device, "camera opened");
        Box::new(camera)
    };

    let pipeline = spawn_pipeline(source, config.pipeline_config())
        .context("starting the pipeline threads")?;

    let state = Arc::new(Mutex::new(AppState {
        config,
        pipeline,
        store,
    }));
    let service = PipelineService {
        state: Arc::clone(&state),
    };

    let session_bus = state.lock().await.config.session_bus;
    let builder = if session_bus {
        tracing::warn!("connecting to the session bus (development mode)");
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on the bus")?;

    tracing::info!(bus_name = BUS_NAME, "facegated ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
