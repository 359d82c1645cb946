use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use device_pilot::adb::AdbDevice;
use device_pilot::bridge::{GestureBridge, PlatformPrimitives};
use device_pilot::config::AgentConfig;
use device_pilot::decision::HttpDecisionClient;
use device_pilot::executor::DeviceExecutor;
use device_pilot::orchestrator::{TaskOrchestrator, TaskOutcome};
use device_pilot::overlay::{ConsoleOverlay, OverlayStateMachine};
use device_pilot::resolver::{AppInventory, AppNameResolver, CompositeInventory, StaticInventory};
use device_pilot::session_store::JsonSessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("device_pilot=info")))
        .init();

    let goal = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if goal.trim().is_empty() {
        eprintln!("Usage: device_pilot \"<goal>\"");
        std::process::exit(2);
    }

    let config = AgentConfig::from_env();
    println!("🤖 Device Pilot");
    println!("--------------------------------------------------");
    println!("Goal: {}", goal);
    println!("Press Ctrl-C to stop.");
    println!("--------------------------------------------------");

    let device = Arc::new(AdbDevice::connect(&config.device).await?);
    let console = Arc::new(ConsoleOverlay::new(device.screen_size(), config.overlay.top_offset_px));
    let overlay = Arc::new(OverlayStateMachine::new(console.clone(), config.overlay.clone()));
    let bridge = Arc::new(
        GestureBridge::new(device.clone(), overlay, config.gesture.clone()).with_trail(console),
    );
    let executor = Arc::new(DeviceExecutor::new(bridge.clone(), device.clone(), config.gesture.clone()));

    // Curated names first so they shadow names guessed from package ids.
    let sources: Vec<Arc<dyn AppInventory>> = vec![Arc::new(StaticInventory::builtin()), device.clone()];
    let resolver = Arc::new(AppNameResolver::new(Arc::new(CompositeInventory::new(sources))));
    let decision = Arc::new(HttpDecisionClient::new(
        config.decision.clone(),
        config.gesture.coordinate_scale,
    )?);

    let mut orchestrator = TaskOrchestrator::new(bridge, decision, executor, resolver, config.run.clone());
    if config.persist_sessions {
        let dir = config.session_dir.clone().unwrap_or_else(JsonSessionStore::default_dir);
        match JsonSessionStore::new(&dir) {
            Ok(store) => orchestrator = orchestrator.with_recorder(Arc::new(store)),
            Err(e) => warn!("[Session] Persistence disabled: {:#}", e),
        }
    }
    let orchestrator = Arc::new(orchestrator);

    {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\n⏹️  Stopping...");
                orchestrator.cancel();
            }
        });
    }

    let report = orchestrator.start(&goal).await?;
    match &report.outcome {
        TaskOutcome::Completed { message } => println!("✅ Done in {} steps: {}", report.steps, message),
        TaskOutcome::MaxStepsReached => println!("⚠️  Gave up after {} steps", report.steps),
        TaskOutcome::UserStopped => println!("⏹️  Stopped at step {}", report.steps),
        TaskOutcome::Error { reason } => eprintln!("❌ Failed at step {}: {}", report.steps, reason),
    }

    if report.outcome.is_error() {
        std::process::exit(1);
    }
    Ok(())
}
