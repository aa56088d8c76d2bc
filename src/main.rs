use anyhow::{anyhow, Context, Result};
use clap::{Arg, Command as ClapCommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use pause_overlay::controller::{Command, Controller};
use pause_overlay::metadata::ItemMetadata;
use pause_overlay::snapshot::{
    idle_page, player_page, EndpointScript, MemoryStorage, RecordingSurface, ScriptedEndpoint,
    SnapshotPage, SurfaceEvent, TransitionMode,
};
use pause_overlay::{Config, OverlayError};

/// Scenario file driving one simulated viewing session
#[derive(Debug, Deserialize)]
struct Scenario {
    /// Token seeded into the credential blob
    #[serde(default = "default_token")]
    token: String,

    /// User id seeded into the credential blob
    #[serde(default = "default_user")]
    user_id: String,

    /// Item records served by the local metadata endpoint
    #[serde(default)]
    items: Vec<ScenarioItem>,

    /// Respond 500 to this many metadata requests before serving
    #[serde(default)]
    fail_first_fetches: u32,

    /// Timed steps, relative to scenario start
    steps: Vec<Step>,
}

fn default_token() -> String {
    "sim-token".to_string()
}

fn default_user() -> String {
    "sim-user".to_string()
}

#[derive(Debug, Deserialize)]
struct ScenarioItem {
    id: String,
    #[serde(flatten)]
    item: ItemMetadata,
}

#[derive(Debug, Deserialize)]
struct Step {
    at_ms: u64,
    action: String,
    #[serde(default)]
    item_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "pause_overlay=info,overlay_sim=info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter.as_str()).init();

    let matches = ClapCommand::new("overlay-sim")
        .version("0.1.0")
        .about("Runs the pause overlay controller against a scripted host page")
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("Scenario file (TOML) with items and timed steps")
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Controller configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print the configuration summary before running")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let scenario_path = PathBuf::from(
        matches
            .get_one::<String>("scenario")
            .ok_or_else(|| anyhow!("scenario path missing"))?,
    );
    let scenario_str = std::fs::read_to_string(&scenario_path)
        .with_context(|| format!("cannot read scenario {}", scenario_path.display()))?;
    let scenario: Scenario = toml::from_str(&scenario_str)
        .with_context(|| format!("cannot parse scenario {}", scenario_path.display()))?;

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::load_from(&PathBuf::from(path))?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };

    // Serve scenario items from a local scripted endpoint
    let mut script = EndpointScript {
        fail_first: scenario.fail_first_fetches,
        ..Default::default()
    };
    for entry in &scenario.items {
        script.items.insert(entry.id.clone(), entry.item.clone());
    }
    let endpoint = ScriptedEndpoint::spawn(script)
        .await
        .context("cannot start scripted metadata endpoint")?;
    config.server.base_url = endpoint.base_url();
    config.validate()?;

    if matches.get_flag("verbose") {
        info!("{}", config.summary());
    }

    let storage = MemoryStorage::with_credentials(
        &config.server.storage_key,
        &scenario.token,
        &scenario.user_id,
    );
    let page = SnapshotPage::new(config.selectors.clone());
    page.navigate(&idle_page());
    let surface = RecordingSurface::new(TransitionMode::Immediate);

    let controller = match Controller::initialize(
        config,
        storage,
        page.clone(),
        page.clone(),
        page.clone(),
        surface.clone(),
    )
    .await
    {
        Ok(controller) => controller,
        Err(e @ OverlayError::CredentialsUnavailable { .. }) => {
            // Silent disablement: the page simply gets no overlay
            warn!("🔒 {}; overlay disabled for this run", e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let (commands_tx, commands_rx) = mpsc::channel(8);
    let run = tokio::spawn(controller.run(commands_rx));

    info!("🎭 Running scenario with {} step(s)", scenario.steps.len());
    let started = tokio::time::Instant::now();
    let wall_start = chrono::Utc::now();

    for step in &scenario.steps {
        tokio::time::sleep_until(started + Duration::from_millis(step.at_ms)).await;
        apply_step(step, &page, &commands_tx).await?;
    }

    // Let trailing timers and fetches settle before stopping
    tokio::time::sleep(Duration::from_millis(500)).await;
    let _ = commands_tx.send(Command::Shutdown).await;
    run.await.map_err(|e| anyhow!("controller task failed: {}", e))??;

    print_report(&surface, wall_start, endpoint.request_count());
    Ok(())
}

async fn apply_step(
    step: &Step,
    page: &Arc<SnapshotPage>,
    commands: &mpsc::Sender<Command>,
) -> Result<()> {
    info!("t+{}ms: {}", step.at_ms, step.action);

    match step.action.as_str() {
        "attach" => {
            let item_id = step
                .item_id
                .as_deref()
                .ok_or_else(|| anyhow!("attach step needs item_id"))?;
            page.navigate(&player_page(item_id));
        }
        "detach" => page.navigate(&idle_page()),
        "replace" => page.remount_player(),
        "set_item" => {
            let item_id = step
                .item_id
                .as_deref()
                .ok_or_else(|| anyhow!("set_item step needs item_id"))?;
            page.navigate(&player_page(item_id));
        }
        "pause" => {
            page.video()
                .ok_or_else(|| anyhow!("pause step without mounted video"))?
                .pause();
        }
        "play" => {
            page.video()
                .ok_or_else(|| anyhow!("play step without mounted video"))?
                .play();
        }
        "finish" => {
            page.video()
                .ok_or_else(|| anyhow!("finish step without mounted video"))?
                .finish();
        }
        "pointer_move" => page.pointer_move(),
        "touch_move" => page.touch_move(),
        "dismiss" => commands
            .send(Command::Dismiss)
            .await
            .map_err(|_| anyhow!("controller stopped early"))?,
        other => return Err(anyhow!("unknown scenario action {:?}", other)),
    }
    Ok(())
}

fn print_report(
    surface: &RecordingSurface,
    started: chrono::DateTime<chrono::Utc>,
    requests: u32,
) {
    let events = surface.events();

    println!();
    println!("=== Render command report ===");
    println!("Scenario started: {}", started.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
    println!("Metadata requests served: {}", requests);
    println!();

    if events.is_empty() {
        println!("(no render commands issued)");
        return;
    }

    for (index, event) in events.iter().enumerate() {
        match event {
            SurfaceEvent::Applied(content) => {
                println!("{:>3}. APPLY   {}", index + 1, content.heading);
                if let Some(season) = &content.season {
                    println!("             {}", season);
                }
                if let Some(detail) = &content.detail {
                    println!("             {}", detail);
                }
                println!("             {}", content.synopsis);
            }
            SurfaceEvent::Cleared => println!("{:>3}. CLEAR", index + 1),
            SurfaceEvent::ShowStarted => println!("{:>3}. SHOW", index + 1),
            SurfaceEvent::HideStarted => println!("{:>3}. HIDE", index + 1),
        }
    }

    let shows = surface.show_count();
    let hides = surface.hide_count();
    println!();
    println!("✅ {} show(s), {} hide(s), {} command(s) total", shows, hides, events.len());
}
