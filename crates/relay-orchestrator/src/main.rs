use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use relay_queue::{ConsoleTurnSink, MemoryClient, QueueManager, Task, TurnSink};
use relay_runner::{PrimaryRunner, Runner, SecondaryRunner};
use relay_scheduler::{SchedulerEngine, ScheduleStore};

mod config;
mod overrides;
mod seams;

use config::OrchestratorConfig;
use overrides::Overrides;
use seams::{AlwaysResolvable, QueueSeams};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_orchestrator=info".into()),
        )
        .init();

    let config_path = std::env::var("RELAY_CONFIG").ok();
    let config: OrchestratorConfig = relay_core::config::load_config(
        config_path.as_deref(),
        "relay-orchestrator.toml",
        "RELAY",
    )
    .unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        OrchestratorConfig::default()
    });

    let data_dir = std::path::PathBuf::from(&config.data.dir);
    std::fs::create_dir_all(&data_dir)?;

    let lock_path = data_dir.join(".runtime").join("bot.lock");
    let _lock = relay_lock::ProcessLock::acquire(&lock_path)?;
    info!(path = %lock_path.display(), "acquired single-instance lock");

    let sessions = Arc::new(build_session_store(&data_dir)?);

    let mut runners: HashMap<String, Arc<dyn Runner>> = HashMap::new();
    runners.insert(
        "primary".to_string(),
        Arc::new(PrimaryRunner::new(config.runner.primary_command.clone())) as Arc<dyn Runner>,
    );
    if let Some(secondary_command) = &config.runner.secondary_command {
        runners.insert(
            "secondary".to_string(),
            Arc::new(SecondaryRunner::new(secondary_command.clone())) as Arc<dyn Runner>,
        );
    }

    let memory_client = Some(Arc::new(MemoryClient::new(config.memory.base_url.clone())));

    let restart_manager = Arc::new(relay_restart::RestartManager::new(
        data_dir.clone(),
        config.restart.command.clone(),
    ));

    let queue = QueueManager::new(
        config.queue.clone().into_queue_config(),
        data_dir.clone(),
        runners,
        sessions,
        memory_client,
        restart_manager,
    );

    let seams = Arc::new(QueueSeams::new(Arc::clone(&queue), config.runner.default_engine.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let schedules_dir = data_dir.join("schedules");
    let schedule_store = Arc::new(ScheduleStore::load(&schedules_dir)?);
    let tz: chrono_tz::Tz = config
        .scheduler
        .timezone
        .parse()
        .unwrap_or_else(|_| {
            warn!(tz = %config.scheduler.timezone, "unrecognized timezone, defaulting to UTC");
            chrono_tz::UTC
        });
    let scheduler = SchedulerEngine::new(schedule_store, Arc::clone(&seams) as Arc<dyn relay_scheduler::ScheduleEnqueuer>, tz);
    tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let heartbeat = relay_heartbeat::HeartbeatEngine::new(
        config.heartbeat.clone().into_heartbeat_config(),
        Arc::new(AlwaysResolvable) as Arc<dyn relay_heartbeat::ChannelResolver>,
        Arc::clone(&seams) as Arc<dyn relay_heartbeat::QueueBusyProbe>,
        Arc::clone(&seams) as Arc<dyn relay_heartbeat::HeartbeatEnqueuer>,
    );
    tokio::spawn(heartbeat.run(shutdown_rx.clone()));

    relay_restart::resume_on_startup(
        data_dir.clone(),
        config.restart.max_pending_minutes,
        seams.as_ref(),
    )
    .await;

    tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    let overrides = Overrides::load(&data_dir).await;
    run_console_repl(queue, config.runner.default_engine, overrides).await;

    Ok(())
}

fn build_session_store(data_dir: &Path) -> anyhow::Result<relay_sessions::SessionStore> {
    let db_path = data_dir.join("sessions.db");
    let conn = rusqlite::Connection::open(db_path)?;
    relay_sessions::db::init_db(&conn)?;
    Ok(relay_sessions::SessionStore::new(conn))
}

async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = term.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
    }
    let _ = shutdown_tx.send(true);
}

const CONSOLE_USER: &str = "console";
const CONSOLE_CONTEXT: &str = "console";

/// Manual operation entrypoint: every stdin line becomes one turn dispatched
/// through a [`ConsoleTurnSink`]. This stands in for the real chat transport
/// (Discord or otherwise) this binary would drive via the `TurnSink` seam.
/// Lines starting with `/engine`, `/model`, `/mecho-mode`, or `/verbose` set
/// the matching per-(user, context) override instead of enqueuing a turn.
async fn run_console_repl(queue: Arc<QueueManager>, default_engine: String, overrides: Overrides) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut seq: u64 = 0;
    let key = Overrides::key(CONSOLE_USER, CONSOLE_CONTEXT);

    println!("relay-orchestrator ready; type a prompt and press enter (Ctrl-D to exit).");
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdin read failed, stopping console loop");
                break;
            }
        };
        let input = line.trim().to_string();
        if input.is_empty() {
            continue;
        }

        if let Some(value) = input.strip_prefix("/engine ") {
            overrides.engine.set(key.clone(), value.trim().to_string()).await;
            println!("(engine override set to {value})");
            continue;
        }
        if let Some(value) = input.strip_prefix("/model ") {
            overrides.model.set(key.clone(), value.trim().to_string()).await;
            println!("(model override set to {value})");
            continue;
        }
        if let Some(value) = input.strip_prefix("/mecho-mode ") {
            overrides.mecho_mode.set(key.clone(), value.trim().to_string()).await;
            println!("(mecho-mode override set to {value})");
            continue;
        }
        if let Some(value) = input.strip_prefix("/verbose ") {
            let verbose = value.trim().eq_ignore_ascii_case("on");
            overrides.verbose.set(key.clone(), verbose).await;
            println!("(verbose override set to {verbose})");
            continue;
        }

        seq += 1;
        let engine = overrides.engine.get(&key).unwrap_or_else(|| default_engine.clone());
        let model = overrides.model.get(&key);
        let mecho_mode_id = overrides.mecho_mode.get(&key);
        let task_key = format!("console:{seq}");
        let task = Task {
            prompt: input,
            session_id: None,
            session_user_id: CONSOLE_USER.to_string(),
            context_id: CONSOLE_CONTEXT.to_string(),
            mecho_mode_id,
            model,
            task_key: task_key.clone(),
            respond_to: Arc::new(ConsoleTurnSink) as Arc<dyn TurnSink>,
            created_at: relay_core::ids::now(),
            engine,
            attachments: Vec::new(),
            mode_name: None,
            rotate_from_session_id: None,
        };

        if let Err(e) = queue.enqueue(task).await {
            println!("(not queued: {e})");
        } else if overrides.verbose.get(&key).unwrap_or(false) {
            queue.set_verbose(&task_key, true).await;
        }

        if queue.is_restart_shutdown_requested().await {
            info!("restart requested, leaving console loop to let the process exit");
            break;
        }
    }
}
