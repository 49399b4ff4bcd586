//! Command dispatch.
//!
//! Builds the runtime (backends, router, engine, coordinator, orchestrator)
//! from config and executes one CLI command against it. Exit status is the
//! caller's concern: any returned error maps to exit code 1.

use crate::backend::health::{DEFAULT_PROBE_INTERVAL, spawn_probe_loop};
use crate::backend::{BackendId, HealthRegistry, Router, build_backends};
use crate::classifier::classify_task;
use crate::cli::{Cli, Commands, ModeCommands, SessionCommands};
use crate::collab::{CollabMode, Coordinator};
use crate::config::TrinitasConfig;
use crate::delegation::{DelegationConfig, DelegationEngine, ExecutionMode, PressureGauge, mode};
use crate::error::{CollabError, RouteError, TrinitasError};
use crate::orchestrator::{InMemoryHandoffStore, SessionOrchestrator};
use crate::persona::PersonaRegistry;
use crate::session::{ContextFrame, FrameType, SessionConfig};
use crate::task::Task;
use anyhow::{Context, Result, bail};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct App {
    registry: Arc<HealthRegistry>,
    engine: Arc<DelegationEngine>,
    coordinator: Coordinator,
    orchestrator: Arc<SessionOrchestrator>,
    personas: Arc<PersonaRegistry>,
    probe_cancel: CancellationToken,
    json: bool,
}

impl App {
    fn build(config: &TrinitasConfig, json: bool) -> Self {
        let registry = Arc::new(HealthRegistry::new(&BackendId::ALL));
        let backends = build_backends(&config.backends, &registry);

        // Keep the registry fresh for the lifetime of the command.
        let probe_cancel = CancellationToken::new();
        spawn_probe_loop(
            Arc::clone(&registry),
            backends.values().cloned().collect(),
            DEFAULT_PROBE_INTERVAL,
            probe_cancel.clone(),
        );

        let pressure = Arc::new(PressureGauge::new());
        let router = Arc::new(Router::new(
            backends,
            Arc::clone(&registry),
            Arc::clone(&pressure),
            config.router.clone(),
        ));
        let engine = Arc::new(DelegationEngine::new(
            router,
            Arc::clone(&pressure),
            DelegationConfig::default(),
        ));
        let personas = Arc::new(PersonaRegistry::default());
        let coordinator = Coordinator::new(Arc::clone(&engine), Arc::clone(&personas));
        let orchestrator = Arc::new(SessionOrchestrator::new(
            config.orchestrator.clone(),
            Arc::new(InMemoryHandoffStore::new()),
            pressure,
        ));

        Self {
            registry,
            engine,
            coordinator,
            orchestrator,
            personas,
            probe_cancel,
            json,
        }
    }
}

fn build_task(cli: &Cli, description: String) -> Result<Task> {
    let mut task = Task::new(description);
    if let Some(priority) = cli.priority {
        if !(1..=10).contains(&priority) {
            bail!("priority must be between 1 and 10");
        }
        task = task.with_priority(priority);
    }
    if let Some(deadline_secs) = cli.deadline {
        let deadline_secs = i64::try_from(deadline_secs)
            .unwrap_or(i64::MAX / 1_000)
            .min(i64::MAX / 1_000);
        task = task
            .with_deadline(chrono::Utc::now() + chrono::Duration::seconds(deadline_secs));
    }
    if let Some(executor) = &cli.force_executor {
        let backend = executor
            .parse::<BackendId>()
            .map_err(|_| TrinitasError::Route(RouteError::UnknownBackend(executor.clone())))?;
        task.hints.force_executor = Some(backend);
    }
    classify_task(&mut task);
    Ok(task)
}

pub async fn dispatch(cli: Cli, config: TrinitasConfig) -> Result<()> {
    mode::set(config.mode);
    let app = App::build(&config, cli.json);

    let outcome = match &cli.command {
        Commands::Run { persona, task } => run_persona(&cli, &app, persona, task.join(" ")).await,
        Commands::Collab {
            mode,
            personas,
            task,
        } => run_collab(&cli, &app, mode, personas, task.join(" ")).await,
        Commands::Session { session_command } => run_session(&app, session_command).await,
        Commands::Mode { mode_command } => run_mode(&app, mode_command),
        Commands::Status => run_status(&app).await,
    };

    app.probe_cancel.cancel();
    outcome
}

async fn run_persona(cli: &Cli, app: &App, persona_id: &str, description: String) -> Result<()> {
    let persona = app
        .personas
        .get(persona_id)
        .cloned()
        .ok_or_else(|| TrinitasError::Collab(CollabError::UnknownPersona(persona_id.into())))?;

    let task = build_task(cli, description)?;
    let session_id = app.orchestrator.create_session("cli", None)?;
    let engine = Arc::clone(&app.engine);
    let cancel = CancellationToken::new();

    let task_frame = ContextFrame::new(FrameType::Task, serde_json::to_value(&task)?);
    let result = app
        .orchestrator
        .execute_request(&session_id, |handle| {
            let task = task.clone();
            let persona = persona.clone();
            let cancel = cancel.clone();
            async move {
                handle.lock().expect("session lock poisoned").add_frame(task_frame);
                let result = engine.run(task, Some(&persona), &cancel).await?;
                let frame_content =
                    serde_json::to_value(&result).map_err(anyhow::Error::from)?;
                let mut session = handle.lock().expect("session lock poisoned");
                session.add_frame(
                    ContextFrame::new(FrameType::Result, frame_content)
                        .with_persona(&persona.id),
                );
                Ok(result)
            }
        })
        .await?;

    app.orchestrator.close_session(&session_id).await.ok();

    if app.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("persona: {persona_id}");
        println!("executor: {}", result.executor);
        println!("confidence: {:.2}", result.confidence);
        println!("{}", render_payload(&result.payload));
    }

    if result.is_ok() {
        Ok(())
    } else {
        bail!(
            "execution failed: {}",
            result
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.kind, e.message))
                .collect::<Vec<_>>()
                .join("; ")
        )
    }
}

async fn run_collab(
    cli: &Cli,
    app: &App,
    mode: &str,
    personas: &[String],
    description: String,
) -> Result<()> {
    let collab_mode = mode
        .parse::<CollabMode>()
        .map_err(|_| TrinitasError::Collab(CollabError::UnknownMode(mode.into())))?;

    let task = build_task(cli, description)?;
    let cancel = CancellationToken::new();
    let outcome = app
        .coordinator
        .collaborate(task, personas, collab_mode, None, &cancel)
        .await?;

    if app.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("mode: {}", outcome.mode);
        for run in &outcome.runs {
            let status = serde_json::to_value(&run.status)?;
            println!(
                "  {} [{}] {}ms",
                run.persona,
                status.as_str().unwrap_or("?"),
                run.elapsed_ms
            );
            if let Some(error) = &run.error {
                println!("    error: {}: {}", error.kind, error.message);
            }
        }
        if let Some(consensus) = &outcome.consensus {
            println!(
                "consensus: {:?} (alignment {:.2})",
                consensus.verdict, consensus.alignment
            );
        }
        if let Some(final_output) = &outcome.final_output {
            println!("{}", render_payload(final_output));
        }
    }

    if outcome.all_succeeded {
        Ok(())
    } else {
        bail!("collaboration finished with failed personas")
    }
}

async fn run_session(app: &App, command: &SessionCommands) -> Result<()> {
    match command {
        SessionCommands::Create { user } => {
            let session_id = app
                .orchestrator
                .create_session(user, Some(SessionConfig::new(user)))?;
            println!("{session_id}");
            Ok(())
        }
        SessionCommands::List => {
            for id in app.orchestrator.session_ids() {
                println!("{id}");
            }
            Ok(())
        }
        SessionCommands::Close { id } => {
            app.orchestrator.close_session(id).await?;
            println!("closed {id}");
            Ok(())
        }
        SessionCommands::Migrate { id, target } => {
            app.orchestrator.migrate_session(id, target).await?;
            println!("migration of {id} to {target} published");
            Ok(())
        }
    }
}

fn run_mode(app: &App, command: &ModeCommands) -> Result<()> {
    match command {
        ModeCommands::Get => {
            if app.json {
                println!("{}", json!({"mode": mode::current()}));
            } else {
                println!("{}", mode::current());
            }
            Ok(())
        }
        ModeCommands::Set { mode: wanted } => {
            let parsed = wanted
                .parse::<ExecutionMode>()
                .with_context(|| format!("unknown mode: {wanted}"))?;
            mode::set(parsed);
            println!("{parsed}");
            Ok(())
        }
    }
}

async fn run_status(app: &App) -> Result<()> {
    // One probe round so the report reflects live backends, not just history.
    for id in BackendId::ALL {
        if let Some(backend) = app.engine.router().backend(id) {
            let outcome = backend.probe().await;
            app.registry.record_probe(&outcome);
        }
    }

    let health = app.registry.snapshot();
    let status = app.orchestrator.status();

    if app.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "backends": health,
                "orchestrator": status,
                "delegation": app.engine.stats(),
                "mode": mode::current(),
            }))?
        );
        return Ok(());
    }

    println!("mode: {}", mode::current());
    println!("backends:");
    for record in &health {
        let latency = record
            .last_latency_ms
            .map_or_else(|| "-".to_string(), |ms| format!("{ms}ms"));
        println!(
            "  {:<11} {} (failures: {}, latency: {latency})",
            record.backend.to_string(),
            if record.healthy { "healthy" } else { "unhealthy" },
            record.consecutive_failures,
        );
    }
    println!(
        "pool: {} idle (min {}, max {})",
        status.pool.idle, status.pool.min_size, status.pool.max_size
    );
    println!("sessions: {} active", status.active_sessions);
    println!(
        "resources: {:.1}% memory, {:.1}% cpu",
        status.resources.memory_percent, status.resources.cpu_percent
    );
    let delegation = app.engine.stats();
    println!(
        "delegation: {} decisions, {} decomposed",
        delegation.total_decisions, delegation.decompositions
    );
    Ok(())
}

fn render_payload(payload: &serde_json::Value) -> String {
    match payload.get("content").and_then(serde_json::Value::as_str) {
        Some(content) if !content.is_empty() => content.to_string(),
        _ => serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string()),
    }
}
