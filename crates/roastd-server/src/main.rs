//! `roastd` server entry point.
//!
//! Bootstraps the database, stores, and fabric services, then runs the Axum
//! HTTP server alongside the background loops: lease reclamation, proposal
//! approval expiry, the circuit breaker, the governor cycle, the
//! session-closed dispatcher, and the worker pool. All loops stop on a
//! shared shutdown signal; main waits for them with a bounded timeout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use chrono::Utc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use roastd_bus::MqttBus;
use roastd_core::queue::MissionQueue;
use roastd_core::trace::TraceSink;
use roastd_fabric::{
    CommandService, Dispatcher, DispatcherConfig, DriverRegistry, Governor, KernelClient,
    RuntimeRunner, TracingAlertSink, Worker, WorkerConfig,
};
use roastd_store::{Db, GovernanceStore, MissionStore, ProposalStore, TraceStore};

use roastd_server::agent::build_report_runtime;
use roastd_server::config::ServerConfig;
use roastd_server::routes;
use roastd_server::state::AppState;

use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        dialect = ?config.database_type,
        bind = %config.bind_addr,
        "roastd starting"
    );

    // Storage.
    let db = Db::connect(config.database_type, &config.database_url)
        .await
        .context("database connect failed")?;
    db.migrate().await.context("schema migration failed")?;

    let missions = MissionStore::with_lease_ttl(db.clone(), config.lease_ttl);
    let traces = TraceStore::new(db.clone());
    let proposals = ProposalStore::new(db.clone());
    let governance = GovernanceStore::new(db);

    // Bootstrap governance: singleton state and the built-in rule set.
    governance
        .load_state()
        .await
        .context("governance state bootstrap failed")?;
    governance
        .seed_default_rules()
        .await
        .context("circuit-breaker rule seeding failed")?;

    // Fabric services.
    let drivers = Arc::new(DriverRegistry::new());
    let commands = CommandService::new(proposals.clone(), governance.clone(), Arc::clone(&drivers));
    let governor = Governor::new(
        proposals.clone(),
        governance.clone(),
        Arc::new(TracingAlertSink),
    );

    // The queue and trace sink the dispatcher and workers speak: the local
    // store, or a remote kernel when KERNEL_URL is set.
    let (queue, trace_sink): (Arc<dyn MissionQueue>, Arc<dyn TraceSink>) =
        match &config.kernel_url {
            Some(url) => {
                info!(kernel = %url, "using remote mission kernel");
                let client = KernelClient::new(url.clone())
                    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
                (Arc::new(client.clone()), Arc::new(client))
            }
            None => (Arc::new(missions.clone()), Arc::new(traces.clone())),
        };

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&queue),
        DispatcherConfig {
            topics: config.dispatcher_topics.clone(),
            goals: config.dispatcher_goals.clone(),
            max_attempts: config.dispatcher_max_attempts,
            replay_enabled: config.dispatcher_replay_enabled,
        },
    ));

    let state = Arc::new(AppState {
        missions: missions.clone(),
        traces: traces.clone(),
        proposals: proposals.clone(),
        commands,
        governance: governance.clone(),
        governor,
        dispatcher: Arc::clone(&dispatcher),
    });

    // Shutdown signal channel shared by every background loop.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background: Vec<JoinHandle<()>> = Vec::new();

    background.push(spawn_reclaimer(
        missions.clone(),
        config.lease_ttl,
        shutdown_rx.clone(),
    ));
    background.push(spawn_proposal_expiry(
        CommandService::new(proposals.clone(), governance.clone(), Arc::clone(&drivers)),
        shutdown_rx.clone(),
    ));

    if config.circuit_breaker_enabled {
        background.push(spawn_circuit_breaker(
            Governor::new(
                proposals.clone(),
                governance.clone(),
                Arc::new(TracingAlertSink),
            ),
            config.circuit_breaker_interval,
            shutdown_rx.clone(),
        ));
    }
    background.push(spawn_governor_cycle(
        Governor::new(proposals.clone(), governance.clone(), Arc::new(TracingAlertSink)),
        governance.clone(),
        shutdown_rx.clone(),
    ));

    if config.dispatcher_enabled {
        let bus = MqttBus::connect(&config.mqtt_url, "roastd-dispatcher")
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let dispatcher = Arc::clone(&dispatcher);
        let rx = shutdown_rx.clone();
        background.push(tokio::spawn(async move {
            if let Err(e) = dispatcher.run(&bus, rx).await {
                warn!(error = %e, "dispatcher stopped with error");
            }
        }));
    }

    for n in 0..config.workers {
        let worker_config = WorkerConfig {
            agent_name: format!("roastd-worker-{n}"),
            goals: config.dispatcher_goals.clone(),
            poll_interval: config.poll_interval,
            mission_timeout: config.mission_timeout,
            heartbeat_interval: config.heartbeat_interval,
        };
        worker_config
            .validate(config.lease_ttl)
            .map_err(|e| anyhow::anyhow!(e))?;

        let runner = Arc::new(RuntimeRunner::new(
            Arc::new(build_report_runtime()),
            worker_config.agent_name.clone(),
            3,
        ));
        let worker = Worker::new(
            Arc::clone(&queue),
            runner,
            Arc::clone(&trace_sink),
            None,
            worker_config,
        );
        let rx = shutdown_rx.clone();
        background.push(tokio::spawn(async move { worker.run(rx).await }));
    }

    // HTTP surface.
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "roastd server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    info!("waiting for background loops to stop");
    for handle in background {
        let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
    }

    info!("roastd server stopped");
    Ok(())
}

/// Reclaim expired mission leases at least every half lease TTL.
fn spawn_reclaimer(
    missions: MissionStore,
    lease_ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = (lease_ttl / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        info!(period_secs = period.as_secs(), "lease reclaimer started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = missions.reclaim_expired().await {
                        warn!(error = %e, "lease reclamation failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("lease reclaimer shutting down");
                        return;
                    }
                }
            }
        }
    })
}

/// Reject proposals whose approval window lapsed.
fn spawn_proposal_expiry(
    commands: CommandService,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match commands.expire_overdue(Utc::now()).await {
                        Ok(0) => {}
                        Ok(expired) => info!(expired, "overdue proposals rejected"),
                        Err(e) => warn!(error = %e, "proposal expiry failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    })
}

/// Evaluate circuit-breaker rules on the configured interval.
fn spawn_circuit_breaker(
    governor: Governor,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        info!(interval_secs = interval.as_secs(), "circuit breaker started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match governor.circuit_tick(Utc::now()).await {
                        Ok(events) if events.is_empty() => {}
                        Ok(events) => warn!(tripped = events.len(), "circuit breaker tripped"),
                        Err(e) => warn!(error = %e, "circuit breaker tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("circuit breaker shutting down");
                        return;
                    }
                }
            }
        }
    })
}

/// Run the governor cycle weekly. The loop wakes every six hours and runs a
/// cycle once the last report is at least seven days old.
fn spawn_governor_cycle(
    governor: Governor,
    governance: GovernanceStore,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(6 * 3_600));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let due = match governance.load_state().await {
                        Ok(state) => state
                            .last_report_date
                            .is_none_or(|at| Utc::now().signed_duration_since(at).num_days() >= 7),
                        Err(e) => {
                            warn!(error = %e, "governance state read failed");
                            false
                        }
                    };
                    if !due {
                        continue;
                    }
                    match governor.run_cycle(Utc::now()).await {
                        Ok(report) => info!(
                            ready = report.readiness.overall.ready,
                            proposed = report.expansion_proposal.is_some(),
                            "governor cycle finished"
                        ),
                        Err(e) => warn!(error = %e, "governor cycle failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    })
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
    let _ = shutdown_tx.send(true);
}
