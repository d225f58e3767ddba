//! # keywardd: keyward cluster node
//!
//! Composition root that wires all adapters together and starts one node of
//! the automation cluster.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars) and install the tracing subscriber
//! - Initialize the `SQLite` connection pool and run migrations
//! - Construct repository implementations (adapters)
//! - Construct the automation engine and the sync runner, injecting
//!   repositories via port traits
//! - Re-arm persisted steps and sync schedules, then follow the cluster
//!   channel so changes made on other nodes are picked up
//! - Handle graceful shutdown (SIGTERM/SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

mod config;

use std::sync::Arc;

use keyward_adapter_storage_sqlite_sqlx::{
    ClusterPoller, SqliteAutomationRepository, SqliteClusterNotifier, SqliteLeaseStore,
    SqliteScheduledStepStore, SqliteSyncProviderRepository, SqliteUserStore, spawn_poller,
};
use keyward_adapter_virtual_directory::{VIRTUAL_DIRECTORY_KIND, VirtualDirectory};
use keyward_app::automation_engine::AutomationEngine;
use keyward_app::clock::SystemClock;
use keyward_app::cluster_bus::{InProcessClusterBus, spawn_listener};
use keyward_app::executor::StepExecutor;
use keyward_app::lease_coordinator::LeaseCoordinator;
use keyward_app::matcher::EventMatcher;
use keyward_app::ports::{Clock, DirectoryProvider};
use keyward_app::providers::ProviderRegistry;
use keyward_app::registry::AutomationRegistry;
use keyward_app::runtime::NodeRuntime;
use keyward_app::services::sync_provider_service::SyncProviderService;
use keyward_app::sync_runner::SyncRunner;
use keyward_domain::sync::{SyncMode, SyncProviderConfig};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();
    let node_id = config.node.id.clone();

    // Database
    let db = config.storage().build().await?;
    let pool = db.pool().clone();

    // Runtime
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let runtime = NodeRuntime::new(
        Arc::clone(&clock),
        config.engine.worker_pool_size,
        config.submit_options(),
    );

    // Providers
    let directory = VirtualDirectory::new(SqliteUserStore::new(pool.clone()), Arc::clone(&clock));
    for entry in &config.sync.virtual_entries {
        directory.put(entry.clone());
    }
    let mut providers = ProviderRegistry::with_defaults();
    providers.register_directory(Arc::new(directory) as Arc<dyn DirectoryProvider>);
    let providers = Arc::new(providers);

    // Engine
    let engine = AutomationEngine::new(
        AutomationRegistry::new(
            SqliteAutomationRepository::new(pool.clone()),
            EventMatcher::new(Arc::clone(&providers)),
        ),
        StepExecutor::new(SqliteUserStore::new(pool.clone()), Arc::clone(&providers)),
        SqliteScheduledStepStore::new(pool.clone()),
        LeaseCoordinator::new(
            SqliteLeaseStore::new(pool.clone()),
            node_id.as_str(),
            Arc::clone(&clock),
        ),
        runtime.clone(),
        config.engine_settings(),
    );
    let runner = SyncRunner::new(
        SqliteSyncProviderRepository::new(pool.clone()),
        providers,
        LeaseCoordinator::new(SqliteLeaseStore::new(pool.clone()), node_id.as_str(), clock),
        runtime.clone(),
        config.sync.enabled,
    );

    // Cluster channel
    let bus = InProcessClusterBus::new(256);
    let listener = spawn_listener(bus.subscribe(), node_id.as_str(), {
        let engine = engine.clone();
        let runner = runner.clone();
        move |event| {
            let engine = engine.clone();
            let runner = runner.clone();
            async move {
                engine.on_cluster_event(event.clone()).await;
                runner.on_cluster_event(event).await;
            }
        }
    });
    let poller = spawn_poller(
        ClusterPoller::start(pool.clone()).await?,
        bus,
        config.sync.poll_interval,
        config.sync.message_retention,
    );

    // Startup rescheduling
    let rearmed = engine.start().await?;
    let scheduled = runner.schedule_all().await?;

    if config.sync.virtual_provider {
        let service = SyncProviderService::new(runner, SqliteClusterNotifier::new(pool));
        let existing = service.list_providers().await?;
        if !existing.iter().any(|p| p.kind == VIRTUAL_DIRECTORY_KIND) {
            let created = service
                .create_provider(
                    SyncProviderConfig::new("virtual", VIRTUAL_DIRECTORY_KIND)
                        .with_period(SyncMode::Full, config.sync.virtual_full_sync_period),
                )
                .await?;
            tracing::info!(provider_id = %created.id, "virtual directory provider created");
        }
    }

    tracing::info!(node_id = %node_id, rearmed, scheduled, "keywardd started");

    shutdown_signal().await;

    runtime.shutdown();
    poller.abort();
    listener.abort();
    tracing::info!(node_id = %node_id, "keywardd stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
