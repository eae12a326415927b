use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use factgate_common::{GatewayConfig, LogFormat};
use factgate_events::EventStore;
use factgate_routing::{
    Channel, ChannelProvider, CollaborationEventType, Dispatcher, InterestFilter, MemoryBus,
    RoutingTable, RoutingTableUpdater,
};

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("factgate=info".parse()?);
    match format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::from_env()?;
    init_tracing(config.log_format)?;

    info!("Factgate gateway starting...");
    config.log_redacted();

    let bus = Arc::new(MemoryBus::new(config.channel_capacity));
    let store = EventStore::in_memory();
    let table = Arc::new(RoutingTable::new());

    let presence = bus.channel(&config.presence_channel());
    let evolution = bus.channel(&config.routing_plan_evolution_channel());
    let inbound = bus.channel(&config.inbound_channel());

    let dispatcher = Arc::new(Dispatcher::new(
        table.clone(),
        bus.clone(),
        config.backlog_limit,
    ));
    let retrier = dispatcher.clone().follow_plan(evolution.clone());
    let inbound_task = dispatcher.clone().serve(inbound);

    // Watch our own notifications so operators see the plan evolve.
    let mut evolutions = evolution.subscribe(Arc::new(InterestFilter::for_kinds(&[
        CollaborationEventType::RoutingPathsRegistered,
    ])));
    let watched_table = table.clone();
    let watcher = tokio::spawn(async move {
        while evolutions.next().await.is_some() {
            let plan = watched_table.snapshot();
            info!(
                plan_version = plan.version(),
                routes = plan.routes_count(),
                event_types = ?plan.supported_event_types(),
                "Routing plan evolved"
            );
        }
    });

    let updater = RoutingTableUpdater::new(
        config.service_name.clone(),
        table.clone(),
        store.clone(),
        presence,
        evolution,
    )
    .spawn();

    info!(domain = config.domain.as_str(), "Gateway ready, waiting for presence announcements");
    tokio::signal::ctrl_c().await?;

    info!(
        plan_version = table.current_routing_plan_version(),
        facts_recorded = store.latest_seq().await,
        facts_held = dispatcher.backlog_len(),
        "Shutting down"
    );
    updater.abort();
    inbound_task.abort();
    retrier.abort();
    watcher.abort();
    Ok(())
}
