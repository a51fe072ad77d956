use edge_healer::agent::Agent;
use edge_healer::config::Config;
use edge_healer::events::InMemoryEventSource;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: configuration error: {e}");
            std::process::exit(1);
        }
    };

    init_logger(&config.log_level);

    log::info!(
        "edge-healer starting: node={} gossip={} cache={} metrics_port={}",
        config.node_name,
        config.gossip_addr,
        config.cache_path,
        config.metrics_port
    );

    let agent = match Agent::bootstrap(config).await {
        Ok(a) => a,
        Err(e) => {
            log::error!("fatal: startup failed: {e}");
            std::process::exit(1);
        }
    };

    let shutdown = agent.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install SIGINT handler: {e}");
            return;
        }
        log::info!("received shutdown signal");
        shutdown.cancel();
    });

    // The orchestrator watch-stream adapter lives outside this crate; the
    // binary wires an empty source so the process still exercises the
    // background gossip and metrics tasks end-to-end. A real deployment
    // supplies its own `EventSource` impl here.
    let events = InMemoryEventSource::new(vec![]);

    if let Err(e) = agent.run(events).await {
        log::error!("agent exited with error: {e}");
        std::process::exit(1);
    }
}

fn init_logger(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level.to_string());
    env_logger::Builder::from_env(env).init();
}
