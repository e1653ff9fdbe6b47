use daq_conductor::config::Config;
use daq_conductor::ecc::client::SoapClientFactory;
use daq_conductor::poller::Poller;
use daq_conductor::remote::session::SshShellFactory;
use daq_conductor::store::Store;
use daq_conductor::tasks::dispatcher::{Dispatcher, DispatcherConfig};
use daq_conductor::tasks::tracing_log;
use std::path::Path;
use std::sync::Arc;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(1).map(String::as_str).unwrap_or("conductor.yml");
    let config = match Config::load(Path::new(config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Could not load config {config_path}: {e}");
            std::process::exit(1);
        }
    };

    let appender = tracing_appender::rolling::daily("logs", "daq_conductor.log");
    let (writer, _guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Could not create the async runtime");
    if let Err(e) = runtime.block_on(run(config)) {
        tracing::error!("Conductor shut down with an error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new();
    let experiment = config.register_fleet(&store)?;
    tracing::info!(
        "Registered experiment {} with {} ECC servers and {} data routers",
        config.experiment,
        store.ecc_servers_of(experiment).len(),
        store.data_routers_of(experiment).len()
    );

    let dispatcher = Dispatcher::start(
        DispatcherConfig {
            workers: config.workers,
            queue_depth: config.queue_depth,
        },
        store.clone(),
        Arc::new(SoapClientFactory),
        Arc::new(SshShellFactory),
        tracing_log(),
    );
    let poller = Poller::start(config.intervals, dispatcher.submitter());
    tracing::info!("Dispatcher and poller are up, waiting for ctrl-c");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    poller.shutdown().await;
    dispatcher.shutdown().await;
    Ok(())
}
