use clap::Parser;
use tracing_subscriber::EnvFilter;

use ravel::{
    Server,
    apm::Agent,
    config::Config,
    demo,
    report::{self, CrashReporter, LogTransport},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    let default_filter = if config.verbose { "ravel=debug" } else { "ravel=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = match config.validate() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };

    report::install_panic_hook();
    tracing::info!(dsn = %config.dsn, "crash reporting enabled");
    let (reporter, _worker) =
        CrashReporter::spawn(config.dsn.clone(), LogTransport, config.report_queue);

    let agent = Agent::new(&config.license, config.app_name.as_str(), config.verbose)?;
    let _harvest = agent.run(config.harvest_interval);

    let chain = demo::chain(reporter, agent.timer(), config.timeout);
    let router = demo::routes(&chain);

    Server::bind(&config.addr).await?.run(router).await?;
    Ok(())
}
