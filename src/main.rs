use std::sync::Arc;

use session_relay::api;
use session_relay::config::{Config, LogFormat};
use session_relay::relay::SessionGateway;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    init_tracing(config.logging.format);

    let gateway = Arc::new(SessionGateway::new(config.registry()));
    let routes = api::routes(gateway);

    let address = config.bind_address();
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        admission = ?config.relay.admission,
        "Starting session relay"
    );

    warp::serve(routes)
        .run(address)
        .await;
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
