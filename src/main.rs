use forward_auth::{config::ForwardAuthConfig, init_server, observability::init_tracing};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/forward-auth.yaml".to_string());

    let config = match ForwardAuthConfig::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("Usage: forward-auth [config_file]");
            process::exit(1);
        }
    };

    // Tracing setup needs the config for the optional OTLP exporter
    if let Err(e) = init_tracing(config.tracing.as_ref()) {
        eprintln!("Failed to initialize tracing: {}", e);
        process::exit(1);
    }

    if let Err(e) = init_server(config).await {
        eprintln!("forward-auth error: {}", e);
        process::exit(1);
    }
}
