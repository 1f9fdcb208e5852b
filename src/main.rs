use std::env;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("crudkit=info,crudkit_server=info")),
        )
        .with(fmt::layer())
        .init();

    let mut args = env::args().skip(1);
    let cmd = args.next().unwrap_or_default();
    if cmd != "serve" {
        eprintln!("Usage: crudkit serve --config <path>");
        std::process::exit(2);
    }

    let mut config_path = String::from("./config/example-config.yaml");
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(v) = args.next() {
                config_path = v;
            }
        }
    }

    let cfg = match crudkit_config::load_and_validate(&config_path) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(path = %config_path, error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    tracing::info!(path = %config_path, models = cfg.models.len(), "config loaded");

    if let Err(e) = crudkit_server::serve(cfg).await {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
