use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use chatline_server::auth;
use chatline_server::chat::messages::MessagePolicy;
use chatline_server::config::{generate_config_template, Backend, Config};
use chatline_server::db;
use chatline_server::routes;
use chatline_server::state::AppState;
use chatline_server::ws::{self, broadcast::Broadcaster, relay::RelayBroadcaster};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("chatline_server=info"))?;
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("chatline server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;

    let jwt_secret =
        auth::jwt::load_or_generate_jwt_secret(&config.data_dir, config.jwt_secret.as_deref())?;

    let policy = MessagePolicy::new(config.revoke_window_secs, config.history_limit);

    let app_state = match config.backend {
        Backend::Websocket => {
            tracing::info!("Delivering events over local WebSocket connections");
            AppState::with_local_delivery(db, jwt_secret, policy)
        }
        Backend::Relay => {
            let relay_config = config
                .relay
                .clone()
                .ok_or("backend = \"relay\" requires a [relay] section")?;
            tracing::info!(url = %relay_config.url, "Delivering events through pub/sub relay");
            let connections = ws::new_connection_registry();
            let broadcaster: Arc<dyn Broadcaster> = Arc::new(RelayBroadcaster::spawn(
                relay_config.clone(),
                connections.clone(),
            )?);
            AppState::new(db, jwt_secret, policy, connections, broadcaster)
                .with_relay(relay_config)
        }
    };

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
