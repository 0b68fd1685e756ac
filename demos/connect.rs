use std::sync::Arc;

use async_trait::async_trait;
use sockstate::{
    observer::StaticToken, ConnectionListener, ConnectionManager, DisconnectCause, HandshakeInfo,
    RawEvent, Settings, SocketError, User, DEFAULT_CONNECTION_TIMEOUT,
};

struct Printer;

#[async_trait]
impl ConnectionListener for Printer {
    async fn on_connecting(&self) {
        log::info!("Connecting...");
    }

    async fn on_connected(&self, info: &HandshakeInfo) {
        log::info!("Connected, connection id {}", info.connection_id);
    }

    async fn on_disconnected(&self, cause: &DisconnectCause) {
        log::info!("Disconnected: {:?}", cause);
    }

    async fn on_event(&self, event: &RawEvent) {
        log::info!("Received event {}: {}", event.kind, event.body);
    }

    async fn on_error(&self, error: &SocketError) {
        log::warn!("Error: {}", error);
    }
}

fn env(name: &str) -> String {
    std::env::var(name)
        .map_err(|_| {
            println!("No {} env var or invalid", name);
            std::process::exit(1);
        })
        .unwrap()
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let endpoint = env("SOCKSTATE_ENDPOINT");
    let api_key = env("SOCKSTATE_API_KEY");
    let user = env("SOCKSTATE_USER");
    let token = std::env::var("SOCKSTATE_TOKEN").ok();

    let settings = Settings::new(&endpoint, api_key).unwrap();
    let anonymous = token.is_none();
    let credentials = token.map(StaticToken::new).unwrap_or_else(StaticToken::none);

    let manager = ConnectionManager::builder(settings)
        .credentials(Arc::new(credentials))
        .build();

    let printer: Arc<dyn ConnectionListener> = Arc::new(Printer);
    manager.add_listener(&printer);

    manager.connect_user(User::new(user), anonymous);

    if let Err(err) = manager.await_connection(DEFAULT_CONNECTION_TIMEOUT).await {
        log::error!("{}", err);
        return;
    }

    tokio::signal::ctrl_c().await.unwrap();

    manager.disconnect();
}
