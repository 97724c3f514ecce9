use std::net::SocketAddr;
use std::sync::Arc;

use eventbook::auth::TokenCodec;
use eventbook::config::Config;
use eventbook::store::{EntityStore, MongoStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eventbook=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().expect("Failed to load config");

    let store: Arc<dyn EntityStore> =
        match MongoStore::connect(&config.database.url, &config.database.name).await {
            Ok(store) => Arc::new(store),
            Err(err) => {
                tracing::error!("Failed to connect to MongoDB: {err}");
                std::process::exit(1);
            }
        };
    tracing::info!("Connected to MongoDB at {}", config.database.url);

    let codec = TokenCodec::new(
        config.auth.jwt_secret.clone(),
        config.auth.jwt_expiration_seconds,
    );
    let schema = eventbook::build_schema(store.clone(), codec.clone());
    let app = eventbook::app(schema, store, codec, &config.server.static_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind port");
    axum::serve(listener, app).await.expect("Server error");
}
