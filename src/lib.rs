//! # eventbook
//!
//! Event-booking backend: a GraphQL API over MongoDB with JWT sessions.
//!
//! ## Modules
//!
//! - **auth** - password hashing, session token codec, request auth gate
//! - **dataloaders** - request-scoped batching/dedup for entity lookups
//! - **schema** - GraphQL object types and the query/mutation roots
//! - **store** - persistent collections behind the `EntityStore` trait
//! - **models** - stored document shapes
//! - **config** - layered runtime configuration
//! - **types** - shared GraphQL scalars

pub mod auth;
pub mod config;
pub mod dataloaders;
pub mod models;
pub mod schema;
pub mod store;
pub mod types;

pub use schema::{build_schema, AppSchema};

use std::path::Path;
use std::sync::Arc;

use async_graphql::http::GraphiQLSource;
use axum::{
    extract::Extension,
    http::{header, Method},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::auth::TokenCodec;
use crate::store::EntityStore;

/// Assemble the HTTP surface: the GraphQL endpoint with its auth gate,
/// GraphiQL on GET, permissive CORS, and the static single-page app
/// fallback for every non-API path.
pub fn app(
    schema: AppSchema,
    store: Arc<dyn EntityStore>,
    codec: TokenCodec,
    static_dir: &str,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let spa = ServeDir::new(static_dir)
        .fallback(ServeFile::new(Path::new(static_dir).join("index.html")));

    Router::new()
        .route("/graphql", get(graphiql).post(auth::graphql_handler))
        .fallback_service(spa)
        .layer(Extension(schema))
        .layer(Extension(store))
        .layer(Extension(codec))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn graphiql() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}
