use std::str::FromStr;

use anyhow::Context;
use assembly::{AppResult, AppState, Config, Notifier, db, session};
use axum::{Json, Router, debug_handler, extract::State, routing::get};
use serde_json::{Value, json};
use sqlx::{SqlitePool, sqlite::SqliteConnectOptions};
use tower_http::cors::CorsLayer;
use tower_sessions::{Expiry, MemoryStore, Session, SessionManagerLayer, cookie::SameSite};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(
            config.session_inactivity_minutes,
        )));

    let options = SqliteConnectOptions::from_str(&config.database_url)
        .with_context(|| format!("invalid DATABASE_URL {:?}", config.database_url))?;
    let db_pool = db::open(options, config.max_connections)
        .await
        .context("could not open the database")?;

    let app_state = AppState {
        db_pool,
        notifier: Notifier::from_config(&config),
    };

    let app = Router::new()
        .route("/", get(hello))
        .merge(assembly::router())
        .with_state(app_state)
        .layer(session_layer)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("could not bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "assembly listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Who the session belongs to, and whether they are a member yet.
#[debug_handler(state = AppState)]
async fn hello(State(db_pool): State<SqlitePool>, session: Session) -> AppResult<Json<Value>> {
    let identity = session::current_identity(&session).await?;
    let mut conn = db_pool.acquire().await?;
    let member = match db::fetch_member(&mut conn, identity.discord_id).await {
        Ok(member) => Some(member),
        Err(assembly::AppError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };

    Ok(Json(json!({
        "discord_id": identity.discord_id,
        "display_name": identity.display_name,
        "member": member,
    })))
}
