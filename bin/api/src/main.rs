//! BlinkShare API Server — guild, role, purchase and wallet records over HTTP.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use blinkshare_core::{AppError, Settings, telemetry};
use blinkshare_storage::{self as storage, Database, models::*};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};

/// Shared application state.
struct AppState {
    db: Database,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    telemetry::init();
    let settings = Settings::from_env()?;

    tracing::info!("Starting BlinkShare API Server");

    let db = storage::initialize(&settings).await?;

    // Run migrations
    sqlx::migrate!("../../migrations").run(db.pool()).await?;

    tracing::info!("Database ready");

    let app = router(Arc::new(AppState { db }));

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.api_port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/guilds", get(list_guild_ids).post(create_guild))
        .route("/api/v1/guilds/all", get(list_guilds))
        .route("/api/v1/guilds/:id", get(get_guild).put(update_guild))
        .route("/api/v1/guilds/:id/subscriptions", get(get_subscriptions))
        .route(
            "/api/v1/guilds/:id/roles/:role_id/purchases/:user_id",
            get(get_user_role_purchases),
        )
        .route("/api/v1/purchases", post(create_purchase))
        .route("/api/v1/purchases/expiring", get(get_expiring_purchases))
        .route("/api/v1/access-tokens", post(save_access_token))
        .route("/api/v1/access-tokens/:code", get(get_access_token))
        .route("/api/v1/wallets", post(create_wallet))
        .route("/health", get(health))
        .with_state(state)
}

// ─── Request Types ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWalletRequest {
    discord_user_id: String,
    address: String,
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
struct UpdateResponse {
    updated: u64,
}

type ApiError = (StatusCode, Json<ApiResponse<String>>);

fn json_ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

fn json_err(status: StatusCode, msg: &str) -> ApiError {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: msg.to_string(),
        }),
    )
}

fn db_err(e: sqlx::Error) -> ApiError {
    let err = AppError::Database(e.to_string());
    tracing::error!(error = %err, "Store operation failed");
    json_err(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

/// GET /api/v1/guilds — visible guild ids, newest first.
async fn list_guild_ids(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let ids = storage::repos::list_guild_ids_by_recency(state.db.pool())
        .await
        .map_err(db_err)?;
    Ok(json_ok(ids))
}

/// GET /api/v1/guilds/all — every guild record.
async fn list_guilds(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let guilds = storage::repos::list_guilds(state.db.pool())
        .await
        .map_err(db_err)?;
    Ok(json_ok(guilds))
}

/// POST /api/v1/guilds — create a guild with its roles.
async fn create_guild(
    State(state): State<Arc<AppState>>,
    Json(guild): Json<NewGuild>,
) -> Result<impl IntoResponse, ApiError> {
    storage::repos::insert_guild(state.db.pool(), &guild)
        .await
        .map_err(db_err)?;
    Ok((StatusCode::CREATED, json_ok(guild.id)))
}

/// GET /api/v1/guilds/:id — guild with display-formatted roles.
async fn get_guild(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let guild = storage::repos::get_guild_by_id(state.db.pool(), &id)
        .await
        .map_err(db_err)?;
    match guild {
        Some(g) => Ok(json_ok(g)),
        None => Err(json_err(StatusCode::NOT_FOUND, "Guild not found")),
    }
}

/// PUT /api/v1/guilds/:id — update fields and reconcile roles.
async fn update_guild(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<GuildUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = storage::repos::update_guild(state.db.pool(), &id, &update)
        .await
        .map_err(db_err)?;
    Ok(json_ok(UpdateResponse { updated }))
}

/// GET /api/v1/guilds/:id/subscriptions — purchases in a guild, newest first.
async fn get_subscriptions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let purchases = storage::repos::list_purchases_by_guild(state.db.pool(), &id)
        .await
        .map_err(db_err)?;
    Ok(json_ok(purchases))
}

/// GET /api/v1/guilds/:id/roles/:role_id/purchases/:user_id
async fn get_user_role_purchases(
    State(state): State<Arc<AppState>>,
    Path((guild_id, role_id, user_id)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let purchases =
        storage::repos::list_user_role_purchases(state.db.pool(), &user_id, &guild_id, &role_id)
            .await
            .map_err(db_err)?;
    Ok(json_ok(purchases))
}

/// POST /api/v1/purchases — record a role purchase.
async fn create_purchase(
    State(state): State<Arc<AppState>>,
    Json(purchase): Json<NewRolePurchase>,
) -> Result<impl IntoResponse, ApiError> {
    let saved = storage::repos::save_purchase(state.db.pool(), &purchase)
        .await
        .map_err(db_err)?;
    Ok((StatusCode::CREATED, json_ok(saved)))
}

/// GET /api/v1/purchases/expiring — purchases due for an expiry notice.
async fn get_expiring_purchases(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let purchases = storage::repos::list_expiring_purchases(state.db.pool())
        .await
        .map_err(db_err)?;
    Ok(json_ok(purchases))
}

/// POST /api/v1/access-tokens — store a code exchanged during OAuth.
async fn save_access_token(
    State(state): State<Arc<AppState>>,
    Json(token): Json<AccessToken>,
) -> Result<impl IntoResponse, ApiError> {
    let saved = storage::repos::save_access_token(state.db.pool(), &token)
        .await
        .map_err(db_err)?;
    Ok(json_ok(saved))
}

/// GET /api/v1/access-tokens/:code — the token, if still valid.
async fn get_access_token(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let token = storage::repos::find_valid_access_token(state.db.pool(), &code)
        .await
        .map_err(db_err)?;
    match token {
        Some(t) => Ok(json_ok(t)),
        None => Err(json_err(StatusCode::NOT_FOUND, "Access token not found or expired")),
    }
}

/// POST /api/v1/wallets — register a wallet address.
async fn create_wallet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateWalletRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let wallet = storage::repos::create_wallet(state.db.pool(), &req.discord_user_id, &req.address)
        .await
        .map_err(db_err)?;
    Ok((StatusCode::CREATED, json_ok(wallet)))
}
