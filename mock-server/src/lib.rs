//! In-memory imitation of the SpaceTraders v2 API, for client tests.
//!
//! Covers agent registration, bearer-token auth, paginated system listings,
//! ship navigation modes, dock/orbit, and extraction with cooldowns. Errors
//! use the remote envelope `{"error": {"code", "message", "data"}}`. An
//! optional fixed-window request limit answers 429 with `retryAfter`.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{
    net::TcpListener,
    sync::{Mutex, RwLock},
    time::Instant,
};
use uuid::Uuid;

pub const FLIGHT_MODES: [&str; 4] = ["CRUISE", "BURN", "DRIFT", "STEALTH"];
pub const SYSTEM_COUNT: usize = 12;
const EXTRACT_COOLDOWN_SECS: u64 = 70;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub symbol: String,
    pub faction: String,
    pub credits: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nav {
    pub status: String,
    pub flight_mode: String,
}

#[derive(Debug)]
struct Ship {
    nav: Nav,
    cooldown_until: Option<Instant>,
}

#[derive(Debug)]
struct Account {
    agent: Agent,
    ships: HashMap<String, Ship>,
}

#[derive(Debug, Default)]
struct World {
    accounts: HashMap<String, Account>,
}

#[derive(Debug)]
struct Window {
    capacity: u32,
    length: Duration,
    start: Option<Instant>,
    count: u32,
}

#[derive(Clone)]
struct AppState {
    world: Arc<RwLock<World>>,
    limit: Option<Arc<Mutex<Window>>>,
}

/// Error in the remote envelope.
struct ApiFailure {
    status: StatusCode,
    code: u32,
    message: String,
    data: Option<Value>,
}

impl ApiFailure {
    fn new(status: StatusCode, code: u32, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            data: None,
        }
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let mut error = json!({ "code": self.code, "message": self.message });
        if let Some(data) = self.data {
            error["data"] = data;
        }
        (self.status, Json(json!({ "error": error }))).into_response()
    }
}

type ApiResult = Result<(StatusCode, Json<Value>), ApiFailure>;

fn ok(data: Value) -> ApiResult {
    Ok((StatusCode::OK, Json(json!({ "data": data }))))
}

/// The API without a request limit.
pub fn app() -> Router {
    router(None)
}

/// The API answering 429 once `capacity` requests arrive within `window`.
pub fn app_with_limit(capacity: u32, window: Duration) -> Router {
    router(Some(Window {
        capacity,
        length: window,
        start: None,
        count: 0,
    }))
}

fn router(limit: Option<Window>) -> Router {
    let state = AppState {
        world: Arc::new(RwLock::new(World::default())),
        limit: limit.map(|w| Arc::new(Mutex::new(w))),
    };
    let api = Router::new()
        .route("/register", post(register))
        .route("/my/agent", get(my_agent))
        .route("/systems", get(list_systems))
        .route("/my/ships/{ship}/nav", get(get_nav).patch(set_flight_mode))
        .route("/my/ships/{ship}/dock", post(dock))
        .route("/my/ships/{ship}/orbit", post(orbit))
        .route("/my/ships/{ship}/extract", post(extract))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state);
    Router::new().nest("/v2", api)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, app()).await
}

pub async fn serve(listener: TcpListener, app: Router) -> Result<(), std::io::Error> {
    axum::serve(listener, app).await
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(limit) = &state.limit {
        let mut window = limit.lock().await;
        let now = Instant::now();
        let expired = window.start.map_or(true, |start| now >= start + window.length);
        if expired {
            window.start = Some(now);
            window.count = 0;
        }
        if window.count >= window.capacity {
            let retry_after = window
                .start
                .map(|start| (start + window.length).saturating_duration_since(now))
                .unwrap_or_default();
            tracing::warn!(retry_after_ms = retry_after.as_millis() as u64, "rate limit exceeded");
            return ApiFailure::new(
                StatusCode::TOO_MANY_REQUESTS,
                429,
                "You have reached your API limit.",
            )
            .with_data(json!({
                "type": "IP_ADDRESS",
                "retryAfter": retry_after.as_secs_f64(),
                "limitBurst": window.capacity,
            }))
            .into_response();
        }
        window.count += 1;
    }
    next.run(request).await
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn unauthorized() -> ApiFailure {
    ApiFailure::new(
        StatusCode::UNAUTHORIZED,
        401,
        "Missing or invalid bearer token.",
    )
}

#[derive(Deserialize)]
pub struct RegisterAgent {
    pub symbol: Option<String>,
    pub faction: Option<String>,
}

async fn register(State(state): State<AppState>, Json(input): Json<RegisterAgent>) -> ApiResult {
    let (Some(symbol), Some(faction)) = (input.symbol, input.faction) else {
        return Err(ApiFailure::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            422,
            "Invalid registration request.",
        ));
    };
    let mut world = state.world.write().await;
    if world.accounts.values().any(|a| a.agent.symbol == symbol) {
        return Err(ApiFailure::new(StatusCode::CONFLICT, 4111, "Agent symbol has already been claimed.")
            .with_data(json!({ "agentSymbol": symbol })));
    }

    let token = Uuid::new_v4().to_string();
    let agent = Agent {
        symbol: symbol.clone(),
        faction,
        credits: 175_000,
    };
    let ship = Ship {
        nav: Nav {
            status: "DOCKED".to_string(),
            flight_mode: "CRUISE".to_string(),
        },
        cooldown_until: None,
    };
    world.accounts.insert(
        token.clone(),
        Account {
            agent: agent.clone(),
            ships: HashMap::from([(format!("{symbol}-1"), ship)]),
        },
    );
    tracing::info!(%symbol, "agent registered");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "data": { "token": token, "agent": agent } })),
    ))
}

async fn my_agent(State(state): State<AppState>, headers: HeaderMap) -> ApiResult {
    let token = bearer(&headers).ok_or_else(unauthorized)?;
    let world = state.world.read().await;
    let account = world.accounts.get(token).ok_or_else(unauthorized)?;
    ok(json!(account.agent))
}

#[derive(Deserialize)]
pub struct Pagination {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

async fn list_systems(Query(query): Query<Pagination>) -> ApiResult {
    let limit = query.limit.unwrap_or(10);
    let page = query.page.unwrap_or(1);
    if !(1..=20).contains(&limit) || page == 0 {
        return Err(ApiFailure::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            422,
            "Invalid pagination parameters.",
        )
        .with_data(json!({ "limit": limit, "page": page })));
    }
    let systems: Vec<Value> = (0..SYSTEM_COUNT)
        .skip((page - 1) * limit)
        .take(limit)
        .map(|i| json!({ "symbol": format!("X1-S{i:02}"), "type": "RED_STAR" }))
        .collect();
    Ok((
        StatusCode::OK,
        Json(json!({
            "data": systems,
            "meta": { "total": SYSTEM_COUNT, "page": page, "limit": limit }
        })),
    ))
}

/// Runs `f` against the caller's ship, answering 401/404 as the API does.
async fn with_ship<F>(state: &AppState, headers: &HeaderMap, ship: &str, f: F) -> ApiResult
where
    F: FnOnce(&mut Ship) -> ApiResult,
{
    let token = bearer(headers).ok_or_else(unauthorized)?;
    let mut world = state.world.write().await;
    let account = world.accounts.get_mut(token).ok_or_else(unauthorized)?;
    let ship = account.ships.get_mut(ship).ok_or_else(|| {
        ApiFailure::new(StatusCode::NOT_FOUND, 404, format!("Ship {ship} not found."))
    })?;
    f(ship)
}

async fn get_nav(State(state): State<AppState>, headers: HeaderMap, Path(ship): Path<String>) -> ApiResult {
    with_ship(&state, &headers, &ship, |ship| ok(json!(ship.nav))).await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightModeChange {
    pub flight_mode: Option<String>,
}

async fn set_flight_mode(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(ship): Path<String>,
    Json(input): Json<FlightModeChange>,
) -> ApiResult {
    with_ship(&state, &headers, &ship, |ship| {
        match input.flight_mode.filter(|m| FLIGHT_MODES.contains(&m.as_str())) {
            Some(mode) => {
                ship.nav.flight_mode = mode;
                ok(json!(ship.nav))
            }
            None => Err(ApiFailure::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                422,
                "Invalid flight mode.",
            )),
        }
    })
    .await
}

async fn dock(State(state): State<AppState>, headers: HeaderMap, Path(ship): Path<String>) -> ApiResult {
    with_ship(&state, &headers, &ship, |ship| {
        ship.nav.status = "DOCKED".to_string();
        ok(json!({ "nav": ship.nav }))
    })
    .await
}

async fn orbit(State(state): State<AppState>, headers: HeaderMap, Path(ship): Path<String>) -> ApiResult {
    with_ship(&state, &headers, &ship, |ship| {
        ship.nav.status = "IN_ORBIT".to_string();
        ok(json!({ "nav": ship.nav }))
    })
    .await
}

async fn extract(State(state): State<AppState>, headers: HeaderMap, Path(ship_symbol): Path<String>) -> ApiResult {
    with_ship(&state, &headers, &ship_symbol, |ship| {
        if ship.nav.status != "IN_ORBIT" {
            return Err(ApiFailure::new(
                StatusCode::BAD_REQUEST,
                4236,
                format!("Ship {ship_symbol} is not currently in orbit."),
            ));
        }
        let now = Instant::now();
        if let Some(until) = ship.cooldown_until.filter(|until| *until > now) {
            let remaining = until.saturating_duration_since(now).as_secs();
            return Err(ApiFailure::new(
                StatusCode::CONFLICT,
                4000,
                format!("Ship action is still on cooldown for {remaining} second(s)."),
            )
            .with_data(json!({
                "cooldown": {
                    "shipSymbol": ship_symbol,
                    "totalSeconds": EXTRACT_COOLDOWN_SECS,
                    "remainingSeconds": remaining,
                }
            })));
        }
        ship.cooldown_until = Some(now + Duration::from_secs(EXTRACT_COOLDOWN_SECS));
        ok(json!({
            "cooldown": {
                "shipSymbol": ship_symbol,
                "totalSeconds": EXTRACT_COOLDOWN_SECS,
                "remainingSeconds": EXTRACT_COOLDOWN_SECS,
            },
            "extraction": { "shipSymbol": ship_symbol, "yield": { "symbol": "IRON_ORE", "units": 7 } }
        }))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_envelope_carries_code_and_data() {
        let failure = ApiFailure::new(StatusCode::CONFLICT, 4000, "cooldown")
            .with_data(json!({ "cooldown": { "remainingSeconds": 3 } }));
        let response = failure.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn bearer_requires_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Token abc".parse().unwrap());
        assert_eq!(bearer(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer(&headers), Some("abc"));
    }

    #[test]
    fn agent_serializes_to_json() {
        let agent = Agent {
            symbol: "FLEET".to_string(),
            faction: "COSMIC".to_string(),
            credits: 10,
        };
        let json = serde_json::to_value(&agent).unwrap();
        assert_eq!(json["symbol"], "FLEET");
        assert_eq!(json["credits"], 10);
    }

    #[test]
    fn nav_uses_camel_case() {
        let nav = Nav {
            status: "DOCKED".to_string(),
            flight_mode: "BURN".to_string(),
        };
        assert_eq!(serde_json::to_value(&nav).unwrap()["flightMode"], "BURN");
    }
}
