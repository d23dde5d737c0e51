use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Local, Utc};
use coupon_core::{
    day_key, ClaimRequest, Coupon, CouponCode, PlayCheck, Stats, REDEEMED_MESSAGE, VALID_MESSAGE,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub mod config;
pub mod error;
pub mod store;

use error::AppError;
use store::{CouponStore, JsonFileStore, MemoryStore};

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn CouponStore>,
    /// Held across every load-modify-save cycle so concurrent writers cannot
    /// overwrite each other's changes.
    write_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(store: Arc<dyn CouponStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_memory(coupons: Vec<Coupon>) -> Self {
        Self::new(Arc::new(MemoryStore::with_coupons(coupons)))
    }

    pub fn with_persistence(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(JsonFileStore::new(dir.into())))
    }

    pub async fn can_play(&self, device_id: Option<&str>) -> PlayCheck {
        let plays = self.store.load_plays().await;
        let check = coupon_core::can_play(&plays, device_id, &today());
        tracing::debug!(device_id = ?device_id, can_play = check.can_play, "play gate checked");
        check
    }

    pub async fn record_play(&self, device_id: &str) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let mut plays = self.store.load_plays().await;
        coupon_core::record_play(&mut plays, device_id, &today());
        self.store.save_plays(&plays).await?;
        tracing::debug!(device_id, "play recorded");
        Ok(())
    }

    /// The play is persisted even when no coupon matches.
    pub async fn claim(&self, request: ClaimRequest) -> Result<CouponCode, AppError> {
        let _guard = self.write_lock.lock().await;
        let mut plays = self.store.load_plays().await;
        let mut coupons = self.store.load_coupons().await;

        let claimed = coupon_core::claim(&mut coupons, &mut plays, &request, &today(), Utc::now());
        self.store.save_plays(&plays).await?;

        match claimed {
            Ok(code) => {
                self.store.save_coupons(&coupons).await?;
                tracing::info!(
                    device_id = %request.device_id,
                    game_id = %request.game_id,
                    score = request.score,
                    code = %code,
                    "coupon claimed"
                );
                Ok(code)
            }
            Err(err) => {
                tracing::info!(
                    device_id = %request.device_id,
                    game_id = %request.game_id,
                    score = request.score,
                    "no coupon available"
                );
                Err(err.into())
            }
        }
    }

    pub async fn verify(&self, code: Option<&str>) -> Result<(), AppError> {
        let coupons = self.store.load_coupons().await;
        coupon_core::verify(&coupons, code)?;
        Ok(())
    }

    pub async fn redeem(
        &self,
        code: Option<&str>,
        crew_name: Option<&str>,
    ) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let mut coupons = self.store.load_coupons().await;
        let redeemed_by = coupon_core::redeem(&mut coupons, code, crew_name, Utc::now())?
            .redeemed_by
            .clone();
        self.store.save_coupons(&coupons).await?;
        tracing::info!(code = ?code, redeemed_by = ?redeemed_by, "coupon redeemed");
        Ok(())
    }

    pub async fn stats(&self) -> Stats {
        let plays = self.store.load_plays().await;
        let coupons = self.store.load_coupons().await;
        coupon_core::stats(&coupons, &plays)
    }
}

/// The process-local calendar day.
fn today() -> String {
    day_key(Local::now().date_naive())
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/can-play", get(can_play))
        .route("/record-play", post(record_play))
        .route("/claim-coupon", post(claim_coupon))
        .route("/redeem/verify-coupon", get(verify_coupon))
        .route("/redeem/redeem-coupon", post(redeem_coupon))
        // Paths used by the first staff page.
        .route("/verify-coupon", get(verify_coupon))
        .route("/redeem-coupon", post(redeem_coupon))
        .route("/admin/stats", get(admin_stats))
        .with_state(state)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceQuery {
    device_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordPlayRequest {
    device_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimCouponRequest {
    device_id: Option<String>,
    score: Option<f64>,
    game_id: Option<String>,
}

#[derive(Deserialize)]
struct CodeQuery {
    code: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedeemRequest {
    code: Option<String>,
    crew_name: Option<String>,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Serialize)]
struct ClaimResponse {
    ok: bool,
    coupon: CouponCode,
}

#[derive(Serialize)]
struct MessageResponse {
    ok: bool,
    message: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn can_play(
    State(state): State<AppState>,
    Query(params): Query<DeviceQuery>,
) -> impl IntoResponse {
    Json(state.can_play(params.device_id.as_deref()).await)
}

async fn record_play(
    State(state): State<AppState>,
    Json(payload): Json<RecordPlayRequest>,
) -> Result<impl IntoResponse, AppError> {
    let device_id = payload
        .device_id
        .filter(|id| !id.is_empty())
        .ok_or(AppError::DeviceIdRequired)?;
    state.record_play(&device_id).await?;
    Ok(Json(OkResponse { ok: true }))
}

async fn claim_coupon(
    State(state): State<AppState>,
    Json(payload): Json<ClaimCouponRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = ClaimRequest::new(payload.device_id, payload.score, payload.game_id)?;
    let coupon = state.claim(request).await?;
    Ok(Json(ClaimResponse { ok: true, coupon }))
}

async fn verify_coupon(
    State(state): State<AppState>,
    Query(params): Query<CodeQuery>,
) -> Result<impl IntoResponse, AppError> {
    state.verify(params.code.as_deref()).await?;
    Ok(Json(MessageResponse {
        ok: true,
        message: VALID_MESSAGE,
    }))
}

async fn redeem_coupon(
    State(state): State<AppState>,
    Json(payload): Json<RedeemRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .redeem(payload.code.as_deref(), payload.crew_name.as_deref())
        .await?;
    Ok(Json(MessageResponse {
        ok: true,
        message: REDEEMED_MESSAGE,
    }))
}

async fn admin_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stats().await)
}
