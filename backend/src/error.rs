use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coupon_core::{ClaimError, CouponError};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("deviceId_required")]
    DeviceIdRequired,
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error(transparent)]
    Coupon(#[from] CouponError),
    /// Logged, never shown to the caller.
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

#[derive(Serialize)]
struct MessageBody {
    ok: bool,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            AppError::DeviceIdRequired | AppError::Claim(ClaimError::MissingFields) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::Claim(ClaimError::NoCouponAvailable) => (StatusCode::OK, self.to_string()),
            AppError::Coupon(err) => {
                let body = MessageBody {
                    ok: false,
                    message: err.to_string(),
                };
                return (StatusCode::OK, Json(body)).into_response();
            }
            AppError::Internal(err) => {
                tracing::error!("internal error: {:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error".to_string())
            }
        };
        (status, Json(ErrorBody { ok: false, error })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_device_id_is_bad_request() {
        let response = AppError::DeviceIdRequired.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({ "ok": false, "error": "deviceId_required" })
        );
    }

    #[tokio::test]
    async fn empty_pool_is_a_soft_failure() {
        let response = AppError::from(ClaimError::NoCouponAvailable).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response_json(response).await["error"],
            "No coupon available for this score."
        );
    }

    #[tokio::test]
    async fn coupon_errors_use_message_field() {
        let response = AppError::from(CouponError::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({ "ok": false, "message": "Coupon not found" })
        );
    }

    #[tokio::test]
    async fn internal_error_hides_details() {
        let response = AppError::from(anyhow::anyhow!("disk full")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response_json(response).await["error"], "internal_error");
    }
}
