//! Body extractor whose rejections use the API error envelope

use axum::extract::FromRequest;
use orgforge_common::errors::AppError;

/// `Json<T>` that rejects with a 400 `AppError` instead of axum's plain-text 422
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);
