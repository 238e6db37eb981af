//! Tracking pixel handler.
//!
//! Reads the first `url` query parameter and the `Referer` header, hands them
//! to the ingestion pipeline and always answers with a 1x1 transparent GIF:
//! a dropped hit is not the browser's problem.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::app_state::AppState;

/// 1x1 transparent GIF (35 bytes).
pub const PIXEL_GIF: &[u8] = &[
    71, 73, 70, 56, 57, 97, 1, 0, 1, 0, 128, 0, 0, 255, 255, 255, 0, 0, 0, 44, 0, 0, 0, 0, 1, 0,
    1, 0, 0, 2, 2, 68, 1, 0, 59,
];

const NO_CACHE: &str = "private, no-cache, proxy-revalidate, max-age=0";

pub async fn pixel(
    State(app): State<AppState>,
    query: Option<Query<Vec<(String, String)>>>,
    headers: HeaderMap,
) -> Response {
    let url = query
        .as_ref()
        .and_then(|Query(params)| params.iter().find(|(k, _)| k == "url"))
        .map(|(_, v)| v.as_str())
        .unwrap_or_default();
    let referer = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let outcome = app.pipeline().ingest(url, referer);
    tracing::trace!(?outcome, "pixel hit");

    (
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::CACHE_CONTROL, NO_CACHE),
            (header::CONTENT_DISPOSITION, "inline"),
            (header::CONTENT_TYPE, "image/gif"),
        ],
        Bytes::from_static(PIXEL_GIF),
    )
        .into_response()
}
