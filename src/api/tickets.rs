use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use super::{AppState, CurrentUser};
use crate::middleware::error::{app_error_response, get_request_id_from_headers};
use crate::services::ticket_document::parse_scan_payload;
use crate::services::ScanResult;

/// POST /api/tickets/{ticket_id}/scan
///
/// Gate devices post the scanned payload as the path segment. Anything that
/// does not decode to a ticket id is reported INVALID rather than rejected.
pub async fn scan_ticket(
    State(state): State<AppState>,
    Path(payload): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(ticket_id) = parse_scan_payload(&payload) else {
        return Json(ScanResult::Invalid {
            reason: "unreadable ticket code".to_string(),
        })
        .into_response();
    };

    match state.fulfillment.scan_ticket(ticket_id).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => app_error_response(e, get_request_id_from_headers(&headers)),
    }
}

/// GET /api/tickets/{ticket_id}/document
pub async fn ticket_document(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(ticket_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    match state.fulfillment.export_ticket(user_id, ticket_id).await {
        Ok(document) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            document.render_text(),
        )
            .into_response(),
        Err(e) => app_error_response(e, get_request_id_from_headers(&headers)),
    }
}
