use crate::extract::Session;
use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use kvsession_core::KvSessionError;
use kvsession_session::SessionRecord;
use tracing::{error, info, warn};

/// JSON view of a session returned to clients.
fn session_json(record: &SessionRecord) -> serde_json::Value {
    serde_json::json!({
        "id": record.id(),
        "is_new": record.is_new(),
        "values": record.values,
    })
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, serde_json::json!({"error": message}).to_string()).into_response()
}

fn save_failed(err: &KvSessionError) -> Response {
    error!(error = %err, "Failed to save session");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to save session")
}

/// Route: `GET /session`
///
/// Returns the current session without persisting anything.
pub async fn session_handler(session: Session) -> Response {
    let record = session.lock().await;
    (StatusCode::OK, session_json(&record).to_string()).into_response()
}

/// Route: `POST /session/{key}`
///
/// Parses the body as JSON, stores it under `key` and saves the session,
/// emitting its cookie. A body that is not JSON is rejected with 400 and a
/// failed save with 500; neither sets a cookie.
pub async fn set_value_handler(
    Path(key): Path<String>,
    session: Session,
    body: String,
) -> Response {
    let value: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(key = %key, error = %e, "Rejected non-JSON session value");
            return error_response(StatusCode::BAD_REQUEST, "body must be JSON");
        }
    };

    if let Err(e) = session.lock().await.insert(key.as_str(), value) {
        return save_failed(&e);
    }

    let mut out = HeaderMap::new();
    if let Err(e) = session.registry().save_all(&mut out).await {
        return save_failed(&e);
    }

    let record = session.lock().await;
    info!(key = %key, session_id = ?record.id(), "Session value stored");
    (StatusCode::OK, out, session_json(&record).to_string()).into_response()
}

/// Route: `POST /logout`
///
/// Deletes the backend entry (if any) and clears the cookie.
pub async fn logout_handler(session: Session) -> Response {
    session.lock().await.expire();

    let mut out = HeaderMap::new();
    if let Err(e) = session.registry().save_all(&mut out).await {
        return save_failed(&e);
    }

    let session_id = session.lock().await.id().map(str::to_string);
    info!(session_id = ?session_id, "Session logged out");
    (
        StatusCode::OK,
        out,
        serde_json::json!({"status": "logged_out"}).to_string(),
    )
        .into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use kvsession_core::CookieOptions;

    #[test]
    fn test_session_json_shape() {
        let mut record = SessionRecord::new("sid", CookieOptions::default());
        record.insert("cart", "3").unwrap();
        let json = session_json(&record);
        assert_eq!(json["is_new"], true);
        assert!(json["id"].is_null());
        assert_eq!(json["values"]["cart"], "3");
    }

    #[test]
    fn test_error_response_status() {
        let resp = error_response(StatusCode::BAD_REQUEST, "nope");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
