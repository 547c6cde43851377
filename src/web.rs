//! HTTP front end: archive listing and search, file serving, and admin-only
//! job triggers. Every route sits behind HTTP Basic auth.

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::app::App;
use crate::browser::BrowserLauncher;
use crate::config::WebUsers;
use crate::domain::{ArchiveRange, EditionDate};
use crate::error::ArchiverError;
use crate::indexer::{ArchiveEntry, SearchHit};
use crate::jobs::JobState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Guest,
}

pub struct WebState<L: BrowserLauncher + Clone + 'static> {
    app: App<L>,
    users: WebUsers,
}

pub fn router<L: BrowserLauncher + Clone + 'static>(app: App<L>, users: WebUsers) -> Router {
    if users.admin.is_none() && users.guest.is_none() {
        warn!("no web users configured, every request will be rejected");
    }
    let state = Arc::new(WebState { app, users });
    Router::new()
        .route("/", get(index::<L>))
        .route("/download/{filename}", get(download::<L>))
        .route("/thumbnails/{filename}", get(thumbnail::<L>))
        .route("/trigger-scrape", post(trigger_scrape::<L>))
        .route("/reindex", post(reindex::<L>))
        .route("/archive-download", post(archive_download::<L>))
        .route("/status", get(status::<L>))
        .with_state(state)
}

pub async fn serve<L: BrowserLauncher + Clone + 'static>(
    listener: TcpListener,
    app: App<L>,
    users: WebUsers,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ArchiverError> {
    let addr = listener
        .local_addr()
        .map_err(|err| ArchiverError::Server(err.to_string()))?;
    info!(%addr, "web server listening");
    axum::serve(listener, router(app, users))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| ArchiverError::Server(err.to_string()))
}

/// Resolves the caller's role from an `Authorization: Basic` header.
pub fn authenticate(headers: &HeaderMap, users: &WebUsers) -> Option<Role> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, password) = decoded.split_once(':')?;
    let matches = |creds: &Option<crate::config::Credentials>| {
        creds
            .as_ref()
            .map(|c| {
                let same_user = c.user.as_bytes().ct_eq(user.as_bytes());
                let same_password = c.password.as_bytes().ct_eq(password.as_bytes());
                bool::from(same_user & same_password)
            })
            .unwrap_or(false)
    };
    if matches(&users.admin) {
        Some(Role::Admin)
    } else if matches(&users.guest) {
        Some(Role::Guest)
    } else {
        None
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"epaper\"")],
        "authentication required",
    )
        .into_response()
}

#[derive(Serialize)]
struct Message {
    message: String,
}

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, Json(Message { message: text.into() })).into_response()
}

fn error_response(err: &ArchiverError) -> Response {
    match err {
        ArchiverError::ArtifactNotFound(name) => {
            message(StatusCode::NOT_FOUND, format!("not found: {name}"))
        }
        ArchiverError::JobBusy(_) => message(StatusCode::CONFLICT, "system busy"),
        _ => {
            error!(error = %err, "request failed");
            message(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ArchiverError>
where
    F: FnOnce() -> Result<T, ArchiverError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| ArchiverError::Server(err.to_string()))?
}

#[derive(Debug, Deserialize)]
struct IndexQuery {
    q: Option<String>,
}

#[derive(Serialize)]
struct IndexResponse {
    query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<ArchiveEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hits: Option<Vec<SearchHit>>,
    message: Option<String>,
    busy: bool,
    admin: bool,
}

async fn index<L: BrowserLauncher + Clone + 'static>(
    State(state): State<Arc<WebState<L>>>,
    headers: HeaderMap,
    Query(params): Query<IndexQuery>,
) -> Response {
    let Some(role) = authenticate(&headers, &state.users) else {
        return unauthorized();
    };
    let query = params
        .q
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty());
    let app = state.app.clone();
    let busy = app.is_busy();

    let response = match query {
        Some(query) => {
            let lookup = query.clone();
            blocking(move || Ok(app.search(&lookup))).await.map(|result| IndexResponse {
                message: Some(format!("{} hits for \"{}\"", result.hits.len(), query)),
                query: Some(query),
                files: None,
                hits: Some(result.hits),
                busy,
                admin: role == Role::Admin,
            })
        }
        None => blocking(move || app.list()).await.map(|result| IndexResponse {
            query: None,
            files: Some(result.files),
            hits: None,
            message: None,
            busy,
            admin: role == Role::Admin,
        }),
    };
    match response {
        Ok(body) => Json(body).into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    dl: Option<String>,
}

async fn download<L: BrowserLauncher + Clone + 'static>(
    State(state): State<Arc<WebState<L>>>,
    headers: HeaderMap,
    Path(filename): Path<String>,
    Query(params): Query<DownloadQuery>,
) -> Response {
    if authenticate(&headers, &state.users).is_none() {
        return unauthorized();
    }
    let path = match state.app.store().artifact_path(&filename) {
        Ok(path) => path,
        Err(err) => return error_response(&err),
    };
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(_) => return error_response(&ArchiverError::ArtifactNotFound(filename)),
    };
    let disposition = if params.dl.as_deref() == Some("1") {
        format!("attachment; filename=\"{filename}\"")
    } else {
        format!("inline; filename=\"{filename}\"")
    };
    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("inline"));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

async fn thumbnail<L: BrowserLauncher + Clone + 'static>(
    State(state): State<Arc<WebState<L>>>,
    headers: HeaderMap,
    Path(filename): Path<String>,
) -> Response {
    if authenticate(&headers, &state.users).is_none() {
        return unauthorized();
    }
    let path = match state.app.store().thumbnail_file(&filename) {
        Ok(path) => path,
        Err(err) => return error_response(&err),
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => (StatusCode::OK, [(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response(),
        Err(_) => error_response(&ArchiverError::ArtifactNotFound(filename)),
    }
}

fn require_admin<L: BrowserLauncher + Clone + 'static>(
    state: &WebState<L>,
    headers: &HeaderMap,
) -> Result<(), Response> {
    match authenticate(headers, &state.users) {
        None => Err(unauthorized()),
        Some(Role::Guest) => Err(message(StatusCode::FORBIDDEN, "admin only")),
        Some(Role::Admin) => Ok(()),
    }
}

/// 202 when the job was started, 409 when another one is running.
fn started(label: &str, result: Result<std::thread::JoinHandle<()>, ArchiverError>) -> Response {
    match result {
        Ok(_) => message(StatusCode::ACCEPTED, format!("{label} started")),
        Err(err) => error_response(&err),
    }
}

async fn trigger_scrape<L: BrowserLauncher + Clone + 'static>(
    State(state): State<Arc<WebState<L>>>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    started("download", state.app.spawn_daily())
}

async fn reindex<L: BrowserLauncher + Clone + 'static>(
    State(state): State<Arc<WebState<L>>>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    started("reindex", state.app.spawn_reindex())
}

#[derive(Debug, Deserialize)]
struct ArchiveForm {
    date: Option<String>,
    range: Option<String>,
}

async fn archive_download<L: BrowserLauncher + Clone + 'static>(
    State(state): State<Arc<WebState<L>>>,
    headers: HeaderMap,
    Form(form): Form<ArchiveForm>,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    let Some(date) = form.date.filter(|d| !d.trim().is_empty()) else {
        return message(StatusCode::BAD_REQUEST, "date required");
    };
    let range = match parse_range(&date, form.range.as_deref()) {
        Ok(range) => range,
        Err(err) => return message(StatusCode::BAD_REQUEST, err.to_string()),
    };
    let label = format!("archive download for {} ({} days)", range.start, range.days);
    started(&label, state.app.spawn_archive(range))
}

fn parse_range(date: &str, days: Option<&str>) -> Result<ArchiveRange, ArchiverError> {
    let start: EditionDate = date.parse()?;
    let days = match days.map(str::trim).filter(|d| !d.is_empty()) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ArchiverError::InvalidRange(raw.to_string()))?,
        None => 1,
    };
    ArchiveRange::new(start, days)
}

#[derive(Serialize)]
struct StatusResponse {
    busy: bool,
    job: JobState,
    files: usize,
    indexed: usize,
}

async fn status<L: BrowserLauncher + Clone + 'static>(
    State(state): State<Arc<WebState<L>>>,
    headers: HeaderMap,
) -> Response {
    if authenticate(&headers, &state.users).is_none() {
        return unauthorized();
    }
    let app = state.app.clone();
    match blocking(move || app.status()).await {
        Ok(status) => Json(StatusResponse {
            busy: status.job.is_busy(),
            job: status.job,
            files: status.files,
            indexed: status.indexed,
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;

    fn users() -> WebUsers {
        WebUsers {
            admin: Some(Credentials {
                user: "admin".to_string(),
                password: "secret".to_string(),
            }),
            guest: Some(Credentials {
                user: "guest".to_string(),
                password: "guest".to_string(),
            }),
        }
    }

    fn basic(user: &str, password: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let token = STANDARD.encode(format!("{user}:{password}"));
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn roles_from_basic_auth() {
        let users = users();
        assert_eq!(authenticate(&basic("admin", "secret"), &users), Some(Role::Admin));
        assert_eq!(authenticate(&basic("guest", "guest"), &users), Some(Role::Guest));
        assert_eq!(authenticate(&basic("admin", "wrong"), &users), None);
        assert_eq!(authenticate(&HeaderMap::new(), &users), None);
    }

    #[test]
    fn credential_prefixes_and_swaps_are_rejected() {
        let users = users();
        assert_eq!(authenticate(&basic("admin", "secre"), &users), None);
        assert_eq!(authenticate(&basic("admin", "secret2"), &users), None);
        assert_eq!(authenticate(&basic("adm", "secret"), &users), None);
        assert_eq!(authenticate(&basic("guest", "secret"), &users), None);
        assert_eq!(authenticate(&basic("admin", "guest"), &users), None);
    }

    #[test]
    fn archive_range_from_form() {
        let range = parse_range("2025-03-02", Some("7")).unwrap();
        assert_eq!(range.days, 7);
        assert_eq!(parse_range("2025-03-02", None).unwrap().days, 1);
        assert!(parse_range("2025-03-02", Some("abc")).is_err());
        assert!(parse_range("yesterday", Some("1")).is_err());
    }
}
