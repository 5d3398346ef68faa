//! In-process stand-in for the legacy stack-management service.
#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use addon_migrator::LegacyClientSettings;

pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "s3cret";
pub const ENDPOINT_ID: u64 = 1;

/// Observable state of the fake service.
#[derive(Debug, Default)]
pub struct Recorded {
    /// Remaining `/status` calls answered with 503.
    pub status_failures: u32,
    pub status_calls: u32,
    pub auth_calls: u32,
    pub logout_calls: u32,
    /// Lifetime of issued tokens.
    pub token_ttl_secs: i64,
    /// `(id, name)` of deployed stacks.
    pub stacks: Vec<(u64, String)>,
    pub deleted: Vec<u64>,
    pub list_filters: Vec<String>,
    pub issued: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeLegacy {
    pub recorded: Arc<Mutex<Recorded>>,
}

impl FakeLegacy {
    pub fn new(stacks: &[(u64, &str)]) -> Self {
        let fake = Self::default();
        {
            let mut recorded = fake.recorded.lock().unwrap();
            recorded.token_ttl_secs = 8 * 3600;
            recorded.stacks = stacks.iter().map(|(id, n)| (*id, n.to_string())).collect();
        }
        fake
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Recorded) -> R) -> R {
        f(&mut self.recorded.lock().unwrap())
    }

    /// Serves the fake on an ephemeral port and returns its API base URL.
    pub async fn serve(&self) -> String {
        let app = Router::new()
            .route("/api/status", get(status))
            .route("/api/auth", post(auth))
            .route("/api/auth/logout", post(logout))
            .route("/api/stacks", get(list_stacks))
            .route("/api/stacks/{id}", delete(delete_stack))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api", addr)
    }
}

pub fn make_jwt(ttl_secs: i64) -> String {
    let exp = (Utc::now() + Duration::seconds(ttl_secs)).timestamp();
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"id":1,"exp":{}}}"#, exp));
    format!("{}.{}.sig", header, payload)
}

pub fn write_credentials(dir: &FsPath) -> std::path::PathBuf {
    let path = dir.join("legacy-admin.env");
    std::fs::write(
        &path,
        format!(
            "PORTAINER_LOCAL_ADMIN_USER={}\nPORTAINER_LOCAL_ADMIN_PW={}\n",
            ADMIN_USER, ADMIN_PASSWORD
        ),
    )
    .unwrap();
    path
}

pub fn client_settings(
    base_url: String,
    credentials_file: std::path::PathBuf,
) -> LegacyClientSettings {
    LegacyClientSettings {
        base_url,
        endpoint_id: ENDPOINT_ID,
        request_timeout: StdDuration::from_secs(5),
        probe_attempts: 5,
        probe_delay: StdDuration::from_millis(10),
        refresh_window: StdDuration::from_secs(30 * 60),
        credentials_file,
    }
}

fn authorized(state: &FakeLegacy, headers: &HeaderMap) -> bool {
    let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(token) = value.strip_prefix("Bearer ") else {
        return false;
    };
    state.with(|r| r.issued.iter().any(|t| t == token))
}

async fn status(State(state): State<FakeLegacy>) -> StatusCode {
    state.with(|r| {
        r.status_calls += 1;
        if r.status_failures > 0 {
            r.status_failures -= 1;
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::OK
        }
    })
}

async fn auth(
    State(state): State<FakeLegacy>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if body["Username"] != ADMIN_USER || body["Password"] != ADMIN_PASSWORD {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let jwt = state.with(|r| {
        r.auth_calls += 1;
        let jwt = make_jwt(r.token_ttl_secs);
        r.issued.push(jwt.clone());
        jwt
    });
    Ok(Json(json!({ "jwt": jwt })))
}

async fn logout(State(state): State<FakeLegacy>, headers: HeaderMap) -> StatusCode {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    state.with(|r| r.logout_calls += 1);
    StatusCode::NO_CONTENT
}

async fn list_stacks(
    State(state): State<FakeLegacy>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&state, &headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let stacks = state.with(|r| {
        r.list_filters
            .push(query.get("filters").cloned().unwrap_or_default());
        r.stacks
            .iter()
            .map(|(id, name)| json!({ "Id": id, "Name": name, "EndpointId": ENDPOINT_ID }))
            .collect::<Vec<_>>()
    });
    Ok(Json(Value::Array(stacks)))
}

async fn delete_stack(
    State(state): State<FakeLegacy>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> StatusCode {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    state.with(|r| match r.stacks.iter().position(|(sid, _)| *sid == id) {
        Some(index) => {
            r.stacks.remove(index);
            r.deleted.push(id);
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    })
}
