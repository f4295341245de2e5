use axum::{
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::config::{ApiKeyEntry, AuthConfig};

/// What an API key is allowed to do. Readers may list templates and
/// accounts; every mutation (template CRUD, account creation, firing the
/// scheduler) needs a writer role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Reader,
}

impl Role {
    pub fn parse(s: &str) -> Role {
        if s.eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::Reader
        }
    }

    pub fn can_write(self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Authenticated caller, available to handlers via request extensions.
/// The name flows into `created_by` and the audit trail.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub name: String,
    pub role: Role,
}

#[derive(Serialize)]
struct AuthError {
    success: bool,
    error: String,
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(AuthError {
            success: false,
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn presented_key<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get("X-API-Key")
        .or_else(|| req.headers().get(header::AUTHORIZATION))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s))
}

fn lookup<'a>(config: &'a AuthConfig, presented: &str) -> Option<&'a ApiKeyEntry> {
    // Constant-time comparison against every configured key.
    config
        .api_keys
        .iter()
        .find(|entry| entry.key.as_bytes().ct_eq(presented.as_bytes()).into())
}

pub async fn auth_middleware<B>(
    Extension(config): Extension<std::sync::Arc<AuthConfig>>,
    mut req: Request<B>,
    next: Next<B>,
) -> Response {
    if !config.enabled {
        req.extensions_mut().insert(CallerIdentity {
            name: "anonymous".to_string(),
            role: Role::Admin,
        });
        return next.run(req).await;
    }

    let Some(key) = presented_key(&req) else {
        return unauthorized(
            "Missing API key. Provide X-API-Key header or Authorization: Bearer <key>",
        );
    };

    match lookup(&config, key) {
        Some(entry) => {
            let role = Role::parse(&entry.role);
            tracing::debug!(caller = %entry.name, ?role, "Authenticated request");
            req.extensions_mut().insert(CallerIdentity {
                name: entry.name.clone(),
                role,
            });
            next.run(req).await
        }
        None => {
            tracing::warn!("Invalid API key presented");
            unauthorized("Invalid API key")
        }
    }
}
