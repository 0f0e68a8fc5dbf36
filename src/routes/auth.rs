//! Identity extraction: resolves the acting viewer from the request.
//!
//! The session token comes from the `session_token` cookie or, for
//! non-browser clients, an `Authorization: Bearer` header. A missing or
//! unknown token is an anonymous request, not a rejection; the policy check
//! in the service layer decides what anonymous viewers may do.

use axum::extract::FromRef;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::services::report::ServiceError;
use crate::state::AppState;
use crate::store::Viewer;

const COOKIE_NAME: &str = "session_token";

/// Session token from the cookie, falling back to a bearer header.
#[must_use]
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(token) = jar.get(COOKIE_NAME).map(Cookie::value).filter(|t| !t.is_empty()) {
        return Some(token.to_owned());
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToOwned::to_owned)
}

// =============================================================================
// EXTRACTOR
// =============================================================================

/// The viewer behind a request, if any.
pub struct MaybeViewer(pub Option<Viewer>);

impl MaybeViewer {
    #[must_use]
    pub fn viewer(&self) -> Option<&Viewer> {
        self.0.as_ref()
    }
}

impl<S> axum::extract::FromRequestParts<S> for MaybeViewer
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(&parts.headers) else {
            return Ok(Self(None));
        };

        let app_state = AppState::from_ref(state);
        let viewer = app_state.store.resolve_session(&token).await?;
        Ok(Self(viewer))
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
