use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;

/// Caller identity taken from the optional `X-User-ID` header.
///
/// Recorded on payments (`recorded_by`) and assessment audit rows. Requests
/// without the header are accepted and attributed to nobody.
#[derive(Debug, Clone, Default)]
pub struct Actor(pub Option<String>);

impl Actor {
    pub fn into_inner(self) -> Option<String> {
        self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-ID")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        if let Some(user_id) = &user_id {
            tracing::Span::current().record("user_id", user_id.as_str());
        }

        Ok(Actor(user_id))
    }
}
