//! Acting user extraction
//!
//! Authentication happens upstream; the ledger only records who acted. The
//! identity arrives in the `X-Actor-Id` header and is attached to every
//! entry and transition for audit.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

/// Header carrying the acting user's id
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Extractor for the acting user
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CurrentActor(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ACTOR_HEADER)
            .ok_or_else(|| AppError::validation(ACTOR_HEADER, "Actor header is required"))?;

        value
            .to_str()
            .ok()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .map(CurrentActor)
            .ok_or_else(|| AppError::validation(ACTOR_HEADER, "Actor header must be a UUID"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<CurrentActor, AppError> {
        let (mut parts, _) = request.into_parts();
        CurrentActor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_reads_actor_header() {
        let actor = Uuid::new_v4();
        let request = Request::builder()
            .header(ACTOR_HEADER, actor.to_string())
            .body(())
            .unwrap();
        assert_eq!(extract(request).await.unwrap(), CurrentActor(actor));
    }

    #[tokio::test]
    async fn test_rejects_missing_or_malformed_header() {
        let missing = Request::builder().body(()).unwrap();
        assert!(matches!(
            extract(missing).await,
            Err(AppError::Validation { .. })
        ));

        let malformed = Request::builder()
            .header(ACTOR_HEADER, "warehouse-clerk")
            .body(())
            .unwrap();
        assert!(extract(malformed).await.is_err());
    }
}
