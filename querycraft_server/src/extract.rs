use crate::error::ApiError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use querycraft_core::UserId;
use querycraft_core::store::models::UserRecord;
use std::future;
use std::str::FromStr;

/// The authenticated caller, placed in request extensions by
/// [`crate::middleware::protect`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRecord);

impl CurrentUser {
    pub fn id(&self) -> UserId {
        self.0.id
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    #[tracing::instrument(level = "debug", name = "extract.current_user", skip_all)]
    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let res = parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Not authorized, no token".to_string()));
        future::ready(res)
    }
}

/// Parse an id taken from a path segment or body field.
pub fn parse_id<T>(raw: &str, field: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(raw.trim()).map_err(|e| ApiError::invalid(format!("invalid {field}: {e}")))
}

/// Parse a required body field, reporting absence as `{field} is required`.
pub fn require_id<T>(raw: Option<&str>, field: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => parse_id(raw, field),
        None => Err(ApiError::invalid(format!("{field} is required"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querycraft_core::ProjectId;

    #[test]
    fn ids_parse_or_report_field() {
        let id = ProjectId::new();
        let parsed: ProjectId = parse_id(&format!(" {id} "), "projectId").unwrap();
        assert_eq!(parsed, id);

        let err = parse_id::<ProjectId>("nope", "projectId").unwrap_err();
        assert!(err.to_string().starts_with("invalid projectId"));

        let err = require_id::<ProjectId>(None, "projectId").unwrap_err();
        assert_eq!(err.to_string(), "projectId is required");
    }
}
