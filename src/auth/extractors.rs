use std::sync::Arc;

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRef, FromRequest, FromRequestParts, Query, Request,
    },
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use tracing::warn;

use super::{
    claims::{Claims, TokenKind},
    jwt::TokenService,
};
use crate::error::ServiceError;

/// Extracts and validates the bearer access token, yielding its claims.
pub struct AuthUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<TokenService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(ServiceError::Unauthorized)?;

        // Expect "Bearer <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ServiceError::Unauthorized)?;

        let tokens = Arc::<TokenService>::from_ref(state);
        let claims = tokens.validate(token).map_err(|e| {
            warn!(error = %e, "rejected bearer token");
            ServiceError::Unauthorized
        })?;

        if claims.token_type != TokenKind::Access {
            warn!(user_id = %claims.sub, "refresh token presented as bearer");
            return Err(ServiceError::Unauthorized);
        }

        Ok(AuthUser(claims))
    }
}

const BAD_BODY: &str = "failed to parse request body";
const BAD_QUERY: &str = "failed to parse query string";

/// `Json<T>` whose rejection is a `ServiceError`, so malformed bodies get the
/// same error envelope as every other failure.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            warn!(status = %e.status(), error = %e.body_text(), "rejected request body");
            ServiceError::InvalidInput(BAD_BODY.into())
        })?;
        Ok(JsonBody(value))
    }
}

/// `Query<T>` with a `ServiceError` rejection.
pub struct QueryParams<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| {
                warn!(error = %e.body_text(), "rejected query string");
                ServiceError::InvalidInput(BAD_QUERY.into())
            })?;
        Ok(QueryParams(value))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;
    use crate::config::AppConfig;

    #[derive(Clone)]
    struct TestState(Arc<TokenService>);

    impl FromRef<TestState> for Arc<TokenService> {
        fn from_ref(state: &TestState) -> Self {
            state.0.clone()
        }
    }

    fn state() -> TestState {
        TestState(Arc::new(TokenService::new(&AppConfig::fake().jwt)))
    }

    async fn extract(state: &TestState, header: Option<String>) -> Result<AuthUser, ServiceError> {
        let mut req = Request::builder().uri("/auth/profile");
        if let Some(h) = header {
            req = req.header(AUTHORIZATION, h);
        }
        let (mut parts, _) = req.body(()).unwrap().into_parts();
        AuthUser::from_request_parts(&mut parts, state).await
    }

    #[tokio::test]
    async fn access_token_is_accepted() {
        let st = state();
        let id = uuid::Uuid::new_v4();
        let token = st.0.issue_access(id, "a@example.com", "1").unwrap();
        let AuthUser(claims) = extract(&st, Some(format!("Bearer {token}"))).await.unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.email, "a@example.com");
    }

    #[tokio::test]
    async fn refresh_token_is_rejected() {
        let st = state();
        let token = st.0.issue_refresh(uuid::Uuid::new_v4(), "a@example.com", "1").unwrap();
        let err = extract(&st, Some(format!("Bearer {token}"))).await.err().unwrap();
        assert!(matches!(err, ServiceError::Unauthorized));
    }

    #[derive(Debug, serde::Deserialize)]
    struct Named {
        #[allow(dead_code)]
        name: String,
    }

    #[tokio::test]
    async fn undecodable_body_is_invalid_input() {
        let bodies = [
            ("application/json", "{}"),
            ("application/json", "{\"name\":"),
            ("text/plain", "name=x"),
        ];
        for (content_type, body) in bodies {
            let req = Request::builder()
                .method("POST")
                .header(axum::http::header::CONTENT_TYPE, content_type)
                .body(axum::body::Body::from(body))
                .unwrap();
            let err = JsonBody::<Named>::from_request(req, &()).await.err().unwrap();
            assert!(
                matches!(&err, ServiceError::InvalidInput(msg) if msg == BAD_BODY),
                "{content_type} {body}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn mistyped_query_is_invalid_input() {
        #[derive(Debug, serde::Deserialize)]
        struct Paging {
            #[allow(dead_code)]
            page: u32,
        }
        let req = Request::builder().uri("/?page=first").body(()).unwrap();
        let (mut parts, _) = req.into_parts();
        let err = QueryParams::<Paging>::from_request_parts(&mut parts, &())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::InvalidInput(msg) if msg == BAD_QUERY));
    }

    #[tokio::test]
    async fn missing_or_malformed_header_is_rejected() {
        let st = state();
        let headers = [
            None,
            Some("Basic abc".to_string()),
            Some("Bearer ".to_string()),
            Some("Bearer junk".to_string()),
        ];
        for header in headers {
            let err = extract(&st, header).await.err().unwrap();
            assert!(matches!(err, ServiceError::Unauthorized));
        }
    }
}
