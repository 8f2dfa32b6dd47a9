/// Access Gate Middleware
///
/// Guards protected routes. For every request it runs the session refresh
/// flow; rejected sessions get a generic 401 and the handler never runs.
/// Accepted sessions get `AuthenticatedUser` in request extensions, and a
/// freshly minted access token is set as a cookie on the way out.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    Error, HttpMessage, HttpResponse,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::cookies::{access_cookie, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use crate::auth::{verify_and_refresh, AuthenticatedUser, CredentialStore, SessionTokens, TokenKind, TokenService};
use crate::error::AppError;

pub struct AccessGate {
    token_service: Arc<TokenService>,
    store: Arc<dyn CredentialStore>,
    secure_cookies: bool,
}

impl AccessGate {
    pub fn new(
        token_service: Arc<TokenService>,
        store: Arc<dyn CredentialStore>,
        secure_cookies: bool,
    ) -> Self {
        Self {
            token_service,
            store,
            secure_cookies,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AccessGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AccessGateService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AccessGateService {
            service: Rc::new(service),
            token_service: self.token_service.clone(),
            store: self.store.clone(),
            secure_cookies: self.secure_cookies,
        }))
    }
}

pub struct AccessGateService<S> {
    service: Rc<S>,
    token_service: Arc<TokenService>,
    store: Arc<dyn CredentialStore>,
    secure_cookies: bool,
}

/// Access token from the session cookie, else from `Authorization: Bearer`
fn session_tokens(req: &ServiceRequest) -> SessionTokens {
    let access = req
        .cookie(ACCESS_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            req.headers()
                .get(AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
        });

    let refresh = req
        .cookie(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty());

    SessionTokens { access, refresh }
}

fn unauthorized() -> Error {
    let response = HttpResponse::Unauthorized().json(serde_json::json!({
        "error": "Unauthorized",
        "code": "UNAUTHORIZED"
    }));
    actix_web::error::InternalError::from_response("Unauthorized", response).into()
}

impl<S, B> Service<ServiceRequest> for AccessGateService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let tokens = session_tokens(&req);
        let service = self.service.clone();
        let token_service = self.token_service.clone();
        let store = self.store.clone();
        let secure_cookies = self.secure_cookies;

        Box::pin(async move {
            let verdict = verify_and_refresh(&tokens, &token_service, store.as_ref()).await?;

            let user_id = match (verdict.is_authenticated, verdict.user_id) {
                (true, Some(user_id)) => user_id,
                _ => {
                    tracing::warn!(
                        path = %req.path(),
                        reason = verdict.failure.map(|f| f.as_str()).unwrap_or("UNKNOWN"),
                        error = ?verdict.error,
                        "Request rejected by access gate"
                    );
                    return Err(unauthorized());
                }
            };

            req.extensions_mut().insert(AuthenticatedUser { user_id });

            tracing::debug!(
                user_id = %user_id,
                refreshed = verdict.new_access_token_issued(),
                "Session accepted"
            );

            let mut res = service.call(req).await?;

            if let Some(token) = verdict.new_access_token {
                let cookie = access_cookie(
                    token,
                    token_service.expiry_seconds(TokenKind::Access),
                    secure_cookies,
                );
                res.response_mut().add_cookie(&cookie).map_err(|e| {
                    AppError::Internal(format!("Failed to set access cookie: {}", e))
                })?;
            }

            Ok(res)
        })
    }
}
