use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::header::AUTHORIZATION;
use tonic::body::BoxBody;
use tonic::Status;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::token::{Claims, TokenManager};
use crate::store::Role;
use crate::{Error, Result};

/// Full gRPC paths of every catalog method.
pub mod methods {
    /// `AuthService.Login`
    pub const LOGIN: &str = "/catalog.AuthService/Login";
    /// `LaptopService.CreateLaptop`
    pub const CREATE_LAPTOP: &str = "/catalog.LaptopService/CreateLaptop";
    /// `LaptopService.SearchLaptop`
    pub const SEARCH_LAPTOP: &str = "/catalog.LaptopService/SearchLaptop";
    /// `LaptopService.UploadImage`
    pub const UPLOAD_IMAGE: &str = "/catalog.LaptopService/UploadImage";
    /// `LaptopService.RateLaptop`
    pub const RATE_LAPTOP: &str = "/catalog.LaptopService/RateLaptop";
}

/// Roles allowed to call each protected method.
///
/// Methods without an entry are public.
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    methods: HashMap<String, HashSet<Role>>,
}

impl AccessPolicy {
    /// Creates a policy where every method is public.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts `method` to `roles`.
    pub fn allow(mut self, method: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        self.methods
            .entry(method.into())
            .or_default()
            .extend(roles);
        self
    }

    /// Policy for the catalog service.
    ///
    /// Creating laptops and uploading images is admin-only, rating is open to every
    /// role. Search is public unless `public_search` is false, in which case any
    /// logged-in role may search.
    pub fn catalog(public_search: bool) -> Self {
        let policy = Self::new()
            .allow(methods::CREATE_LAPTOP, [Role::Admin])
            .allow(methods::UPLOAD_IMAGE, [Role::Admin])
            .allow(methods::RATE_LAPTOP, [Role::Admin, Role::User]);

        if public_search {
            policy
        } else {
            policy.allow(methods::SEARCH_LAPTOP, [Role::Admin, Role::User])
        }
    }

    /// Roles allowed on `method`, or `None` if it is public.
    pub fn roles_for(&self, method: &str) -> Option<&HashSet<Role>> {
        self.methods.get(method)
    }

    /// Decides whether a call to `method` carrying `authorization` may proceed.
    ///
    /// Returns `Ok(None)` for public methods and the verified claims otherwise.
    pub fn authorize(
        &self,
        method: &str,
        authorization: Option<&str>,
        tokens: &TokenManager,
    ) -> Result<Option<Claims>> {
        let Some(roles) = self.roles_for(method) else {
            return Ok(None);
        };

        let token = authorization
            .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::Unauthenticated("authorization token is not provided".to_string()))?;

        let claims = tokens.verify(token)?;

        if !roles.contains(&claims.role) {
            return Err(Error::PermissionDenied(format!(
                "role '{}' may not call {method}",
                claims.role
            )));
        }

        Ok(Some(claims))
    }
}

/// Tower layer that gates every inbound call through an [`AccessPolicy`].
///
/// Verified [`Claims`] are inserted into the request extensions, so handlers can
/// read them with `request.extensions().get::<Claims>()`. Streaming calls are
/// checked once, when the call opens.
#[derive(Clone)]
pub struct AuthLayer {
    policy: Arc<AccessPolicy>,
    tokens: TokenManager,
}

impl AuthLayer {
    /// Creates a layer enforcing `policy` with tokens verified by `tokens`.
    pub fn new(policy: AccessPolicy, tokens: TokenManager) -> Self {
        Self {
            policy: Arc::new(policy),
            tokens,
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            policy: Arc::clone(&self.policy),
            tokens: self.tokens.clone(),
        }
    }
}

/// Service produced by [`AuthLayer`].
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    policy: Arc<AccessPolicy>,
    tokens: TokenManager,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for AuthMiddleware<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>,
    S::Future: Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<ReqBody>) -> Self::Future {
        let method = req.uri().path().to_string();
        let authorization = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match self.policy.authorize(&method, authorization, &self.tokens) {
            Ok(claims) => {
                if let Some(claims) = claims {
                    debug!(%method, user = %claims.sub, role = %claims.role, "call authorized");
                    req.extensions_mut().insert(claims);
                }
                Box::pin(self.inner.call(req))
            }
            Err(e) => {
                warn!(%method, error = %e, "call rejected");
                let response = Status::from(e).into_http();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}
