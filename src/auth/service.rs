use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use super::token::TokenManager;
use crate::proto::auth_service_server::AuthService;
use crate::proto::{LoginRequest, LoginResponse};
use crate::store::UserStore;

/// gRPC login service exchanging credentials for an access token.
pub struct AuthServiceImpl {
    users: Arc<dyn UserStore>,
    tokens: TokenManager,
}

impl AuthServiceImpl {
    /// Creates a login service over `users`, issuing tokens with `tokens`.
    pub fn new(users: Arc<dyn UserStore>, tokens: TokenManager) -> Self {
        Self { users, tokens }
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let start = Instant::now();
        counter!("catalog.login.requests").increment(1);

        let req = request.into_inner();

        // argon2 verification blocks for milliseconds.
        let verified = match self.users.find(&req.username).await {
            Some(user) => {
                let password = req.password;
                tokio::task::spawn_blocking(move || user.verify_password(&password).then_some(user))
                    .await
                    .map_err(|e| {
                        counter!("catalog.login.failure").increment(1);
                        Status::internal(format!("password check failed: {e}"))
                    })?
            }
            None => None,
        };

        let user = match verified {
            Some(user) => user,
            None => {
                counter!("catalog.login.failure").increment(1);
                warn!(username = %req.username, "login rejected");
                return Err(Status::not_found("incorrect username/password"));
            }
        };

        let access_token = self.tokens.issue(&user).map_err(|e| {
            counter!("catalog.login.failure").increment(1);
            Status::internal(format!("cannot generate access token: {e}"))
        })?;

        histogram!("catalog.login.duration").record(start.elapsed().as_secs_f64());
        counter!("catalog.login.success").increment(1);
        info!(username = %user.username, role = %user.role, "user logged in");

        Ok(Response::new(LoginResponse { access_token }))
    }
}
