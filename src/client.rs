use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use http::header::AUTHORIZATION;
use http::HeaderValue;
use parking_lot::RwLock;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Code, Request, Status};
use tower::{Layer, Service};
use tracing::{debug, info, warn};

use crate::auth::methods;
use crate::proto::auth_service_client::AuthServiceClient;
use crate::proto::laptop_service_client::LaptopServiceClient;
use crate::proto::upload_image_request::Data;
use crate::proto::{
    CreateLaptopRequest, Filter, ImageInfo, Laptop, LoginRequest, RateLaptopRequest,
    RateLaptopResponse, SearchLaptopRequest, UploadImageRequest, UploadImageResponse,
};

/// Default interval between token refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Size of each uploaded image chunk.
pub const UPLOAD_CHUNK_SIZE: usize = 1024;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Logs in with fixed credentials.
#[derive(Clone)]
pub struct AuthClient {
    service: AuthServiceClient<Channel>,
    username: String,
    password: String,
}

impl AuthClient {
    /// Creates a login client for `username` over `channel`.
    pub fn new(channel: Channel, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            service: AuthServiceClient::new(channel),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Requests a fresh access token.
    pub async fn login(&mut self) -> Result<String, Status> {
        let mut request = Request::new(LoginRequest {
            username: self.username.clone(),
            password: self.password.clone(),
        });
        request.set_timeout(CALL_TIMEOUT);

        let response = self.service.login(request).await?;
        Ok(response.into_inner().access_token)
    }
}

/// Current access token shared between the refresh task and outgoing calls.
#[derive(Clone, Default)]
pub struct TokenHolder {
    token: Arc<RwLock<Option<HeaderValue>>>,
}

impl TokenHolder {
    /// Replaces the held token.
    ///
    /// Tokens that are not valid header values are dropped.
    pub fn set(&self, token: &str) {
        match HeaderValue::try_from(format!("Bearer {token}")) {
            Ok(value) => *self.token.write() = Some(value),
            Err(e) => warn!(error = %e, "access token is not a valid header value"),
        }
    }

    /// Returns the `authorization` header value, if a token is held.
    pub fn header(&self) -> Option<HeaderValue> {
        self.token.read().clone()
    }
}

/// Logs in once, then keeps `holder` refreshed every `interval` in the background.
///
/// # Errors
/// Returns the login failure if the first login does not succeed.
pub async fn start_token_refresh(
    mut auth: AuthClient,
    holder: TokenHolder,
    interval: Duration,
) -> Result<JoinHandle<()>, Status> {
    let token = auth.login().await?;
    holder.set(&token);
    info!(username = %auth.username, "logged in");

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match auth.login().await {
                Ok(token) => {
                    holder.set(&token);
                    debug!("access token refreshed");
                }
                Err(status) => {
                    warn!(error = %status.message(), "token refresh failed, keeping previous token");
                }
            }
        }
    }))
}

/// Client-side layer attaching the held token to calls of selected methods.
#[derive(Clone)]
pub struct AttachTokenLayer {
    holder: TokenHolder,
    methods: Arc<HashSet<String>>,
}

impl AttachTokenLayer {
    /// Attaches the token held by `holder` to calls of `methods`.
    pub fn new(holder: TokenHolder, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            holder,
            methods: Arc::new(methods.into_iter().map(Into::into).collect()),
        }
    }

    /// Attaches the token to every catalog method that can require one.
    pub fn catalog(holder: TokenHolder) -> Self {
        Self::new(
            holder,
            [
                methods::CREATE_LAPTOP,
                methods::SEARCH_LAPTOP,
                methods::UPLOAD_IMAGE,
                methods::RATE_LAPTOP,
            ],
        )
    }
}

impl<S> Layer<S> for AttachTokenLayer {
    type Service = AttachToken<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AttachToken {
            inner,
            holder: self.holder.clone(),
            methods: Arc::clone(&self.methods),
        }
    }
}

/// Service produced by [`AttachTokenLayer`].
#[derive(Clone)]
pub struct AttachToken<S> {
    inner: S,
    holder: TokenHolder,
    methods: Arc<HashSet<String>>,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for AttachToken<S>
where
    S: Service<http::Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<ReqBody>) -> Self::Future {
        if self.methods.contains(req.uri().path()) {
            if let Some(token) = self.holder.header() {
                req.headers_mut().insert(AUTHORIZATION, token);
            }
        }
        self.inner.call(req)
    }
}

/// Outcome of [`LaptopClient::create_laptop`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Created {
    /// The laptop was stored under this id.
    Stored(String),
    /// A laptop with the same id was already stored.
    AlreadyExists,
}

/// High-level client for the laptop service.
#[derive(Clone)]
pub struct LaptopClient<T> {
    service: LaptopServiceClient<T>,
}

impl LaptopClient<AttachToken<Channel>> {
    /// Creates a client attaching the token held by `holder` to protected calls.
    pub fn with_token(channel: Channel, holder: TokenHolder) -> Self {
        let channel = AttachTokenLayer::catalog(holder).layer(channel);
        Self::new(LaptopServiceClient::new(channel))
    }
}

impl<T> LaptopClient<T>
where
    T: tonic::client::GrpcService<tonic::body::BoxBody>,
    T::Error: Into<tonic::codegen::StdError>,
    T::ResponseBody: tonic::codegen::Body<Data = tonic::codegen::Bytes> + Send + 'static,
    <T::ResponseBody as tonic::codegen::Body>::Error: Into<tonic::codegen::StdError> + Send,
{
    /// Wraps a generated client.
    pub fn new(service: LaptopServiceClient<T>) -> Self {
        Self { service }
    }

    /// Creates `laptop`; an id collision is reported as [`Created::AlreadyExists`].
    pub async fn create_laptop(&mut self, laptop: Laptop) -> Result<Created, Status> {
        let mut request = Request::new(CreateLaptopRequest {
            laptop: Some(laptop),
        });
        request.set_timeout(CALL_TIMEOUT);

        match self.service.create_laptop(request).await {
            Ok(response) => {
                let id = response.into_inner().id;
                info!(laptop_id = %id, "laptop created");
                Ok(Created::Stored(id))
            }
            Err(status) if status.code() == Code::AlreadyExists => {
                info!("laptop already exists");
                Ok(Created::AlreadyExists)
            }
            Err(status) => Err(status),
        }
    }

    /// Collects every laptop matching `filter`.
    pub async fn search_laptop(&mut self, filter: Filter) -> Result<Vec<Laptop>, Status> {
        let mut request = Request::new(SearchLaptopRequest {
            filter: Some(filter),
        });
        request.set_timeout(CALL_TIMEOUT);

        let mut stream = self.service.search_laptop(request).await?.into_inner();

        let mut found = Vec::new();
        while let Some(response) = stream.message().await? {
            if let Some(laptop) = response.laptop {
                debug!(laptop_id = %laptop.id, "found laptop");
                found.push(laptop);
            }
        }

        Ok(found)
    }

    /// Uploads `data` as an image of `laptop_id`, in chunks of [`UPLOAD_CHUNK_SIZE`].
    pub async fn upload_image_bytes(
        &mut self,
        laptop_id: &str,
        image_type: &str,
        data: Vec<u8>,
    ) -> Result<UploadImageResponse, Status> {
        let mut messages = vec![UploadImageRequest {
            data: Some(Data::Info(ImageInfo {
                laptop_id: laptop_id.to_string(),
                image_type: image_type.to_string(),
            })),
        }];
        messages.extend(data.chunks(UPLOAD_CHUNK_SIZE).map(|chunk| UploadImageRequest {
            data: Some(Data::ChunkData(chunk.to_vec())),
        }));

        let mut request = Request::new(tokio_stream::iter(messages));
        request.set_timeout(CALL_TIMEOUT);

        let response = self.service.upload_image(request).await?.into_inner();
        info!(image_id = %response.id, size = response.size, "image uploaded");
        Ok(response)
    }

    /// Uploads the file at `path`; its extension becomes the image type.
    pub async fn upload_image(
        &mut self,
        laptop_id: &str,
        path: &Path,
    ) -> Result<UploadImageResponse, Status> {
        let image_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();

        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Status::invalid_argument(format!("cannot open image file: {e}")))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .map_err(|e| Status::invalid_argument(format!("cannot read image file: {e}")))?;

        self.upload_image_bytes(laptop_id, &image_type, data).await
    }

    /// Rates each laptop with the matching score and returns one reply per rating.
    ///
    /// Requests are sent while replies are read, over one bidirectional stream.
    pub async fn rate_laptop(
        &mut self,
        laptop_ids: &[String],
        scores: &[f64],
    ) -> Result<Vec<RateLaptopResponse>, Status> {
        if laptop_ids.len() != scores.len() {
            return Err(Status::invalid_argument(format!(
                "{} laptop ids but {} scores",
                laptop_ids.len(),
                scores.len()
            )));
        }

        let (tx, rx) = mpsc::channel(laptop_ids.len().max(1));
        let mut request = Request::new(ReceiverStream::new(rx));
        request.set_timeout(CALL_TIMEOUT);

        let requests = laptop_ids
            .iter()
            .zip(scores)
            .map(|(laptop_id, &score)| RateLaptopRequest {
                laptop_id: laptop_id.clone(),
                score,
            })
            .collect::<Vec<_>>();

        let sender = tokio::spawn(async move {
            for req in requests {
                debug!(laptop_id = %req.laptop_id, score = req.score, "sending rating");
                if tx.send(req).await.is_err() {
                    break;
                }
            }
        });

        let mut stream = self.service.rate_laptop(request).await?.into_inner();

        let mut replies = Vec::new();
        while let Some(reply) = stream.message().await? {
            debug!(
                laptop_id = %reply.laptop_id,
                count = reply.rated_count,
                average = reply.average_score,
                "rating received"
            );
            replies.push(reply);
        }

        let _ = sender.await;
        Ok(replies)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use tower::ServiceExt;

    use super::*;

    fn recorded_authorization(
        layer: AttachTokenLayer,
        path: &'static str,
    ) -> impl std::future::Future<Output = Option<String>> {
        let service = layer.layer(tower::service_fn(|req: http::Request<()>| async move {
            Ok::<_, Infallible>(
                req.headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
            )
        }));
        let request = http::Request::builder().uri(path).body(()).unwrap();
        async move { service.oneshot(request).await.unwrap() }
    }

    #[tokio::test]
    async fn attaches_token_only_to_listed_methods() {
        let holder = TokenHolder::default();
        holder.set("abc");
        let layer = AttachTokenLayer::catalog(holder);

        assert_eq!(
            recorded_authorization(layer.clone(), methods::CREATE_LAPTOP).await,
            Some("Bearer abc".to_string())
        );
        assert_eq!(recorded_authorization(layer, methods::LOGIN).await, None);
    }

    #[tokio::test]
    async fn no_header_before_first_login() {
        let layer = AttachTokenLayer::catalog(TokenHolder::default());
        assert_eq!(
            recorded_authorization(layer, methods::RATE_LAPTOP).await,
            None
        );
    }

    #[test]
    fn refreshed_token_replaces_previous() {
        let holder = TokenHolder::default();
        holder.set("first");
        holder.set("second");
        assert_eq!(
            holder.header().unwrap().to_str().unwrap(),
            "Bearer second"
        );
    }
}
