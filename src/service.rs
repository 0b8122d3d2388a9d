use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Claims;
use crate::context::CallContext;
use crate::proto::laptop_service_server::LaptopService;
use crate::proto::upload_image_request::Data;
use crate::proto::{
    CreateLaptopRequest, CreateLaptopResponse, Filter, Laptop, RateLaptopRequest,
    RateLaptopResponse, SearchLaptopRequest, SearchLaptopResponse, UploadImageRequest, UploadImageResponse,
};
use crate::store::{validate_image_type, ImageStore, LaptopStore, LaptopVisitor, RatingStore};
use crate::{Error, Result};

/// Largest accepted image upload, in bytes.
pub const MAX_IMAGE_SIZE: usize = 1 << 20;

const STREAM_BUFFER: usize = 16;

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::AlreadyExists(_) => Status::already_exists(message),
            Error::NotFound(_) => Status::not_found(message),
            Error::InvalidArgument(_) | Error::ImageTooLarge { .. } => {
                Status::invalid_argument(message)
            }
            Error::Unauthenticated(_) | Error::TokenExpired | Error::Token(_) => {
                Status::unauthenticated(message)
            }
            Error::PermissionDenied(_) => Status::permission_denied(message),
            Error::Cancelled => Status::cancelled(message),
            Error::DeadlineExceeded => Status::deadline_exceeded(message),
            Error::Storage(_) | Error::PasswordHash(_) => Status::internal(message),
        }
    }
}

/// gRPC service implementation for the laptop catalog.
pub struct LaptopServiceImpl {
    laptops: Arc<dyn LaptopStore>,
    images: Arc<dyn ImageStore>,
    ratings: Arc<dyn RatingStore>,
}

impl LaptopServiceImpl {
    /// Creates the service over the given stores.
    pub fn new(
        laptops: Arc<dyn LaptopStore>,
        images: Arc<dyn ImageStore>,
        ratings: Arc<dyn RatingStore>,
    ) -> Self {
        Self {
            laptops,
            images,
            ratings,
        }
    }

    #[allow(clippy::result_large_err)]
    fn assign_laptop_id(laptop: &mut Laptop) -> std::result::Result<(), Status> {
        if laptop.id.is_empty() {
            laptop.id = Uuid::new_v4().to_string();
            return Ok(());
        }

        Uuid::parse_str(&laptop.id).map_err(|e| {
            Status::invalid_argument(format!("laptop ID is not a valid UUID: {e}"))
        })?;
        Ok(())
    }

    /// Reads one upload stream to completion and stores the image.
    ///
    /// `ctx` is checked before every chunk is read.
    async fn receive_image<S>(
        &self,
        ctx: CallContext,
        mut stream: S,
    ) -> std::result::Result<UploadImageResponse, Status>
    where
        S: Stream<Item = std::result::Result<UploadImageRequest, Status>> + Unpin + Send,
    {
        let info = match stream.next().await.transpose()? {
            Some(UploadImageRequest {
                data: Some(Data::Info(info)),
            }) => info,
            Some(_) => {
                return Err(Status::invalid_argument(
                    "first upload message must carry image info",
                ))
            }
            None => return Err(Status::invalid_argument("no image info received")),
        };
        info!(laptop_id = %info.laptop_id, image_type = %info.image_type, "upload image request");

        validate_image_type(&info.image_type)?;

        if self.laptops.find(&info.laptop_id).await.is_none() {
            return Err(Status::invalid_argument(format!(
                "laptop {} doesn't exist",
                info.laptop_id
            )));
        }

        let mut image = Vec::new();
        loop {
            ctx.check()?;

            let Some(req) = stream.next().await.transpose()? else {
                debug!("no more image data");
                break;
            };

            let chunk = match req.data {
                Some(Data::ChunkData(chunk)) => chunk,
                _ => return Err(Status::invalid_argument("expected an image chunk")),
            };

            let size = image.len() + chunk.len();
            if size > MAX_IMAGE_SIZE {
                return Err(Error::ImageTooLarge {
                    size,
                    limit: MAX_IMAGE_SIZE,
                }
                .into());
            }

            debug!(chunk = chunk.len(), total = size, "received image chunk");
            image.extend_from_slice(&chunk);
        }

        let size = image.len();
        let image_id = self
            .images
            .save(&info.laptop_id, &info.image_type, image)
            .await?;
        info!(%image_id, laptop_id = %info.laptop_id, size, "image saved");

        Ok(UploadImageResponse {
            id: image_id,
            size: u32::try_from(size).unwrap_or(u32::MAX),
        })
    }
}

/// Streams search matches to the caller, stopping when the caller goes away.
struct SearchSender {
    tx: mpsc::Sender<std::result::Result<SearchLaptopResponse, Status>>,
    ctx: CallContext,
    sent: usize,
}

#[async_trait]
impl LaptopVisitor for SearchSender {
    async fn visit(&mut self, laptop: Laptop) -> Result<()> {
        if self.tx.is_closed() {
            return Err(Error::Cancelled);
        }
        self.ctx.check()?;

        let laptop_id = laptop.id.clone();
        self.tx
            .send(Ok(SearchLaptopResponse {
                laptop: Some(laptop),
            }))
            .await
            .map_err(|_| Error::Cancelled)?;

        debug!(%laptop_id, "sent laptop");
        self.sent += 1;
        Ok(())
    }
}

/// Runs one search, sending every match to `tx` until the caller goes away
/// or its deadline passes. Returns how many laptops were sent.
async fn stream_search(
    laptops: Arc<dyn LaptopStore>,
    filter: Filter,
    ctx: CallContext,
    tx: mpsc::Sender<std::result::Result<SearchLaptopResponse, Status>>,
) -> std::result::Result<usize, Status> {
    let mut sender = SearchSender {
        tx: tx.clone(),
        ctx,
        sent: 0,
    };

    match laptops.search(&filter, &mut sender).await {
        Ok(()) => {
            counter!("catalog.search_laptop.success").increment(1);
            info!(sent = sender.sent, "search completed");
            Ok(sender.sent)
        }
        Err(Error::Cancelled) => {
            counter!("catalog.search_laptop.failure").increment(1);
            info!(sent = sender.sent, "search cancelled by client");
            Err(Error::Cancelled.into())
        }
        Err(e) => {
            counter!("catalog.search_laptop.failure").increment(1);
            warn!(sent = sender.sent, error = %e, "search aborted");
            let status = Status::from(e);
            let _ = tx.send(Err(status.clone())).await;
            Err(status)
        }
    }
}

async fn serve_ratings(
    inbound: &mut Streaming<RateLaptopRequest>,
    tx: &mpsc::Sender<std::result::Result<RateLaptopResponse, Status>>,
    laptops: &dyn LaptopStore,
    ratings: &dyn RatingStore,
) -> std::result::Result<usize, Status> {
    let mut rated = 0;

    while let Some(req) = inbound.message().await? {
        if !req.score.is_finite() {
            return Err(Status::invalid_argument(format!(
                "score for laptop {} is not a number",
                req.laptop_id
            )));
        }

        if laptops.find(&req.laptop_id).await.is_none() {
            return Err(Status::not_found(format!(
                "laptop {} doesn't exist",
                req.laptop_id
            )));
        }

        let rating = ratings.add(&req.laptop_id, req.score).await?;
        debug!(laptop_id = %req.laptop_id, score = req.score, count = rating.count, "laptop rated");

        tx.send(Ok(RateLaptopResponse {
            laptop_id: req.laptop_id,
            rated_count: rating.count,
            average_score: rating.average(),
        }))
        .await
        .map_err(|_| Status::from(Error::Cancelled))?;

        rated += 1;
    }

    Ok(rated)
}

#[tonic::async_trait]
impl LaptopService for LaptopServiceImpl {
    async fn create_laptop(
        &self,
        request: Request<CreateLaptopRequest>,
    ) -> std::result::Result<Response<CreateLaptopResponse>, Status> {
        let start = Instant::now();
        counter!("catalog.create_laptop.requests").increment(1);

        let ctx = CallContext::from_request(&request);
        let caller = request
            .extensions()
            .get::<Claims>()
            .map(|claims| claims.sub.clone())
            .unwrap_or_default();

        let mut laptop = request
            .into_inner()
            .laptop
            .ok_or_else(|| Status::invalid_argument("laptop is required"))?;
        info!(laptop_id = %laptop.id, %caller, "create laptop request");

        Self::assign_laptop_id(&mut laptop)?;

        if let Err(e) = ctx.check() {
            counter!("catalog.create_laptop.failure").increment(1);
            warn!(laptop_id = %laptop.id, "deadline passed before saving laptop");
            return Err(e.into());
        }

        let result = self.laptops.save(&laptop).await.map_err(|e| match e {
            Error::AlreadyExists(_) => Status::from(e),
            other => Status::internal(format!("cannot save laptop: {other}")),
        });

        histogram!("catalog.create_laptop.duration").record(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                counter!("catalog.create_laptop.success").increment(1);
                info!(laptop_id = %laptop.id, "laptop saved");
                Ok(Response::new(CreateLaptopResponse { id: laptop.id }))
            }
            Err(status) => {
                counter!("catalog.create_laptop.failure").increment(1);
                warn!(laptop_id = %laptop.id, error = %status.message(), "laptop not saved");
                Err(status)
            }
        }
    }

    type SearchLaptopStream = ReceiverStream<std::result::Result<SearchLaptopResponse, Status>>;

    async fn search_laptop(
        &self,
        request: Request<SearchLaptopRequest>,
    ) -> std::result::Result<Response<Self::SearchLaptopStream>, Status> {
        counter!("catalog.search_laptop.requests").increment(1);

        let ctx = CallContext::from_request(&request);
        let filter = request
            .into_inner()
            .filter
            .ok_or_else(|| Status::invalid_argument("filter is required"))?;
        info!(?filter, "search laptop request");

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let laptops = Arc::clone(&self.laptops);

        tokio::spawn(stream_search(laptops, filter, ctx, tx));

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn upload_image(
        &self,
        request: Request<Streaming<UploadImageRequest>>,
    ) -> std::result::Result<Response<UploadImageResponse>, Status> {
        counter!("catalog.upload_image.requests").increment(1);

        let ctx = CallContext::from_request(&request);
        match self.receive_image(ctx, request.into_inner()).await {
            Ok(response) => {
                counter!("catalog.upload_image.success").increment(1);
                Ok(Response::new(response))
            }
            Err(status) => {
                counter!("catalog.upload_image.failure").increment(1);
                warn!(code = ?status.code(), error = %status.message(), "upload rejected");
                Err(status)
            }
        }
    }

    type RateLaptopStream = ReceiverStream<std::result::Result<RateLaptopResponse, Status>>;

    async fn rate_laptop(
        &self,
        request: Request<Streaming<RateLaptopRequest>>,
    ) -> std::result::Result<Response<Self::RateLaptopStream>, Status> {
        counter!("catalog.rate_laptop.requests").increment(1);

        let caller = request
            .extensions()
            .get::<Claims>()
            .map(|claims| claims.sub.clone())
            .unwrap_or_default();
        let mut inbound = request.into_inner();

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let laptops = Arc::clone(&self.laptops);
        let ratings = Arc::clone(&self.ratings);

        tokio::spawn(async move {
            match serve_ratings(&mut inbound, &tx, laptops.as_ref(), ratings.as_ref()).await {
                Ok(rated) => {
                    counter!("catalog.rate_laptop.success").increment(1);
                    info!(%caller, rated, "rating stream closed");
                }
                Err(status) => {
                    counter!("catalog.rate_laptop.failure").increment(1);
                    warn!(%caller, error = %status.message(), "rating stream aborted");
                    let _ = tx.send(Err(status)).await;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::{DiskImageStore, InMemoryLaptopStore, InMemoryRatingStore};

    #[test]
    fn errors_map_to_distinct_codes() {
        use tonic::Code;

        let cases = [
            (Error::AlreadyExists("x".into()), Code::AlreadyExists),
            (Error::NotFound("x".into()), Code::NotFound),
            (Error::InvalidArgument("x".into()), Code::InvalidArgument),
            (
                Error::ImageTooLarge {
                    size: 2,
                    limit: 1,
                },
                Code::InvalidArgument,
            ),
            (Error::Unauthenticated("x".into()), Code::Unauthenticated),
            (Error::TokenExpired, Code::Unauthenticated),
            (Error::PermissionDenied("x".into()), Code::PermissionDenied),
            (Error::Cancelled, Code::Cancelled),
            (Error::DeadlineExceeded, Code::DeadlineExceeded),
            (
                Error::Storage(std::io::Error::other("disk full")),
                Code::Internal,
            ),
        ];

        for (err, code) in cases {
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn client_ids_must_be_uuids() {
        let mut laptop = Laptop {
            id: "not-a-uuid".to_string(),
            ..Default::default()
        };
        let status = LaptopServiceImpl::assign_laptop_id(&mut laptop).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let id = Uuid::new_v4().to_string();
        laptop.id = id.clone();
        LaptopServiceImpl::assign_laptop_id(&mut laptop).unwrap();
        assert_eq!(laptop.id, id);

        laptop.id.clear();
        LaptopServiceImpl::assign_laptop_id(&mut laptop).unwrap();
        assert!(Uuid::parse_str(&laptop.id).is_ok());
    }

    fn laptop(id: &str) -> Laptop {
        Laptop {
            id: id.to_string(),
            price_usd: 1000.0,
            ..Default::default()
        }
    }

    struct Fixture {
        service: LaptopServiceImpl,
        laptops: Arc<dyn LaptopStore>,
        images: Arc<DiskImageStore>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(ids: &[&str]) -> Fixture {
        let laptops: Arc<dyn LaptopStore> = Arc::new(InMemoryLaptopStore::new());
        for id in ids {
            laptops.save(&laptop(id)).await.unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let images = Arc::new(DiskImageStore::new(dir.path(), Arc::clone(&laptops)));
        let ratings = Arc::new(InMemoryRatingStore::new(Arc::clone(&laptops)));
        let service = LaptopServiceImpl::new(Arc::clone(&laptops), images.clone(), ratings);

        Fixture {
            service,
            laptops,
            images,
            _dir: dir,
        }
    }

    fn info(laptop_id: &str) -> std::result::Result<UploadImageRequest, Status> {
        Ok(UploadImageRequest {
            data: Some(Data::Info(crate::proto::ImageInfo {
                laptop_id: laptop_id.to_string(),
                image_type: ".png".to_string(),
            })),
        })
    }

    fn chunk(bytes: &[u8]) -> std::result::Result<UploadImageRequest, Status> {
        Ok(UploadImageRequest {
            data: Some(Data::ChunkData(bytes.to_vec())),
        })
    }

    #[tokio::test]
    async fn create_after_deadline_stores_nothing() {
        let fixture = fixture(&[]).await;

        let id = Uuid::new_v4().to_string();
        let mut request = Request::new(CreateLaptopRequest {
            laptop: Some(laptop(&id)),
        });
        request
            .metadata_mut()
            .insert("grpc-timeout", "0m".parse().unwrap());

        let status = fixture.service.create_laptop(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
        assert_eq!(fixture.laptops.count().await, 0);
    }

    #[tokio::test]
    async fn upload_stops_when_deadline_passes_between_chunks() {
        let fixture = fixture(&["laptop-1"]).await;

        let (tx, rx) = mpsc::channel(4);
        tx.send(info("laptop-1")).await.unwrap();
        tx.send(chunk(&[1; 16])).await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tx.send(chunk(&[2; 16])).await;
        });

        let ctx = CallContext::with_timeout(Duration::from_millis(50));
        let status = fixture
            .service
            .receive_image(ctx, ReceiverStream::new(rx))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
        assert_eq!(fixture.images.count().await, 0);
    }

    #[tokio::test]
    async fn upload_without_deadline_is_stored() {
        let fixture = fixture(&["laptop-1"]).await;

        let stream = tokio_stream::iter(vec![info("laptop-1"), chunk(&[1; 10]), chunk(&[2; 5])]);
        let response = fixture
            .service
            .receive_image(CallContext::default(), stream)
            .await
            .unwrap();

        assert_eq!(response.size, 15);
        assert_eq!(fixture.images.count().await, 1);
    }

    #[tokio::test]
    async fn upload_rejects_malformed_streams() {
        let fixture = fixture(&["laptop-1"]).await;

        let cases = [
            vec![chunk(&[1])],
            vec![info("laptop-1"), info("laptop-1")],
            vec![info("missing")],
            vec![],
        ];
        for messages in cases {
            let status = fixture
                .service
                .receive_image(CallContext::default(), tokio_stream::iter(messages))
                .await
                .unwrap_err();
            assert_eq!(status.code(), tonic::Code::InvalidArgument);
        }
        assert_eq!(fixture.images.count().await, 0);
    }

    #[tokio::test]
    async fn search_stops_when_caller_goes_away() {
        let ids = (0..32).map(|i| format!("laptop-{i}")).collect::<Vec<_>>();
        let fixture = fixture(&ids.iter().map(String::as_str).collect::<Vec<_>>()).await;

        let (tx, mut rx) = mpsc::channel(1);
        let search = tokio::spawn(stream_search(
            Arc::clone(&fixture.laptops),
            Filter {
                max_price_usd: 2000.0,
                ..Default::default()
            },
            CallContext::default(),
            tx,
        ));

        let first = rx.recv().await.unwrap().unwrap();
        assert!(first.laptop.is_some());
        drop(rx);

        let status = search.await.unwrap().unwrap_err();
        assert_eq!(status.code(), tonic::Code::Cancelled);
    }

    #[tokio::test]
    async fn search_after_deadline_reports_it_to_caller() {
        let fixture = fixture(&["laptop-1"]).await;

        let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
        let result = stream_search(
            Arc::clone(&fixture.laptops),
            Filter {
                max_price_usd: 2000.0,
                ..Default::default()
            },
            CallContext::with_timeout(Duration::ZERO),
            tx,
        )
        .await;

        assert_eq!(result.unwrap_err().code(), tonic::Code::DeadlineExceeded);
        let sent = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(sent.code(), tonic::Code::DeadlineExceeded);
        assert!(rx.recv().await.is_none());
    }
}
