//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use laptop_catalog::auth::{AccessPolicy, AuthLayer, AuthServiceImpl, TokenManager};
use laptop_catalog::proto::auth_service_server::AuthServiceServer;
use laptop_catalog::proto::laptop_service_server::LaptopServiceServer;
use laptop_catalog::proto::memory::Unit;
use laptop_catalog::proto::{Cpu, Laptop, Memory};
use laptop_catalog::service::LaptopServiceImpl;
use laptop_catalog::store::{
    DiskImageStore, InMemoryLaptopStore, InMemoryRatingStore, InMemoryUserStore, LaptopStore,
    Role, User, UserStore,
};
use tonic::transport::{Channel, Server};

pub const ADMIN: &str = "admin1";
pub const USER: &str = "user1";
pub const PASSWORD: &str = "secret";

/// Initialize test tracing (call once at the beginning of tests).
///
/// Only logs from the library are shown, filtering out HTTP/2 and tower noise.
/// Subsequent calls are safe and will be ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new("laptop_catalog=info");

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

/// A running server and the handles tests inspect it through.
pub struct TestServer {
    pub url: String,
    pub tokens: TokenManager,
    pub laptops: Arc<dyn LaptopStore>,
    pub images: Arc<DiskImageStore>,
    pub image_dir: tempfile::TempDir,
    pub handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn channel(&self) -> Channel {
        Channel::from_shared(self.url.clone())
            .unwrap()
            .connect()
            .await
            .expect("Failed to connect to server")
    }
}

pub async fn start_test_server() -> TestServer {
    start_test_server_with(AccessPolicy::catalog(true)).await
}

pub async fn start_test_server_with(policy: AccessPolicy) -> TestServer {
    let tokens = TokenManager::new("integration-secret", std::time::Duration::from_secs(900));

    let users = Arc::new(InMemoryUserStore::new());
    users
        .save(User::new(ADMIN, PASSWORD, Role::Admin).unwrap())
        .await
        .unwrap();
    users
        .save(User::new(USER, PASSWORD, Role::User).unwrap())
        .await
        .unwrap();

    let image_dir = tempfile::tempdir().unwrap();
    let laptops: Arc<dyn LaptopStore> = Arc::new(InMemoryLaptopStore::new());
    let images = Arc::new(DiskImageStore::new(image_dir.path(), Arc::clone(&laptops)));
    let ratings = Arc::new(InMemoryRatingStore::new(Arc::clone(&laptops)));

    let auth_service = AuthServiceImpl::new(users, tokens.clone());
    let laptop_service = LaptopServiceImpl::new(Arc::clone(&laptops), images.clone(), ratings);

    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let local_addr = listener.local_addr().unwrap();

    let layer = AuthLayer::new(policy, tokens.clone());
    let handle = tokio::spawn(async move {
        Server::builder()
            .layer(layer)
            .add_service(AuthServiceServer::new(auth_service))
            .add_service(LaptopServiceServer::new(laptop_service))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    TestServer {
        url: format!("http://{}", local_addr),
        tokens,
        laptops,
        images,
        image_dir,
        handle,
    }
}

/// A laptop with the given id, price, CPU, and RAM in gigabytes.
pub fn laptop(id: &str, price_usd: f64, cores: u32, ghz: f64, ram_gb: u64) -> Laptop {
    Laptop {
        id: id.to_string(),
        brand: "Lenovo".to_string(),
        name: "Thinkpad P1".to_string(),
        cpu: Some(Cpu {
            brand: "Intel".to_string(),
            name: "Core i7-9750H".to_string(),
            number_cores: cores,
            number_threads: cores * 2,
            min_ghz: ghz,
            max_ghz: ghz + 1.0,
        }),
        ram: Some(Memory {
            value: ram_gb,
            unit: Unit::Gigabyte as i32,
        }),
        price_usd,
        release_year: 2023,
    }
}
