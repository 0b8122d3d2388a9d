use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::execute;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use laptop_catalog::auth::{AuthLayer, AuthServiceImpl};
use laptop_catalog::config::ServerConfig;
use laptop_catalog::proto::auth_service_server::AuthServiceServer;
use laptop_catalog::proto::laptop_service_server::LaptopServiceServer;
use laptop_catalog::service::LaptopServiceImpl;
use laptop_catalog::store::{
    DiskImageStore, ImageStore, InMemoryLaptopStore, InMemoryRatingStore, InMemoryUserStore,
    LaptopStore, UserStore,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tonic::transport::Server;
use tonic_health::server::{health_reporter, HealthReporter};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Laptop catalog gRPC server", long_about = None)]
#[command(version)]
struct Args {
    /// Host to bind to, overriding the configuration
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Folder uploaded images are written to, overriding the configuration
    #[arg(short, long)]
    image_dir: Option<PathBuf>,

    /// Enable metrics endpoint
    #[arg(long)]
    metrics: bool,

    /// Run without the interactive console
    #[arg(long)]
    headless: bool,
}

enum Command {
    Status,
    Laptops,
    Users,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    fn parse(input: &str) -> Self {
        let input = input.trim();

        if input.is_empty() {
            return Command::Unknown(String::new());
        }

        if !input.starts_with('/') {
            return Command::Unknown(
                "Commands must start with '/'. Type /help for available commands.".to_string(),
            );
        }

        let cmd = input.split_whitespace().next().unwrap_or("").to_lowercase();

        match cmd.as_str() {
            "/status" | "/st" => Command::Status,
            "/laptops" | "/l" => Command::Laptops,
            "/users" | "/u" => Command::Users,
            "/help" | "/h" | "/?" => Command::Help,
            "/quit" | "/exit" | "/q" => Command::Quit,
            _ => Command::Unknown(format!(
                "Unknown command: {cmd}. Type /help for available commands."
            )),
        }
    }
}

fn print_colored(color: Color, text: &str) {
    let mut stdout = io::stdout();
    execute!(stdout, SetForegroundColor(color), Print(text), ResetColor).ok();
    stdout.flush().ok();
}

fn println_colored(color: Color, text: &str) {
    print_colored(color, text);
    println!();
}

fn display_banner() {
    println!();
    println_colored(
        Color::Cyan,
        "+---------------------------------------------------------+",
    );
    println_colored(
        Color::Cyan,
        "|                 Laptop Catalog Server                   |",
    );
    println_colored(
        Color::Cyan,
        "+---------------------------------------------------------+",
    );
    println!();
}

fn display_help() {
    println!();
    println_colored(Color::Yellow, "Available Commands:");
    println!();
    println!("  /status              - Show server status and configuration");
    println!("  /laptops             - Show stored laptop and image counts");
    println!("  /users               - Show registered user count");
    println!("  /help                - Show this help message");
    println!("  /quit or /exit       - Initiate graceful shutdown");
    println!();
}

fn display_prompt(addr: &str) {
    print_colored(Color::Green, &format!("catalog@{addr}"));
    print_colored(Color::White, "> ");
    io::stdout().flush().ok();
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    display_banner();

    let mut config = ServerConfig::from_env().unwrap_or_else(|e| {
        error!("Failed to load configuration: {e}");
        info!("Using default configuration");
        ServerConfig::default()
    });

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(image_dir) = args.image_dir {
        config.image_dir = image_dir;
    }
    config.metrics.enabled |= args.metrics;

    if let Err(e) = config.validate() {
        println_colored(Color::Red, &format!("Configuration validation failed: {e}"));
        return Err(format!("Invalid configuration: {e}").into());
    }

    let tokens = config.token_manager();

    let users = Arc::new(InMemoryUserStore::new());
    for seed in &config.seed_users {
        users.save(seed.to_user()?).await?;
        info!(username = %seed.username, role = %seed.role, "seeded user");
    }

    let laptops: Arc<dyn LaptopStore> = Arc::new(InMemoryLaptopStore::new());
    let images = Arc::new(DiskImageStore::new(
        config.image_dir.clone(),
        Arc::clone(&laptops),
    ));
    let ratings = Arc::new(InMemoryRatingStore::new(Arc::clone(&laptops)));

    let auth_service = AuthServiceImpl::new(users.clone(), tokens.clone());
    let laptop_service = LaptopServiceImpl::new(
        Arc::clone(&laptops),
        images.clone(),
        ratings,
    );

    if config.metrics.enabled {
        let metrics_addr = config.metrics.addr()?;
        tokio::spawn(async move {
            if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
                .with_http_listener(metrics_addr)
                .install()
            {
                error!("Failed to start metrics server: {e}");
            } else {
                info!("Metrics server started on {metrics_addr}");
            }
        });
    }

    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<AuthServiceServer<AuthServiceImpl>>()
        .await;
    health_reporter
        .set_serving::<LaptopServiceServer<LaptopServiceImpl>>()
        .await;

    let addr = config.addr()?;
    let addr_str = addr.to_string();

    println_colored(Color::Green, &format!("Server starting on {addr}"));
    println_colored(
        Color::White,
        &format!("  Image folder: {}", config.image_dir.display()),
    );
    println_colored(
        Color::White,
        &format!("  Token lifetime: {}s", config.token.duration_secs),
    );
    println_colored(
        Color::White,
        &format!("  Public search: {}", enabled(config.access.public_search)),
    );
    println_colored(
        Color::White,
        &format!("  Metrics: {}", enabled(config.metrics.enabled)),
    );
    println_colored(Color::White, "  Health check: enabled");
    println!();

    let (quit_tx, quit_rx) = watch::channel(false);

    let server_handle = tokio::spawn(
        Server::builder()
            .layer(AuthLayer::new(config.access_policy(), tokens))
            .add_service(health_service)
            .add_service(AuthServiceServer::new(auth_service))
            .add_service(LaptopServiceServer::new(laptop_service))
            .serve_with_shutdown(addr, shutdown_signal(health_reporter, quit_rx)),
    );

    if args.headless {
        return finish(server_handle).await;
    }

    println_colored(
        Color::Yellow,
        "Type /help for available commands or /quit to exit",
    );
    println!();

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        display_prompt(&addr_str);

        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                println_colored(Color::Red, &format!("Error reading input: {e}"));
                continue;
            }
        }

        match Command::parse(&line) {
            Command::Status => {
                let laptop_count = laptops.count().await;
                let image_count = images.count().await;
                let user_count = users.count().await;

                println!();
                println_colored(Color::Cyan, "Server Status:");
                println_colored(Color::White, &format!("  Address: {addr}"));
                println_colored(
                    Color::White,
                    &format!("  Image folder: {}", images.folder().display()),
                );
                println_colored(
                    Color::White,
                    &format!("  Metrics: {}", enabled(config.metrics.enabled)),
                );
                println!();
                println_colored(Color::Cyan, "State:");
                println_colored(Color::White, &format!("  Laptops: {laptop_count}"));
                println_colored(Color::White, &format!("  Images: {image_count}"));
                println_colored(Color::White, &format!("  Users: {user_count}"));
                println!();
            }
            Command::Laptops => {
                let laptop_count = laptops.count().await;
                let image_count = images.count().await;
                println_colored(
                    Color::Cyan,
                    &format!("Laptops: {laptop_count}, images: {image_count}"),
                );
            }
            Command::Users => {
                let count = users.count().await;
                println_colored(Color::Cyan, &format!("Registered users: {count}"));
            }
            Command::Help => {
                display_help();
            }
            Command::Quit => {
                println!();
                println_colored(Color::Yellow, "Initiating graceful shutdown...");
                let _ = quit_tx.send(true);
                break;
            }
            Command::Unknown(msg) => {
                if !msg.is_empty() {
                    println_colored(Color::Red, &msg);
                }
            }
        }
    }

    finish(server_handle).await
}

async fn finish(
    server_handle: tokio::task::JoinHandle<Result<(), tonic::transport::Error>>,
) -> Result<(), Box<dyn std::error::Error>> {
    match server_handle.await {
        Ok(Ok(())) => {
            println_colored(Color::Green, "Server shutdown complete. Goodbye!");
        }
        Ok(Err(e)) => {
            println_colored(Color::Red, &format!("Server error: {e}"));
        }
        Err(e) => {
            println_colored(Color::Red, &format!("Server task panicked: {e}"));
        }
    }

    println!();
    Ok(())
}

async fn shutdown_signal(mut health_reporter: HealthReporter, mut quit: watch::Receiver<bool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let repl_quit = async {
        if quit.wait_for(|quit| *quit).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
        _ = repl_quit => {
            info!("Shutdown requested via console");
        },
    }

    health_reporter
        .set_not_serving::<AuthServiceServer<AuthServiceImpl>>()
        .await;
    health_reporter
        .set_not_serving::<LaptopServiceServer<LaptopServiceImpl>>()
        .await;

    info!("Initiating graceful shutdown (allowing in-flight requests to complete)");

    tokio::time::sleep(Duration::from_secs(2)).await;
}
