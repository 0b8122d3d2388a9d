use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use laptop_catalog::client::{
    start_token_refresh, AuthClient, Created, LaptopClient, TokenHolder, DEFAULT_REFRESH_INTERVAL,
};
use laptop_catalog::proto::memory::Unit;
use laptop_catalog::proto::{Cpu, Filter, Laptop, Memory};
use rand::seq::SliceRandom;
use rand::Rng;
use tonic::transport::Channel;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Laptop catalog client", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    server: String,

    #[arg(short, long, env = "CATALOG_USERNAME", default_value = "admin1")]
    username: String,

    #[arg(short, long, env = "CATALOG_PASSWORD", default_value = "secret")]
    password: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create randomly generated laptops
    Create {
        #[arg(short, long, default_value = "10")]
        count: usize,
    },

    /// Search laptops matching a filter
    Search {
        #[arg(long, default_value = "3000")]
        max_price: f64,

        #[arg(long, default_value = "4")]
        min_cores: u32,

        #[arg(long, default_value = "2.5")]
        min_ghz: f64,

        #[arg(long, default_value = "8", help = "Minimum RAM in gigabytes")]
        min_ram_gb: u64,
    },

    /// Upload an image for a laptop
    Upload {
        #[arg(short, long, help = "Laptop id; a random laptop is created when omitted")]
        laptop: Option<String>,

        #[arg(short, long)]
        image: PathBuf,
    },

    /// Rate laptops over one bidirectional stream
    Rate {
        #[arg(
            short,
            long,
            value_delimiter = ',',
            help = "Comma-separated laptop ids; random laptops are created when omitted"
        )]
        laptops: Vec<String>,

        #[arg(
            short,
            long,
            value_delimiter = ',',
            help = "Comma-separated scores (must match order of laptops)"
        )]
        scores: Vec<f64>,
    },
}

fn random_laptop(rng: &mut impl Rng) -> Laptop {
    let brand = *["Apple", "Dell", "Lenovo"]
        .choose(rng)
        .unwrap_or(&"Lenovo");
    let name = match brand {
        "Apple" => ["Macbook Air", "Macbook Pro"].choose(rng),
        "Dell" => ["Latitude", "Vostro", "XPS", "Alienware"].choose(rng),
        _ => ["Thinkpad X1", "Thinkpad P1", "Thinkpad P53"].choose(rng),
    }
    .copied()
    .unwrap_or("Thinkpad X1");

    let cpu_brand = *["Intel", "AMD"].choose(rng).unwrap_or(&"Intel");
    let cpu_name = if cpu_brand == "Intel" {
        ["Xeon E-2286M", "Core i9-9980HK", "Core i7-9750H", "Core i5-9400F"].choose(rng)
    } else {
        ["Ryzen 7 PRO 2700U", "Ryzen 5 PRO 3500U", "Ryzen 3 PRO 3200GE"].choose(rng)
    }
    .copied()
    .unwrap_or("Core i7-9750H");

    let number_cores = rng.gen_range(2..=8u32);
    let min_ghz = rng.gen_range(2.0..3.5);

    Laptop {
        id: String::new(),
        brand: brand.to_string(),
        name: name.to_string(),
        cpu: Some(Cpu {
            brand: cpu_brand.to_string(),
            name: cpu_name.to_string(),
            number_cores,
            number_threads: rng.gen_range(number_cores..=12),
            min_ghz,
            max_ghz: rng.gen_range(min_ghz..5.0),
        }),
        ram: Some(Memory {
            value: *[4u64, 8, 16, 32, 64].choose(rng).unwrap_or(&8),
            unit: Unit::Gigabyte as i32,
        }),
        price_usd: rng.gen_range(1500.0..3500.0),
        release_year: rng.gen_range(2015..=2024),
    }
}

async fn create_random(
    client: &mut LaptopClient<laptop_catalog::client::AttachToken<Channel>>,
    count: usize,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut rng = rand::thread_rng();
    let mut ids = Vec::with_capacity(count);

    for _ in 0..count {
        match client.create_laptop(random_laptop(&mut rng)).await? {
            Created::Stored(id) => ids.push(id),
            Created::AlreadyExists => {}
        }
    }

    Ok(ids)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let channel = Channel::from_shared(cli.server.clone())?.connect().await?;

    let holder = TokenHolder::default();
    let auth = AuthClient::new(channel.clone(), cli.username.clone(), cli.password);
    let refresh = start_token_refresh(auth, holder.clone(), DEFAULT_REFRESH_INTERVAL).await?;
    println!("Logged in as '{}'", cli.username);

    let mut client = LaptopClient::with_token(channel, holder);

    match cli.command {
        Commands::Create { count } => {
            let start = Instant::now();
            let ids = create_random(&mut client, count).await?;
            println!("Created {} laptops in {:?}", ids.len(), start.elapsed());
            for id in ids {
                println!("  {id}");
            }
        }

        Commands::Search {
            max_price,
            min_cores,
            min_ghz,
            min_ram_gb,
        } => {
            let filter = Filter {
                max_price_usd: max_price,
                min_cpu_cores: min_cores,
                min_cpu_ghz: min_ghz,
                min_ram: Some(Memory {
                    value: min_ram_gb,
                    unit: Unit::Gigabyte as i32,
                }),
            };

            let laptops = client.search_laptop(filter).await?;
            println!("Found {} laptops", laptops.len());
            println!("{}", "=".repeat(80));
            for laptop in laptops {
                let cpu = laptop.cpu.unwrap_or_default();
                let ram = laptop.ram.unwrap_or_default();
                println!(
                    "{}  {} {}  {} cores @ {:.2} GHz  {} GB  ${:.2}",
                    laptop.id,
                    laptop.brand,
                    laptop.name,
                    cpu.number_cores,
                    cpu.min_ghz,
                    ram.value,
                    laptop.price_usd
                );
            }
        }

        Commands::Upload { laptop, image } => {
            let laptop_id = match laptop {
                Some(id) => id,
                None => create_random(&mut client, 1)
                    .await?
                    .pop()
                    .ok_or("random laptop was not created")?,
            };

            let response = client.upload_image(&laptop_id, &image).await?;
            println!(
                "Uploaded image '{}' ({} bytes) for laptop {laptop_id}",
                response.id, response.size
            );
        }

        Commands::Rate { laptops, scores } => {
            let laptops = if laptops.is_empty() {
                create_random(&mut client, scores.len().max(3)).await?
            } else {
                laptops
            };
            let scores = if scores.is_empty() {
                let mut rng = rand::thread_rng();
                laptops
                    .iter()
                    .map(|_| f64::from(rng.gen_range(1..=10u8)))
                    .collect()
            } else {
                scores
            };

            if laptops.len() != scores.len() {
                eprintln!(
                    "Error: Number of laptops ({}) does not match number of scores ({})",
                    laptops.len(),
                    scores.len()
                );
                std::process::exit(1);
            }

            for reply in client.rate_laptop(&laptops, &scores).await? {
                println!(
                    "Laptop {}: rated {} times, average {:.2}",
                    reply.laptop_id, reply.rated_count, reply.average_score
                );
            }
        }
    }

    refresh.abort();
    Ok(())
}
