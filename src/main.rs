use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3stream::{ClientConfig, ProviderChain, ReadFile, S3Client, WriteFile};

#[derive(Parser)]
#[command(name = "s3stream")]
#[command(version, about = "Streaming S3 client for single-threaded runtimes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// S3 endpoint override (host[:port])
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Whether to use HTTPS
    #[arg(long, global = true, default_value_t = true, action = clap::ArgAction::Set)]
    https: bool,

    /// AWS region
    #[arg(long, global = true, default_value = "us-east-1", env = "AWS_REGION")]
    region: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List all buckets
    ListBuckets,

    /// List object keys in a bucket
    ListObjects {
        /// Target bucket
        #[arg(long)]
        bucket: String,

        /// Key prefix filter
        #[arg(long, default_value = "")]
        prefix: String,

        /// Maximum number of keys to collect (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },

    /// Upload a generated payload via multipart upload
    Upload {
        /// Target bucket
        #[arg(long)]
        bucket: String,

        /// Object key
        #[arg(long)]
        key: String,

        /// Total upload size in bytes
        #[arg(long, default_value_t = 100 << 20)]
        upload_size: usize,

        /// Write granularity in bytes
        #[arg(long, default_value_t = 1024)]
        chunk_size: usize,

        /// Multipart part size in bytes (min 5 MiB)
        #[arg(long, default_value_t = s3stream::s3::DEFAULT_PART_SIZE)]
        part_size: usize,
    },

    /// Download an object and report its size
    Download {
        /// Target bucket
        #[arg(long)]
        bucket: String,

        /// Object key
        #[arg(long)]
        key: String,

        /// Ranged download chunk size in bytes
        #[arg(long, default_value_t = s3stream::s3::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // The library types are !Send; a current-thread runtime keeps every
    // operation on one executor.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let config = ClientConfig {
        region: cli.region.clone(),
        endpoint: cli.endpoint.clone(),
        https: cli.https,
    };

    match cli.command {
        Commands::ListBuckets => {
            let mut client = S3Client::new(config, ProviderChain::default_chain());
            let buckets = client.list_buckets().await?;
            if buckets.is_empty() {
                println!("no buckets found");
                return Ok(());
            }
            println!("buckets:");
            for name in buckets {
                println!("* {name}");
            }
        }

        Commands::ListObjects {
            bucket,
            prefix,
            limit,
        } => {
            let mut client = S3Client::new(config, ProviderChain::default_chain());
            let objects = client.list_objects(&bucket, &prefix, limit).await?;
            if objects.is_empty() {
                println!("no objects found");
                return Ok(());
            }
            println!("objects:");
            for key in objects {
                println!("* {key}");
            }
        }

        Commands::Upload {
            bucket,
            key,
            upload_size,
            chunk_size,
            part_size,
        } => {
            let client = Rc::new(RefCell::new(S3Client::new(
                config,
                ProviderChain::default_chain(),
            )));
            let mut file = WriteFile::open(bucket, key, client, part_size).await?;

            let chunks = upload_size / chunk_size;
            tracing::info!(chunks, chunk_size, "uploading object");

            let buf = vec![0xffu8; chunk_size];
            for _ in 0..chunks {
                file.write(&buf).await?;
            }
            file.close().await?;
        }

        Commands::Download {
            bucket,
            key,
            chunk_size,
        } => {
            let client = Rc::new(RefCell::new(S3Client::new(
                config,
                ProviderChain::default_chain(),
            )));
            let mut file = ReadFile::with_chunk_size(bucket, key, client, chunk_size);

            tracing::info!("downloading object");

            let mut buf = vec![0u8; 1024];
            let mut read_n = 0u64;
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                read_n += n as u64;
            }
            tracing::info!(read_n, "finished download");
        }
    }

    Ok(())
}
