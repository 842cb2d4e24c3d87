//! ferry: command-line client for ferryd
//!
//! List, download and upload files on a remote ferryd.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use ferry::client::{ClientOptions, FileClient};
use ferry::{ChunkSize, Credential, FileName, TransferError};

/// Ferry CLI client
#[derive(Parser)]
#[command(name = "ferry")]
#[command(version = ferry::PKG_VERSION)]
#[command(about = "Ferry file transfer client")]
struct Args {
    /// Server address
    #[arg(
        short,
        long,
        env = "FERRY_ADDRESS",
        default_value = "https://localhost:50051"
    )]
    address: String,

    /// PEM root certificate to trust (required for https)
    #[arg(long, env = "FERRY_CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Name to verify the server certificate against
    #[arg(long)]
    domain: Option<String>,

    /// Bearer token
    #[arg(long, env = "FERRY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Per-call deadline in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Upload chunk size in bytes
    #[arg(long, default_value_t = ChunkSize::default().get())]
    chunk_size: usize,

    /// Delay between uploaded chunks in milliseconds
    #[arg(long)]
    pace_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List files on the server
    List,

    /// Download a file
    Download {
        /// Remote file name
        name: String,
        /// Local destination (default: print each chunk)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upload a file
    Upload {
        /// Local file to send
        path: PathBuf,
        /// Remote file name (default: the local file name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Upload a file, printing server progress after every chunk
    UploadProgress {
        /// Local file to send
        path: PathBuf,
        /// Remote file name; without one the server only counts bytes
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let mut options = ClientOptions::new(&args.address).chunk_size(ChunkSize::new(args.chunk_size)?);
    if let Some(ref path) = args.ca_cert {
        options = options.ca_certificate_file(path)?;
    }
    if let Some(domain) = args.domain {
        options = options.domain(domain);
    }
    if let Some(token) = args.token {
        options = options.credential(Credential::new(token));
    }
    if let Some(secs) = args.timeout {
        options = options.timeout(Duration::from_secs(secs));
    }
    if let Some(ms) = args.pace_ms {
        options = options.pacing(Duration::from_millis(ms));
    }

    let client = FileClient::connect(options).await?;

    let outcome = match args.command {
        Command::List => list(&client).await,
        Command::Download { name, output } => download(&client, &name, output.as_deref()).await,
        Command::Upload { path, name } => upload(&client, &path, name).await,
        Command::UploadProgress { path, name } => upload_progress(&client, &path, name).await,
    };

    outcome.map_err(|e| explain(e).into())
}

async fn list(client: &FileClient) -> ferry::Result<()> {
    let names = client.list().await?;
    if names.is_empty() {
        println!("no files");
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

async fn download(client: &FileClient, name: &str, output: Option<&Path>) -> ferry::Result<()> {
    match output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path).await.map_err(|e| {
                TransferError::StoreUnavailable(format!("{}: {e}", path.display()))
            })?;
            let total = client.download_to(name, &mut file).await?;
            println!("saved {total} bytes to {}", path.display());
        }
        None => {
            let mut stream = client.download(name).await?;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                println!("{}", String::from_utf8_lossy(chunk.as_bytes()));
            }
        }
    }
    Ok(())
}

async fn upload(client: &FileClient, path: &Path, name: Option<String>) -> ferry::Result<()> {
    let name = remote_name(path, name)?;
    let file = open(path).await?;
    let size = client.upload(Some(&name), file).await?;
    println!("uploaded {size} bytes as {name}");
    Ok(())
}

async fn upload_progress(
    client: &FileClient,
    path: &Path,
    name: Option<String>,
) -> ferry::Result<()> {
    let name = name.map(FileName::new).transpose()?;
    let file = open(path).await?;
    let mut notifications = client.upload_with_progress(name.as_ref(), file).await?;
    while let Some(progress) = notifications.next().await {
        println!("{}", progress?.message());
    }
    Ok(())
}

async fn open(path: &Path) -> ferry::Result<tokio::fs::File> {
    tokio::fs::File::open(path)
        .await
        .map_err(|e| TransferError::StoreUnavailable(format!("{}: {e}", path.display())))
}

/// The explicit remote name, or the local file's own name.
fn remote_name(path: &Path, name: Option<String>) -> ferry::Result<FileName> {
    let name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                TransferError::InvalidName(format!("{} has no usable file name", path.display()))
            })?,
    };
    FileName::new(name)
}

/// Spell out the error kinds a user acts on differently.
fn explain(err: TransferError) -> String {
    match err {
        TransferError::NotFound(name) => format!("{name}: no such file on the server"),
        TransferError::DeadlineExceeded => {
            "deadline exceeded; raise --timeout or retry later".to_string()
        }
        TransferError::Unauthenticated(msg) => {
            format!("unauthenticated ({msg}); check --token / FERRY_TOKEN")
        }
        other if other.is_retryable() => format!("{other} (retryable)"),
        other => other.to_string(),
    }
}
