use clap::{Parser, Subcommand};
use depot::client::{collect_upload_items, Client};
use depot::config::ClientConfig;
use depot::identity::IdentityStore;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "depot-client", about = "Depot secure file transfer client")]
struct Args {
    #[arg(long)]
    server: SocketAddr,

    #[arg(long)]
    remote_id: String,

    #[arg(long, default_value = "depot")]
    config_dir: PathBuf,

    #[arg(long)]
    skip_existing: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Upload { path: PathBuf, remote_path: String },
    Download { remote_path: String, dest: PathBuf },
    List { remote_path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(&args.config_dir);

    let mut config = ClientConfig::new(args.server, args.remote_id, config_dir.clone());
    config.skip_existing = args.skip_existing;

    let identity_store = IdentityStore::new(config_dir);
    let mut client = Client::connect(&config, &identity_store).await?;

    match args.command {
        Command::Upload { path, remote_path } => {
            let items = collect_upload_items(&path, &remote_path)?;
            let stats = client.upload_many(&items, config.skip_existing).await?;
            println!("{stats:?}");
        }
        Command::Download { remote_path, dest } => {
            std::fs::create_dir_all(&dest)?;
            let stats = client
                .download_many(&[remote_path], &dest, config.skip_existing)
                .await?;
            println!("{stats:?}");
        }
        Command::List { remote_path } => {
            let entries = client.list(&remote_path).await?;
            for entry in entries {
                println!("{:?} {} {}", entry.kind, entry.size, entry.path);
            }
        }
    }

    Ok(())
}
