use clap::Parser;
use depot::config::ServerConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Thin CLI entry point: translates flags into a `ServerConfig` and hands
/// off to the library's accept loop. INI parsing and subcommand dispatch
/// are intentionally out of scope here.
#[derive(Parser, Debug)]
#[command(name = "depot-server", about = "Depot secure file transfer server")]
struct Args {
    #[arg(long, default_value = "0.0.0.0:60006")]
    listen: SocketAddr,

    #[arg(long)]
    share_root: PathBuf,

    #[arg(long, default_value = "depot")]
    config_dir: PathBuf,

    #[arg(long)]
    no_sandbox: bool,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    require_psk: bool,

    #[arg(long)]
    require_client_auth: bool,

    /// Passphrase protecting the server's DPK1-encrypted secret key.
    #[arg(long, env = "DEPOT_SERVER_PASSPHRASE")]
    passphrase: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let passphrase = match args.passphrase {
        Some(p) => Some(p),
        None => {
            if atty_is_interactive() {
                Some(rpassword::prompt_password("server identity passphrase: ")?)
            } else {
                None
            }
        }
    };

    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(&args.config_dir);

    let mut config = ServerConfig::new(args.listen, args.share_root, config_dir);
    config.sandboxed = !args.no_sandbox;
    config.overwrite = args.overwrite;
    config.require_psk = args.require_psk;
    config.require_client_auth = args.require_client_auth;
    config.passphrase = passphrase;

    depot::server::run(config).await?;
    Ok(())
}

fn atty_is_interactive() -> bool {
    use std::io::IsTerminal;
    std::io::stdin().is_terminal()
}
