use cardmart::app::App;
use cardmart::config::{self, ServerConfig};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cardmart")]
#[command(about = "Trading-card marketplace backend")]
#[command(long_about = "\
Trading-card marketplace backend

Staff list cards with a photo, grading, rarity and price; anyone can browse.
Every uploaded photo gets a web-ready derivative in the background:

  media/
  └── cards/
      ├── blue-eyes.png                  # raw upload, never modified
      └── optimized/
          └── blue-eyes_optimized.jpg    # max 800px wide, JPEG q85, no EXIF

Run 'cardmart gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Path to config.toml (defaults apply if it does not exist)
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve,
    /// Generate derivatives for every card that lacks one
    OptimizeExisting {
        /// Regenerate derivatives that already exist
        #[arg(long)]
        force: bool,
    },
    /// Add card names from a newline-delimited file to the autocomplete list
    ImportNames {
        file: PathBuf,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let command = match cli.command {
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            return Ok(());
        }
        other => other,
    };

    let config = config::load_config(&cli.config)?;
    init_tracing(&config);

    match command {
        Command::Serve => serve(config)?,
        Command::OptimizeExisting { force } => {
            init_thread_pool(&config.processing);
            let app = App::open(config)?;
            println!("==> Optimizing card images");
            let report = app.pipeline().optimize_pending(force);
            println!("==> Done: {report}");
        }
        Command::ImportNames { file } => {
            let app = App::open(config)?;
            let added = app.import_names(&file)?;
            println!("==> Imported {added} new card names ({} total)", app.names.len());
        }
        Command::GenConfig => {}
    }

    Ok(())
}

#[tokio::main]
async fn serve(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = config.server.bind.parse()?;
    let app = App::open(config)?;
    app.optimize_on_commit(tokio::runtime::Handle::current());
    let router = app.router();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info` filter.
fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; config can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
