use clap::{Args, Parser, Subcommand};
use htmlsnap::config::{RenderStrategy, RendererMode, ServiceConfig};
use htmlsnap::ConversionRequest;
use log::info;
use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Render HTML/CSS into 1080×1350 PNG/JPEG images
#[derive(Parser)]
#[command(name = "htmlsnap", version, about)]
struct Cli {
    /// TOML config file; flags and environment variables override it
    #[arg(long, global = true, env = "HTMLSNAP_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    renderer: RendererArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct RendererArgs {
    /// per-request or pooled
    #[arg(long, global = true, env = "HTMLSNAP_MODE")]
    mode: Option<RendererMode>,

    /// Number of warm browsers in pooled mode
    #[arg(long, global = true, env = "HTMLSNAP_POOL_SIZE")]
    pool_size: Option<usize>,

    /// Chrome/Chromium binary
    #[arg(long, global = true, env = "HTMLSNAP_CHROME")]
    chrome: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve {
        #[arg(long, env = "HTMLSNAP_LISTEN")]
        listen: Option<SocketAddr>,

        /// server or client
        #[arg(long, env = "HTMLSNAP_STRATEGY")]
        strategy: Option<RenderStrategy>,

        /// Directory with the wasm client bundle (served under /pkg/)
        #[arg(long, env = "HTMLSNAP_CLIENT_ASSETS")]
        client_assets: Option<PathBuf>,
    },
    /// Convert a single file with the server-side renderer
    Render {
        /// HTML file, or `-` for stdin
        #[arg(short, long)]
        input: PathBuf,

        /// png or jpg
        #[arg(short, long, default_value = "png")]
        format: String,

        /// Output path; defaults to converted-image.<ext>
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl RendererArgs {
    fn apply(self, config: &mut ServiceConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(size) = self.pool_size {
            config.pool_size = size;
        }
        if let Some(chrome) = self.chrome {
            config.render.chrome_path = Some(chrome);
        }
    }
}

fn read_markup(input: &Path) -> anyhow::Result<String> {
    if input.as_os_str() == "-" {
        let mut markup = String::new();
        std::io::stdin().read_to_string(&mut markup)?;
        return Ok(markup);
    }
    Ok(std::fs::read_to_string(input)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    cli.renderer.apply(&mut config);

    match cli.command {
        Command::Serve {
            listen,
            strategy,
            client_assets,
        } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            if let Some(strategy) = strategy {
                config.strategy = strategy;
            }
            if client_assets.is_some() {
                config.client_assets = client_assets;
            }

            let renderer = htmlsnap::new_renderer(&config)?;
            htmlsnap::server::serve(config, renderer).await
        }
        Command::Render { input, format, output } => {
            let request = ConversionRequest::new(read_markup(&input)?, &format)?;

            // One-shot conversions always render here, whatever the service strategy
            config.strategy = RenderStrategy::Server;
            let renderer = htmlsnap::new_renderer(&config)?;
            let image =
                htmlsnap::server::render_with_timeout(renderer, request, config.render.render_timeout()).await?;

            let path = output.unwrap_or_else(|| PathBuf::from(image.suggested_filename()));
            std::fs::write(&path, &image.bytes)?;
            info!("Wrote {} ({} bytes)", path.display(), image.bytes.len());
            Ok(())
        }
    }
}
