use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use imgloader::infrastructure::{AppConfig, CliArgs, Command, ConfigStore, ImageLoader};
use imgloader::presentation::dispatcher;

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let store = ConfigStore::new()?;
    let mut config = store.load(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

async fn fetch(loader: &ImageLoader, urls: &[String], width: u32, height: u32) -> Result<()> {
    let mut failures = 0usize;
    for url in urls {
        match loader.load_with_source(url, width, height).await {
            Ok(loaded) => println!(
                "{url}: {}x{} from {} (key {})",
                loaded.image.width(),
                loaded.image.height(),
                loaded.source,
                loaded.key
            ),
            Err(e) => {
                failures += 1;
                eprintln!("{url}: {e}");
            }
        }
    }
    println!("{}", loader.memory_cache_stats());

    if failures > 0 {
        return Err(eyre!("{failures} of {} images failed to load", urls.len()));
    }
    Ok(())
}

async fn stats(loader: &ImageLoader) {
    match loader.disk_cache() {
        Some(disk) => println!(
            "Disk cache: {} entries, {} of {} bytes in {}",
            disk.len().await,
            disk.size().await,
            disk.max_size(),
            disk.directory().display()
        ),
        None => println!("Disk cache: disabled"),
    }
    let pool = loader.pool_stats();
    println!("Worker pool: {} workers", pool.size);
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = imgloader::VERSION, "Starting {}", imgloader::NAME);

    let (results, _dispatcher) = dispatcher::channel();
    let loader = ImageLoader::build(&config.loader, results).await?;

    match &args.command {
        Command::Fetch {
            urls,
            width,
            height,
        } => fetch(&loader, urls, *width, *height).await?,
        Command::Stats => stats(&loader).await,
        Command::Clear => {
            loader.clear_all().await?;
            println!("Cleared image caches");
        }
    }

    Ok(())
}
