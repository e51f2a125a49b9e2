use processguard::config::loader::ConfigLoader;
use processguard::ProcessGuard;
use std::env;
use std::time::Instant;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let startup_start = Instant::now();

    let args: Vec<String> = env::args().collect();
    if args.len() > 1 && (args[1] == "--version" || args[1] == "-v") {
        println!("processguard {}", VERSION);
        return Ok(());
    }

    if args.len() > 1 && (args[1] == "--help" || args[1] == "-h") {
        println!("ProcessGuard v{}", VERSION);
        println!("Usage: processguard [OPTIONS]");
        println!();
        println!("Options:");
        println!("  -h, --help     Show this help message");
        println!("  -v, --version  Show version information");
        println!("  -c, --config   Path to config file (default: /etc/processguard/config.json)");
        println!();
        println!("ProcessGuard supervises configured processes and reports host");
        println!("telemetry, restarting failed processes under a crash policy.");
        return Ok(());
    }

    tracing_subscriber::fmt::init();

    info!("Starting ProcessGuard v{}", VERSION);

    let mut loader = ConfigLoader::new();
    if let Some(pos) = args.iter().position(|a| a == "--config" || a == "-c") {
        if let Some(path) = args.get(pos + 1) {
            loader.add_search_path(std::path::PathBuf::from(path));
        }
    }

    let config = match loader.load_async().await {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration, using defaults: {e}");
            processguard::config::Config::default()
        }
    };

    let (guard, events) = ProcessGuard::new(config).await;

    if let Err(e) = guard.bootstrap().await {
        error!("bootstrap failed: {e}");
        return Err(Box::new(e));
    }

    info!(
        "ProcessGuard ready in {:?}, entering supervision loop",
        startup_start.elapsed()
    );

    guard.run(events).await;

    info!("ProcessGuard shut down");
    Ok(())
}
