use chrono::Utc;
use clap::Parser;
use iex_deep_parser::{run_until, Config, ALL_SYMBOLS, DEFAULT_PRICE_LEVELS_FILE, DEFAULT_TRADES_FILE};
use log::{error, warn};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Decodes IEX DEEP packet captures into trade and price level CSV files
#[derive(Parser, Debug)]
#[command(name = "iex-deep-parser", version, about = "Decodes IEX DEEP pcap captures into trade and price level CSV files")]
struct Args {
    /// Enables verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Symbols file (one per line) or ALL
    #[arg(short, long, value_name = "FILE", default_value = ALL_SYMBOLS)]
    symbols: String,

    /// Trades output CSV
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_TRADES_FILE)]
    trades: String,

    /// Price levels output CSV
    #[arg(short, long = "price-levels", value_name = "FILE", default_value = DEFAULT_PRICE_LEVELS_FILE)]
    price_levels: String,

    /// Writes run diagnostics as JSON
    #[arg(short, long, value_name = "FILE")]
    dump: Option<String>,

    /// Input capture (.pcap or .pcap.gz)
    file: String,
}

fn main() {
    env_logger::init();

    let startup_time = Utc::now();
    eprintln!("Startup time: {}", startup_time.to_rfc3339());

    let args = Args::parse();

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Interrupt received, stopping after the current frame");
        handler_stop.store(true, Ordering::Relaxed);
    }) {
        error!("Error installing Ctrl-C handler: {}", e);
    }

    let config = Config::new(
        &args.file,
        &args.symbols,
        &args.trades,
        &args.price_levels,
        args.dump.is_some(),
        args.dump.unwrap_or_default(),
        args.verbose,
    );
    let result = run_until(&config, stop);

    let shutdown_time = Utc::now();
    eprintln!("Shutdown time: {}", shutdown_time.to_rfc3339());
    let elapsed = shutdown_time.signed_duration_since(startup_time);
    eprintln!("Elapsed time: {} seconds", elapsed.num_seconds());

    if let Err(e) = result {
        eprintln!("Application error: {}", e);
        process::exit(1);
    }
}
