use log::{debug, error, info, warn};
use num_format::{Locale, ToFormattedString};
use serde_json::{json, Map};
use std::error::Error;
use std::fs::File;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub mod capture;
pub mod cursor;
pub mod emitter;
pub mod error;
pub mod filter;
pub mod frame;
pub mod message;
pub mod pipeline;
pub mod segment;

pub use capture::{CaptureHeader, CaptureReader, FrameRecord};
pub use emitter::{CsvSink, PriceLevelRow, RecordEmitter, RowSink, TradeRow};
pub use error::{CaptureError, CursorError, FrameError, SinkError};
pub use filter::{symbol_filter_from_arg, AllSymbols, SymbolFilter, SymbolSet, ALL_SYMBOLS};
pub use frame::{FrameUnwrapper, LinkLayer};
pub use message::{decode_message, DecodedMessage, Message, Price, SaleCondition, SystemEventCode};
pub use pipeline::{process_file, process_frames, Diagnostics};
pub use segment::{decode_segment, Segment, SegmentHeader};

pub const DEFAULT_TRADES_FILE: &str = "trades.csv";
pub const DEFAULT_PRICE_LEVELS_FILE: &str = "price_levels.csv";

#[derive(Debug, Clone)]
pub struct Config {
    pub capture_file_path: String,
    pub symbols: String,
    pub trades_file_path: String,
    pub price_levels_file_path: String,
    pub dump_file_provided: bool,
    pub dump_file: String,
    pub verbose: bool,
}

impl Config {
    pub fn new(
        capture_file_path: &str,
        symbols: &str,
        trades_file_path: &str,
        price_levels_file_path: &str,
        dump_file_provided: bool,
        dump_file: String,
        verbose: bool,
    ) -> Config {
        Config {
            capture_file_path: capture_file_path.to_string(),
            symbols: symbols.to_string(),
            trades_file_path: trades_file_path.to_string(),
            price_levels_file_path: price_levels_file_path.to_string(),
            dump_file_provided,
            dump_file,
            verbose,
        }
    }
}

/// Runs one capture file to completion. Equivalent to [`run_until`] with a
/// stop flag that is never set.
pub fn run(config: &Config) -> Result<(), Box<dyn Error>> {
    run_until(config, Arc::new(AtomicBool::new(false)))
}

/// Decodes `config.capture_file_path` into the trades and price level CSV files,
/// stopping early once `stop` is set. Fails on a fatal capture error or any
/// output error; everything else is logged and counted.
pub fn run_until(config: &Config, stop: Arc<AtomicBool>) -> Result<(), Box<dyn Error>> {
    let filter = symbol_filter_from_arg(&config.symbols).map_err(|err| {
        error!("Error reading symbols file {}: {}", config.symbols, err);
        err
    })?;

    let trades = CsvSink::<File, TradeRow>::create(&config.trades_file_path)?;
    let price_levels = CsvSink::<File, PriceLevelRow>::create(&config.price_levels_file_path)?;
    let mut emitter = RecordEmitter::new(trades, price_levels);

    info!("Processing capture file: {}", config.capture_file_path);
    let diagnostics = process_file(
        &config.capture_file_path,
        filter.as_ref(),
        &mut emitter,
        &stop,
        Diagnostics::default(),
    )?;

    let (trades, price_levels) = emitter.into_sinks();
    info!(
        "Wrote {} trade rows to {} and {} price level rows to {}",
        trades.rows_written().to_formatted_string(&Locale::en),
        config.trades_file_path,
        price_levels.rows_written().to_formatted_string(&Locale::en),
        config.price_levels_file_path
    );
    diagnostics.log_summary(config.verbose);

    if config.dump_file_provided {
        debug!("Writing diagnostics to dump file");
        let mut dump_json = Map::new();
        dump_json.insert("capture_file".to_string(), json!(config.capture_file_path));
        dump_json.insert("symbols".to_string(), json!(config.symbols));
        dump_json.insert("diagnostics".to_string(), serde_json::to_value(&diagnostics)?);
        dump_json.insert("parse_status".to_string(), json!(diagnostics.fatal_error.is_none()));
        if let Err(e) = serde_json::to_writer_pretty(File::create(&config.dump_file)?, &dump_json) {
            error!("Error writing dump file: {}", e);
            return Err(Box::new(e));
        }
        info!("Dumped run diagnostics to file: {}", config.dump_file);
    }

    if diagnostics.cancelled {
        warn!("Run cancelled; output files contain the rows decoded so far");
    }
    if let Some(e) = diagnostics.fatal_error {
        error!("Error parsing capture: {}", e);
        return Err(e.into());
    }

    Ok(())
}
