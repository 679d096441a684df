//! Symbol predicates deciding which trades and price levels are emitted.

use std::fs;
use std::io;
use std::path::Path;

use hashbrown::HashSet;
use log::info;

/// Sentinel accepted in place of a symbols file to keep every symbol.
pub const ALL_SYMBOLS: &str = "ALL";

/// Decides whether rows for a symbol are emitted.
pub trait SymbolFilter {
    fn included(&self, symbol: &str) -> bool;
}

impl<F: Fn(&str) -> bool> SymbolFilter for F {
    fn included(&self, symbol: &str) -> bool {
        self(symbol)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllSymbols;

impl SymbolFilter for AllSymbols {
    fn included(&self, _symbol: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolSet {
    symbols: HashSet<String>,
}

impl SymbolSet {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }

    /// One symbol per line; surrounding whitespace and blank lines are ignored.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(Self::new(
            contents.lines().map(str::trim).filter(|line| !line.is_empty()),
        ))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolFilter for SymbolSet {
    fn included(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }
}

/// Builds the filter for a `--symbols` argument: either [`ALL_SYMBOLS`] or a
/// path to a symbols file.
pub fn symbol_filter_from_arg(arg: &str) -> io::Result<Box<dyn SymbolFilter + Send + Sync>> {
    if arg == ALL_SYMBOLS {
        info!("No symbol filtering, all symbols will be emitted");
        return Ok(Box::new(AllSymbols));
    }
    let set = SymbolSet::from_file(arg)?;
    info!("Filtering enabled for {} symbols from {}", set.len(), arg);
    if set.len() < 20 {
        let mut listed: Vec<&str> = set.symbols.iter().map(String::as_str).collect();
        listed.sort_unstable();
        info!("Symbols: {}", listed.join(", "));
    }
    Ok(Box::new(set))
}
