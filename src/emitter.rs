//! Row schemas and sinks for decoded trades and price level updates.

use std::fs::File;
use std::io::Write;
use std::marker::PhantomData;
use std::path::Path;

use log::{trace, warn};
use serde::{Serialize, Serializer};

use crate::error::SinkError;
use crate::message::{DecodedMessage, Message, Price, PriceLevelUpdate, SaleCondition, Side, TradeReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TickType {
    #[serde(rename = "T")]
    Trade,
    #[serde(rename = "PRL")]
    PriceLevel,
}

/// `Z` marks a level whose size dropped to zero, i.e. a removed level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordType {
    #[serde(rename = "R")]
    Level,
    #[serde(rename = "Z")]
    Zero,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeRow {
    #[serde(rename = "Packet Capture Time")]
    pub capture_time_ns: u64,
    #[serde(rename = "Send Time")]
    pub send_time_ns: u64,
    #[serde(rename = "Raw Timestamp")]
    pub message_timestamp_ns: u64,
    #[serde(rename = "Tick Type")]
    pub tick_type: TickType,
    #[serde(rename = "Symbol")]
    pub symbol: String,
    #[serde(rename = "Size")]
    pub size: u32,
    #[serde(rename = "Price")]
    pub price: Price,
    #[serde(rename = "Trade ID")]
    pub trade_id: u64,
    #[serde(rename = "Sale Condition", serialize_with = "serialize_sale_conditions")]
    pub sale_conditions: Vec<SaleCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceLevelRow {
    #[serde(rename = "Packet Capture Time")]
    pub capture_time_ns: u64,
    #[serde(rename = "Send Time")]
    pub send_time_ns: u64,
    #[serde(rename = "Raw Timestamp")]
    pub message_timestamp_ns: u64,
    #[serde(rename = "Tick Type")]
    pub tick_type: TickType,
    #[serde(rename = "Symbol")]
    pub symbol: String,
    #[serde(rename = "Price")]
    pub price: Price,
    #[serde(rename = "Size")]
    pub size: u32,
    #[serde(rename = "Record Type")]
    pub record_type: RecordType,
    #[serde(rename = "Flag")]
    pub event_flag: u8,
    #[serde(rename = "ASK", serialize_with = "serialize_bool_as_digit")]
    pub is_ask: bool,
}

fn serialize_sale_conditions<S: Serializer>(conditions: &[SaleCondition], serializer: S) -> Result<S::Ok, S::Error> {
    let names: Vec<&'static str> = conditions.iter().map(|c| c.into()).collect();
    serializer.serialize_str(&names.join("|"))
}

fn serialize_bool_as_digit<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

/// Column headers, written even when a file ends up with no rows.
pub trait CsvRow: Serialize {
    const HEADERS: &'static [&'static str];
}

impl CsvRow for TradeRow {
    const HEADERS: &'static [&'static str] = &[
        "Packet Capture Time",
        "Send Time",
        "Raw Timestamp",
        "Tick Type",
        "Symbol",
        "Size",
        "Price",
        "Trade ID",
        "Sale Condition",
    ];
}

impl CsvRow for PriceLevelRow {
    const HEADERS: &'static [&'static str] = &[
        "Packet Capture Time",
        "Send Time",
        "Raw Timestamp",
        "Tick Type",
        "Symbol",
        "Price",
        "Size",
        "Record Type",
        "Flag",
        "ASK",
    ];
}

pub fn trade_row(capture_time_ns: u64, send_time_ns: u64, trade: &TradeReport) -> TradeRow {
    TradeRow {
        capture_time_ns,
        send_time_ns,
        message_timestamp_ns: trade.timestamp_ns,
        tick_type: TickType::Trade,
        symbol: trade.symbol.clone(),
        size: trade.size,
        price: trade.price,
        trade_id: trade.trade_id,
        sale_conditions: trade.sale_conditions(),
    }
}

pub fn price_level_row(capture_time_ns: u64, send_time_ns: u64, level: &PriceLevelUpdate) -> PriceLevelRow {
    let event_flag = match level.event_flags {
        0 | 1 => level.event_flags,
        other => {
            warn!(
                "Unexpected event flag 0x{:02x} in price level update for {}, treating as 0",
                other, level.symbol
            );
            0
        }
    };
    PriceLevelRow {
        capture_time_ns,
        send_time_ns,
        message_timestamp_ns: level.timestamp_ns,
        tick_type: TickType::PriceLevel,
        symbol: level.symbol.clone(),
        price: level.price,
        size: level.size,
        record_type: if level.size == 0 { RecordType::Zero } else { RecordType::Level },
        event_flag,
        is_ask: level.side == Side::Ask,
    }
}

/// Destination for one kind of row.
pub trait RowSink<R> {
    fn accept(&mut self, row: &R) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<R: Clone> RowSink<R> for Vec<R> {
    fn accept(&mut self, row: &R) -> Result<(), SinkError> {
        self.push(row.clone());
        Ok(())
    }
}

impl<R, S: RowSink<R> + ?Sized> RowSink<R> for &mut S {
    fn accept(&mut self, row: &R) -> Result<(), SinkError> {
        (**self).accept(row)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

pub struct CsvSink<W: Write, R> {
    writer: csv::Writer<W>,
    rows_written: u64,
    _row: PhantomData<fn(&R)>,
}

impl<R: CsvRow> CsvSink<File, R> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        Self::from_writer(File::create(path)?)
    }
}

impl<W: Write, R: CsvRow> CsvSink<W, R> {
    pub fn from_writer(inner: W) -> Result<Self, SinkError> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(inner);
        writer.write_record(R::HEADERS)?;
        Ok(Self {
            writer,
            rows_written: 0,
            _row: PhantomData,
        })
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer.into_inner().map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl<W: Write, R: CsvRow> RowSink<R> for CsvSink<W, R> {
    fn accept(&mut self, row: &R) -> Result<(), SinkError> {
        self.writer.serialize(row)?;
        self.rows_written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emitted {
    Trade,
    PriceLevel,
    Nothing,
}

/// Routes trade reports and price level updates to their own sinks.
pub struct RecordEmitter<T, P> {
    trades: T,
    price_levels: P,
}

impl<T: RowSink<TradeRow>, P: RowSink<PriceLevelRow>> RecordEmitter<T, P> {
    pub fn new(trades: T, price_levels: P) -> Self {
        Self { trades, price_levels }
    }

    /// Writes the row for `decoded`, if it has one. Filtering happens before this.
    pub fn emit(&mut self, capture_time_ns: u64, decoded: &DecodedMessage<'_>) -> Result<Emitted, SinkError> {
        match &decoded.message {
            Message::TradeReport(trade) => {
                let row = trade_row(capture_time_ns, decoded.send_time_ns, trade);
                trace!("Trade {} {}@{}", row.symbol, row.size, row.price);
                self.trades.accept(&row)?;
                Ok(Emitted::Trade)
            }
            Message::PriceLevelUpdate(level) => {
                let row = price_level_row(capture_time_ns, decoded.send_time_ns, level);
                trace!("Price level {} {:?} {}@{}", row.symbol, level.side, row.size, row.price);
                self.price_levels.accept(&row)?;
                Ok(Emitted::PriceLevel)
            }
            Message::SystemEvent(_) | Message::Unknown { .. } => Ok(Emitted::Nothing),
        }
    }

    pub fn flush(&mut self) -> Result<(), SinkError> {
        self.trades.flush()?;
        self.price_levels.flush()
    }

    pub fn trades(&self) -> &T {
        &self.trades
    }

    pub fn price_levels(&self) -> &P {
        &self.price_levels
    }

    pub fn into_sinks(self) -> (T, P) {
        (self.trades, self.price_levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{SystemEvent, SystemEventCode};

    fn trade() -> TradeReport {
        TradeReport {
            sale_condition_flags: 0x40,
            timestamp_ns: 1_647_875_400_100_000_000,
            symbol: "AAPL".to_string(),
            size: 100,
            price: Price::from_raw(1_500_000),
            trade_id: 12345,
        }
    }

    fn level(side: Side, size: u32, event_flags: u8) -> PriceLevelUpdate {
        PriceLevelUpdate {
            side,
            event_flags,
            timestamp_ns: 5,
            symbol: "MSFT".to_string(),
            size,
            price: Price::from_raw(1_510_000),
        }
    }

    #[test]
    fn routes_rows_to_their_sinks() {
        let mut emitter = RecordEmitter::new(Vec::<TradeRow>::new(), Vec::<PriceLevelRow>::new());

        let decoded = DecodedMessage { send_time_ns: 20, message: Message::TradeReport(trade()) };
        assert_eq!(emitter.emit(10, &decoded).unwrap(), Emitted::Trade);

        let decoded = DecodedMessage { send_time_ns: 21, message: Message::PriceLevelUpdate(level(Side::Ask, 200, 1)) };
        assert_eq!(emitter.emit(11, &decoded).unwrap(), Emitted::PriceLevel);

        let event = SystemEvent { code: SystemEventCode::EndOfMessages, timestamp_ns: 0 };
        let decoded = DecodedMessage { send_time_ns: 22, message: Message::SystemEvent(event) };
        assert_eq!(emitter.emit(12, &decoded).unwrap(), Emitted::Nothing);

        let (trades, levels) = emitter.into_sinks();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].capture_time_ns, 10);
        assert_eq!(trades[0].send_time_ns, 20);
        assert_eq!(trades[0].message_timestamp_ns, 1_647_875_400_100_000_000);
        assert_eq!(trades[0].sale_conditions, vec![SaleCondition::ExtendedHours]);
        assert_eq!(levels.len(), 1);
        assert!(levels[0].is_ask);
        assert_eq!(levels[0].record_type, RecordType::Level);
    }

    #[test]
    fn zero_size_level_and_odd_flag() {
        let row = price_level_row(1, 2, &level(Side::Bid, 0, 7));
        assert_eq!(row.record_type, RecordType::Zero);
        assert_eq!(row.event_flag, 0);
        assert!(!row.is_ask);
    }

    #[test]
    fn trade_csv_layout() {
        let mut sink = CsvSink::<_, TradeRow>::from_writer(Vec::new()).unwrap();
        let mut row = trade_row(1_647_875_400_123_456_000, 1_647_875_400_200_000_000, &trade());
        sink.accept(&row).unwrap();
        row.sale_conditions = SaleCondition::from_flags(0x80);
        sink.accept(&row).unwrap();
        assert_eq!(sink.rows_written(), 2);

        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            "Packet Capture Time,Send Time,Raw Timestamp,Tick Type,Symbol,Size,Price,Trade ID,Sale Condition"
        );
        assert_eq!(
            lines[1],
            "1647875400123456000,1647875400200000000,1647875400100000000,T,AAPL,100,150.0000,12345,EXTENDED_HOURS"
        );
        assert_eq!(
            lines[2],
            "1647875400123456000,1647875400200000000,1647875400100000000,T,AAPL,100,150.0000,12345,INTERMARKET_SWEEP|REGULAR_HOURS"
        );
    }

    #[test]
    fn price_level_csv_layout() {
        let mut sink = CsvSink::<_, PriceLevelRow>::from_writer(Vec::new()).unwrap();
        sink.accept(&price_level_row(3, 4, &level(Side::Ask, 200, 1))).unwrap();
        sink.accept(&price_level_row(3, 4, &level(Side::Bid, 0, 0))).unwrap();

        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            "Packet Capture Time,Send Time,Raw Timestamp,Tick Type,Symbol,Price,Size,Record Type,Flag,ASK"
        );
        assert_eq!(lines[1], "3,4,5,PRL,MSFT,151.0000,200,R,1,1");
        assert_eq!(lines[2], "3,4,5,PRL,MSFT,151.0000,0,Z,0,0");
    }

    #[test]
    fn empty_sink_still_has_headers() {
        let sink = CsvSink::<_, PriceLevelRow>::from_writer(Vec::new()).unwrap();
        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(out.lines().count(), 1);
    }
}
