//! DEEP application message decoding.
//!
//! Offsets below are relative to the start of the message body, which begins
//! with the type byte:
//!
//! ```text
//! Trade Report 'T'        [1] sale condition  [2..10] timestamp  [10..18] symbol
//!                         [18..22] size u32   [22..30] price u64 [30..38] trade id
//! Price Level '8' / '5'   [1] event flags     [2..10] timestamp  [10..18] symbol
//!                         [18..22] size u32   [22..26] price u32
//! System Event 'S'        [1] event code      [2..10] timestamp
//! ```

use std::fmt;

use log::{trace, warn};
use serde::{Serialize, Serializer};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, IntoStaticStr};

use crate::cursor::ByteCursor;
use crate::error::{CursorError, FrameError};
use crate::segment::RawMessage;

pub const TRADE_REPORT_LEN: usize = 38;
pub const PRICE_LEVEL_UPDATE_LEN: usize = 26;
pub const SYSTEM_EVENT_LEN: usize = 10;
pub const SYMBOL_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum MessageType {
    PriceLevelUpdateSell = 0x35,
    PriceLevelUpdateBuy = 0x38,
    SystemEvent = 0x53,
    TradeReport = 0x54,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        MessageType::iter().find(|t| *t as u8 == byte)
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Label for a raw type byte in logs and statistics.
pub fn message_type_name(byte: u8) -> &'static str {
    MessageType::from_byte(byte).map_or("Unknown", |t| t.name())
}

/// A price with four implied decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price(u64);

impl Price {
    pub const SCALE: u64 = 10_000;

    pub fn from_raw(raw: u64) -> Self {
        Price(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 * 1e-4
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:04}", self.0 / Self::SCALE, self.0 % Self::SCALE)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleCondition {
    IntermarketSweep,
    ExtendedHours,
    RegularHours,
    OddLot,
    TradeThroughExempt,
    SinglePriceCross,
}

impl SaleCondition {
    pub const INTERMARKET_SWEEP_BIT: u8 = 0x80;
    pub const EXTENDED_HOURS_BIT: u8 = 0x40;
    pub const ODD_LOT_BIT: u8 = 0x20;
    pub const TRADE_THROUGH_EXEMPT_BIT: u8 = 0x10;
    pub const SINGLE_PRICE_CROSS_BIT: u8 = 0x08;

    /// Each bit is tested on its own, so an intermarket sweep can also be
    /// tagged regular hours. Absence of the extended-hours bit always yields
    /// `RegularHours`.
    pub fn from_flags(flags: u8) -> Vec<SaleCondition> {
        let mut conditions = Vec::with_capacity(2);
        if flags & Self::INTERMARKET_SWEEP_BIT != 0 {
            conditions.push(SaleCondition::IntermarketSweep);
        }
        if flags & Self::EXTENDED_HOURS_BIT != 0 {
            conditions.push(SaleCondition::ExtendedHours);
        } else {
            conditions.push(SaleCondition::RegularHours);
        }
        if flags & Self::ODD_LOT_BIT != 0 {
            conditions.push(SaleCondition::OddLot);
        }
        if flags & Self::TRADE_THROUGH_EXEMPT_BIT != 0 {
            conditions.push(SaleCondition::TradeThroughExempt);
        }
        if flags & Self::SINGLE_PRICE_CROSS_BIT != 0 {
            conditions.push(SaleCondition::SinglePriceCross);
        }
        conditions
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemEventCode {
    StartOfMessages,
    StartOfSystemHours,
    StartOfRegularMarketHours,
    EndOfRegularMarketHours,
    EndOfSystemHours,
    EndOfMessages,
    Other(u8),
}

impl From<u8> for SystemEventCode {
    fn from(code: u8) -> Self {
        match code {
            b'O' => SystemEventCode::StartOfMessages,
            b'S' => SystemEventCode::StartOfSystemHours,
            b'R' => SystemEventCode::StartOfRegularMarketHours,
            b'M' => SystemEventCode::EndOfRegularMarketHours,
            b'E' => SystemEventCode::EndOfSystemHours,
            b'C' => SystemEventCode::EndOfMessages,
            other => SystemEventCode::Other(other),
        }
    }
}

impl SystemEventCode {
    pub fn code(&self) -> u8 {
        match self {
            SystemEventCode::StartOfMessages => b'O',
            SystemEventCode::StartOfSystemHours => b'S',
            SystemEventCode::StartOfRegularMarketHours => b'R',
            SystemEventCode::EndOfRegularMarketHours => b'M',
            SystemEventCode::EndOfSystemHours => b'E',
            SystemEventCode::EndOfMessages => b'C',
            SystemEventCode::Other(code) => *code,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SystemEventCode::StartOfMessages => "start of messages",
            SystemEventCode::StartOfSystemHours => "start of system hours",
            SystemEventCode::StartOfRegularMarketHours => "start of regular market hours",
            SystemEventCode::EndOfRegularMarketHours => "end of regular market hours",
            SystemEventCode::EndOfSystemHours => "end of system hours",
            SystemEventCode::EndOfMessages => "end of messages",
            SystemEventCode::Other(_) => "unrecognised system event",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeReport {
    pub sale_condition_flags: u8,
    pub timestamp_ns: u64,
    pub symbol: String,
    pub size: u32,
    pub price: Price,
    pub trade_id: u64,
}

impl TradeReport {
    pub fn sale_conditions(&self) -> Vec<SaleCondition> {
        SaleCondition::from_flags(self.sale_condition_flags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevelUpdate {
    pub side: Side,
    pub event_flags: u8,
    pub timestamp_ns: u64,
    pub symbol: String,
    pub size: u32,
    pub price: Price,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemEvent {
    pub code: SystemEventCode,
    pub timestamp_ns: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<'a> {
    TradeReport(TradeReport),
    PriceLevelUpdate(PriceLevelUpdate),
    SystemEvent(SystemEvent),
    Unknown { message_type: u8, body: &'a [u8] },
}

impl<'a> Message<'a> {
    /// The symbol the message refers to, for messages that carry one.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Message::TradeReport(trade) => Some(trade.symbol.as_str()),
            Message::PriceLevelUpdate(level) => Some(level.symbol.as_str()),
            Message::SystemEvent(_) | Message::Unknown { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage<'a> {
    /// Send time of the enclosing segment.
    pub send_time_ns: u64,
    pub message: Message<'a>,
}

pub fn decode_message<'a>(raw: &RawMessage<'a>, send_time_ns: u64) -> Result<DecodedMessage<'a>, FrameError> {
    let Some(message_type) = raw.message_type() else {
        return Err(FrameError::MalformedMessageBody { message_type: 0, len: 0, needed: 1 });
    };

    let message = match MessageType::from_byte(message_type) {
        Some(MessageType::TradeReport) => Message::TradeReport(parse_trade_report(raw.body)?),
        Some(MessageType::PriceLevelUpdateBuy) => {
            Message::PriceLevelUpdate(parse_price_level_update(raw.body, Side::Bid)?)
        }
        Some(MessageType::PriceLevelUpdateSell) => {
            Message::PriceLevelUpdate(parse_price_level_update(raw.body, Side::Ask)?)
        }
        Some(MessageType::SystemEvent) => Message::SystemEvent(parse_system_event(raw.body)?),
        None => {
            trace!("Unknown message type 0x{:02X}: {}", message_type, hex::encode(raw.body));
            Message::Unknown { message_type, body: raw.body }
        }
    };

    Ok(DecodedMessage { send_time_ns, message })
}

/// Rejects bodies shorter than `needed` and positions a cursor after the type byte.
fn body_cursor(body: &[u8], needed: usize) -> Result<ByteCursor<'_>, FrameError> {
    let malformed = FrameError::MalformedMessageBody {
        message_type: body[0],
        len: body.len(),
        needed,
    };
    if body.len() < needed {
        return Err(malformed);
    }
    let mut cursor = ByteCursor::new(body);
    cursor.skip(1).map_err(|_| malformed)?;
    Ok(cursor)
}

fn malformed(body: &[u8], needed: usize) -> impl Fn(CursorError) -> FrameError {
    let (message_type, len) = (body[0], body.len());
    move |_| FrameError::MalformedMessageBody { message_type, len, needed }
}

fn read_symbol(cursor: &mut ByteCursor<'_>, body: &[u8], needed: usize) -> Result<String, FrameError> {
    let symbol = cursor.read_fixed_ascii(SYMBOL_LEN).map_err(malformed(body, needed))?;
    if symbol.is_empty() {
        return Err(FrameError::EmptySymbol(body[0]));
    }
    Ok(symbol)
}

fn parse_trade_report(body: &[u8]) -> Result<TradeReport, FrameError> {
    let mut cursor = body_cursor(body, TRADE_REPORT_LEN)?;
    let err = malformed(body, TRADE_REPORT_LEN);

    let sale_condition_flags = cursor.read_u8().map_err(&err)?;
    let timestamp_ns = cursor.read_u64le().map_err(&err)?;
    let symbol = read_symbol(&mut cursor, body, TRADE_REPORT_LEN)?;
    let size = cursor.read_u32le().map_err(&err)?;
    let price = Price::from_raw(cursor.read_u64le().map_err(&err)?);
    let trade_id = cursor.read_u64le().map_err(&err)?;

    if price.raw() == 0 || price.raw() > 1_000_000 * Price::SCALE {
        warn!("Unusual trade price {} for {} (trade id {})", price, symbol, trade_id);
    }
    if size == 0 {
        warn!("Zero size trade for {} (trade id {})", symbol, trade_id);
    }

    Ok(TradeReport { sale_condition_flags, timestamp_ns, symbol, size, price, trade_id })
}

fn parse_price_level_update(body: &[u8], side: Side) -> Result<PriceLevelUpdate, FrameError> {
    let mut cursor = body_cursor(body, PRICE_LEVEL_UPDATE_LEN)?;
    let err = malformed(body, PRICE_LEVEL_UPDATE_LEN);

    let event_flags = cursor.read_u8().map_err(&err)?;
    let timestamp_ns = cursor.read_u64le().map_err(&err)?;
    let symbol = read_symbol(&mut cursor, body, PRICE_LEVEL_UPDATE_LEN)?;
    let size = cursor.read_u32le().map_err(&err)?;
    let price = Price::from_raw(u64::from(cursor.read_u32le().map_err(&err)?));

    Ok(PriceLevelUpdate { side, event_flags, timestamp_ns, symbol, size, price })
}

fn parse_system_event(body: &[u8]) -> Result<SystemEvent, FrameError> {
    let mut cursor = body_cursor(body, SYSTEM_EVENT_LEN)?;
    let err = malformed(body, SYSTEM_EVENT_LEN);

    let code = SystemEventCode::from(cursor.read_u8().map_err(&err)?);
    let timestamp_ns = cursor.read_u64le().map_err(&err)?;
    Ok(SystemEvent { code, timestamp_ns })
}
