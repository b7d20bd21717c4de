use std::fmt;

use rust_decimal::Decimal;

/// Number of decimal places in a fixed-point price (prices are scaled by 1e8).
pub const PRICE_SCALE: u32 = 8;

/// Render a fixed-point price as a plain decimal string, e.g. `10150000000` -> `"101.5"`.
pub fn format_price(price: i64) -> String {
    Decimal::new(price, PRICE_SCALE).normalize().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Inverse of the `Display` form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Current price of one token as read from the price source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenReading {
    pub name: String,
    pub price: i64,
    pub timestamp: i64,
}

/// Arm state of a trigger as it was when last persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedState {
    pub direction: Direction,
    pub armed: bool,
}

/// A persisted notification baseline joined with its token's live price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineRecord {
    pub token_name: String,
    pub price: i64,
    pub token_price: i64,
    /// `None` for rows written without arm state.
    pub state: Option<SavedState>,
}

/// Per-token alert state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub token_name: String,
    pub baseline_price: i64,
    pub direction: Direction,
    pub armed: bool,
}

/// Signed distance between a price and a baseline, in thousandths of the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deviation {
    pub percent_thousandths: i64,
    pub sign: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    /// Price moved beyond the disarm band; the trigger was disarmed.
    Breakout,
    /// Price came back inside the re-arm band; the trigger was armed again.
    Settled,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Breakout => write!(f, "breakout"),
            Self::Settled => write!(f, "settled"),
        }
    }
}

/// Payload handed to an alert sink when a trigger fires.
///
/// `direction` and `baseline_price` are the trigger's values after the
/// decision was committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub token_name: String,
    pub kind: AlertKind,
    pub direction: Direction,
    pub baseline_price: i64,
    pub current_price: i64,
    pub deviation: Deviation,
}
