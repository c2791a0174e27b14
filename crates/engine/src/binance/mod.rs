pub mod rest;
pub mod stream;

pub use rest::BinanceFuturesClient;
pub use stream::{parse_kline_event, BinanceFeedConnector};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Binance sends prices as strings in some payloads and numbers in others.
pub(crate) fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn de_number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(d)?;
    number(&value).ok_or_else(|| D::Error::custom(format!("expected a number, got {value}")))
}

pub(crate) fn de_integer<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(d)?;
    integer(&value).ok_or_else(|| D::Error::custom(format!("expected an integer, got {value}")))
}
