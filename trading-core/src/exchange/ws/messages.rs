// exchange/ws/messages.rs
// Client frames, subscription identity and inbound frame validation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use trading_common::{Candle, L2Book, UserFills};

use crate::exchange::errors::{ExchangeError, ValidationError};
use crate::exchange::types::{WireCandle, WireL2Book, WireUserFills};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelKind {
    L2Book,
    Candle,
    UserFills,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::L2Book => "l2Book",
            ChannelKind::Candle => "candle",
            ChannelKind::UserFills => "userFills",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A feed the caller wants. Equality is on the normalized fields, so
/// registering the same feed twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub kind: ChannelKind,
    pub coin: Option<String>,
    pub interval: Option<String>,
    pub user: Option<String>,
}

impl Subscription {
    pub fn l2_book(coin: &str) -> Self {
        Self {
            kind: ChannelKind::L2Book,
            coin: Some(coin.trim().to_string()),
            interval: None,
            user: None,
        }
    }

    pub fn candle(coin: &str, interval: &str) -> Self {
        Self {
            kind: ChannelKind::Candle,
            coin: Some(coin.trim().to_string()),
            interval: Some(interval.trim().to_string()),
            user: None,
        }
    }

    /// Addresses are case-insensitive and stored lower case
    pub fn user_fills(user: &str) -> Self {
        Self {
            kind: ChannelKind::UserFills,
            coin: None,
            interval: None,
            user: Some(user.trim().to_ascii_lowercase()),
        }
    }

    /// `{type, coin?, interval?, user?}`
    pub fn to_wire(&self) -> Value {
        let mut wire = json!({ "type": self.kind.as_str() });
        if let Some(coin) = &self.coin {
            wire["coin"] = json!(coin);
        }
        if let Some(interval) = &self.interval {
            wire["interval"] = json!(interval);
        }
        if let Some(user) = &self.user {
            wire["user"] = json!(user);
        }
        wire
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for part in [&self.coin, &self.interval, &self.user].into_iter().flatten() {
            write!(f, ":{}", part)?;
        }
        Ok(())
    }
}

pub fn subscribe_frame(subscription: &Subscription) -> String {
    json!({ "method": "subscribe", "subscription": subscription.to_wire() }).to_string()
}

pub fn unsubscribe_frame(subscription: &Subscription) -> String {
    json!({ "method": "unsubscribe", "subscription": subscription.to_wire() }).to_string()
}

pub fn ping_frame() -> String {
    json!({ "method": "ping" }).to_string()
}

/// What the supervisor hands to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    L2Book(L2Book),
    Candle(Candle),
    UserFills(UserFills),
    /// Reconnect attempts exhausted; no further events follow
    Fatal { attempts: u32 },
}

impl StreamEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            StreamEvent::L2Book(_) => "l2Book",
            StreamEvent::Candle(_) => "candle",
            StreamEvent::UserFills(_) => "userFills",
            StreamEvent::Fatal { .. } => "fatal",
        }
    }

    pub fn fatal_error(&self) -> Option<ExchangeError> {
        match self {
            StreamEvent::Fatal { attempts } => Some(ExchangeError::ConnectionFatal {
                attempts: *attempts,
            }),
            _ => None,
        }
    }
}

/// Outcome of parsing one text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(StreamEvent),
    Pong,
    /// `subscriptionResponse` acknowledgement
    Ack(Value),
    /// Channel this client does not consume
    Unknown(String),
}

/// Parses and validates a server frame `{channel, data}`.
///
/// A frame either yields a fully validated event or an error; nothing is
/// emitted for a partially valid payload.
pub fn parse_frame(text: &str) -> Result<Inbound, ValidationError> {
    let frame: Value =
        serde_json::from_str(text).map_err(|e| ValidationError::NotJson(e.to_string()))?;

    let channel = frame
        .get("channel")
        .and_then(Value::as_str)
        .ok_or(ValidationError::MissingField("channel"))?;

    if channel == "pong" {
        return Ok(Inbound::Pong);
    }

    let data = frame.get("data").cloned();
    match channel {
        "subscriptionResponse" => Ok(Inbound::Ack(data.unwrap_or(Value::Null))),
        "l2Book" => {
            let data = data.ok_or(ValidationError::MissingField("data"))?;
            let book: WireL2Book = decode(channel, data)?;
            Ok(Inbound::Event(StreamEvent::L2Book(book.into_book()?)))
        }
        "candle" => {
            let data = data.ok_or(ValidationError::MissingField("data"))?;
            let candle: WireCandle = decode(channel, data)?;
            Ok(Inbound::Event(StreamEvent::Candle(candle.into_candle()?)))
        }
        "userFills" => {
            let data = data.ok_or(ValidationError::MissingField("data"))?;
            let fills: WireUserFills = decode(channel, data)?;
            Ok(Inbound::Event(StreamEvent::UserFills(fills.into_user_fills()?)))
        }
        other => Ok(Inbound::Unknown(other.to_string())),
    }
}

fn decode<T: serde::de::DeserializeOwned>(channel: &str, data: Value) -> Result<T, ValidationError> {
    serde_json::from_value(data).map_err(|e| ValidationError::Payload {
        channel: channel.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_subscription_identity() {
        assert_eq!(Subscription::l2_book(" BTC "), Subscription::l2_book("BTC"));
        assert_eq!(
            Subscription::user_fills("0xABCdef"),
            Subscription::user_fills("0xabcdef")
        );
        assert_ne!(Subscription::candle("BTC", "1m"), Subscription::candle("BTC", "5m"));
        assert_eq!(Subscription::candle("ETH", "1h").to_string(), "candle:ETH:1h");
    }

    #[test]
    fn test_client_frames() {
        let frame: Value = serde_json::from_str(&subscribe_frame(&Subscription::candle("ETH", "1m"))).unwrap();
        assert_eq!(
            frame,
            json!({ "method": "subscribe", "subscription": { "type": "candle", "coin": "ETH", "interval": "1m" } })
        );

        let frame: Value = serde_json::from_str(&unsubscribe_frame(&Subscription::user_fills("0xAB"))).unwrap();
        assert_eq!(
            frame,
            json!({ "method": "unsubscribe", "subscription": { "type": "userFills", "user": "0xab" } })
        );
        assert_eq!(ping_frame(), r#"{"method":"ping"}"#);
    }

    #[test]
    fn test_parse_l2_book() {
        let text = r#"{"channel":"l2Book","data":{"coin":"BTC","time":1700000000000,
            "levels":[[{"px":"42000.5","sz":"1.2","n":3}],[{"px":"42001","sz":"0.4","n":1}]]}}"#;
        match parse_frame(text).unwrap() {
            Inbound::Event(StreamEvent::L2Book(book)) => {
                assert_eq!(book.coin, "BTC");
                assert_eq!(book.mid_price(), Some(dec!(42000.75)));
                assert_eq!(book.best_ask().map(|l| l.n), Some(1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_candle_with_high_below_open_is_dropped() {
        let text = r#"{"channel":"candle","data":{"timestamp":1,"open":"105","high":"100","low":"95","close":"99","volume":"10"}}"#;
        assert!(matches!(parse_frame(text), Err(ValidationError::Data(_))));
    }

    #[test]
    fn test_parse_user_fills() {
        let text = r#"{"channel":"userFills","data":{"user":"0xabc","isSnapshot":true,"fills":[
            {"coin":"ETH","px":"1800.1","sz":"0.5","side":"B","time":1,"dir":"Open Long",
             "closedPnl":"0","fee":"0.01","oid":9,"startPosition":"0","hash":"0x00","crossed":true,"tid":5}]}}"#;
        match parse_frame(text).unwrap() {
            Inbound::Event(StreamEvent::UserFills(fills)) => {
                assert!(fills.is_snapshot);
                assert_eq!(fills.fills.len(), 1);
                assert!(fills.fills[0].side.is_buy());
            }
            other => panic!("unexpected {:?}", other),
        }

        // Fill missing its oid
        let text = r#"{"channel":"userFills","data":{"fills":[
            {"coin":"ETH","px":"1","sz":"1","side":"B","time":1,"dir":"x","closedPnl":"0","fee":"0"}]}}"#;
        assert!(matches!(parse_frame(text), Err(ValidationError::Payload { .. })));
    }

    #[test]
    fn test_control_and_malformed_frames() {
        assert_eq!(parse_frame(r#"{"channel":"pong"}"#).unwrap(), Inbound::Pong);
        assert!(matches!(
            parse_frame(r#"{"channel":"subscriptionResponse","data":{"method":"subscribe"}}"#).unwrap(),
            Inbound::Ack(_)
        ));
        assert_eq!(
            parse_frame(r#"{"channel":"trades","data":[]}"#).unwrap(),
            Inbound::Unknown("trades".to_string())
        );
        assert!(matches!(parse_frame("not json"), Err(ValidationError::NotJson(_))));
        assert_eq!(
            parse_frame(r#"{"data":{}}"#),
            Err(ValidationError::MissingField("channel"))
        );
        assert_eq!(
            parse_frame(r#"{"channel":"l2Book"}"#),
            Err(ValidationError::MissingField("data"))
        );
    }

    #[test]
    fn test_validation_error_converts() {
        let err: ExchangeError = parse_frame("not json").unwrap_err().into();
        assert!(matches!(
            err,
            ExchangeError::ValidationDropped(ValidationError::NotJson(_))
        ));
    }
}
