//! Event records captured from storefront interactions.
//!
//! Every record has a fixed envelope (type, timestamp, session and device
//! context) plus a typed payload keyed by `eventType`. On the wire the
//! payload fields sit next to the envelope fields, so a record serializes
//! as one flat JSON object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::probe::{Browser, DeviceType};
use crate::session::SessionRecord;

/// The kind of analytics event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    ProductView,
    Search,
    AddToCart,
    AddFavorite,
    RemoveFavorite,
    CategoryFilter,
    CheckoutInitiated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStart => "session_start",
            EventKind::SessionEnd => "session_end",
            EventKind::ProductView => "product_view",
            EventKind::Search => "search",
            EventKind::AddToCart => "add_to_cart",
            EventKind::AddFavorite => "add_favorite",
            EventKind::RemoveFavorite => "remove_favorite",
            EventKind::CategoryFilter => "category_filter",
            EventKind::CheckoutInitiated => "checkout_initiated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the cart at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: u32,
    pub product_name: String,
    pub category: String,
    pub price: u64,
    pub quantity: u32,
}

/// Event-specific fields, tagged by `eventType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "snake_case")]
pub enum EventPayload {
    #[serde(rename_all = "camelCase")]
    SessionStart { session_data: SessionRecord },

    /// Seconds since the session started.
    SessionEnd { duration: f64 },

    #[serde(rename_all = "camelCase")]
    ProductView {
        product_id: u32,
        product_name: String,
        category: String,
        price: u64,
    },

    #[serde(rename_all = "camelCase")]
    Search { query: String, results_count: usize },

    #[serde(rename_all = "camelCase")]
    AddToCart {
        product_id: u32,
        product_name: String,
        price: u64,
        category: String,
    },

    #[serde(rename_all = "camelCase")]
    AddFavorite {
        product_id: u32,
        product_name: String,
        category: String,
    },

    #[serde(rename_all = "camelCase")]
    RemoveFavorite { product_id: u32, product_name: String },

    CategoryFilter { category: String },

    #[serde(rename_all = "camelCase")]
    CheckoutInitiated {
        cart_items: Vec<CartLine>,
        total: u64,
        item_count: u32,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::SessionStart { .. } => EventKind::SessionStart,
            EventPayload::SessionEnd { .. } => EventKind::SessionEnd,
            EventPayload::ProductView { .. } => EventKind::ProductView,
            EventPayload::Search { .. } => EventKind::Search,
            EventPayload::AddToCart { .. } => EventKind::AddToCart,
            EventPayload::AddFavorite { .. } => EventKind::AddFavorite,
            EventPayload::RemoveFavorite { .. } => EventKind::RemoveFavorite,
            EventPayload::CategoryFilter { .. } => EventKind::CategoryFilter,
            EventPayload::CheckoutInitiated { .. } => EventKind::CheckoutInitiated,
        }
    }
}

/// An immutable captured event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub device_type: DeviceType,
    pub browser: Browser,
    pub location: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl EventRecord {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// ISO-8601 timestamps with millisecond precision and a `Z` suffix.
pub mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(payload: EventPayload) -> EventRecord {
        EventRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
            session_id: "session_1_abc".into(),
            device_type: DeviceType::Desktop,
            browser: Browser::Chrome,
            location: "Hanoi".into(),
            payload,
        }
    }

    #[test]
    fn test_event_serializes_flat() {
        let event = record(EventPayload::AddToCart {
            product_id: 1,
            product_name: "iPhone 15 Pro Max".into(),
            price: 29_990_000,
            category: "Điện thoại".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "add_to_cart");
        assert_eq!(json["timestamp"], "2024-05-01T08:30:00.000Z");
        assert_eq!(json["sessionId"], "session_1_abc");
        assert_eq!(json["deviceType"], "Desktop");
        assert_eq!(json["productId"], 1);
        assert_eq!(json["price"], 29_990_000u64);
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn test_event_deserializes_by_tag() {
        let event = record(EventPayload::Search {
            query: "airpods".into(),
            results_count: 1,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"resultsCount\":1"));
        let back: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.kind(), EventKind::Search);
    }

    #[test]
    fn test_checkout_payload_shape() {
        let event = record(EventPayload::CheckoutInitiated {
            cart_items: vec![CartLine {
                product_id: 4,
                product_name: "AirPods Pro 2".into(),
                category: "Âm thanh".into(),
                price: 6_490_000,
                quantity: 2,
            }],
            total: 12_980_000,
            item_count: 2,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "checkout_initiated");
        assert_eq!(json["itemCount"], 2);
        assert_eq!(json["cartItems"][0]["productName"], "AirPods Pro 2");
        assert_eq!(json["cartItems"][0]["quantity"], 2);
    }

    #[test]
    fn test_kind_strings_match_serde_tags() {
        let payloads = vec![
            EventPayload::SessionEnd { duration: 1.5 },
            EventPayload::CategoryFilter {
                category: "Laptop".into(),
            },
            EventPayload::RemoveFavorite {
                product_id: 3,
                product_name: "MacBook Pro M3".into(),
            },
        ];
        for payload in payloads {
            let json = serde_json::to_value(&payload).unwrap();
            assert_eq!(json["eventType"], payload.kind().as_str());
        }
    }
}
