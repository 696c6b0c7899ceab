use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Event kinds the client understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "USER_STATUS_CHANGE")]
    StatusChange,
    #[serde(rename = "ENTITY_CREATED")]
    EntityCreated,
    #[serde(rename = "ENTITY_DELETED")]
    EntityDeleted,
    #[serde(rename = "ENTITY_UPDATED")]
    EntityUpdated,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::StatusChange,
        EventType::EntityCreated,
        EventType::EntityDeleted,
        EventType::EntityUpdated,
    ];

    /// Wire name of this event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::StatusChange => "USER_STATUS_CHANGE",
            EventType::EntityCreated => "ENTITY_CREATED",
            EventType::EntityDeleted => "ENTITY_DELETED",
            EventType::EntityUpdated => "ENTITY_UPDATED",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound message wrapper.
///
/// `event_type` keeps the raw wire string so that types added on the server
/// side still parse; `kind()` maps it onto [`EventType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Milliseconds since the Unix epoch, when the server supplies one.
    /// Fractional values are truncated.
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
}

impl Envelope {
    pub fn new(kind: EventType, payload: serde_json::Value) -> Self {
        Self {
            event_type: kind.as_str().to_string(),
            payload,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn kind(&self) -> Option<EventType> {
        EventType::from_wire(&self.event_type)
    }

    /// Deserialize the payload into a typed struct
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(number.and_then(|n| {
        n.as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
    }))
}

/// Outbound message wrapper, serialized as `{ type, payload, timestamp }`
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope<'a, T: ?Sized + Serialize> {
    #[serde(rename = "type")]
    pub event: &'a str,
    pub payload: &'a T,
    pub timestamp: i64,
}

impl<'a, T: ?Sized + Serialize> OutboundEnvelope<'a, T> {
    pub fn new(event: &'a str, payload: &'a T) -> Self {
        Self {
            event,
            payload,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
