use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Presence status of a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    #[default]
    Offline,
    Away,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Away => "away",
        }
    }

    /// Case-insensitive lookup of a wire status name
    pub fn from_wire(name: &str) -> Option<Self> {
        [Self::Online, Self::Offline, Self::Away]
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One roster entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub id: String,
    #[serde(default)]
    pub status: PresenceStatus,
    /// Opaque last-activity marker as supplied by the server
    #[serde(
        default,
        rename = "lastActive",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_active_at: Option<String>,
    /// Remaining fields from the snapshot (name, role, ...), carried untouched
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl PresenceRecord {
    pub fn new(id: impl Into<String>, status: PresenceStatus) -> Self {
        Self {
            id: id.into(),
            status,
            last_active_at: None,
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_last_active(mut self, last_active: impl Into<String>) -> Self {
        self.last_active_at = Some(last_active.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Build a record from one loosely shaped snapshot entry.
    ///
    /// The id is read from `id`, then `_id`, then `userId`; the first one
    /// present wins and any other stays an attribute. A missing or unknown
    /// status becomes offline. Returns `None` for non-objects and entries
    /// without a usable id.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };

        let (key, id) = ID_KEYS.iter().find_map(|key| {
            fields
                .get(*key)
                .and_then(scalar_string)
                .filter(|id| !id.is_empty())
                .map(|id| (*key, id))
        })?;
        fields.remove(key);

        let status = match fields.remove("status") {
            None | Some(Value::Null) => PresenceStatus::default(),
            Some(raw) => raw
                .as_str()
                .and_then(PresenceStatus::from_wire)
                .unwrap_or_else(|| {
                    tracing::debug!(subject_id = %id, status = %raw, "Unknown status in snapshot, using offline");
                    PresenceStatus::default()
                }),
        };

        let last_active_at = fields
            .remove("lastActive")
            .or_else(|| fields.remove("lastActiveAt"))
            .as_ref()
            .and_then(scalar_string);

        Some(Self {
            id,
            status,
            last_active_at,
            attributes: fields,
        })
    }
}

const ID_KEYS: [&str; 3] = ["id", "_id", "userId"];

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Payload of `USER_STATUS_CHANGE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub user_id: String,
    pub status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<String>,
}

impl StatusChange {
    pub fn new(user_id: impl Into<String>, status: PresenceStatus) -> Self {
        Self {
            user_id: user_id.into(),
            status,
            last_active: None,
        }
    }

    pub fn with_last_active(mut self, last_active: impl Into<String>) -> Self {
        self.last_active = Some(last_active.into());
        self
    }
}

/// Payload of `ENTITY_DELETED`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDeleted {
    pub entity_type: String,
    pub id: String,
}

impl EntityDeleted {
    pub fn is_subject(&self) -> bool {
        self.entity_type.eq_ignore_ascii_case("user")
    }
}
