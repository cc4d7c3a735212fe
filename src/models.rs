use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// Wire-level message tags, shared by both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Time = 0,
    GlobalCounter = 1,
    IpAddresses = 2,
}

impl MessageType {
    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(MessageType::Time),
            1 => Some(MessageType::GlobalCounter),
            2 => Some(MessageType::IpAddresses),
            _ => None,
        }
    }

    pub fn tag(self) -> i64 {
        self as i64
    }
}

// Outgoing frame: { "type": <int>, "data": <any> }
#[derive(Serialize, Debug, Clone)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: i64,
    pub data: serde_json::Value,
}

impl ServerMessage {
    pub fn new(kind: MessageType, data: impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            kind: kind.tag(),
            data: serde_json::to_value(data)?,
        })
    }
}

// Incoming frame - data is ignored by every request we understand
#[derive(Deserialize, Debug, Clone)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: i64,
    #[serde(default)]
    #[allow(dead_code)]
    pub data: serde_json::Value,
}

// One slot of the rotating visitor log
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VisitorEntry {
    #[serde(rename = "ipId")]
    pub slot_id: u64,
    #[serde(rename = "socketId")]
    pub session_id: String,
    #[serde(rename = "ip")]
    pub masked_address: String,
    #[serde(rename = "start", with = "iso_millis")]
    pub arrived_at: DateTime<Utc>,
    #[serde(rename = "end", with = "iso_millis_opt")]
    pub departed_at: Option<DateTime<Utc>>,
}

// Timestamps go over the wire and into the store as `2024-05-01T12:00:00.000Z`
pub fn iso_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|at| at.with_timezone(&Utc))
}

mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::iso_timestamp(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

mod iso_millis_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match at {
            Some(at) => s.serialize_str(&super::iso_timestamp(at)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) => super::parse_timestamp(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
