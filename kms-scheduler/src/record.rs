use serde::{Deserialize, Serialize};

/// One Kafka header: order and duplicate keys are significant, so this is a
/// list rather than a map, mirroring how a real broker client represents
/// them.
pub type Headers = Vec<(String, String)>;

/// Scheduler-internal envelope attached to every message entry. Lives under
/// the `__kms` key so it can share the same JSON object as the caller's
/// payload without colliding with caller-chosen field names.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct KmsEnvelope {
    /// Destination topic the record is re-published to.
    pub d: String,
}

/// A scheduled message, as stored at a Timetable `MessageKey` and as
/// produced to its destination topic once due.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub k: Option<String>,
    pub v: Option<String>,
    #[serde(default)]
    pub h: Headers,
    pub __kms: KmsEnvelope,
}

impl MessageRecord {
    pub fn new(key: Option<String>, value: Option<String>, headers: Headers, destination: String) -> Self {
        MessageRecord {
            k: key,
            v: value,
            h: headers,
            __kms: KmsEnvelope { d: destination },
        }
    }

    pub fn destination(&self) -> &str {
        &self.__kms.d
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(value: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(value)?)
    }
}

/// Required headers on every ingress record.
pub const HEADER_DELIVER_AT: &str = "x-kms-deliver-at";
pub const HEADER_DELIVER_TO: &str = "x-kms-deliver-to";
pub const HEADER_ACTION: &str = "x-kms-action";
pub const ACTION_ADD: &str = "ADD";

/// A record that failed ingress validation, written to the DLQ topic
/// verbatim plus the list of errors that caused the rejection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DlqRecord {
    pub key: Option<String>,
    pub value: Option<String>,
    pub headers: Headers,
    pub errors: Vec<String>,
}

impl DlqRecord {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let record = MessageRecord::new(
            Some("key".to_string()),
            Some("value".to_string()),
            vec![("trace-id".to_string(), "abc".to_string())],
            "orders".to_string(),
        );
        let json = record.to_json().unwrap();
        let parsed = MessageRecord::from_json(&json).unwrap();
        assert_eq!(record, parsed);
        assert_eq!(parsed.destination(), "orders");
    }

    #[test]
    fn kms_envelope_is_nested_under_a_reserved_key() {
        let record = MessageRecord::new(None, None, Vec::new(), "t".to_string());
        let json = record.to_json().unwrap();
        assert!(json.contains("\"__kms\":{\"d\":\"t\"}"));
    }
}
