use std::time::{SystemTime, UNIX_EPOCH};

/// Current wallclock time, floored to the second, as the scheduler's
/// authoritative `time_key` unit. The system does not target sub-second
/// precision (see the scheduling engine's non-goals), so every call site
/// that needs "now" for a comparison against a `time_key` goes through here
/// rather than reaching for `SystemTime::now()` directly.
pub fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as i64
}

/// Parses an RFC 3339 / ISO-8601 timestamp and floors it to whole seconds
/// since the epoch. This is the only place the ingress path interprets the
/// `x-kms-deliver-at` header.
pub fn parse_deliver_at(value: &str) -> Result<i64, time::error::Parse> {
    let parsed = time::OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)?;
    Ok(parsed.unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_timestamp() {
        let seconds = parse_deliver_at("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(seconds, 1_704_067_200);
    }

    #[test]
    fn rejects_a_malformed_timestamp() {
        assert!(parse_deliver_at("not-a-date").is_err());
    }

    #[test]
    fn floors_sub_second_precision() {
        let seconds = parse_deliver_at("2024-01-01T00:00:00.999Z").unwrap();
        assert_eq!(seconds, 1_704_067_200);
    }
}
