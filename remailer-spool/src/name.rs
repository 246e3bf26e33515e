use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Placeholder for an envelope field the session never supplied.
pub const PLACEHOLDER: &str = "unknown";

/// Spool file extension, without the dot.
pub const EXTENSION: &str = "eml";

/// Upper bound on the sanitized recipient segment, so a large RCPT list
/// cannot push the filename past filesystem limits.
const MAX_RECIPIENT_SEGMENT: usize = 120;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Envelope details a spool filename is derived from.
#[derive(Debug, Clone, Default)]
pub struct MessageMeta {
    pub session_id: String,
    pub from: Option<String>,
    pub recipients: Vec<String>,
}

/// Allocate a process-unique session identifier.
///
/// The identifier makes filenames unique within one process; the millisecond
/// timestamp prefix keeps them unique, and time-ordered, across restarts.
pub fn next_session_id() -> String {
    format!(
        "{:x}-{:04x}",
        std::process::id(),
        SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Compute the spool filename for a message received now.
pub fn filename(meta: &MessageMeta) -> String {
    filename_at(meta, Utc::now())
}

/// Compute the spool filename for a message received at `at`.
///
/// Format: `<YYYYMMDDHHMMSSmmm>_<sessionId>_<from>_<recipients>.eml`, with
/// `@` and `.` (and anything else unsafe in a filename) replaced by `-`.
/// Lexicographic order of these names is receipt order.
pub fn filename_at(meta: &MessageMeta, at: DateTime<Utc>) -> String {
    let from = meta
        .from
        .as_deref()
        .map_or_else(|| PLACEHOLDER.to_string(), sanitize);

    let mut recipients = if meta.recipients.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        meta.recipients
            .iter()
            .map(|recipient| sanitize(recipient))
            .collect::<Vec<_>>()
            .join("-")
    };
    recipients.truncate(MAX_RECIPIENT_SEGMENT);

    format!(
        "{}_{}_{}_{}.{}",
        at.format("%Y%m%d%H%M%S%3f"),
        meta.session_id,
        from,
        recipients,
        EXTENSION
    )
}

fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::{filename_at, next_session_id, MessageMeta};

    fn at() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc
            .with_ymd_and_hms(2024, 3, 7, 16, 20, 5)
            .unwrap()
            + chrono::Duration::milliseconds(42)
    }

    #[test]
    fn format_is_stable() {
        let meta = MessageMeta {
            session_id: "a1f-0001".into(),
            from: Some("alice@example.com".into()),
            recipients: vec!["bob@example.org".into(), "carol@example.net".into()],
        };

        assert_eq!(
            filename_at(&meta, at()),
            "20240307162005042_a1f-0001_alice-example-com_bob-example-org-carol-example-net.eml"
        );
    }

    #[test]
    fn missing_fields_use_placeholder() {
        let meta = MessageMeta {
            session_id: "a1f-0002".into(),
            from: None,
            recipients: vec![],
        };

        assert_eq!(
            filename_at(&meta, at()),
            "20240307162005042_a1f-0002_unknown_unknown.eml"
        );
    }

    #[test]
    fn distinct_sessions_yield_distinct_names() {
        let first = MessageMeta {
            session_id: next_session_id(),
            from: Some("a@b.c".into()),
            recipients: vec!["d@e.f".into()],
        };
        let second = MessageMeta {
            session_id: next_session_id(),
            ..first.clone()
        };

        assert_ne!(filename_at(&first, at()), filename_at(&second, at()));
    }

    #[test]
    fn oversized_recipient_lists_are_truncated() {
        let meta = MessageMeta {
            session_id: "a1f-0003".into(),
            from: Some("a@b.c".into()),
            recipients: (0..50).map(|i| format!("user{i}@example.com")).collect(),
        };

        assert!(filename_at(&meta, at()).len() < 200);
    }

    #[test]
    fn timestamp_order_is_lexicographic_order() {
        let meta = MessageMeta {
            session_id: "a1f-0004".into(),
            from: Some("a@b.c".into()),
            recipients: vec!["d@e.f".into()],
        };

        let earlier = filename_at(&meta, at());
        let later = filename_at(&meta, at() + chrono::Duration::milliseconds(1));
        assert!(earlier < later);
    }
}
