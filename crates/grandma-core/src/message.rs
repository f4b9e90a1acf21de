//! Schedule requests and their line-delimited wire payload
//!
//! A request travels between nodes as
//!
//! ```text
//! <type>\n<endpoint>\n<body>\n<expiration ms>
//! ```
//!
//! The body may itself contain line breaks, so the payload is parsed from both
//! ends: type and endpoint from the front, expiration from the back.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest delay a request may ask for (90 days)
pub const MAX_DELAY_MS: i64 = 90 * 24 * 60 * 60 * 1000;

/// Notification kinds, numbered as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum NotificationKind {
    /// Scheduled no-op, delivers nothing
    Delete = 100,
    Apns = 101,
    Gcm = 102,
    Baidu = 103,
    Topic = 104,
    /// In-app socket notification; never offloaded to slaves
    Socket = 105,
    Email = 106,
    Rest = 107,
    RabbitMq = 108,
    Sms = 109,
}

impl NotificationKind {
    /// Every known kind, in wire order
    pub const ALL: [NotificationKind; 10] = [
        NotificationKind::Delete,
        NotificationKind::Apns,
        NotificationKind::Gcm,
        NotificationKind::Baidu,
        NotificationKind::Topic,
        NotificationKind::Socket,
        NotificationKind::Email,
        NotificationKind::Rest,
        NotificationKind::RabbitMq,
        NotificationKind::Sms,
    ];

    /// Look a kind up by its wire code
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.code() as i64 == code)
    }

    /// Wire code of this kind
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Broadcast-class kinds are always scheduled on the master
    pub fn is_broadcast(self) -> bool {
        matches!(self, NotificationKind::Socket)
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationKind::Delete => "delete",
            NotificationKind::Apns => "apns",
            NotificationKind::Gcm => "gcm",
            NotificationKind::Baidu => "baidu",
            NotificationKind::Topic => "topic",
            NotificationKind::Socket => "socket",
            NotificationKind::Email => "email",
            NotificationKind::Rest => "rest",
            NotificationKind::RabbitMq => "rabbitmq",
            NotificationKind::Sms => "sms",
        };
        write!(f, "{}({})", name, self.code())
    }
}

/// A validated request to deliver `body` to `endpoint` after `delay_ms`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    kind: NotificationKind,
    endpoint: String,
    body: String,
    delay_ms: i64,
}

impl ScheduleRequest {
    /// Build a request from raw submission fields
    pub fn new(
        kind: i64,
        endpoint: impl Into<String>,
        body: impl Into<String>,
        delay_ms: i64,
    ) -> Result<Self> {
        let endpoint = endpoint.into();

        if endpoint.is_empty() {
            return Err(Error::EmptyEndpoint);
        }
        if endpoint.contains(['\n', '\r']) {
            return Err(Error::InvalidEndpoint(
                "endpoint must not contain line breaks".to_string(),
            ));
        }
        if delay_ms > MAX_DELAY_MS {
            return Err(Error::DelayTooLarge {
                delay_ms,
                max_ms: MAX_DELAY_MS,
            });
        }
        if delay_ms < 0 {
            return Err(Error::NegativeDelay(delay_ms));
        }
        let kind = NotificationKind::from_code(kind).ok_or(Error::InvalidType(kind))?;

        Ok(Self {
            kind,
            endpoint,
            body: body.into(),
            delay_ms,
        })
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Requested delay, always within `0..=MAX_DELAY_MS`
    pub fn delay_ms(&self) -> i64 {
        self.delay_ms
    }

    /// Serialize as `type \n endpoint \n body \n expiration`
    pub fn to_payload(&self) -> Vec<u8> {
        format!(
            "{}\n{}\n{}\n{}",
            self.kind.code(),
            self.endpoint,
            self.body,
            self.delay_ms
        )
        .into_bytes()
    }

    /// Parse a payload produced by [`ScheduleRequest::to_payload`]
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| Error::InvalidPayload(format!("not utf-8: {}", e)))?;

        let mut head = text.splitn(3, '\n');
        let kind = head
            .next()
            .ok_or_else(|| Error::InvalidPayload("missing type".to_string()))?;
        let endpoint = head
            .next()
            .ok_or_else(|| Error::InvalidPayload("missing endpoint".to_string()))?;
        let rest = head
            .next()
            .ok_or_else(|| Error::InvalidPayload("missing body".to_string()))?;
        let (body, expiration) = rest
            .rsplit_once('\n')
            .ok_or_else(|| Error::InvalidPayload("missing expiration".to_string()))?;

        let kind: i64 = kind
            .trim()
            .parse()
            .map_err(|_| Error::InvalidPayload(format!("bad type: {:?}", kind)))?;
        let delay_ms: i64 = expiration
            .trim()
            .parse()
            .map_err(|_| Error::InvalidPayload(format!("bad expiration: {:?}", expiration)))?;

        Self::new(kind, endpoint, body, delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_valid_request() {
        let req = ScheduleRequest::new(107, "POST http://x/y application/json", "{}", 5000).unwrap();
        assert_eq!(req.kind(), NotificationKind::Rest);
        assert_eq!(req.delay_ms(), 5000);
    }

    #[test]
    fn test_rejects_bad_requests() {
        assert!(matches!(
            ScheduleRequest::new(107, "", "b", 0),
            Err(Error::EmptyEndpoint)
        ));
        assert!(matches!(
            ScheduleRequest::new(99, "e", "b", 0),
            Err(Error::InvalidType(99))
        ));
        assert!(matches!(
            ScheduleRequest::new(110, "e", "b", 0),
            Err(Error::InvalidType(110))
        ));
        assert!(matches!(
            ScheduleRequest::new(107, "e", "b", -1),
            Err(Error::NegativeDelay(-1))
        ));
        assert!(matches!(
            ScheduleRequest::new(107, "e", "b", MAX_DELAY_MS + 1),
            Err(Error::DelayTooLarge { .. })
        ));
        assert!(matches!(
            ScheduleRequest::new(107, "a\nb", "b", 0),
            Err(Error::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_delay_bounds_inclusive() {
        assert!(ScheduleRequest::new(106, "a@b.c", "hi", 0).is_ok());
        assert!(ScheduleRequest::new(106, "a@b.c", "hi", MAX_DELAY_MS).is_ok());
    }

    #[test]
    fn test_payload_format() {
        let req = ScheduleRequest::new(109, "+15550100", "hello", 1500).unwrap();
        assert_eq!(req.to_payload(), b"109\n+15550100\nhello\n1500".to_vec());
    }

    #[test]
    fn test_payload_body_with_newlines() {
        let req = ScheduleRequest::new(106, "a@b.c", "line one\nline two\n", 42).unwrap();
        let parsed = ScheduleRequest::from_payload(&req.to_payload()).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_truncated_payload() {
        assert!(matches!(
            ScheduleRequest::from_payload(b"107\nendpoint"),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            ScheduleRequest::from_payload(b"abc\nendpoint\nbody\n1"),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_broadcast_kind() {
        assert!(NotificationKind::Socket.is_broadcast());
        assert!(!NotificationKind::Email.is_broadcast());
    }

    proptest! {
        #[test]
        fn test_payload_roundtrip(
            code in 100i64..=109,
            endpoint in "[a-zA-Z0-9@:/. _-]{1,64}",
            body in "(?s).{0,200}",
            delay in 0i64..=MAX_DELAY_MS,
        ) {
            let req = ScheduleRequest::new(code, endpoint, body, delay).unwrap();
            let parsed = ScheduleRequest::from_payload(&req.to_payload()).unwrap();
            prop_assert_eq!(parsed, req);
        }

        #[test]
        fn test_arbitrary_payload_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = ScheduleRequest::from_payload(&data);
        }
    }
}
