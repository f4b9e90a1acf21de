//! Steady-state cluster messages
//!
//! After the handshake the first payload byte of every frame is a tag:
//!
//! | tag | message | body |
//! |-----|---------|------|
//! | 150 | consumed | schedule id, little-endian `i32` |
//! | 151 | forward | `type \n endpoint \n body \n expiration` |
//! | 152 | finished | none |
//! | 153 | heartbeat | none |
//! | 140 | rejected | utf-8 reason |

use crate::error::{ClusterError, Result};
use crate::framing::MAX_FRAME_PAYLOAD;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use grandma_core::ScheduleRequest;

/// Message tags
pub mod tags {
    pub const REJECTED: u8 = 140;
    pub const CONSUMED: u8 = 150;
    pub const FORWARD: u8 = 151;
    pub const FINISHED: u8 = 152;
    pub const HEARTBEAT: u8 = 153;
}

/// Schedule id sent in `consumed` when the record id does not fit an `i32`
pub const UNKNOWN_SCHEDULE_ID: i32 = -1;

/// A message exchanged between master and slave
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterMessage {
    /// Slave accepted and persisted a forwarded request
    Consumed { schedule_id: i32 },
    /// Master hands a request to a slave
    Forward(ScheduleRequest),
    /// A slave schedule fired
    Finished,
    /// Liveness check, no reply expected
    Heartbeat,
    /// Slave could not accept a forwarded request
    Rejected { reason: String },
}

impl ClusterMessage {
    pub fn tag(&self) -> u8 {
        match self {
            ClusterMessage::Consumed { .. } => tags::CONSUMED,
            ClusterMessage::Forward(_) => tags::FORWARD,
            ClusterMessage::Finished => tags::FINISHED,
            ClusterMessage::Heartbeat => tags::HEARTBEAT,
            ClusterMessage::Rejected { .. } => tags::REJECTED,
        }
    }

    /// Whether a forward of `request` fits in one frame
    pub fn forward_fits(request: &ScheduleRequest) -> bool {
        1 + request.to_payload().len() <= MAX_FRAME_PAYLOAD
    }

    /// Encode as a frame payload
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u8(self.tag());
        match self {
            ClusterMessage::Consumed { schedule_id } => buf.put_i32_le(*schedule_id),
            ClusterMessage::Forward(request) => buf.put_slice(&request.to_payload()),
            ClusterMessage::Rejected { reason } => buf.put_slice(reason.as_bytes()),
            ClusterMessage::Finished | ClusterMessage::Heartbeat => {}
        }

        if buf.len() > MAX_FRAME_PAYLOAD {
            return Err(ClusterError::MessageTooLarge {
                size: buf.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }
        Ok(buf.freeze())
    }

    /// Decode a frame payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        if !buf.has_remaining() {
            return Err(ClusterError::Protocol("empty message".into()));
        }

        match buf.get_u8() {
            tags::CONSUMED => {
                if buf.remaining() < 4 {
                    return Err(ClusterError::Protocol(
                        "consumed message without schedule id".into(),
                    ));
                }
                Ok(ClusterMessage::Consumed {
                    schedule_id: buf.get_i32_le(),
                })
            }
            tags::FORWARD => Ok(ClusterMessage::Forward(ScheduleRequest::from_payload(buf)?)),
            tags::FINISHED => Ok(ClusterMessage::Finished),
            tags::HEARTBEAT => Ok(ClusterMessage::Heartbeat),
            tags::REJECTED => Ok(ClusterMessage::Rejected {
                reason: String::from_utf8_lossy(buf).into_owned(),
            }),
            other => Err(ClusterError::Protocol(format!("unknown message tag {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_consumed_layout() {
        let bytes = ClusterMessage::Consumed { schedule_id: 258 }.encode().unwrap();
        assert_eq!(&bytes[..], &[150, 2, 1, 0, 0]);
    }

    #[test]
    fn test_forward_fits() {
        let small = ScheduleRequest::new(106, "a@b.c", "hi", 0).unwrap();
        assert!(ClusterMessage::forward_fits(&small));

        let large = ScheduleRequest::new(106, "a@b.c", "x".repeat(40_000), 0).unwrap();
        assert!(!ClusterMessage::forward_fits(&large));
        assert!(ClusterMessage::Forward(large).encode().is_err());
    }

    #[test]
    fn test_forward_layout() {
        let req = ScheduleRequest::new(106, "a@b.c", "hi\nthere", 2500).unwrap();
        let bytes = ClusterMessage::Forward(req.clone()).encode().unwrap();
        assert_eq!(bytes[0], 151);
        assert_eq!(&bytes[1..], b"106\na@b.c\nhi\nthere\n2500");
        assert_eq!(
            ClusterMessage::decode(&bytes).unwrap(),
            ClusterMessage::Forward(req)
        );
    }

    #[test]
    fn test_bodyless_messages() {
        assert_eq!(&ClusterMessage::Heartbeat.encode().unwrap()[..], &[153]);
        assert_eq!(&ClusterMessage::Finished.encode().unwrap()[..], &[152]);
        assert_eq!(
            ClusterMessage::decode(&[152]).unwrap(),
            ClusterMessage::Finished
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(ClusterMessage::decode(&[]).is_err());
        assert!(ClusterMessage::decode(&[150, 1, 2]).is_err());
        assert!(ClusterMessage::decode(&[99]).is_err());
        assert!(matches!(
            ClusterMessage::decode(b"\x97107\n\nbody\n10"),
            Err(ClusterError::Core(grandma_core::Error::EmptyEndpoint))
        ));
    }

    #[test]
    fn test_oversized_forward() {
        let body = "x".repeat(MAX_FRAME_PAYLOAD);
        let req = ScheduleRequest::new(107, "e", body, 0).unwrap();
        assert!(matches!(
            ClusterMessage::Forward(req).encode(),
            Err(ClusterError::MessageTooLarge { .. })
        ));
    }

    proptest! {
        #[test]
        fn test_arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = ClusterMessage::decode(&data);
        }

        #[test]
        fn test_consumed_id_roundtrip(id in any::<i32>()) {
            let msg = ClusterMessage::Consumed { schedule_id: id };
            prop_assert_eq!(ClusterMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
        }
    }
}
