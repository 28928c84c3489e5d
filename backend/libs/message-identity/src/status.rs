use crate::UnknownVariant;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Message lifecycle
///
/// `sending → sent → delivered → read`, with `failed` reachable from
/// `sending` or `sent`. `read` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    /// Position on the delivery progression. `failed` sits outside it.
    pub fn rank(&self) -> Option<u8> {
        match self {
            MessageStatus::Sending => Some(0),
            MessageStatus::Sent => Some(1),
            MessageStatus::Delivered => Some(2),
            MessageStatus::Read => Some(3),
            MessageStatus::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Read | MessageStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        if self.is_terminal() || *self == next {
            return false;
        }

        match (self.rank(), next.rank()) {
            (Some(current), Some(next)) => next > current,
            // Only sending/sent may fail; delivered already left the device.
            (Some(current), None) => current <= 1,
            (None, _) => false,
        }
    }

    /// Apply `next` if it moves forward, otherwise keep `self`.
    pub fn advance(self, next: MessageStatus) -> MessageStatus {
        if self.can_transition_to(next) {
            next
        } else {
            self
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(UnknownVariant::new("message status", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MessageStatus::*;

    #[test]
    fn test_forward_progression() {
        assert_eq!(Sending.advance(Sent), Sent);
        assert_eq!(Sent.advance(Delivered), Delivered);
        assert_eq!(Sending.advance(Read), Read);
    }

    #[test]
    fn test_status_never_regresses() {
        assert_eq!(Read.advance(Sent), Read);
        assert_eq!(Delivered.advance(Sent), Delivered);
        assert_eq!(Sent.advance(Sending), Sent);

        // read, then sent: stays read
        let status = Sent.advance(Read).advance(Sent);
        assert_eq!(status, Read);
    }

    #[test]
    fn test_failed_only_from_sending_or_sent() {
        assert_eq!(Sending.advance(Failed), Failed);
        assert_eq!(Sent.advance(Failed), Failed);
        assert_eq!(Delivered.advance(Failed), Delivered);
        assert_eq!(Read.advance(Failed), Read);
    }

    #[test]
    fn test_failed_is_terminal() {
        assert_eq!(Failed.advance(Sent), Failed);
        assert_eq!(Failed.advance(Read), Failed);
        assert!(Failed.is_terminal());
        assert!(Read.is_terminal());
        assert!(!Delivered.is_terminal());
    }

    #[test]
    fn test_parse_roundtrip_and_unknown() {
        for status in [Sending, Sent, Delivered, Read, Failed] {
            assert_eq!(status.as_str().parse::<MessageStatus>().unwrap(), status);
        }
        let err = "queued".parse::<MessageStatus>().unwrap_err();
        assert_eq!(err.value, "queued");
    }
}
