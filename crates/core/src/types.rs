//! Type-safe wrappers for domain identifiers
//!
//! These newtypes prevent mixing different ID types at compile time.
//! For example, you cannot pass a UserId where a ScheduleId is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// User identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Create a new user ID
    pub fn new() -> Self {
        UserId(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        UserId(id)
    }
}

impl From<UserId> for Uuid {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Schedule identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct ScheduleId(pub Uuid);

impl ScheduleId {
    /// Create a new schedule ID
    pub fn new() -> Self {
        ScheduleId(Uuid::new_v4())
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ScheduleId {
    fn from(id: Uuid) -> Self {
        ScheduleId(id)
    }
}

impl From<ScheduleId> for Uuid {
    fn from(id: ScheduleId) -> Self {
        id.0
    }
}

/// Booking identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct BookingId(pub Uuid);

impl BookingId {
    /// Create a new booking ID
    pub fn new() -> Self {
        BookingId(Uuid::new_v4())
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for BookingId {
    fn from(id: Uuid) -> Self {
        BookingId(id)
    }
}

impl From<BookingId> for Uuid {
    fn from(id: BookingId) -> Self {
        id.0
    }
}

/// Report identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct ReportId(pub Uuid);

impl ReportId {
    /// Create a new report ID
    pub fn new() -> Self {
        ReportId(Uuid::new_v4())
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ReportId {
    fn from(id: Uuid) -> Self {
        ReportId(id)
    }
}

impl From<ReportId> for Uuid {
    fn from(id: ReportId) -> Self {
        id.0
    }
}

/// Outbox message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Create a new message ID
    pub fn new() -> Self {
        MessageId(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(id: Uuid) -> Self {
        MessageId(id)
    }
}

impl From<MessageId> for Uuid {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// Broadcast identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct BroadcastId(pub Uuid);

impl BroadcastId {
    /// Create a new broadcast ID
    pub fn new() -> Self {
        BroadcastId(Uuid::new_v4())
    }
}

impl Default for BroadcastId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for BroadcastId {
    fn from(id: Uuid) -> Self {
        BroadcastId(id)
    }
}

impl From<BroadcastId> for Uuid {
    fn from(id: BroadcastId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct_types() {
        fn takes_user_id(_: UserId) {}
        takes_user_id(UserId::new());
        // takes_user_id(ScheduleId::new()); // does not compile, which is the point
    }

    #[test]
    fn test_display_round_trip() {
        let id = BookingId::new();
        let uuid: Uuid = id.into();
        assert_eq!(id.to_string(), uuid.to_string());
    }
}
