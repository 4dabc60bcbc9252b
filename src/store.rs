use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::Appointment;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A SCHEDULED appointment already holds this location and instant.
    #[error("slot {at} at location {location} is held by appointment {holder}")]
    SlotTaken {
        location: String,
        at: DateTime<Utc>,
        holder: Ulid,
    },
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

/// Durable appointment storage with a secondary index on
/// `(location_id, appointment_date_time)`.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Conditional insert. Fails with [`StoreError::SlotTaken`] when a
    /// SCHEDULED appointment already occupies the same location and instant.
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError>;

    /// SCHEDULED appointments at `location` with `start <= time <= end`,
    /// ordered by time.
    async fn query(
        &self,
        location: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn get(&self, id: Ulid) -> Result<Option<Appointment>, StoreError>;

    /// Mark an appointment CANCELLED, freeing its slot. Cancelling twice
    /// returns the record unchanged.
    async fn cancel(&self, id: Ulid, at: DateTime<Utc>) -> Result<Appointment, StoreError>;

    /// Remove an appointment and return it.
    async fn delete(&self, id: Ulid) -> Result<Appointment, StoreError>;

    /// Number of stored appointments, any status.
    fn appointment_count(&self) -> usize;
}
