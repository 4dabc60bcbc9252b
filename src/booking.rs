//! Conflict check and commit for validated booking requests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::model::{Appointment, AppointmentRequest};
use crate::schedule::{self, SchedulePolicy, ValidatedRequest, ValidationError};
use crate::store::{AppointmentStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The slot is taken. Raised by the pre-read or by the store's
    /// conditional insert when a concurrent writer got there first.
    #[error("An appointment already exists for this location and time")]
    Conflict {
        location: String,
        at: DateTime<Utc>,
    },
    /// The store refused a new location or appointment because a size cap
    /// is reached. Deterministic, so it is not reported as a failure.
    #[error("Appointment capacity reached; try again later")]
    Capacity(&'static str),
    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SlotTaken { location, at, .. } => BookingError::Conflict { location, at },
            StoreError::LimitExceeded(what) => BookingError::Capacity(what),
            other => BookingError::Storage(other),
        }
    }
}

/// Validate → conflict check → commit, against any [`AppointmentStore`].
pub struct Scheduler {
    store: Arc<dyn AppointmentStore>,
    policy: SchedulePolicy,
}

impl Scheduler {
    pub fn new(store: Arc<dyn AppointmentStore>, policy: SchedulePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &SchedulePolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn AppointmentStore> {
        &self.store
    }

    /// True if a SCHEDULED appointment at `location` lies within the
    /// tolerance window around `at`, both ends inclusive.
    pub async fn has_conflict(&self, location: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let (start, end) = self.policy.conflict_window(at);
        let existing = self.store.query(location, start, end).await?;
        Ok(existing.iter().any(Appointment::is_scheduled))
    }

    /// Build the record and insert it. The store's slot constraint is the
    /// final word on conflicts.
    pub async fn commit(
        &self,
        request: ValidatedRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        let appointment = request.into_appointment(now);
        match self.store.insert(appointment).await {
            Ok(appt) => {
                info!(
                    id = %appt.appointment_id,
                    location = %appt.location_id,
                    at = %appt.appointment_date_time,
                    "appointment booked"
                );
                Ok(appt)
            }
            Err(e @ StoreError::SlotTaken { .. }) => {
                info!("lost slot race: {e}");
                Err(e.into())
            }
            Err(e @ StoreError::LimitExceeded(_)) => {
                warn!("appointment rejected: {e}");
                Err(e.into())
            }
            Err(e) => {
                error!("appointment insert failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Run the full pipeline for one request. `now` is request-processing
    /// time and the only clock consulted.
    pub async fn book(
        &self,
        request: &AppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, BookingError> {
        let validated = schedule::validate(request, &self.policy, now)?;

        let taken = self
            .has_conflict(&validated.location, validated.at)
            .await
            .inspect_err(|e| error!("conflict lookup failed: {e}"))
            .map_err(BookingError::Storage)?;
        if taken {
            info!(location = %validated.location, at = %validated.at, "slot already booked");
            return Err(BookingError::Conflict {
                location: validated.location,
                at: validated.at,
            });
        }

        self.commit(validated, now).await
    }
}
