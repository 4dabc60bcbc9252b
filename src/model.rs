use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Booking payload as received from the caller.
///
/// Every field is optional at this layer; presence is checked by
/// [`crate::schedule::validate`] so each missing field gets its own message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRequest {
    pub full_name: Option<String>,
    pub location: Option<String>,
    pub appointment_time: Option<String>,
    pub car: Option<String>,
    pub services: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Cancelled,
}

/// A persisted appointment. `appointment_date_time` is the slot key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub appointment_id: Ulid,
    pub location_id: String,
    pub appointment_date_time: DateTime<Utc>,
    pub customer_name: String,
    pub vehicle_details: String,
    pub services_list: Vec<String>,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn is_scheduled(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
    }
}

/// A SCHEDULED appointment occupying an instant at a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub at: DateTime<Utc>,
    pub id: Ulid,
}

/// Slot index for one location.
#[derive(Debug, Clone)]
pub struct LocationState {
    pub location_id: String,
    /// Scheduled slots, sorted by `at`.
    pub slots: Vec<Slot>,
}

impl LocationState {
    pub fn new(location_id: String) -> Self {
        Self {
            location_id,
            slots: Vec::new(),
        }
    }

    /// Insert slot maintaining sort order by `at`.
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self.slots.partition_point(|s| s.at <= slot.at);
        self.slots.insert(pos, slot);
    }

    pub fn remove_slot(&mut self, id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    /// Slots with `start <= at <= end`.
    pub fn within(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[Slot] {
        let lo = self.slots.partition_point(|s| s.at < start);
        let hi = self.slots.partition_point(|s| s.at <= end);
        if lo >= hi {
            return &[];
        }
        &self.slots[lo..hi]
    }

    /// The appointment currently holding exactly `at`, if any.
    pub fn holder_at(&self, at: DateTime<Utc>) -> Option<Ulid> {
        self.within(at, at).first().map(|s| s.id)
    }
}

/// WAL record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AppointmentCreated {
        appointment: Appointment,
    },
    AppointmentCancelled {
        id: Ulid,
        at: DateTime<Utc>,
    },
    AppointmentDeleted {
        id: Ulid,
    },
}
