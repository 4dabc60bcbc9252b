use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    /// SCHEDULED appointments at `location` with `start <= time <= end`.
    pub async fn scheduled_between(
        &self,
        location: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Appointment> {
        let Some(ls) = self.get_location(location) else {
            return Vec::new();
        };
        let guard = ls.read().await;
        guard
            .within(start, end)
            .iter()
            .filter_map(|slot| self.get_appointment(&slot.id))
            .filter(Appointment::is_scheduled)
            .collect()
    }

    pub fn get_appointment(&self, id: &Ulid) -> Option<Appointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub fn location_count(&self) -> usize {
        self.locations.len()
    }
}
