use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::MAX_APPOINTMENTS_PER_LOCATION;
use crate::model::*;
use crate::store::StoreError;

use super::{Engine, WalCommand};

impl Engine {
    /// Insert unless a SCHEDULED appointment already holds the same location
    /// and instant. The check and the write happen under one location lock.
    pub async fn insert_appointment(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let id = appointment.appointment_id;
        if self.appointments.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }

        let (ls, mut guard) = self.lock_location(&appointment.location_id, true).await?;
        let result = self.insert_locked(&mut guard, appointment).await;
        self.release_if_empty(&ls, &guard);
        result
    }

    async fn insert_locked(
        &self,
        guard: &mut LocationState,
        appointment: Appointment,
    ) -> Result<Appointment, StoreError> {
        let id = appointment.appointment_id;
        if self.appointments.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }
        if appointment.is_scheduled() {
            if guard.slots.len() >= MAX_APPOINTMENTS_PER_LOCATION {
                return Err(StoreError::LimitExceeded("too many appointments at location"));
            }
            if let Some(holder) = guard.holder_at(appointment.appointment_date_time) {
                return Err(StoreError::SlotTaken {
                    location: appointment.location_id.clone(),
                    at: appointment.appointment_date_time,
                    holder,
                });
            }
        }

        let event = Event::AppointmentCreated {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(guard, &event).await?;
        Ok(appointment)
    }

    /// Cancelling an already cancelled appointment returns it unchanged.
    pub async fn cancel_appointment(&self, id: Ulid, at: DateTime<Utc>) -> Result<Appointment, StoreError> {
        let (ls, mut guard) = self.resolve_appointment_write(&id).await?;
        let result = self.cancel_locked(&mut guard, id, at).await;
        self.release_if_empty(&ls, &guard);
        result
    }

    async fn cancel_locked(
        &self,
        guard: &mut LocationState,
        id: Ulid,
        at: DateTime<Utc>,
    ) -> Result<Appointment, StoreError> {
        let current = self.get_appointment(&id).ok_or(StoreError::NotFound(id))?;
        if !current.is_scheduled() {
            return Ok(current);
        }
        let event = Event::AppointmentCancelled { id, at };
        self.persist_and_apply(guard, &event).await?;
        self.get_appointment(&id).ok_or(StoreError::NotFound(id))
    }

    pub async fn delete_appointment(&self, id: Ulid) -> Result<Appointment, StoreError> {
        let (ls, mut guard) = self.resolve_appointment_write(&id).await?;
        let result = match self.get_appointment(&id) {
            Some(current) => self
                .persist_and_apply(&mut guard, &Event::AppointmentDeleted { id })
                .await
                .map(|()| current),
            None => Err(StoreError::NotFound(id)),
        };
        self.release_if_empty(&ls, &guard);
        result
    }

    /// Rewrite the WAL as one `AppointmentCreated` per stored appointment.
    /// Cancelled appointments are written with their final status.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.commit_gate.write().await;

        let mut snapshot: Vec<Appointment> =
            self.appointments.iter().map(|e| e.value().clone()).collect();
        snapshot.sort_by_key(|a| a.appointment_id);
        let events = snapshot
            .into_iter()
            .map(|appointment| Event::AppointmentCreated { appointment })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
