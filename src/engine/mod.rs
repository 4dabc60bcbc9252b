mod mutations;
mod queries;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::MAX_LOCATIONS;
use crate::model::*;
use crate::observability;
use crate::store::{AppointmentStore, StoreError};
use crate::wal::Wal;

pub type SharedLocationState = Arc<RwLock<LocationState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain every Append already queued.
/// 4. One flush_sync for the whole batch.
/// 5. Answer every sender with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(ref e) = result {
        tracing::error!(batch = batch.len(), "WAL flush failed: {e}");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into
    // the next batch.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// WAL-backed appointment store.
///
/// Appointments live in a by-id map; SCHEDULED ones are also indexed per
/// location by instant. All writes for a location run under that location's
/// write lock, which makes the slot check and the insert one atomic step.
pub struct Engine {
    pub(super) locations: DashMap<String, SharedLocationState>,
    pub(super) appointments: DashMap<Ulid, Appointment>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared by every mutation and exclusively by compaction, so a
    /// snapshot never drops an event that already reached the log.
    pub(super) commit_gate: RwLock<()>,
    /// Cap on locations holding live slots. Empty locations are dropped.
    pub(super) max_locations: usize,
}

/// Apply an event to a location's slot index and the by-id map. The caller
/// holds the location lock.
fn apply_event(ls: &mut LocationState, event: &Event, appointments: &DashMap<Ulid, Appointment>) {
    match event {
        Event::AppointmentCreated { appointment } => {
            if appointment.is_scheduled() {
                ls.insert_slot(Slot {
                    at: appointment.appointment_date_time,
                    id: appointment.appointment_id,
                });
            }
            appointments.insert(appointment.appointment_id, appointment.clone());
        }
        Event::AppointmentCancelled { id, at } => {
            ls.remove_slot(*id);
            if let Some(mut appt) = appointments.get_mut(id) {
                appt.status = AppointmentStatus::Cancelled;
                appt.updated_at = *at;
            }
        }
        Event::AppointmentDeleted { id } => {
            ls.remove_slot(*id);
            appointments.remove(id);
        }
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Rebuild without locks, then wrap each location once.
        let appointments: DashMap<Ulid, Appointment> = DashMap::new();
        let mut locations: HashMap<String, LocationState> = HashMap::new();
        for event in &events {
            let location = match event {
                Event::AppointmentCreated { appointment } => Some(appointment.location_id.clone()),
                Event::AppointmentCancelled { id, .. } | Event::AppointmentDeleted { id } => {
                    appointments.get(id).map(|a| a.location_id.clone())
                }
            };
            let Some(location) = location else {
                tracing::warn!(?event, "WAL event for unknown appointment, skipped");
                continue;
            };
            let ls = locations
                .entry(location.clone())
                .or_insert_with(|| LocationState::new(location));
            apply_event(ls, event, &appointments);
        }

        let locations = locations
            .into_iter()
            .filter(|(_, v)| !v.slots.is_empty())
            .map(|(k, v)| (k, Arc::new(RwLock::new(v))))
            .collect();

        tracing::info!(
            path = %wal_path.display(),
            events = events.len(),
            appointments = appointments.len(),
            "replayed WAL"
        );
        metrics::gauge!(observability::APPOINTMENTS_ACTIVE).set(appointments.len() as f64);

        Ok(Self {
            locations,
            appointments,
            wal_tx,
            commit_gate: RwLock::new(()),
            max_locations: MAX_LOCATIONS,
        })
    }

    #[cfg(test)]
    pub(super) fn with_max_locations(mut self, max_locations: usize) -> Self {
        self.max_locations = max_locations;
        self
    }

    /// Write an event through the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub fn get_location(&self, location: &str) -> Option<SharedLocationState> {
        self.locations.get(location).map(|e| e.value().clone())
    }

    /// `enforce_limit` is off when an existing appointment needs its
    /// location back after the entry was dropped.
    pub(super) fn get_or_create_location(
        &self,
        location: &str,
        enforce_limit: bool,
    ) -> Result<SharedLocationState, StoreError> {
        if let Some(ls) = self.get_location(location) {
            return Ok(ls);
        }
        if enforce_limit && self.locations.len() >= self.max_locations {
            return Err(StoreError::LimitExceeded("too many locations"));
        }
        Ok(self
            .locations
            .entry(location.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(LocationState::new(location.to_string()))))
            .value()
            .clone())
    }

    /// Write-lock the location that is current in the map. A state dropped
    /// by `release_if_empty` while we waited is stale, so look it up again.
    pub(super) async fn lock_location(
        &self,
        location: &str,
        enforce_limit: bool,
    ) -> Result<(SharedLocationState, OwnedRwLockWriteGuard<LocationState>), StoreError> {
        loop {
            let ls = self.get_or_create_location(location, enforce_limit)?;
            let guard = ls.clone().write_owned().await;
            let current = self
                .locations
                .get(location)
                .is_some_and(|e| Arc::ptr_eq(e.value(), &ls));
            if current {
                return Ok((ls, guard));
            }
        }
    }

    /// Drop a location with no live slots. Called with its write lock held.
    pub(super) fn release_if_empty(&self, ls: &SharedLocationState, state: &LocationState) {
        if state.slots.is_empty() {
            self.locations
                .remove_if(state.location_id.as_str(), |_, v| Arc::ptr_eq(v, ls));
        }
    }

    /// WAL-append, then apply. The event is durable before it is visible.
    pub(super) async fn persist_and_apply(
        &self,
        ls: &mut LocationState,
        event: &Event,
    ) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(event).await?;
        apply_event(ls, event, &self.appointments);
        metrics::gauge!(observability::APPOINTMENTS_ACTIVE).set(self.appointments.len() as f64);
        Ok(())
    }

    /// Look up the appointment's location and take its write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        id: &Ulid,
    ) -> Result<(SharedLocationState, OwnedRwLockWriteGuard<LocationState>), StoreError> {
        let location = self
            .appointments
            .get(id)
            .map(|a| a.location_id.clone())
            .ok_or(StoreError::NotFound(*id))?;
        // A cancelled appointment may sit at a location that was dropped.
        let (ls, guard) = self.lock_location(&location, false).await?;
        // Deleted while we waited for the lock.
        if !self.appointments.contains_key(id) {
            self.release_if_empty(&ls, &guard);
            return Err(StoreError::NotFound(*id));
        }
        Ok((ls, guard))
    }
}

#[async_trait]
impl AppointmentStore for Engine {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        self.insert_appointment(appointment).await
    }

    async fn query(
        &self,
        location: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(self.scheduled_between(location, start, end).await)
    }

    async fn get(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.get_appointment(&id))
    }

    async fn cancel(&self, id: Ulid, at: DateTime<Utc>) -> Result<Appointment, StoreError> {
        self.cancel_appointment(id, at).await
    }

    async fn delete(&self, id: Ulid) -> Result<Appointment, StoreError> {
        self.delete_appointment(id).await
    }

    fn appointment_count(&self) -> usize {
        self.appointments.len()
    }
}
