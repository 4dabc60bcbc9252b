//! Booking rules: field presence, timestamp parsing, and slot placement
//! inside the business-hour window of a fixed reference time zone.
//!
//! Everything here is pure. The caller supplies "now".

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::limits::*;
use crate::model::{Appointment, AppointmentRequest, AppointmentStatus};

/// Why a booking request was rejected before touching the store.
///
/// The `Display` text of each variant is the message returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("services must contain at least one entry")]
    EmptyServices,
    #[error("services must not contain empty or whitespace-only entries")]
    BlankService,
    #[error("{field} exceeds maximum length of {max}")]
    FieldTooLong { field: &'static str, max: usize },
    #[error("services may contain at most {max} entries")]
    TooManyServices { max: usize },
    #[error("appointmentTime must be a valid ISO-8601 timestamp with a UTC offset")]
    InvalidTime,
    #[error("appointmentTime must be in the future")]
    PastTime,
    #[error("appointmentTime must be between {open:02}:00 and {close:02}:00 {zone}")]
    OutsideBusinessHours { open: u32, close: u32, zone: Tz },
    #[error("appointmentTime must be aligned to a {slot_minutes}-minute interval")]
    Misaligned { slot_minutes: u32 },
}

impl ValidationError {
    /// Short machine-readable cause, used as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingField(_) => "missing_field",
            ValidationError::EmptyServices => "empty_services",
            ValidationError::BlankService => "blank_service",
            ValidationError::FieldTooLong { .. } => "field_too_long",
            ValidationError::TooManyServices { .. } => "too_many_services",
            ValidationError::InvalidTime => "invalid_time",
            ValidationError::PastTime => "past_time",
            ValidationError::OutsideBusinessHours { .. } => "outside_business_hours",
            ValidationError::Misaligned { .. } => "misaligned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("business hours must satisfy open < close <= 24 (got {open}..{close})")]
    InvalidHours { open: u32, close: u32 },
    #[error("slot length must be a positive divisor of 60 minutes (got {0})")]
    InvalidSlot(u32),
    #[error("conflict tolerance must be at least half a slot and less than a full slot (got {tolerance} min for {slot} min slots)")]
    InvalidTolerance { tolerance: u32, slot: u32 },
}

/// Business-hour window, slot grid, and conflict tolerance, all evaluated
/// in one civil time zone (DST-aware).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePolicy {
    zone: Tz,
    open_hour: u32,
    close_hour: u32,
    slot_minutes: u32,
    tolerance_minutes: u32,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            zone: chrono_tz::America::New_York,
            open_hour: 9,
            close_hour: 19,
            slot_minutes: 30,
            tolerance_minutes: 15,
        }
    }
}

impl SchedulePolicy {
    pub fn new(
        zone: Tz,
        open_hour: u32,
        close_hour: u32,
        slot_minutes: u32,
        tolerance_minutes: u32,
    ) -> Result<Self, PolicyError> {
        if open_hour >= close_hour || close_hour > 24 {
            return Err(PolicyError::InvalidHours {
                open: open_hour,
                close: close_hour,
            });
        }
        if slot_minutes == 0 || 60 % slot_minutes != 0 {
            return Err(PolicyError::InvalidSlot(slot_minutes));
        }
        // Tolerance must cover the slot without reaching the neighbouring one.
        if tolerance_minutes * 2 < slot_minutes || tolerance_minutes >= slot_minutes {
            return Err(PolicyError::InvalidTolerance {
                tolerance: tolerance_minutes,
                slot: slot_minutes,
            });
        }
        Ok(Self {
            zone,
            open_hour,
            close_hour,
            slot_minutes,
            tolerance_minutes,
        })
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn slot_minutes(&self) -> u32 {
        self.slot_minutes
    }

    pub fn tolerance(&self) -> Duration {
        Duration::minutes(i64::from(self.tolerance_minutes))
    }

    /// Closed window `[at - tolerance, at + tolerance]` searched for conflicts.
    pub fn conflict_window(&self, at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let tol = self.tolerance();
        (at - tol, at + tol)
    }

    /// Check that `at` is a bookable slot: inside `[open, close)` and on the
    /// slot grid, both measured on the reference zone's wall clock.
    pub fn check_slot(&self, at: DateTime<Utc>) -> Result<(), ValidationError> {
        let local = at.with_timezone(&self.zone);
        let hour = local.hour();
        if hour < self.open_hour || hour >= self.close_hour {
            return Err(ValidationError::OutsideBusinessHours {
                open: self.open_hour,
                close: self.close_hour,
                zone: self.zone,
            });
        }
        if local.minute() % self.slot_minutes != 0 || local.second() != 0 || local.nanosecond() != 0
        {
            return Err(ValidationError::Misaligned {
                slot_minutes: self.slot_minutes,
            });
        }
        Ok(())
    }
}

/// A request that passed every rule, with its instant resolved to UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub full_name: String,
    pub location: String,
    pub at: DateTime<Utc>,
    pub car: String,
    pub services: Vec<String>,
}

impl ValidatedRequest {
    /// Build the canonical record. The id is derived from `now` plus 80
    /// random bits.
    pub fn into_appointment(self, now: DateTime<Utc>) -> Appointment {
        Appointment {
            appointment_id: Ulid::from_datetime(now.into()),
            location_id: self.location,
            appointment_date_time: self.at,
            customer_name: self.full_name,
            vehicle_details: self.car,
            services_list: self.services,
            status: AppointmentStatus::Scheduled,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Run every rule in order and stop at the first violation.
pub fn validate(
    request: &AppointmentRequest,
    policy: &SchedulePolicy,
    now: DateTime<Utc>,
) -> Result<ValidatedRequest, ValidationError> {
    let full_name = required(&request.full_name, "fullName")?;
    // The location is the conflict key, so padding must not make a new one.
    let location = required(&request.location, "location")?.trim();
    let raw_time = required(&request.appointment_time, "appointmentTime")?;
    let car = required(&request.car, "car")?;
    let services = request
        .services
        .as_ref()
        .ok_or(ValidationError::MissingField("services"))?;

    if services.is_empty() {
        return Err(ValidationError::EmptyServices);
    }
    if services.iter().any(|s| s.trim().is_empty()) {
        return Err(ValidationError::BlankService);
    }

    check_len(full_name, "fullName", MAX_NAME_LEN)?;
    check_len(location, "location", MAX_LOCATION_LEN)?;
    check_len(car, "car", MAX_VEHICLE_LEN)?;
    if services.len() > MAX_SERVICES {
        return Err(ValidationError::TooManyServices { max: MAX_SERVICES });
    }
    for s in services {
        check_len(s, "services", MAX_SERVICE_LEN)?;
    }

    let at = parse_instant(raw_time)?;
    if at <= now {
        return Err(ValidationError::PastTime);
    }
    policy.check_slot(at)?;

    Ok(ValidatedRequest {
        full_name: full_name.to_string(),
        location: location.to_string(),
        at,
        car: car.to_string(),
        services: services.clone(),
    })
}

/// Parse an RFC 3339 timestamp (offset required) and normalize to UTC.
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    if raw.len() > MAX_TIMESTAMP_LEN {
        return Err(ValidationError::InvalidTime);
    }
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValidationError::InvalidTime)
}

fn required<'a>(
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field)),
    }
}

fn check_len(value: &str, field: &'static str, max: usize) -> Result<(), ValidationError> {
    if value.len() > max {
        return Err(ValidationError::FieldTooLong { field, max });
    }
    Ok(())
}
