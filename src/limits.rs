// Hard caps on request payloads and stored state.

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LOCATION_LEN: usize = 128;
pub const MAX_VEHICLE_LEN: usize = 256;
pub const MAX_SERVICES: usize = 32;
pub const MAX_SERVICE_LEN: usize = 128;

/// Raw timestamp strings longer than this are rejected before parsing.
pub const MAX_TIMESTAMP_LEN: usize = 64;

pub const MAX_LOCATIONS: usize = 10_000;
pub const MAX_APPOINTMENTS_PER_LOCATION: usize = 100_000;

/// Request body cap for the HTTP layer.
pub const MAX_BODY_BYTES: usize = 64 * 1024;
