/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Unit counts (quota, sold, held, quantity) are PostgreSQL INTEGER.
pub type Units = i32;

/// Money amounts are stored in minor currency units (e.g. cents).
pub type MinorUnits = i64;
