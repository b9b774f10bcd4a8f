use boxoffice_core::gateway::GatewayError;

/// Map a sqlx error onto the gateway's error taxonomy.
///
/// - PostgreSQL unique violations (`23505`) on `uq_`-prefixed constraints
///   become [`GatewayError::Duplicate`].
/// - Foreign key (`23503`) and check (`23514`) violations mean the caller
///   referenced or produced data the schema refuses: [`GatewayError::Invalid`].
/// - Numeric (`22003`) and datetime (`22008`) overflows are bad input too.
/// - Everything else (pool timeouts, I/O, protocol) is treated as transient.
pub fn classify_sqlx_error(err: sqlx::Error) -> GatewayError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let constraint = db_err.constraint().unwrap_or("unknown");
            match db_err.code().as_deref() {
                Some("23505") if constraint.starts_with("uq_") => GatewayError::Duplicate(
                    format!("Duplicate value violates unique constraint: {constraint}"),
                ),
                Some("23503") | Some("23514") => {
                    GatewayError::Invalid(format!("{constraint}: {}", db_err.message()))
                }
                Some("22003") | Some("22008") => {
                    GatewayError::Invalid(db_err.message().to_string())
                }
                _ => {
                    tracing::error!(error = %db_err, "Database error");
                    GatewayError::Unavailable(db_err.message().to_string())
                }
            }
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_) => GatewayError::Invalid(err.to_string()),
        other => {
            tracing::error!(error = %other, "Database error");
            GatewayError::Unavailable(other.to_string())
        }
    }
}
