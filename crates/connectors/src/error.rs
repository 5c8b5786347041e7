use thiserror::Error;

/// All errors surfaced by the source/target adapters, collapsed into the
/// kinds the engine's retry and escalation policies act on.
#[derive(Debug, Error, Clone)]
pub enum DbError {
    /// The connection dropped or could not be established.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Authentication was rejected. Never retried.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A table or column the job references does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A value could not be represented in the target column type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The target rejected rows on a key, check, or FK constraint.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The database gave up on the statement.
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("database error: {0}")]
    Unknown(String),
}

impl DbError {
    /// Only these kinds qualify for the adapter-internal bounded retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::ConnectionLost(_) | DbError::Timeout(_))
    }

    /// Kinds that must fail the chunk terminally instead of going back
    /// through the retry schedule.
    pub fn is_terminal_for_chunk(&self) -> bool {
        matches!(
            self,
            DbError::AuthFailed(_) | DbError::TypeMismatch(_) | DbError::ConstraintViolation(_)
        )
    }
}

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code = db_err.code().code();
            let message = db_err.message().to_string();
            return match &code[..2.min(code.len())] {
                "08" => DbError::ConnectionLost(message),
                "28" => DbError::AuthFailed(message),
                "23" => DbError::ConstraintViolation(message),
                "22" => DbError::TypeMismatch(message),
                "42" => match code {
                    "42P01" | "42703" => DbError::NotFound(message),
                    "42804" | "42846" => DbError::TypeMismatch(message),
                    _ => DbError::Unknown(message),
                },
                "57" => DbError::Timeout(message),
                _ => DbError::Unknown(message),
            };
        }
        if err.is_closed() {
            return DbError::ConnectionLost(err.to_string());
        }
        DbError::Unknown(err.to_string())
    }
}

impl From<mysql_async::Error> for DbError {
    fn from(err: mysql_async::Error) -> Self {
        match &err {
            mysql_async::Error::Server(server) => {
                let message = server.message.clone();
                match server.code {
                    1045 | 1044 | 1142 => DbError::AuthFailed(message),
                    1146 | 1054 | 1049 => DbError::NotFound(message),
                    1062 | 1048 | 1169 | 1216 | 1217 | 1451 | 1452 | 3819 => {
                        DbError::ConstraintViolation(message)
                    }
                    1264 | 1265 | 1292 | 1366 | 1406 => DbError::TypeMismatch(message),
                    1205 | 1213 | 3024 => DbError::Timeout(message),
                    _ => DbError::Unknown(message),
                }
            }
            mysql_async::Error::Io(_) => DbError::ConnectionLost(err.to_string()),
            mysql_async::Error::Driver(_) => DbError::Unknown(err.to_string()),
            _ => DbError::Unknown(err.to_string()),
        }
    }
}

/// Errors happening during adapter or connection setup.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// An invalid database URL was provided.
    #[error("invalid database URL: {0}")]
    InvalidUrl(String),

    /// The MySQL driver failed to build the connection or pool.
    #[error("MySQL connector creation failed: {0}")]
    MySql(#[from] mysql_async::Error),

    /// TLS configuration error.
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] native_tls::Error),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(#[from] tokio_postgres::Error),
}

impl ConnectorError {
    /// Whether the engine should report this as unreachable-source vs a
    /// credential problem when a connection cannot be opened.
    pub fn to_db_error(self) -> DbError {
        match self {
            ConnectorError::InvalidUrl(msg) => DbError::Unknown(msg),
            ConnectorError::MySql(err) => err.into(),
            ConnectorError::TlsConfig(err) => DbError::ConnectionLost(err.to_string()),
            ConnectorError::Connection(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_connection_and_timeout_only() {
        assert!(DbError::ConnectionLost("x".into()).is_transient());
        assert!(DbError::Timeout("x".into()).is_transient());
        assert!(!DbError::ConstraintViolation("x".into()).is_transient());
        assert!(!DbError::AuthFailed("x".into()).is_transient());
    }

    #[test]
    fn terminal_kinds_skip_the_retry_schedule() {
        assert!(DbError::TypeMismatch("x".into()).is_terminal_for_chunk());
        assert!(DbError::ConstraintViolation("x".into()).is_terminal_for_chunk());
        assert!(!DbError::Timeout("x".into()).is_terminal_for_chunk());
    }
}
