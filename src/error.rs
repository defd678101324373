// MIT License - Copyright (c) 2026 Peter Wright
// Insynctive bridge client

/// All errors that can occur in the insynctive-bridge library.
///
/// Unparsable responses are not errors; they surface as `None`.
#[derive(Debug, thiserror::Error)]
pub enum InsynctiveError {
    #[error("Invalid host IP specified ({host})")]
    InvalidHost { host: String },

    #[error("Invalid IP address specified: {ip}")]
    InvalidIp { ip: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Command timeout: {command}")]
    CommandTimeout { command: String },

    #[error("Command must not be empty")]
    EmptyCommand,

    #[error("Not connected to the bridge")]
    Disconnected,

    #[error("Bridge unreachable after {attempts} reconnect attempts")]
    Unreachable { attempts: u32 },
}

impl InsynctiveError {
    /// Whether this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InsynctiveError::Io(_)
                | InsynctiveError::ConnectionTimeout
                | InsynctiveError::CommandTimeout { .. }
                | InsynctiveError::Disconnected
        )
    }
}

pub type Result<T> = std::result::Result<T, InsynctiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(InsynctiveError::ConnectionTimeout.is_retryable());
        assert!(InsynctiveError::Disconnected.is_retryable());
        assert!(InsynctiveError::CommandTimeout {
            command: "?POINTCOUNT".to_string()
        }
        .is_retryable());
        assert!(!InsynctiveError::InvalidHost {
            host: "999.1.1.1".to_string()
        }
        .is_retryable());
        assert!(!InsynctiveError::Unreachable { attempts: 3 }.is_retryable());
    }

    #[test]
    fn test_invalid_host_message() {
        let err = InsynctiveError::InvalidHost {
            host: "999.1.1.1".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid host IP specified (999.1.1.1)");
    }
}
