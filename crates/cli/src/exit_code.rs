// Consistent exit codes for the annolab CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   10 = annotation service not reachable
//   11 = missing or rejected session
//   13 = network error (timeout, closed link)

use std::process;

use annolab_client::flows::FlowError;
use annolab_client::ConnectionError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    ServiceDown = 10,
    Auth = 11,
    Network = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(connection) = cause.downcast_ref::<ConnectionError>() {
                return Self::from_connection_error(connection);
            }
            if let Some(flow) = cause.downcast_ref::<FlowError>() {
                return match flow {
                    FlowError::Connection(connection) => Self::from_connection_error(connection),
                    FlowError::MissingUser => Self::Usage,
                    FlowError::Abandoned => Self::Network,
                    FlowError::DocumentMissing(_) => Self::Error,
                };
            }
        }

        if format!("{err:#}").contains("timed out") {
            return Self::Network;
        }
        Self::Error
    }

    fn from_connection_error(err: &ConnectionError) -> Self {
        match err {
            ConnectionError::InvalidUrl { .. } => Self::Usage,
            ConnectionError::MissingSession => Self::Auth,
            ConnectionError::Connect(_) => Self::ServiceDown,
            ConnectionError::ClosedDuringHandshake => Self::Auth,
            ConnectionError::Closed | ConnectionError::ShutDown => Self::Network,
            ConnectionError::Protocol(_) => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn exit_code_values() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Error.code(), 1);
        assert_eq!(ExitCode::Usage.code(), 2);
        assert_eq!(ExitCode::ServiceDown.code(), 10);
        assert_eq!(ExitCode::Auth.code(), 11);
        assert_eq!(ExitCode::Network.code(), 13);
    }

    #[test]
    fn connection_errors_in_chain() {
        let refused: anyhow::Result<()> =
            Err(ConnectionError::Connect("connection refused".into())).context("could not start a session");
        assert_eq!(ExitCode::from_error(&refused.unwrap_err()), ExitCode::ServiceDown);

        let err = anyhow::Error::new(ConnectionError::MissingSession);
        assert_eq!(ExitCode::from_error(&err), ExitCode::Auth);

        let err = anyhow::Error::new(ConnectionError::InvalidUrl {
            url: "ws://example.org".into(),
            reason: "wss required".into(),
        });
        assert_eq!(ExitCode::from_error(&err), ExitCode::Usage);
    }

    #[test]
    fn flow_errors_in_chain() {
        let err = anyhow::Error::new(FlowError::MissingUser);
        assert_eq!(ExitCode::from_error(&err), ExitCode::Usage);
        let err = anyhow::Error::new(FlowError::Connection(ConnectionError::Closed));
        assert_eq!(ExitCode::from_error(&err), ExitCode::Network);
    }

    #[test]
    fn timeouts_are_network_errors() {
        let err = anyhow::anyhow!("timed out waiting for the document");
        assert_eq!(ExitCode::from_error(&err), ExitCode::Network);
    }

    #[test]
    fn from_error_generic_is_error() {
        let err = anyhow::anyhow!("something went wrong");
        assert_eq!(ExitCode::from_error(&err), ExitCode::Error);
    }
}
