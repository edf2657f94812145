use handover::error::HandoverError;
use handover::listener::BindError;
use handover::server::{LifecycleError, ServeError, ShutdownError};
use std::io::ErrorKind;
use std::process::{ExitCode, Termination};

#[derive(Debug)]
pub struct HandoverExitCode(pub HandoverError);

impl Termination for HandoverExitCode {
    fn report(self) -> ExitCode {
        let code = self.exit_code();
        if self.subscriber_missing() {
            eprintln!("handover: {}", self.0);
        } else {
            tracing::error!(exit_code = code, "{}", self.0);
        }
        ExitCode::from(code)
    }
}

impl HandoverExitCode {
    /// Logging failed to initialize, so tracing output would go nowhere.
    fn subscriber_missing(&self) -> bool {
        matches!(self.0, HandoverError::Logging(_))
    }

    fn exit_code(&self) -> u8 {
        match &self.0 {
            HandoverError::Lifecycle(e) => match e {
                LifecycleError::Listen(e) => Self::bind_exit_code(e),
                LifecycleError::Serve(e) => Self::serve_exit_code(e),
                LifecycleError::Shutdown(e) => Self::shutdown_exit_code(e),
                // the serve failure is what took the process down
                LifecycleError::ServeAndShutdown { serve, .. } => Self::serve_exit_code(serve),
            },
            HandoverError::Config(_) => sysexits::ExitCode::Config.into(),
            HandoverError::Logging(_) => sysexits::ExitCode::Config.into(),
            HandoverError::Signal(_) => sysexits::ExitCode::OsErr.into(),
        }
    }

    fn bind_exit_code(e: &BindError) -> u8 {
        match e.io().kind() {
            ErrorKind::PermissionDenied => sysexits::ExitCode::NoPerm.into(),
            ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable => {
                sysexits::ExitCode::Unavailable.into()
            }
            ErrorKind::InvalidInput => sysexits::ExitCode::Config.into(),
            _ => sysexits::ExitCode::OsErr.into(),
        }
    }

    fn serve_exit_code(e: &ServeError) -> u8 {
        match e {
            ServeError::Accept(_) => sysexits::ExitCode::IoErr.into(),
            ServeError::Panicked(_) => sysexits::ExitCode::Software.into(),
        }
    }

    fn shutdown_exit_code(e: &ShutdownError) -> u8 {
        match e {
            ShutdownError::Timeout { .. } => sysexits::ExitCode::TempFail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handover::logging::LoggingError;
    use std::io::Error;
    use std::time::Duration;

    fn bind_failure(kind: ErrorKind) -> HandoverExitCode {
        HandoverExitCode(HandoverError::Lifecycle(LifecycleError::Listen(
            BindError::Bind {
                addr: "0.0.0.0:80".into(),
                source: Error::from(kind),
            },
        )))
    }

    #[test]
    fn bind_failures_map_by_cause() {
        assert_eq!(bind_failure(ErrorKind::PermissionDenied).exit_code(), 77);
        assert_eq!(bind_failure(ErrorKind::AddrInUse).exit_code(), 69);
        assert_eq!(bind_failure(ErrorKind::InvalidInput).exit_code(), 78);
        assert_eq!(bind_failure(ErrorKind::Other).exit_code(), 71);
    }

    #[test]
    fn drain_timeout_is_temporary_failure() {
        let code = HandoverExitCode(HandoverError::Lifecycle(LifecycleError::Shutdown(
            ShutdownError::Timeout {
                timeout: Duration::from_secs(1),
                remaining: 2,
            },
        )));
        assert_eq!(code.exit_code(), 75);
    }

    #[test]
    fn accept_failure_wins_over_drain_timeout() {
        let code = HandoverExitCode(HandoverError::Lifecycle(LifecycleError::ServeAndShutdown {
            serve: ServeError::Accept(Error::from(ErrorKind::Other)),
            shutdown: ShutdownError::Timeout {
                timeout: Duration::from_secs(1),
                remaining: 1,
            },
        }));
        assert_eq!(code.exit_code(), 74);
    }

    #[test]
    fn logging_failure_goes_to_stderr() {
        let code = HandoverExitCode(HandoverError::Logging(LoggingError::Init(
            "a global default trace dispatcher has already been set".into(),
        )));
        assert!(code.subscriber_missing());
        assert_eq!(code.exit_code(), 78);

        let code = HandoverExitCode(HandoverError::Signal(Error::from(ErrorKind::Other)));
        assert!(!code.subscriber_missing());
    }
}
