use crate::net::{AcceptError, InputError, PacketError, WireError};
use crate::zone::BusError;

/// Coarse failure classes. Everything except `Fatal` is recoverable: it
/// is counted, logged, and surfaced to the responsible actor without
/// unwinding the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or stale packet.
    Protocol,
    /// Token or version mismatch.
    Auth,
    Rate,
    Capacity,
    Cheat,
    /// Impossible state transition, e.g. a migration event for an unknown
    /// entity.
    State,
    /// Migration or handshake deadline; drives state-machine recovery.
    Timeout,
    /// Session cache or combat log failure.
    External,
    /// Tick overrun, allocation failure; triggers graceful shutdown.
    Fatal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("connection rejected: {0:?}")]
    Accept(AcceptError),
    #[error("handoff token rejected for player {player_id}")]
    BadToken { player_id: u64 },
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("{what} timed out after {elapsed_ms} ms")]
    Timeout { what: &'static str, elapsed_ms: u64 },
    #[error("stale state: {0}")]
    StaleState(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Packet(_) | Error::Wire(_) => ErrorKind::Protocol,
            Error::Input(InputError::AngleOutOfRange)
            | Error::Input(InputError::ConflictingFlags(_)) => ErrorKind::Cheat,
            Error::Input(_) => ErrorKind::Protocol,
            Error::Accept(AcceptError::RateLimited) => ErrorKind::Rate,
            Error::Accept(_) => ErrorKind::Capacity,
            Error::BadToken { .. } => ErrorKind::Auth,
            Error::Bus(_) => ErrorKind::External,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::StaleState(_) => ErrorKind::State,
            Error::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Recoverable errors never unwind the tick.
    pub fn is_recoverable(&self) -> bool {
        self.kind() != ErrorKind::Fatal
    }
}

impl From<AcceptError> for Error {
    fn from(error: AcceptError) -> Self {
        Error::Accept(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_classify() {
        let err: Error = WireError::BadValue.into();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.is_recoverable());

        let err: Error = InputError::ConflictingFlags(0b11).into();
        assert_eq!(err.kind(), ErrorKind::Cheat);

        let err: Error = InputError::Duplicate(5).into();
        assert_eq!(err.kind(), ErrorKind::Protocol);

        let err: Error = AcceptError::ServerFull.into();
        assert_eq!(err.kind(), ErrorKind::Capacity);

        let err: Error = AcceptError::RateLimited.into();
        assert_eq!(err.kind(), ErrorKind::Rate);

        let err = Error::BadToken { player_id: 9 };
        assert_eq!(err.kind(), ErrorKind::Auth);

        let err = Error::Timeout {
            what: "migration sync",
            elapsed_ms: 3_100,
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err = Error::Fatal("tick overrun".into());
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(!err.is_recoverable());
    }
}
