//! Connection state machines for both transport endpoints.
//!
//! Transitions are driven in [`crate::client`] and [`crate::server`]; this
//! module only names the states and provides the wait primitive both
//! endpoints use to block on a state change.
//!
//! ```text
//!  Client:  CLOSED ──connect──▶ SYNSENT ──SYNACK──▶ CONNECTED
//!             ▲                    │ retries            │ disconnect
//!             ├────────────────────┘ exhausted          ▼
//!             └──────────FINACK / retries exhausted── FINWAIT
//!
//!  Server:  CLOSED ──accept──▶ LISTENING ──SYN──▶ CONNECTED
//!             ▲                                      │ FIN
//!             └────────── closewait timer ───── CLOSEWAIT
//! ```

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Closed,
    SynSent,
    Connected,
    FinWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    #[default]
    Closed,
    Listening,
    Connected,
    CloseWait,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::SynSent => "SYNSENT",
            Self::Connected => "CONNECTED",
            Self::FinWait => "FINWAIT",
        })
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Listening => "LISTENING",
            Self::Connected => "CONNECTED",
            Self::CloseWait => "CLOSEWAIT",
        })
    }
}

/// Wait until the watched value satisfies `pred`, for at most `limit`.
///
/// Returns the value that satisfied it, or `None` on timeout or when the
/// sender is gone.
pub async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, limit: Option<Duration>, pred: F) -> Option<T>
where
    T: Copy,
    F: FnMut(&T) -> bool,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, rx.wait_for(pred)).await {
            Ok(Ok(value)) => Some(*value),
            _ => None,
        },
        None => match rx.wait_for(pred).await {
            Ok(value) => Some(*value),
            Err(_) => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_closed() {
        assert_eq!(ClientState::default(), ClientState::Closed);
        assert_eq!(ServerState::default(), ServerState::Closed);
    }

    #[test]
    fn display_uses_protocol_names() {
        assert_eq!(ClientState::SynSent.to_string(), "SYNSENT");
        assert_eq!(ServerState::CloseWait.to_string(), "CLOSEWAIT");
    }

    #[tokio::test]
    async fn wait_until_sees_later_change() {
        let (tx, mut rx) = watch::channel(ClientState::SynSent);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send_replace(ClientState::Connected);
            // Keep the sender alive until the waiter has observed the value.
            tokio::time::sleep(Duration::from_millis(200)).await;
        });
        let seen = wait_until(&mut rx, Some(Duration::from_secs(1)), |s| *s != ClientState::SynSent).await;
        assert_eq!(seen, Some(ClientState::Connected));
    }

    #[tokio::test]
    async fn wait_until_times_out() {
        let (_tx, mut rx) = watch::channel(ServerState::Listening);
        let seen = wait_until(&mut rx, Some(Duration::from_millis(20)), |s| *s == ServerState::Connected).await;
        assert_eq!(seen, None);
    }
}
