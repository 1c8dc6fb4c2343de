use serde::Serialize;
use std::fmt;

/// Connection liveness as seen by consumers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl Liveness {
    /// Allowed moves: `Disconnected -> Connecting -> Connected -> Disconnected`,
    /// plus `Connecting -> Disconnected` for a failed or cancelled attempt.
    pub fn can_transition_to(self, next: Liveness) -> bool {
        matches!(
            (self, next),
            (Liveness::Disconnected, Liveness::Connecting)
                | (Liveness::Connecting, Liveness::Connected)
                | (Liveness::Connecting, Liveness::Disconnected)
                | (Liveness::Connected, Liveness::Disconnected)
        )
    }

    pub fn is_connected(self) -> bool {
        self == Liveness::Connected
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Disconnected => write!(f, "disconnected"),
            Liveness::Connecting => write!(f, "connecting"),
            Liveness::Connected => write!(f, "connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_disconnected() {
        assert_eq!(Liveness::default(), Liveness::Disconnected);
        assert!(!Liveness::default().is_connected());
    }

    #[test]
    fn test_connecting_is_never_skipped() {
        assert!(!Liveness::Disconnected.can_transition_to(Liveness::Connected));
        assert!(!Liveness::Connected.can_transition_to(Liveness::Connecting));
    }

    #[test]
    fn test_valid_cycle() {
        assert!(Liveness::Disconnected.can_transition_to(Liveness::Connecting));
        assert!(Liveness::Connecting.can_transition_to(Liveness::Connected));
        assert!(Liveness::Connected.can_transition_to(Liveness::Disconnected));
        assert!(Liveness::Connecting.can_transition_to(Liveness::Disconnected));
    }

    #[test]
    fn test_display() {
        assert_eq!(Liveness::Connecting.to_string(), "connecting");
        assert_eq!(
            serde_json::to_string(&Liveness::Connected).unwrap(),
            "\"connected\""
        );
    }
}
