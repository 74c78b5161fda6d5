//! Registration commands sent from request handlers to the dispatch loop.

use super::ObserveToken;

/// Register/deregister command consumed exactly once by the dispatch loop.
#[derive(Debug, Clone)]
pub enum RegistrationSignal<C> {
    /// Start (or restart) an observation of `topic` under `token`.
    Register {
        /// Observation token.
        token: ObserveToken,
        /// Exact-match topic.
        topic: String,
        /// Peer the notifications go to.
        connection: C,
    },
    /// Stop the observation identified by `token`.
    Deregister {
        /// Observation token.
        token: ObserveToken,
    },
}

impl<C> RegistrationSignal<C> {
    /// Token the signal refers to.
    #[must_use]
    pub const fn token(&self) -> &ObserveToken {
        match self {
            Self::Register { token, .. } | Self::Deregister { token } => token,
        }
    }

    /// Returns `true` for [`RegistrationSignal::Register`].
    #[must_use]
    pub const fn is_register(&self) -> bool {
        matches!(self, Self::Register { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_shared_by_both_variants() {
        let register = RegistrationSignal::Register {
            token: ObserveToken::new(vec![1]),
            topic: "a".to_string(),
            connection: (),
        };
        let deregister: RegistrationSignal<()> = RegistrationSignal::Deregister {
            token: ObserveToken::new(vec![1]),
        };
        assert_eq!(register.token(), deregister.token());
        assert!(register.is_register());
        assert!(!deregister.is_register());
    }
}
