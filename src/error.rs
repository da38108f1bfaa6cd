use thiserror::Error;

/// Failures a single event can end in. None of them is fatal to the process:
/// the handler boundary turns every variant into a reply.
#[derive(Debug, Error)]
pub(crate) enum BotError {
    #[error("no access credentials for this user")]
    Unauthorized,

    #[error("authorization was never started")]
    HandshakeNotStarted,

    #[error("access token exchange rejected: {0}")]
    HandshakeRejected(String),

    #[error("malformed callback token: {0}")]
    MalformedToken(String),

    #[error("catalog service failed: {0}")]
    RemoteService(String),

    #[error("credential store failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl BotError {
    pub(crate) fn user_message(&self) -> &'static str {
        match self {
            BotError::Unauthorized => {
                "You are not authorized yet. Use /authorize, open the link and press \"Done!\"."
            }
            BotError::HandshakeNotStarted => "Authorization error! Use /authorize first.",
            BotError::HandshakeRejected(_) => {
                "Authorization error! Open the link from /authorize, allow access and press \"Done!\" again."
            }
            BotError::MalformedToken(_) | BotError::RemoteService(_) | BotError::Storage(_) => {
                "Something went wrong. Please try again."
            }
        }
    }

    /// Handshake failures on a button press are shown as a toast only.
    pub(crate) fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            BotError::HandshakeNotStarted | BotError::HandshakeRejected(_)
        )
    }
}
