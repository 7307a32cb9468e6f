//! Authentication and group-authorization seams.
//!
//! Both callbacks may rewrite the peer list they are given and attach token
//! fields (`s`, `t`, `n`, `sp`) that the server verifies. The defaults pass
//! the list through untouched and attach no token.

use async_trait::async_trait;
use std::fmt;
use tether_protocol::SessionToken;
use thiserror::Error;

/// A refusal from an authentication callback.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct AuthError(pub String);

impl AuthError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result of authenticating a session or a watch request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthGrant {
    /// Peers the session may watch.
    pub watching_peer_ids: Vec<String>,
    pub token: SessionToken,
}

/// Signs session-open and watch requests.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authorize `peer_id` to watch `watching`. `sp` is the configured
    /// per-peer signature setting.
    async fn authenticate(
        &self,
        peer_id: &str,
        watching: &[String],
        sp: Option<bool>,
    ) -> Result<AuthGrant, AuthError>;
}

/// Room actions that require authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupAction {
    Join,
    Invite,
    Kick,
}

impl fmt::Display for GroupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GroupAction::Join => "join",
            GroupAction::Invite => "invite",
            GroupAction::Kick => "kick",
        })
    }
}

/// Result of authorizing a room action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupGrant {
    /// Peers the action may target.
    pub group_peer_ids: Vec<String>,
    pub token: SessionToken,
}

/// Signs room join/invite/kick requests.
#[async_trait]
pub trait GroupAuthorizer: Send + Sync {
    async fn authorize(
        &self,
        peer_id: &str,
        group_id: &str,
        action: GroupAction,
        group_peer_ids: &[String],
    ) -> Result<GroupGrant, AuthError>;
}

/// Default callbacks: grant exactly what was asked, with no token.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

#[async_trait]
impl Authenticator for Passthrough {
    async fn authenticate(
        &self,
        _peer_id: &str,
        watching: &[String],
        _sp: Option<bool>,
    ) -> Result<AuthGrant, AuthError> {
        Ok(AuthGrant {
            watching_peer_ids: watching.to_vec(),
            token: SessionToken::default(),
        })
    }
}

#[async_trait]
impl GroupAuthorizer for Passthrough {
    async fn authorize(
        &self,
        _peer_id: &str,
        _group_id: &str,
        _action: GroupAction,
        group_peer_ids: &[String],
    ) -> Result<GroupGrant, AuthError> {
        Ok(GroupGrant {
            group_peer_ids: group_peer_ids.to_vec(),
            token: SessionToken::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_grants_request() {
        let peers = vec!["a".to_string(), "b".to_string()];

        let grant = Authenticator::authenticate(&Passthrough, "me", &peers, Some(true))
            .await
            .unwrap();
        assert_eq!(grant.watching_peer_ids, peers);
        assert!(grant.token.is_empty());

        let grant = Passthrough
            .authorize("me", "room", GroupAction::Invite, &peers)
            .await
            .unwrap();
        assert_eq!(grant.group_peer_ids, peers);
        assert!(grant.token.is_empty());
    }

    #[test]
    fn test_group_action_display() {
        assert_eq!(GroupAction::Kick.to_string(), "kick");
    }
}
