use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::error::CampusResult;

/// Capacity of the identity change channel
const IDENTITY_FEED_CAPACITY: usize = 32;

/// The authenticated principal as known to the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Provider-assigned unique identifier
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>, email: Option<String>) -> Self {
        Self {
            uid: uid.into(),
            email,
            display_name: None,
            photo_url: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }

    /// Email normalised for comparisons
    pub fn email_key(&self) -> Option<String> {
        self.email.as_deref().map(normalize_email)
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Display fields that can be changed at the identity provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.photo_url.is_none()
    }
}

/// Credential produced by an external OAuth flow (e.g. a Google popup)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCredential {
    /// Provider id, e.g. `google.com`
    pub provider_id: String,
    pub id_token: Option<String>,
    pub access_token: Option<String>,
}

impl OAuthCredential {
    pub fn google_id_token(id_token: impl Into<String>) -> Self {
        Self {
            provider_id: "google.com".to_string(),
            id_token: Some(id_token.into()),
            access_token: None,
        }
    }
}

/// Capability set consumed from the identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    /// Create a new email/password identity and sign it in
    async fn sign_up(&self, email: &str, password: &str) -> CampusResult<Identity>;

    /// Sign in with email and password
    async fn sign_in(&self, email: &str, password: &str) -> CampusResult<Identity>;

    /// Sign in with a credential from an OAuth flow
    async fn sign_in_with_oauth(&self, credential: &OAuthCredential) -> CampusResult<Identity>;

    /// Sign the current identity out
    async fn sign_out(&self) -> CampusResult<()>;

    /// Change display fields, returning the updated identity
    async fn update_profile(
        &self,
        identity: &Identity,
        update: &ProfileUpdate,
    ) -> CampusResult<Identity>;

    /// Proof-of-identity token bound to the given identity
    async fn proof_of_identity(&self, identity: &Identity) -> CampusResult<String>;

    /// Identity the provider currently holds, if any
    async fn current_identity(&self) -> Option<Identity>;

    /// Subscribe to identity changes; the first item is the current identity
    async fn observe(&self) -> IdentitySubscription;
}

/// Current identity plus a fan-out of its changes
pub struct IdentityFeed {
    current: RwLock<Option<Identity>>,
    sender: broadcast::Sender<Option<Identity>>,
}

impl IdentityFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(IDENTITY_FEED_CAPACITY);
        Self {
            current: RwLock::new(None),
            sender,
        }
    }

    /// Replace the current identity and notify subscribers
    pub async fn publish(&self, identity: Option<Identity>) {
        let mut current = self.current.write().await;
        *current = identity.clone();
        let uid = identity.as_ref().map(|i| i.uid.clone());
        // No subscribers is fine; the value is kept as current
        let receivers = self.sender.send(identity).unwrap_or(0);
        debug!(uid = ?uid, receivers, "Identity change published");
    }

    /// Swap in new display fields for the current identity without notifying
    pub async fn replace_current(&self, identity: Identity) -> bool {
        let mut current = self.current.write().await;
        match current.as_ref() {
            Some(existing) if existing.uid == identity.uid => {
                *current = Some(identity);
                true
            }
            _ => false,
        }
    }

    pub async fn current(&self) -> Option<Identity> {
        self.current.read().await.clone()
    }

    /// Subscribe, snapshotting the current identity atomically with the subscription
    pub async fn subscribe(&self) -> IdentitySubscription {
        let current = self.current.read().await;
        IdentitySubscription {
            initial: Some(current.clone()),
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for IdentityFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription handle; dropping it unsubscribes
pub struct IdentitySubscription {
    initial: Option<Option<Identity>>,
    receiver: broadcast::Receiver<Option<Identity>>,
}

impl IdentitySubscription {
    /// Next identity notification, or `None` once the provider is gone
    pub async fn next(&mut self) -> Option<Option<Identity>> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.receiver.recv().await {
                Ok(identity) => return Some(identity),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Identity observer lagged, older notifications skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
