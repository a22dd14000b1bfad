use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::auth::identity::{normalize_email, Identity, IdentityProvider};
use crate::auth::profile::{NewProfile, SessionBackend};
use crate::auth::token::{BackendLink, ResolvedRole, Role, SessionToken, SyncIssue};
use crate::config::SessionConfig;
use crate::error::{errors, CampusResult};

/// Outcome of syncing one identity with the backend. Never an error: failures
/// are carried as issues next to the fallback values.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub token: Option<SessionToken>,
    pub backend: BackendLink,
    pub role: ResolvedRole,
    pub issues: Vec<SyncIssue>,
}

/// Backend session exchange and profile reconciliation for a single identity
pub struct Reconciler {
    provider: Arc<dyn IdentityProvider>,
    backend: Arc<dyn SessionBackend>,
    default_role: Role,
    placeholder_name: String,
    /// Lookup-then-create must not interleave between concurrent syncs
    reconcile_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        backend: Arc<dyn SessionBackend>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            provider,
            backend,
            default_role: Role::from(config.default_role.as_str()),
            placeholder_name: config.placeholder_name.clone(),
            reconcile_lock: Mutex::new(()),
        }
    }

    pub fn default_role(&self) -> &Role {
        &self.default_role
    }

    /// Trade the provider's proof-of-identity for a backend session token
    #[instrument(skip(self, identity), fields(uid = %identity.uid))]
    pub async fn exchange(&self, identity: &Identity) -> CampusResult<SessionToken> {
        let id_token = self
            .provider
            .proof_of_identity(identity)
            .await
            .map_err(|e| errors::backend_exchange_failed(format!("proof of identity: {}", e)))?;
        let token = self.backend.exchange_token(&id_token).await?;
        debug!("Backend session token issued");
        Ok(token)
    }

    /// Look up the profile for `identity`, creating it when missing or incomplete
    #[instrument(skip(self, identity), fields(uid = %identity.uid))]
    pub async fn reconcile_profile(&self, identity: &Identity) -> CampusResult<ResolvedRole> {
        let email = identity
            .email
            .as_deref()
            .ok_or_else(|| errors::profile_lookup_failed("", "identity has no email"))?;

        let _guard = self.reconcile_lock.lock().await;

        let existing = self.backend.fetch_profile(email).await?;
        if let Some(profile) = existing.as_ref().filter(|p| p.is_complete()) {
            let role = profile
                .role_str()
                .map(Role::from)
                .unwrap_or_else(|| self.default_role.clone());
            debug!(role = %role, "Existing profile adopted");
            return Ok(ResolvedRole::confirmed(role));
        }

        let new_profile = NewProfile {
            uid: identity.uid.clone(),
            name: identity
                .display_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .or_else(|| existing.as_ref().and_then(|p| p.name.clone()))
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| self.placeholder_name.clone()),
            email: email.to_string(),
            photo_url: identity
                .photo_url
                .clone()
                .or_else(|| existing.as_ref().and_then(|p| p.photo_url.clone())),
            role: existing
                .as_ref()
                .and_then(|p| p.role_str())
                .map(str::to_string)
                .unwrap_or_else(|| self.default_role.as_str().to_string()),
        };

        self.backend.create_profile(&new_profile).await?;
        info!(email = %normalize_email(email), role = %new_profile.role, "Profile created");
        Ok(ResolvedRole::created(Role::from(new_profile.role.as_str())))
    }

    /// Create the profile of a freshly registered identity, role fixed to student
    #[instrument(skip(self, identity), fields(uid = %identity.uid))]
    pub async fn register_profile(
        &self,
        identity: &Identity,
        email: &str,
        name: &str,
        photo_url: Option<&str>,
    ) -> CampusResult<ResolvedRole> {
        let _guard = self.reconcile_lock.lock().await;

        let new_profile = NewProfile {
            uid: identity.uid.clone(),
            name: name.to_string(),
            email: email.to_string(),
            photo_url: photo_url.map(str::to_string),
            role: Role::Student.as_str().to_string(),
        };
        self.backend.create_profile(&new_profile).await?;
        info!(email = %normalize_email(email), "Profile registered");
        Ok(ResolvedRole::created(Role::Student))
    }

    /// Exchange then reconcile, recording failures instead of returning them
    pub async fn sync(&self, identity: &Identity) -> SyncReport {
        let mut report = self.exchange_step(identity).await;

        if identity.email.is_none() {
            warn!(uid = %identity.uid, "Identity has no email, applying default role");
            report.issues.push(SyncIssue::MissingEmail {
                uid: identity.uid.clone(),
                fallback: self.default_role.clone(),
            });
            return report;
        }

        match self.reconcile_profile(identity).await {
            Ok(role) => report.role = role,
            Err(e) => {
                warn!(uid = %identity.uid, error = %e, "Profile reconciliation failed, applying default role");
                report.issues.push(SyncIssue::Reconciliation {
                    email: identity.email.clone().unwrap_or_default(),
                    fallback: self.default_role.clone(),
                    error: e,
                });
            }
        }
        report
    }

    /// Exchange then register a new profile, for freshly created identities
    pub async fn sync_registration(
        &self,
        identity: &Identity,
        email: &str,
        name: &str,
        photo_url: Option<&str>,
    ) -> SyncReport {
        let mut report = self.exchange_step(identity).await;

        match self.register_profile(identity, email, name, photo_url).await {
            Ok(role) => report.role = role,
            Err(e) => {
                warn!(uid = %identity.uid, error = %e, "Profile registration failed, applying default role");
                report.role = ResolvedRole::defaulted(Role::Student);
                report.issues.push(SyncIssue::Reconciliation {
                    email: email.to_string(),
                    fallback: Role::Student,
                    error: e,
                });
            }
        }
        report
    }

    async fn exchange_step(&self, identity: &Identity) -> SyncReport {
        let mut report = SyncReport {
            token: None,
            backend: BackendLink::Unlinked,
            role: ResolvedRole::defaulted(self.default_role.clone()),
            issues: Vec::new(),
        };

        match self.exchange(identity).await {
            Ok(token) => {
                report.token = Some(token);
                report.backend = BackendLink::Linked;
            }
            Err(e) => {
                warn!(uid = %identity.uid, error = %e, "Backend session exchange failed");
                report.backend = BackendLink::Failed {
                    reason: e.to_string(),
                };
                report.issues.push(SyncIssue::BackendExchange {
                    uid: identity.uid.clone(),
                    error: e,
                });
            }
        }
        report
    }
}
