use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_stream::stream;
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::auth::epoch::SessionEpoch;
use crate::auth::identity::{normalize_email, Identity, IdentityProvider, OAuthCredential, ProfileUpdate};
use crate::auth::profile::SessionBackend;
use crate::auth::reconcile::{Reconciler, SyncReport};
use crate::auth::storage::TokenStore;
use crate::auth::token::{BackendLink, SessionState, SessionToken, SyncIssue};
use crate::config::SessionConfig;
use crate::error::{errors, CampusResult};
use crate::events::{
    EventStream, EventStreamStats, SessionEvent, Subscriber, SESSION_EVENT_BUFFER_SIZE,
    SESSION_EVENT_CAPACITY,
};

/// State guarded by the single-writer lock
struct SessionCore {
    state: SessionState,
    epoch: SessionEpoch,
    /// First observer notification since `start` has been fully handled
    observer_settled: bool,
    /// Bumped on every `start`, so a released guard cannot touch a newer run
    observer_run: u64,
}

struct Shared {
    provider: Arc<dyn IdentityProvider>,
    reconciler: Reconciler,
    tokens: Arc<dyn TokenStore>,
    token_slot: String,
    core: Mutex<SessionCore>,
    /// Last committed state, for readers
    snapshot: RwLock<SessionState>,
    events: EventStream<SessionEvent>,
    in_flight: AtomicUsize,
    subscribed: AtomicBool,
    /// Emails an explicit operation is currently signing in; the observer leaves them alone
    explicit_emails: DashMap<String, usize>,
    /// Sequence of the most recently started explicit sign-in
    last_sign_in: AtomicU64,
}

impl Shared {
    /// Recompute derived fields, then publish the state if it changed
    async fn publish_state(&self, core: &mut SessionCore, issues: Vec<SyncIssue>) {
        core.state.loading = self.in_flight.load(Ordering::SeqCst) > 0
            || (core.state.started && !core.observer_settled);
        core.state.generation = core.epoch.generation();

        for issue in issues {
            self.events.publish(SessionEvent::issue(issue)).await;
        }

        let mut snapshot = self.snapshot.write().await;
        if *snapshot == core.state {
            return;
        }
        *snapshot = core.state.clone();
        drop(snapshot);

        trace!(
            phase = ?core.state.phase(),
            generation = core.state.generation,
            loading = core.state.loading,
            "Session state committed"
        );
        self.events
            .publish(SessionEvent::StateChanged {
                state: core.state.clone(),
            })
            .await;
    }

    async fn refresh(&self) {
        let mut core = self.core.lock().await;
        self.publish_state(&mut core, Vec::new()).await;
    }

    async fn generation(&self) -> u64 {
        self.core.lock().await.epoch.generation()
    }

    /// Commit a signed-in identity along with its role, persisting its token
    async fn apply_signed_in(&self, core: &mut SessionCore, identity: Identity, report: SyncReport) {
        let SyncReport {
            token,
            backend,
            role,
            mut issues,
        } = report;

        match token {
            Some(token) => match self.tokens.set(&self.token_slot, &token).await {
                Ok(()) => {
                    self.events
                        .publish(SessionEvent::TokenStored {
                            slot: self.token_slot.clone(),
                        })
                        .await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to persist session token");
                    issues.push(SyncIssue::TokenStorage { error: e });
                }
            },
            // never leave a previous identity's token behind
            None => issues.extend(self.clear_token().await),
        }

        core.state.identity = Some(identity);
        core.state.role = Some(role);
        core.state.backend = backend;
        core.state.issues = issues.clone();
        self.publish_state(core, issues).await;
    }

    /// Commit "no identity"; never touches the backend
    async fn apply_signed_out(&self, core: &mut SessionCore) {
        let issues: Vec<SyncIssue> = self.clear_token().await.into_iter().collect();
        core.state.identity = None;
        core.state.role = None;
        core.state.backend = BackendLink::Unlinked;
        core.state.issues = issues.clone();
        self.publish_state(core, issues).await;
    }

    async fn clear_token(&self) -> Option<SyncIssue> {
        match self.tokens.remove(&self.token_slot).await {
            Ok(()) => {
                self.events
                    .publish(SessionEvent::TokenCleared {
                        slot: self.token_slot.clone(),
                    })
                    .await;
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to clear session token");
                Some(SyncIssue::TokenStorage { error: e })
            }
        }
    }

    async fn discard_stale(&self, operation: &str, generation: u64) {
        debug!(operation, generation, "Discarding result of superseded generation");
        self.events
            .publish(SessionEvent::StaleResultDiscarded {
                operation: operation.to_string(),
                generation,
            })
            .await;
    }

    fn is_explicit(&self, identity: &Identity) -> bool {
        identity
            .email_key()
            .map_or(false, |key| self.explicit_emails.contains_key(&key))
    }

    /// Take a sequence number for a new explicit sign-in
    fn begin_sign_in(&self) -> u64 {
        self.last_sign_in.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn sign_in_started_after(&self, seq: u64) -> bool {
        self.last_sign_in.load(Ordering::SeqCst) > seq
    }

    /// Handle one observer notification to completion
    async fn on_identity(&self, identity: Option<Identity>) {
        // A newer notification is queued whenever the provider has moved on from this one
        let current = self.provider.current_identity().await;
        let notified_uid = identity.as_ref().map(|i| i.uid.as_str());
        if current.as_ref().map(|i| i.uid.as_str()) != notified_uid {
            debug!(uid = ?notified_uid, "Observer notification outdated, skipped");
            return;
        }

        let Some(identity) = identity else {
            let mut core = self.core.lock().await;
            let generation = core.epoch.advance(None);
            core.observer_settled = true;
            if core.state.identity.is_some() {
                info!(generation, "Provider reported sign-out");
            }
            self.apply_signed_out(&mut core).await;
            return;
        };

        if self.is_explicit(&identity) {
            debug!(uid = %identity.uid, "Identity is being signed in explicitly, observer skips sync");
            let mut core = self.core.lock().await;
            core.observer_settled = true;
            self.publish_state(&mut core, Vec::new()).await;
            return;
        }

        // Profile updates don't notify, so the queued copy may carry old display fields
        let identity = current.unwrap_or(identity);

        {
            let mut core = self.core.lock().await;
            let committed = core.state.identity.as_ref().map_or(false, |i| i.uid == identity.uid);
            if committed && core.epoch.target() == Some(identity.uid.as_str()) {
                debug!(uid = %identity.uid, "Identity already in session, observer skips sync");
                core.observer_settled = true;
                core.state.identity = Some(identity);
                self.publish_state(&mut core, Vec::new()).await;
                return;
            }
        }

        let generation = self.core.lock().await.epoch.advance(Some(&identity.uid));
        debug!(uid = %identity.uid, generation, "Observer syncing identity");
        let report = self.reconciler.sync(&identity).await;

        let mut core = self.core.lock().await;
        core.observer_settled = true;
        if core.epoch.is_current(generation) {
            info!(uid = %identity.uid, role = %report.role.role, "Observer committed identity");
            self.apply_signed_in(&mut core, identity, report).await;
        } else {
            self.publish_state(&mut core, Vec::new()).await;
            drop(core);
            self.discard_stale("observer", generation).await;
        }
    }

    /// Return the observer to its unsubscribed state, if `run` is still the current one
    async fn release_observer(&self, run: u64) {
        let mut core = self.core.lock().await;
        if core.observer_run != run {
            return;
        }
        core.observer_settled = true;
        core.state.started = false;
        self.publish_state(&mut core, Vec::new()).await;
    }
}

/// Counts an explicit operation as in flight for the `loading` flag
struct OperationTicket {
    shared: Arc<Shared>,
    finished: bool,
}

impl OperationTicket {
    async fn begin(shared: &Arc<Shared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        shared.refresh().await;
        Self {
            shared: Arc::clone(shared),
            finished: false,
        }
    }

    async fn finish(mut self) {
        self.finished = true;
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.shared.refresh().await;
    }
}

impl Drop for OperationTicket {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // operation future was dropped mid-flight
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = Arc::clone(&self.shared);
            handle.spawn(async move { shared.refresh().await });
        }
    }
}

/// Marks an email as owned by an explicit sign-in for its lifetime
struct ExplicitSignIn {
    shared: Arc<Shared>,
    key: String,
}

impl ExplicitSignIn {
    fn mark(shared: &Arc<Shared>, email: &str) -> Self {
        let key = normalize_email(email);
        *shared.explicit_emails.entry(key.clone()).or_insert(0) += 1;
        Self {
            shared: Arc::clone(shared),
            key,
        }
    }
}

impl Drop for ExplicitSignIn {
    fn drop(&mut self) {
        if let Some(mut count) = self.shared.explicit_emails.get_mut(&self.key) {
            *count = count.saturating_sub(1);
        }
        self.shared
            .explicit_emails
            .remove_if(&self.key, |_, count| *count == 0);
    }
}

/// Where an explicit sign-in started
#[derive(Debug, Clone, Copy)]
struct Attempt {
    /// Epoch generation at invocation
    started: u64,
    /// Sign-in sequence number
    seq: u64,
}

/// Read-only view of the session for consumers
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Last committed session state
    pub async fn state(&self) -> SessionState {
        self.shared.snapshot.read().await.clone()
    }

    pub fn subscribe(&self) -> Subscriber<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Stream of committed states, starting with the next change
    pub fn state_changes(&self) -> impl Stream<Item = SessionState> + Send + 'static {
        let mut subscriber = self.shared.events.subscribe();
        stream! {
            loop {
                match subscriber.recv().await {
                    Ok(SessionEvent::StateChanged { state }) => yield state,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session state stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Token currently held in the session slot
    pub async fn session_token(&self) -> CampusResult<Option<SessionToken>> {
        self.shared.tokens.get(&self.shared.token_slot).await
    }

    pub async fn event_stats(&self) -> EventStreamStats {
        self.shared.events.get_stats().await
    }
}

/// Scoped observer subscription; dropping it unsubscribes
pub struct SessionGuard {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
    run: u64,
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("run", &self.run)
            .field("active", &self.is_active())
            .finish()
    }
}

impl SessionGuard {
    pub fn is_active(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    /// Stop the observer and wait for it to wind down
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        self.shared.subscribed.store(false, Ordering::SeqCst);
        self.shared.release_observer(self.run).await;
        info!("Identity observer stopped");
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        self.shared.subscribed.store(false, Ordering::SeqCst);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let shared = Arc::clone(&self.shared);
            let run = self.run;
            handle.spawn(async move { shared.release_observer(run).await });
        }
        debug!("Identity observer dropped");
    }
}

/// Keeps session state in sync with the identity provider and the backend
#[derive(Clone)]
pub struct SessionSynchronizer {
    shared: Arc<Shared>,
}

impl SessionSynchronizer {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        backend: Arc<dyn SessionBackend>,
        tokens: Arc<dyn TokenStore>,
        config: &SessionConfig,
    ) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&provider), backend, config);
        let shared = Shared {
            provider,
            reconciler,
            tokens,
            token_slot: config.token_slot.clone(),
            core: Mutex::new(SessionCore {
                state: SessionState::default(),
                epoch: SessionEpoch::new(),
                observer_settled: false,
                observer_run: 0,
            }),
            snapshot: RwLock::new(SessionState::default()),
            events: EventStream::new(SESSION_EVENT_CAPACITY, SESSION_EVENT_BUFFER_SIZE),
            in_flight: AtomicUsize::new(0),
            subscribed: AtomicBool::new(false),
            explicit_emails: DashMap::new(),
            last_sign_in: AtomicU64::new(0),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.handle().state().await
    }

    pub fn subscribe(&self) -> Subscriber<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn state_changes(&self) -> impl Stream<Item = SessionState> + Send + 'static {
        self.handle().state_changes()
    }

    /// Subscribe to the provider's identity changes for the lifetime of the returned guard
    pub async fn start(&self) -> CampusResult<SessionGuard> {
        if self.shared.subscribed.swap(true, Ordering::SeqCst) {
            warn!("Identity observer already running");
            return Err(errors::already_subscribed());
        }

        let run = {
            let mut core = self.shared.core.lock().await;
            core.observer_run += 1;
            core.observer_settled = false;
            core.state.started = true;
            self.shared.publish_state(&mut core, Vec::new()).await;
            core.observer_run
        };

        let mut subscription = self.shared.provider.observe().await;
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            while let Some(identity) = subscription.next().await {
                shared.on_identity(identity).await;
            }
            debug!("Identity feed closed");
            let mut core = shared.core.lock().await;
            core.observer_settled = true;
            shared.publish_state(&mut core, Vec::new()).await;
        });

        info!(provider = self.shared.provider.name(), "Identity observer started");
        Ok(SessionGuard {
            shared: Arc::clone(&self.shared),
            task: Some(task),
            run,
        })
    }

    /// Register a new email/password identity and its student profile
    pub async fn create_identity(
        &self,
        email: &str,
        password: &str,
        name: &str,
        photo_url: Option<&str>,
    ) -> CampusResult<Identity> {
        let ticket = OperationTicket::begin(&self.shared).await;
        let attempt = Attempt {
            started: self.shared.generation().await,
            seq: self.shared.begin_sign_in(),
        };
        let explicit = ExplicitSignIn::mark(&self.shared, email);

        let result = self
            .run_create_identity(attempt, email, password, name, photo_url)
            .await;

        drop(explicit);
        ticket.finish().await;
        result
    }

    async fn run_create_identity(
        &self,
        attempt: Attempt,
        email: &str,
        password: &str,
        name: &str,
        photo_url: Option<&str>,
    ) -> CampusResult<Identity> {
        let provider = &self.shared.provider;
        let identity = provider.sign_up(email, password).await.map_err(|e| {
            warn!(error = %e, "Sign-up rejected");
            e
        })?;

        let update = ProfileUpdate {
            display_name: Some(name.to_string()),
            photo_url: photo_url.map(str::to_string),
        };
        let identity = match provider.update_profile(&identity, &update).await {
            Ok(updated) => updated,
            Err(e) => {
                warn!(uid = %identity.uid, error = %e, "Display fields not saved at provider");
                let mut local = identity;
                local.display_name = update.display_name;
                local.photo_url = update.photo_url.or(local.photo_url);
                local
            }
        };

        let profile_email = identity.email.clone().unwrap_or_else(|| email.to_string());
        let report = self
            .shared
            .reconciler
            .sync_registration(&identity, &profile_email, name, photo_url)
            .await;
        self.commit_explicit("create_identity", attempt, identity, report)
            .await
    }

    /// Sign in with email and password, reconciling the profile before returning
    pub async fn authenticate(&self, email: &str, password: &str) -> CampusResult<Identity> {
        let ticket = OperationTicket::begin(&self.shared).await;
        let attempt = Attempt {
            started: self.shared.generation().await,
            seq: self.shared.begin_sign_in(),
        };
        let explicit = ExplicitSignIn::mark(&self.shared, email);

        let result = async {
            let identity = self
                .shared
                .provider
                .sign_in(email, password)
                .await
                .map_err(|e| {
                    warn!(error = %e, "Sign-in rejected");
                    e
                })?;
            let report = self.shared.reconciler.sync(&identity).await;
            self.commit_explicit("authenticate", attempt, identity, report)
                .await
        }
        .await;

        drop(explicit);
        ticket.finish().await;
        result
    }

    /// Sign in with a credential from an external OAuth flow
    pub async fn authenticate_with_oauth(
        &self,
        credential: &OAuthCredential,
    ) -> CampusResult<Identity> {
        let ticket = OperationTicket::begin(&self.shared).await;
        let attempt = Attempt {
            started: self.shared.generation().await,
            seq: self.shared.begin_sign_in(),
        };

        let result = async {
            let identity = self
                .shared
                .provider
                .sign_in_with_oauth(credential)
                .await
                .map_err(|e| {
                    warn!(provider_id = %credential.provider_id, error = %e, "OAuth sign-in rejected");
                    e
                })?;
            let report = self.shared.reconciler.sync(&identity).await;
            self.commit_explicit("authenticate_with_oauth", attempt, identity, report)
                .await
        }
        .await;

        ticket.finish().await;
        result
    }

    /// Commit an explicit sign-in unless a sign-out happened since it started
    async fn commit_explicit(
        &self,
        operation: &str,
        attempt: Attempt,
        identity: Identity,
        report: SyncReport,
    ) -> CampusResult<Identity> {
        let mut core = self.shared.core.lock().await;
        if let Some(generation) = core.epoch.claim(attempt.started, &identity.uid) {
            // the commit answers the pending first notification
            core.observer_settled = true;
            info!(
                operation,
                uid = %identity.uid,
                role = %report.role.role,
                generation,
                "Identity signed in"
            );
            self.shared
                .apply_signed_in(&mut core, identity.clone(), report)
                .await;
            return Ok(identity);
        }

        let generation = core.epoch.generation();
        let committed_uid = core.state.identity.as_ref().map(|i| i.uid.clone());
        drop(core);
        self.shared.discard_stale(operation, generation).await;

        if self.shared.sign_in_started_after(attempt.seq) {
            // a newer sign-in owns the provider now
            return Err(errors::superseded(operation));
        }

        // The provider may still hold the identity this operation signed in
        let provider_uid = self.shared.provider.current_identity().await.map(|i| i.uid);
        if provider_uid.as_deref() == Some(identity.uid.as_str())
            && committed_uid.as_deref() != Some(identity.uid.as_str())
        {
            if let Err(e) = self.shared.provider.sign_out().await {
                warn!(uid = %identity.uid, error = %e, "Failed to sign out superseded identity");
            }
        }
        Err(errors::superseded(operation))
    }

    /// Change display fields of the current identity. `None` when nobody is signed in.
    pub async fn update_profile(&self, update: ProfileUpdate) -> CampusResult<Option<Identity>> {
        let current = self.shared.snapshot.read().await.identity.clone();
        let Some(current) = current else {
            debug!("No identity, profile update skipped");
            return Ok(None);
        };
        if update.is_empty() {
            return Ok(Some(current));
        }

        let updated = self.shared.provider.update_profile(&current, &update).await?;

        let mut core = self.shared.core.lock().await;
        let still_current = core
            .state
            .identity
            .as_ref()
            .map_or(false, |i| i.uid == updated.uid);
        if still_current {
            core.state.identity = Some(updated.clone());
            self.shared.publish_state(&mut core, Vec::new()).await;
        }
        Ok(Some(updated))
    }

    /// Clear the token and session state, then sign out at the provider
    pub async fn sign_out(&self) -> CampusResult<()> {
        let ticket = OperationTicket::begin(&self.shared).await;

        {
            let mut core = self.shared.core.lock().await;
            let generation = core.epoch.invalidate();
            self.shared.apply_signed_out(&mut core).await;
            info!(generation, "Session signed out");
        }

        let result = self.shared.provider.sign_out().await;
        if let Err(e) = &result {
            warn!(error = %e, "Provider sign-out failed");
        }

        ticket.finish().await;
        result
    }
}
