//! Scripted in-process network for tests and local client development.
//!
//! Each login replays a script of steps. No remote traffic happens; linking
//! "completes" when the script says so, and the resulting session is written
//! to the identity store like a real network connector would.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::LoginError;
use crate::identity::{IdentityStore, LinkedSession, LocalIdentity, LoginId};
use crate::network::{
    LoginCapable, LoginCompletion, LoginFlow, LoginHandle, LoginOptions, LoginStep,
    RemoteAddress, RemoteLogout, StatusReportable, UserInput,
};

/// Remote user linked by QR logins unless overridden.
pub const DEFAULT_REMOTE_USER: &str = "12345550123";
const DEFAULT_PLATFORM: &str = "android";

/// One scripted reaction to `start`, `submit_user_input` or `wait`.
#[derive(Debug, Clone)]
pub enum Scripted {
    Qr(String),
    PhoneNumberPrompt,
    PairingCode(String),
    Complete,
    Other(String),
    Fail(LoginError),
    /// Never resolves; only cancellation ends it.
    Pending,
    Delay(Duration, Box<Scripted>),
}

impl Scripted {
    pub fn delayed(delay: Duration, inner: Scripted) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Observations recorded across all logins of one [`MockNetwork`].
#[derive(Debug, Default)]
pub struct MockStats {
    submitted: Mutex<Vec<UserInput>>,
    timezones: Mutex<Vec<Option<String>>>,
    cancel_calls: AtomicUsize,
    effective_cancels: AtomicUsize,
    logins_created: AtomicUsize,
}

impl MockStats {
    pub fn submitted(&self) -> Vec<UserInput> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn timezones(&self) -> Vec<Option<String>> {
        self.timezones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every `cancel` call, including repeated ones.
    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Cancels that actually changed a login's state.
    pub fn effective_cancels(&self) -> usize {
        self.effective_cancels.load(Ordering::SeqCst)
    }

    pub fn logins_created(&self) -> usize {
        self.logins_created.load(Ordering::SeqCst)
    }
}

/// Connector that hands out [`ScriptedLogin`]s.
pub struct MockNetwork {
    store: Arc<dyn IdentityStore>,
    qr_script: Vec<Scripted>,
    phone_script: Vec<Scripted>,
    create_error: Option<LoginError>,
    create_delay: Option<Duration>,
    remote_user: String,
    next_device: Arc<AtomicU16>,
    stats: Arc<MockStats>,
}

impl MockNetwork {
    /// Network whose logins link immediately after the first step.
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self {
            store,
            qr_script: vec![Scripted::Qr(qr_payload()), Scripted::Complete],
            phone_script: vec![
                Scripted::PhoneNumberPrompt,
                Scripted::PairingCode(pairing_code()),
                Scripted::Complete,
            ],
            create_error: None,
            create_delay: None,
            remote_user: DEFAULT_REMOTE_USER.to_string(),
            next_device: Arc::new(AtomicU16::new(1)),
            stats: Arc::new(MockStats::default()),
        }
    }

    /// Network that behaves like a user who scans after `rotations` refreshes.
    pub fn development(store: Arc<dyn IdentityStore>, rotations: usize, interval: Duration) -> Self {
        let mut qr_script = vec![Scripted::Qr(qr_payload())];
        qr_script.extend(
            (0..rotations).map(|_| Scripted::delayed(interval, Scripted::Qr(qr_payload()))),
        );
        qr_script.push(Scripted::delayed(interval, Scripted::Complete));

        Self::new(store)
            .with_qr_script(qr_script)
            .with_phone_script(vec![
                Scripted::PhoneNumberPrompt,
                Scripted::PairingCode(pairing_code()),
                Scripted::delayed(interval, Scripted::Complete),
            ])
    }

    pub fn with_qr_script(mut self, script: Vec<Scripted>) -> Self {
        self.qr_script = script;
        self
    }

    pub fn with_phone_script(mut self, script: Vec<Scripted>) -> Self {
        self.phone_script = script;
        self
    }

    pub fn with_remote_user(mut self, user: impl Into<String>) -> Self {
        self.remote_user = user.into();
        self
    }

    pub fn failing_create(mut self, error: LoginError) -> Self {
        self.create_error = Some(error);
        self
    }

    /// Hold every `create_login` call for `delay` before answering.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl LoginCapable for MockNetwork {
    async fn create_login(
        &self,
        identity: &LocalIdentity,
        flow: LoginFlow,
        options: LoginOptions,
    ) -> Result<Box<dyn LoginHandle>, LoginError> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.create_error {
            return Err(err.clone());
        }
        self.stats
            .timezones
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(options.timezone);
        self.stats.logins_created.fetch_add(1, Ordering::SeqCst);

        let script = match flow {
            LoginFlow::Qr => self.qr_script.clone(),
            LoginFlow::PhoneCode => self.phone_script.clone(),
        };
        Ok(Box::new(ScriptedLogin {
            identity: identity.clone(),
            script: script.into(),
            store: Arc::clone(&self.store),
            remote_user: self.remote_user.clone(),
            next_device: Arc::clone(&self.next_device),
            stats: Arc::clone(&self.stats),
            cancelled: false,
        }))
    }
}

/// Login handle replaying a script.
pub struct ScriptedLogin {
    identity: LocalIdentity,
    script: VecDeque<Scripted>,
    store: Arc<dyn IdentityStore>,
    remote_user: String,
    next_device: Arc<AtomicU16>,
    stats: Arc<MockStats>,
    cancelled: bool,
}

impl ScriptedLogin {
    async fn advance(&mut self) -> Result<LoginStep, LoginError> {
        if self.cancelled {
            return Err(LoginError::Cancelled);
        }
        let mut next = self.script.pop_front().unwrap_or(Scripted::Pending);
        loop {
            match next {
                Scripted::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    next = *inner;
                }
                Scripted::Pending => return std::future::pending().await,
                Scripted::Qr(data) => {
                    return Ok(LoginStep::Qr {
                        data,
                        display_seconds: None,
                    });
                }
                Scripted::PhoneNumberPrompt => return Ok(LoginStep::PhoneNumberPrompt),
                Scripted::PairingCode(data) => {
                    return Ok(LoginStep::PairingCode {
                        data,
                        display_seconds: Some(180),
                    });
                }
                Scripted::Other(step_id) => return Ok(LoginStep::Other { step_id }),
                Scripted::Fail(err) => return Err(err),
                Scripted::Complete => return self.complete().await,
            }
        }
    }

    async fn complete(&mut self) -> Result<LoginStep, LoginError> {
        let device = self.next_device.fetch_add(1, Ordering::SeqCst);
        let address = RemoteAddress::new(self.remote_user.clone()).with_device(device);
        let session = LinkedSession::new(LoginId::new(self.remote_user.clone()), self.identity.clone());
        self.store
            .insert_login(session.clone())
            .await
            .map_err(|e| LoginError::Failed(format!("failed to save login: {e}")))?;

        let client = MockClient::linked(self.remote_user.clone()).with_device(device);
        Ok(LoginStep::Complete(Box::new(LoginCompletion {
            session,
            address,
            platform: DEFAULT_PLATFORM.to_string(),
            client: Arc::new(client),
        })))
    }
}

#[async_trait]
impl LoginHandle for ScriptedLogin {
    async fn start(&mut self) -> Result<LoginStep, LoginError> {
        self.advance().await
    }

    async fn submit_user_input(&mut self, input: UserInput) -> Result<LoginStep, LoginError> {
        let UserInput::PhoneNumber(number) = &input;
        self.remote_user = number.clone();
        self.stats
            .submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(input);
        self.advance().await
    }

    async fn wait(&mut self) -> Result<LoginStep, LoginError> {
        self.advance().await
    }

    async fn cancel(&mut self) {
        self.stats.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if !self.cancelled {
            self.cancelled = true;
            self.script.clear();
            self.stats.effective_cancels.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Live client for an account linked through the mock network.
#[derive(Debug)]
pub struct MockClient {
    has_session: AtomicBool,
    logged_in: AtomicBool,
    connected: AtomicBool,
    address: RemoteAddress,
    platform: Mutex<Option<String>>,
    logout_calls: AtomicUsize,
}

impl MockClient {
    /// Authenticated and connected client for `user`.
    pub fn linked(user: impl Into<String>) -> Self {
        Self {
            has_session: AtomicBool::new(true),
            logged_in: AtomicBool::new(true),
            connected: AtomicBool::new(true),
            address: RemoteAddress::new(user),
            platform: Mutex::new(Some(DEFAULT_PLATFORM.to_string())),
            logout_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_device(mut self, device: u16) -> Self {
        self.address = self.address.with_device(device);
        self
    }

    pub fn with_platform(self, platform: Option<&str>) -> Self {
        *self.platform.lock().unwrap_or_else(PoisonError::into_inner) =
            platform.map(str::to_string);
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

impl StatusReportable for MockClient {
    fn has_session(&self) -> bool {
        self.has_session.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn address(&self) -> Option<RemoteAddress> {
        self.has_session().then(|| self.address.clone())
    }

    fn platform(&self) -> Option<String> {
        self.platform
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RemoteLogout for MockClient {
    async fn logout_remote(&self) -> Result<(), LoginError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.has_session.store(false, Ordering::SeqCst);
        self.logged_in.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn qr_payload() -> String {
    format!("2@{}", Uuid::new_v4().simple())
}

fn pairing_code() -> String {
    let raw = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{}-{}", &raw[..4], &raw[4..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InMemoryIdentityStore;

    fn network() -> (Arc<InMemoryIdentityStore>, MockNetwork) {
        let store = Arc::new(InMemoryIdentityStore::new());
        let network = MockNetwork::new(store.clone());
        (store, network)
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (_store, network) = network();
        let stats = network.stats();
        let mut login = network
            .create_login(&LocalIdentity::new("@a:x"), LoginFlow::Qr, LoginOptions::default())
            .await
            .unwrap();

        login.cancel().await;
        login.cancel().await;

        assert_eq!(stats.cancel_calls(), 2);
        assert_eq!(stats.effective_cancels(), 1);
        assert!(matches!(login.wait().await, Err(LoginError::Cancelled)));
    }

    #[tokio::test]
    async fn test_complete_persists_session() {
        let (store, network) = network();
        let identity = LocalIdentity::new("@a:x");
        let mut login = network
            .create_login(&identity, LoginFlow::Qr, LoginOptions::default())
            .await
            .unwrap();

        assert!(matches!(login.start().await.unwrap(), LoginStep::Qr { .. }));
        let LoginStep::Complete(done) = login.wait().await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(done.session.id, LoginId::new(DEFAULT_REMOTE_USER));
        assert_eq!(store.list_logins(&identity).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_development_script_rotates_then_completes() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let network = MockNetwork::development(store, 2, Duration::from_secs(20));
        let mut login = network
            .create_login(&LocalIdentity::new("@a:x"), LoginFlow::Qr, LoginOptions::default())
            .await
            .unwrap();

        assert_eq!(login.start().await.unwrap().id(), "qr");
        assert_eq!(login.wait().await.unwrap().id(), "qr");
        assert_eq!(login.wait().await.unwrap().id(), "qr");
        assert_eq!(login.wait().await.unwrap().id(), "complete");
    }

    #[test]
    fn test_pairing_code_shape() {
        let code = pairing_code();
        assert_eq!(code.len(), 9);
        assert_eq!(code.as_bytes()[4], b'-');
    }
}
