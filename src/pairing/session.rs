//! Pairing session controller.
//!
//! Drives one linking attempt from channel open to a single terminal frame.
//! The controller task is the only writer on the channel; closure detection
//! happens elsewhere and reaches this module solely through the
//! [`CancellationToken`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{
    ChannelError, LoginError, PairingError, PairingStage, StoreError, UnexpectedAt,
};
use crate::identity::{LocalIdentity, LoginId};
use crate::network::{
    LoginCapable, LoginCompletion, LoginFlow, LoginHandle, LoginOptions, LoginStep, UserInput,
};
use crate::pairing::frames::{
    self, INITIAL_QR_TIMEOUT_SECS, PAIRING_CODE_TIMEOUT_SECS, REFRESH_QR_TIMEOUT_SECS,
    ServerFrame,
};
use crate::pairing::phone;
use crate::pairing::supervisor::{CompletionSupervisor, SupersedeReport};
use crate::registry::SessionRegistry;

/// Destination for protocol frames. Writes happen from one task only.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: &ServerFrame) -> Result<(), ChannelError>;
}

#[async_trait]
impl FrameSink for mpsc::Sender<ServerFrame> {
    async fn send_frame(&mut self, frame: &ServerFrame) -> Result<(), ChannelError> {
        self.send(frame.clone())
            .await
            .map_err(|_| ChannelError::Disconnected {
                name: "login".to_string(),
                reason: "frame receiver dropped".to_string(),
            })
    }
}

/// Parameters supplied by the client when it opens the channel.
#[derive(Debug, Clone)]
pub struct PairingRequest {
    pub identity: LocalIdentity,
    /// Raw phone number; selects the pairing-code flow when present.
    pub phone_number: Option<String>,
    pub timezone: Option<String>,
}

impl PairingRequest {
    pub fn qr(identity: LocalIdentity) -> Self {
        Self {
            identity,
            phone_number: None,
            timezone: None,
        }
    }

    pub fn phone(identity: LocalIdentity, phone_number: impl Into<String>) -> Self {
        Self {
            identity,
            phone_number: Some(phone_number.into()),
            timezone: None,
        }
    }
}

/// How a pairing session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    Linked {
        login: LoginId,
        /// Whether the success frame reached the channel.
        delivered: bool,
        /// Detached supersession pass for older logins.
        supersession: JoinHandle<Result<SupersedeReport, StoreError>>,
    },
    Failed(PairingError),
}

impl SessionOutcome {
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Linked { .. })
    }
}

/// Shared entry point that runs pairing sessions.
#[derive(Clone)]
pub struct PairingController {
    connector: Arc<dyn LoginCapable>,
    registry: Arc<SessionRegistry>,
    supervisor: CompletionSupervisor,
}

impl PairingController {
    pub fn new(
        connector: Arc<dyn LoginCapable>,
        registry: Arc<SessionRegistry>,
        supervisor: CompletionSupervisor,
    ) -> Self {
        Self {
            connector,
            registry,
            supervisor,
        }
    }

    /// Run one session to completion.
    ///
    /// Exactly one terminal frame is written unless `cancel` fires first, in
    /// which case nothing further is written.
    pub async fn run<S: FrameSink>(
        &self,
        request: PairingRequest,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> SessionOutcome {
        let _pairing = self.registry.begin_pairing();
        let identity = request.identity.clone();

        match self.drive(request, sink, &cancel).await {
            Ok(done) => self.finish(identity, done, sink, &cancel).await,
            Err(err) => {
                if err.is_reportable() {
                    tracing::warn!(identity = %identity, "Pairing failed: {}", err);
                } else if let PairingError::Transport(_) = err {
                    tracing::warn!(identity = %identity, "Login channel failed: {}", err);
                } else {
                    tracing::debug!(identity = %identity, "Pairing ended by client: {}", err);
                }
                if let Some(frame) = frames::encode_error(&err)
                    && let Err(e) = send_until_cancelled(&cancel, sink, &frame).await
                {
                    tracing::debug!(identity = %identity, "Error frame not delivered: {}", e);
                }
                SessionOutcome::Failed(err)
            }
        }
    }

    async fn drive<S: FrameSink>(
        &self,
        request: PairingRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<LoginCompletion, PairingError> {
        let phone_number = request
            .phone_number
            .as_deref()
            .map(phone::normalize)
            .transpose()?;
        let flow = match phone_number {
            Some(_) => LoginFlow::PhoneCode,
            None => LoginFlow::Qr,
        };
        tracing::debug!(identity = %request.identity, flow = %flow, "Starting pairing");

        let options = LoginOptions {
            timezone: request.timezone,
        };
        let handle = until_cancelled(
            cancel,
            self.connector
                .create_login(&request.identity, flow, options),
        )
        .await?
        .map_err(|source| remote_failure(cancel, PairingStage::Create, source))?;

        let mut session = PairingSession {
            identity: request.identity,
            flow,
            handle,
            cancel: cancel.clone(),
        };
        let result = session.run(phone_number, sink).await;
        if result.is_err() {
            session.handle.cancel().await;
        }
        result
    }

    async fn finish<S: FrameSink>(
        &self,
        identity: LocalIdentity,
        done: LoginCompletion,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> SessionOutcome {
        let login = done.session.id.clone();
        self.registry
            .register_client(identity.clone(), login.clone(), Arc::clone(&done.client))
            .await;

        let delivered = match send_until_cancelled(cancel, sink, &frames::success_frame(&done)).await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(identity = %identity, login = %login, "Success frame not delivered: {}", e);
                false
            }
        };
        tracing::info!(
            identity = %identity,
            login = %login,
            jid = %done.address,
            "Remote account linked"
        );

        let supersession = self.supervisor.spawn(identity, login.clone());
        SessionOutcome::Linked {
            login,
            delivered,
            supersession,
        }
    }
}

/// State owned by one linking attempt.
struct PairingSession {
    identity: LocalIdentity,
    flow: LoginFlow,
    handle: Box<dyn LoginHandle>,
    cancel: CancellationToken,
}

impl PairingSession {
    async fn run<S: FrameSink>(
        &mut self,
        phone_number: Option<String>,
        sink: &mut S,
    ) -> Result<LoginCompletion, PairingError> {
        let step = remote_step(&self.cancel, PairingStage::Start, self.handle.start()).await?;

        match phone_number {
            Some(number) => {
                if !matches!(step, LoginStep::PhoneNumberPrompt) {
                    return Err(unexpected(UnexpectedAt::PhoneStart, &step));
                }
                let step = remote_step(
                    &self.cancel,
                    PairingStage::SubmitPhoneNumber,
                    self.handle
                        .submit_user_input(UserInput::PhoneNumber(number)),
                )
                .await?;
                if !matches!(step, LoginStep::PairingCode { .. }) {
                    return Err(unexpected(UnexpectedAt::PhoneSubmitted, &step));
                }
                self.emit(sink, &step, PAIRING_CODE_TIMEOUT_SECS).await?;
            }
            None => {
                if !matches!(step, LoginStep::Qr { .. }) {
                    return Err(unexpected(UnexpectedAt::QrStart, &step));
                }
                self.emit(sink, &step, INITIAL_QR_TIMEOUT_SECS).await?;
            }
        }

        loop {
            let step = remote_step(&self.cancel, PairingStage::Wait, self.handle.wait()).await?;
            match step {
                LoginStep::Qr { .. } => {
                    self.emit(sink, &step, REFRESH_QR_TIMEOUT_SECS).await?;
                }
                LoginStep::Complete(done) => return Ok(*done),
                other => return Err(unexpected(UnexpectedAt::Waiting, &other)),
            }
        }
    }

    async fn emit<S: FrameSink>(
        &self,
        sink: &mut S,
        step: &LoginStep,
        timeout: u64,
    ) -> Result<(), PairingError> {
        tracing::debug!(
            identity = %self.identity,
            flow = %self.flow,
            step = step.id(),
            timeout,
            "Sending login step"
        );
        match frames::encode_step(step, timeout) {
            Some(frame) => send_until_cancelled(&self.cancel, sink, &frame).await,
            None => Ok(()),
        }
    }
}

fn unexpected(at: UnexpectedAt, step: &LoginStep) -> PairingError {
    PairingError::UnexpectedStep {
        at,
        step: step.id().to_string(),
    }
}

fn remote_failure(cancel: &CancellationToken, stage: PairingStage, source: LoginError) -> PairingError {
    if cancel.is_cancelled() {
        PairingError::Cancelled
    } else {
        PairingError::Remote { stage, source }
    }
}

/// Race `fut` against cancellation, preferring cancellation.
async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, PairingError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PairingError::Cancelled),
        output = fut => Ok(output),
    }
}

async fn remote_step<F>(
    cancel: &CancellationToken,
    stage: PairingStage,
    fut: F,
) -> Result<LoginStep, PairingError>
where
    F: Future<Output = Result<LoginStep, LoginError>>,
{
    until_cancelled(cancel, fut)
        .await?
        .map_err(|source| remote_failure(cancel, stage, source))
}

async fn send_until_cancelled<S: FrameSink>(
    cancel: &CancellationToken,
    sink: &mut S,
    frame: &ServerFrame,
) -> Result<(), PairingError> {
    until_cancelled(cancel, sink.send_frame(frame))
        .await?
        .map_err(PairingError::from)
}
