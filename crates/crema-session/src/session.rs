//! Session management with single-flight token refresh and an explicit
//! state machine.
//!
//! The FSM tracks flow and transient states (logging in, awaiting a
//! passcode, refreshing, logging out) that are never persisted. The session
//! record lives in memory in a [`SessionCell`] and is mirrored to the
//! [`SessionStore`] on every change.

use crate::api::{self, OtpVerification, UserProfile};
use crate::auth_fsm::{
    SessionMachine, SessionMachineInput, SessionMachineState, SessionState, SessionStateChanged,
};
use crate::cell::SessionCell;
use crate::flow::PendingFlow;
use crate::password::validate_password;
use crate::settings::ClientSettings;
use async_trait::async_trait;
use crema_exceptions::{ApiResult, AppException, ExceptionDispatcher, ExceptionKind};
use crema_pipeline::{
    bearer, AccessTokenSource, AuthorizationStage, Headers, Method, Pipeline, PipelineConfig,
    RefreshOnUnauthorizedStage, RequestLogStage, ResponseLogStage, SessionHandle,
    TrailingSlashStage, Transport, AUTHORIZATION,
};
use crema_storage::{SessionRecord, SessionStore, TokenBundle};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Callback type for session state change notifications.
pub type StateCallback = Box<dyn Fn(SessionStateChanged) + Send + Sync>;

/// Moves the user to the login screen.
pub trait Navigator: Send + Sync {
    fn show_login(&self);
}

/// Everything a [`SessionManager`] is built from.
pub struct SessionManagerConfig {
    pub settings: ClientSettings,
    pub transport: Arc<dyn Transport>,
    pub store: SessionStore,
    pub dispatcher: Option<Arc<ExceptionDispatcher>>,
    pub navigator: Option<Arc<dyn Navigator>>,
}

type RefreshFuture = Shared<BoxFuture<'static, ApiResult<TokenBundle>>>;

struct Inner {
    settings: ClientSettings,
    transport: Arc<dyn Transport>,
    /// Auth endpoints; no refresh stage, so refresh cannot recurse.
    auth_api: Pipeline,
    /// Authenticated account endpoints, refreshed on 401.
    account_api: Pipeline,
    store: SessionStore,
    cell: Arc<SessionCell>,
    fsm: Mutex<SessionMachine>,
    flow: Mutex<Option<PendingFlow>>,
    refresh_in_flight: Mutex<Option<RefreshFuture>>,
    dispatcher: Option<Arc<ExceptionDispatcher>>,
    navigator: Option<Arc<dyn Navigator>>,
    state_callback: Mutex<Option<StateCallback>>,
}

/// Owns the session lifecycle.
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

/// Session handle for the manager's own pipelines, which must not keep
/// the manager alive.
struct WeakSession(Weak<Inner>);

impl AccessTokenSource for WeakSession {
    fn current_access_token(&self) -> Option<String> {
        self.0.upgrade()?.cell.current_access_token()
    }
}

#[async_trait]
impl SessionHandle for WeakSession {
    async fn refresh(&self) -> ApiResult<()> {
        let inner = self
            .0
            .upgrade()
            .ok_or_else(|| AppException::invalid_state("Session manager is gone"))?;
        inner.refresh_shared().await.map(|_| ())
    }

    async fn logout(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.logout().await;
        }
    }
}

fn base_pipeline_config(
    settings: &ClientSettings,
    tokens: Arc<dyn AccessTokenSource>,
) -> PipelineConfig {
    PipelineConfig::with_defaults(settings.base_url.clone(), &settings.language)
        .request_stage(Arc::new(AuthorizationStage::new(tokens)))
        .request_stage(Arc::new(TrailingSlashStage))
        .request_stage(Arc::new(RequestLogStage))
        .response_stage(Arc::new(ResponseLogStage))
}

fn json_body<T: Serialize>(body: &T) -> ApiResult<Value> {
    serde_json::to_value(body).map_err(|e| {
        AppException::invalid_input("Request could not be encoded").with_detail(e.to_string())
    })
}

fn required<'a>(value: &'a str, field: &str) -> ApiResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppException::invalid_input(format!("{} is required", field)));
    }
    Ok(value)
}

fn required_email(email: &str) -> ApiResult<&str> {
    let email = required(email, "Email")?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AppException::invalid_input("Email address is not valid")),
    }
}

fn not_signed_in() -> AppException {
    AppException::unauthorized("You are not signed in")
}

fn session_expired() -> AppException {
    AppException::unauthorized("Session expired, please sign in again")
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig) -> Self {
        let SessionManagerConfig {
            settings,
            transport,
            store,
            dispatcher,
            navigator,
        } = config;

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let cell = Arc::new(SessionCell::new());

            let auth_api = Pipeline::new(
                base_pipeline_config(&settings, cell.clone()),
                transport.clone(),
            );

            let handle: Arc<dyn SessionHandle> = Arc::new(WeakSession(weak.clone()));
            let account_api = Pipeline::new(
                base_pipeline_config(&settings, cell.clone()).response_stage(Arc::new(
                    RefreshOnUnauthorizedStage::new(handle, settings.session_expired_code.clone()),
                )),
                transport.clone(),
            );

            Inner {
                settings,
                transport,
                auth_api,
                account_api,
                store,
                cell,
                fsm: Mutex::new(SessionMachine::new()),
                flow: Mutex::new(None),
                refresh_in_flight: Mutex::new(None),
                dispatcher,
                navigator,
                state_callback: Mutex::new(None),
            }
        });

        Self { inner }
    }

    /// Set a callback to be notified of session state changes.
    pub fn set_state_callback(&self, callback: StateCallback) {
        *self.inner.state_callback.lock() = Some(callback);
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Snapshot of the in-memory session.
    pub fn current_session(&self) -> Option<SessionRecord> {
        self.inner.cell.get()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state().is_authenticated() && self.inner.cell.is_present()
    }

    pub fn pending_flow(&self) -> Option<PendingFlow> {
        self.inner.flow.lock().clone()
    }

    /// Adopt a stored session on startup.
    ///
    /// Returns true when a refreshable session was restored. A stored
    /// session that can no longer be refreshed is cleared.
    pub fn restore(&self) -> bool {
        self.inner.restore()
    }

    /// Sign in with email and password.
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<SessionRecord> {
        let result = self.inner.login(email, password).await;
        self.inner.surface(result)
    }

    /// Create an account; a passcode is emailed to confirm it.
    pub async fn register(&self, email: &str, password: &str, display_name: &str) -> ApiResult<()> {
        let result = self.inner.register(email, password, display_name).await;
        self.inner.surface(result)
    }

    /// Confirm the emailed passcode of the open registration or reset flow.
    ///
    /// Registration ends in Anonymous (sign-in still required); password
    /// reset moves on to AwaitingNewPassword.
    pub async fn confirm_one_time_passcode(&self, code: &str) -> ApiResult<SessionState> {
        let result = self.inner.confirm_one_time_passcode(code).await;
        self.inner.surface(result)
    }

    /// Confirm the registration passcode and sign in with one call.
    pub async fn confirm_one_time_passcode_and_login(&self, code: &str) -> ApiResult<SessionRecord> {
        let result = self.inner.confirm_one_time_passcode_and_login(code).await;
        self.inner.surface(result)
    }

    pub async fn request_password_reset(&self, email: &str) -> ApiResult<()> {
        let result = self.inner.request_password_reset(email).await;
        self.inner.surface(result)
    }

    pub async fn complete_password_reset(&self, new_password: &str) -> ApiResult<()> {
        let result = self.inner.complete_password_reset(new_password).await;
        self.inner.surface(result)
    }

    /// Change the signed-in user's password.
    pub async fn change_password(&self, current: &str, new_password: &str) -> ApiResult<()> {
        let result = self.inner.change_password(current, new_password).await;
        self.inner.surface(result)
    }

    /// Refresh the token bundle. Concurrent callers share one round trip.
    pub async fn refresh(&self) -> ApiResult<TokenBundle> {
        let result = self.inner.refresh_shared().await;
        self.inner.surface(result)
    }

    /// End the session. Local state is cleared even if the server call fails.
    pub async fn logout(&self) {
        self.inner.logout().await;
    }

    /// Fetch the profile and merge it into the session.
    pub async fn fetch_profile(&self) -> ApiResult<UserProfile> {
        let result = self.inner.fetch_profile().await;
        self.inner.surface(result)
    }

    /// Abandon an open registration or password-reset flow.
    pub fn cancel_pending_flow(&self) -> ApiResult<()> {
        let result = self.inner.cancel_pending_flow();
        self.inner.surface(result)
    }

    /// Re-enter a flow saved by an earlier process.
    pub fn resume_flow(&self, flow: PendingFlow) -> ApiResult<()> {
        let result = self.inner.resume_flow(flow);
        self.inner.surface(result)
    }

    /// Pipeline config for business endpoints, bound to this session.
    ///
    /// Callers may append their own stages before building.
    pub fn authorized_pipeline_config(&self) -> PipelineConfig {
        let handle: Arc<dyn SessionHandle> = Arc::new(self.clone());
        base_pipeline_config(&self.inner.settings, self.inner.cell.clone()).response_stage(
            Arc::new(RefreshOnUnauthorizedStage::new(
                handle,
                self.inner.settings.session_expired_code.clone(),
            )),
        )
    }

    /// Pipeline for business endpoints, reporting to the dispatcher.
    pub fn authorized_pipeline(&self) -> Pipeline {
        let pipeline = Pipeline::new(
            self.authorized_pipeline_config(),
            self.inner.transport.clone(),
        );
        match &self.inner.dispatcher {
            Some(dispatcher) => pipeline.with_dispatcher(dispatcher.clone()),
            None => pipeline,
        }
    }
}

impl AccessTokenSource for SessionManager {
    fn current_access_token(&self) -> Option<String> {
        self.inner.cell.current_access_token()
    }
}

#[async_trait]
impl SessionHandle for SessionManager {
    async fn refresh(&self) -> ApiResult<()> {
        self.inner.refresh_shared().await.map(|_| ())
    }

    async fn logout(&self) {
        self.inner.logout().await;
    }
}

impl Inner {
    fn state(&self) -> SessionState {
        SessionState::from(self.fsm.lock().state())
    }

    fn invalid_transition(input: &SessionMachineInput, state: &SessionMachineState) -> AppException {
        AppException::invalid_state("This action is not available right now")
            .with_detail(format!("Cannot apply {:?} in state {:?}", input, state))
    }

    /// Fail unless `input` is accepted in the current state.
    fn ensure_can(&self, input: &SessionMachineInput) -> ApiResult<()> {
        let state = self.fsm.lock().state().clone();
        let mut probe = SessionMachine::from_state(state.clone());
        probe
            .consume(input)
            .map(|_| ())
            .map_err(|_| Self::invalid_transition(input, &state))
    }

    /// Transition the FSM and notify observers if the state changed.
    fn transition(&self, input: SessionMachineInput) -> ApiResult<SessionState> {
        let (old_state, new_state) = {
            let mut fsm = self.fsm.lock();
            let old_state = SessionState::from(fsm.state());
            fsm.consume(&input)
                .map_err(|_| Self::invalid_transition(&input, fsm.state()))?;
            (old_state, SessionState::from(fsm.state()))
        };

        self.after_transition(old_state, new_state);
        Ok(new_state)
    }

    /// Transition where a concurrent logout may already have moved on.
    fn try_transition(&self, input: SessionMachineInput) {
        if let Err(e) = self.transition(input) {
            debug!(detail = e.detail().unwrap_or_default(), "transition skipped");
        }
    }

    fn after_transition(&self, old_state: SessionState, new_state: SessionState) {
        if old_state == new_state {
            return;
        }

        debug!(old_state = ?old_state, new_state = ?new_state, "Session state transition");
        self.notify_state_change(new_state);

        let left_session = matches!(
            old_state,
            SessionState::Authenticated | SessionState::Refreshing | SessionState::LoggingOut
        );
        if new_state == SessionState::Anonymous && left_session {
            if let Some(navigator) = &self.navigator {
                navigator.show_login();
            }
        }
    }

    /// Force the machine back to Anonymous from any state.
    fn force_anonymous(&self) {
        match self.state() {
            SessionState::Anonymous => {}
            SessionState::Authenticated | SessionState::Refreshing => {
                self.try_transition(SessionMachineInput::LogoutRequested);
                self.try_transition(SessionMachineInput::LogoutComplete);
            }
            SessionState::LoggingOut => {
                self.try_transition(SessionMachineInput::LogoutComplete);
            }
            _ => {
                let old_state = {
                    let mut fsm = self.fsm.lock();
                    let old_state = SessionState::from(fsm.state());
                    *fsm = SessionMachine::new();
                    old_state
                };
                self.after_transition(old_state, SessionState::Anonymous);
            }
        }
    }

    fn notify_state_change(&self, state: SessionState) {
        let callback = self.state_callback.lock();
        if let Some(callback) = callback.as_ref() {
            let record = self.cell.get();
            callback(SessionStateChanged {
                state,
                user_id: record.as_ref().map(|r| r.user_id.clone()),
                email: record.map(|r| r.email),
            });
        }
    }

    fn report(&self, exception: &AppException) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.report(exception);
        }
    }

    /// Report a failed result to the dispatcher and hand it back.
    fn surface<T>(&self, result: ApiResult<T>) -> ApiResult<T> {
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    fn persist(&self, record: &SessionRecord) {
        if let Err(e) = self.store.save(record) {
            let exception = AppException::from(e);
            warn!(user_id = %record.user_id, error = ?exception.detail(), "Failed to persist session");
            self.report(&exception);
        }
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            let exception = AppException::from(e);
            warn!(error = ?exception.detail(), "Failed to clear stored session");
            self.report(&exception);
        }
    }

    /// Adopt `record` as the current session, in memory and in the store.
    fn establish(&self, record: &SessionRecord) {
        self.cell.set(record.clone());
        self.persist(record);
    }

    fn end_session_locally(&self) {
        self.cell.take();
        self.clear_store();
        *self.flow.lock() = None;
        self.force_anonymous();
    }

    fn restore(&self) -> bool {
        if self.cell.is_present() {
            return true;
        }

        let Some(record) = self.store.load() else {
            info!("No stored session found");
            return false;
        };

        if !record.token.is_refreshable() {
            info!(user_id = %record.user_id, "Stored session can no longer be refreshed, clearing");
            self.clear_store();
            return false;
        }

        let user_id = record.user_id.clone();
        self.cell.set(record);
        match self.transition(SessionMachineInput::SessionRestored) {
            Ok(_) => {
                info!(user_id = %user_id, "Session restored");
                true
            }
            Err(e) => {
                self.cell.take();
                self.report(&e);
                false
            }
        }
    }

    async fn login(&self, email: &str, password: &str) -> ApiResult<SessionRecord> {
        let email = required_email(email)?;
        if password.is_empty() {
            return Err(AppException::invalid_input("Password is required"));
        }

        self.transition(SessionMachineInput::LoginAttempt)?;
        *self.flow.lock() = None;

        let body = json_body(&api::LoginRequest { email, password })?;
        match self.auth_api.post::<SessionRecord>(api::LOGIN, body).await {
            Ok(record) => self.complete_sign_in(record, SessionMachineInput::LoginSuccess),
            Err(e) => {
                warn!(kind = e.kind().name(), "Login failed");
                self.try_transition(SessionMachineInput::LoginFailed);
                Err(e)
            }
        }
    }

    fn complete_sign_in(
        &self,
        record: SessionRecord,
        input: SessionMachineInput,
    ) -> ApiResult<SessionRecord> {
        self.establish(&record);
        if let Err(e) = self.transition(input) {
            // Logged out while the request was in flight.
            self.cell.take();
            self.clear_store();
            return Err(e);
        }
        *self.flow.lock() = None;
        info!(user_id = %record.user_id, "Signed in");
        Ok(record)
    }

    async fn register(&self, email: &str, password: &str, display_name: &str) -> ApiResult<()> {
        let email = required_email(email)?;
        let display_name = required(display_name, "Display name")?;
        validate_password(password)?;
        self.ensure_can(&SessionMachineInput::RegisterAccepted)?;

        let body = json_body(&api::RegisterRequest {
            email,
            password,
            display_name,
        })?;
        self.auth_api.post::<Value>(api::REGISTER, body).await?;

        self.transition(SessionMachineInput::RegisterAccepted)?;
        *self.flow.lock() = Some(PendingFlow::Registration {
            email: email.to_string(),
        });
        info!("Registration accepted, awaiting passcode");
        Ok(())
    }

    async fn confirm_one_time_passcode(&self, code: &str) -> ApiResult<SessionState> {
        let code = required(code, "Passcode")?;
        let flow = self.pending_flow()?;
        self.ensure_can(&SessionMachineInput::PasscodeConfirmed)?;

        let email = match &flow {
            PendingFlow::Registration { email } | PendingFlow::PasswordReset { email } => {
                email.clone()
            }
            PendingFlow::NewPassword { .. } => {
                return Err(AppException::invalid_state(
                    "Passcode already confirmed, choose a new password",
                ))
            }
        };

        let body = json_body(&api::OtpRequest {
            email: &email,
            code,
        })?;
        let verification = self
            .auth_api
            .post::<Option<OtpVerification>>(api::VERIFY_OTP, body)
            .await?
            .unwrap_or_default();

        let state = self.transition(SessionMachineInput::PasscodeConfirmed)?;
        *self.flow.lock() = match flow {
            PendingFlow::PasswordReset { email } => Some(PendingFlow::NewPassword {
                email,
                code: code.to_string(),
                reset_token: verification.reset_token,
            }),
            _ => None,
        };
        info!(state = ?state, "Passcode confirmed");
        Ok(state)
    }

    async fn confirm_one_time_passcode_and_login(&self, code: &str) -> ApiResult<SessionRecord> {
        let code = required(code, "Passcode")?;
        let email = match self.pending_flow()? {
            PendingFlow::Registration { email } => email,
            _ => {
                return Err(AppException::invalid_state(
                    "No registration is awaiting confirmation",
                ))
            }
        };
        self.ensure_can(&SessionMachineInput::PasscodeLoginSuccess)?;

        let body = json_body(&api::OtpRequest {
            email: &email,
            code,
        })?;
        let record = self
            .auth_api
            .post::<SessionRecord>(api::VERIFY_OTP_AND_LOGIN, body)
            .await?;
        self.complete_sign_in(record, SessionMachineInput::PasscodeLoginSuccess)
    }

    async fn request_password_reset(&self, email: &str) -> ApiResult<()> {
        let email = required_email(email)?;
        self.ensure_can(&SessionMachineInput::ResetRequested)?;

        let body = json_body(&api::ForgotPasswordRequest { email })?;
        self.auth_api.post::<Value>(api::FORGOT_PASSWORD, body).await?;

        self.transition(SessionMachineInput::ResetRequested)?;
        *self.flow.lock() = Some(PendingFlow::PasswordReset {
            email: email.to_string(),
        });
        info!("Password reset requested, awaiting passcode");
        Ok(())
    }

    async fn complete_password_reset(&self, new_password: &str) -> ApiResult<()> {
        validate_password(new_password)?;
        let (email, code, reset_token) = match self.pending_flow()? {
            PendingFlow::NewPassword {
                email,
                code,
                reset_token,
            } => (email, code, reset_token),
            _ => {
                return Err(AppException::invalid_state(
                    "Confirm the passcode before choosing a new password",
                ))
            }
        };
        self.ensure_can(&SessionMachineInput::ResetCompleted)?;

        let body = json_body(&api::ResetForgottenPasswordRequest {
            email: &email,
            code: &code,
            new_password,
            reset_token: reset_token.as_deref(),
        })?;
        self.auth_api
            .post::<Value>(api::RESET_FORGOTTEN_PASSWORD, body)
            .await?;

        self.transition(SessionMachineInput::ResetCompleted)?;
        *self.flow.lock() = None;
        info!("Password reset completed");
        Ok(())
    }

    async fn change_password(&self, current: &str, new_password: &str) -> ApiResult<()> {
        if !self.state().is_authenticated() || !self.cell.is_present() {
            return Err(not_signed_in());
        }
        if current.is_empty() {
            return Err(AppException::invalid_input("Current password is required"));
        }
        validate_password(new_password)?;
        if current == new_password {
            return Err(AppException::invalid_input(
                "New password must differ from the current one",
            ));
        }

        let body = json_body(&api::ChangePasswordRequest {
            current_password: current,
            new_password,
        })?;
        self.account_api
            .post::<Value>(api::CHANGE_PASSWORD, body)
            .await?;
        info!("Password changed");
        Ok(())
    }

    async fn fetch_profile(&self) -> ApiResult<UserProfile> {
        if !self.cell.is_present() {
            return Err(not_signed_in());
        }

        let profile: UserProfile = self.account_api.get(api::PROFILE).await?;
        let updated = self.cell.update(|record| {
            if record.user_id == profile.user_id {
                record.email = profile.email.clone();
                record.display_name = profile.display_name.clone();
                record.roles = profile.roles.clone();
                record.is_premium = profile.is_premium;
            }
        });
        if let Some(record) = updated {
            self.persist(&record);
        }
        Ok(profile)
    }

    fn pending_flow(&self) -> ApiResult<PendingFlow> {
        self.flow
            .lock()
            .clone()
            .ok_or_else(|| AppException::invalid_state("No registration or password reset is in progress"))
    }

    fn cancel_pending_flow(&self) -> ApiResult<()> {
        if self.state().is_awaiting() {
            self.transition(SessionMachineInput::FlowCancelled)?;
        }
        *self.flow.lock() = None;
        Ok(())
    }

    fn resume_flow(&self, flow: PendingFlow) -> ApiResult<()> {
        if self.state() != SessionState::Anonymous {
            return Err(AppException::invalid_state(
                "A flow can only be resumed while signed out",
            ));
        }

        let inputs: &[SessionMachineInput] = match &flow {
            PendingFlow::Registration { .. } => &[SessionMachineInput::RegisterAccepted],
            PendingFlow::PasswordReset { .. } => &[SessionMachineInput::ResetRequested],
            PendingFlow::NewPassword { .. } => &[
                SessionMachineInput::ResetRequested,
                SessionMachineInput::PasscodeConfirmed,
            ],
        };
        for input in inputs {
            self.transition(input.clone())?;
        }

        debug!(flow = ?flow, "Flow resumed");
        *self.flow.lock() = Some(flow);
        Ok(())
    }

    /// Join the in-flight refresh, or start one.
    fn refresh_shared(self: &Arc<Self>) -> RefreshFuture {
        let mut slot = self.refresh_in_flight.lock();
        if let Some(in_flight) = slot.as_ref() {
            debug!("Joining in-flight refresh");
            return in_flight.clone();
        }

        let inner = Arc::clone(self);
        let refresh = async move {
            let result = inner.perform_refresh().await;
            *inner.refresh_in_flight.lock() = None;
            result
        }
        .boxed()
        .shared();

        *slot = Some(refresh.clone());
        refresh
    }

    async fn perform_refresh(&self) -> ApiResult<TokenBundle> {
        let record = self.cell.get().ok_or_else(not_signed_in)?;

        if !record.token.is_refreshable() {
            warn!(user_id = %record.user_id, "Refresh token expired, signing out");
            self.end_session_locally();
            return Err(session_expired());
        }

        self.transition(SessionMachineInput::TokenStale)?;

        let body = json_body(&api::RefreshRequest {
            refresh_token: &record.token.refresh_token,
            client_id: &record.token.client_id,
        })?;
        let refresh = &self.settings.refresh;
        let mut attempt = 0;

        loop {
            match self
                .auth_api
                .post::<TokenBundle>(api::REFRESH_TOKEN, body.clone())
                .await
            {
                Ok(token) => {
                    let Some(updated) = self.cell.replace_token(&record.user_id, token.clone())
                    else {
                        info!("Session ended while refreshing, discarding new tokens");
                        return Err(not_signed_in());
                    };
                    self.persist(&updated);
                    self.try_transition(SessionMachineInput::RefreshSuccess);
                    info!(user_id = %record.user_id, "Token refreshed successfully");
                    return Ok(token);
                }
                Err(e) if e.is_transient() && attempt + 1 < refresh.max_retries => {
                    self.try_transition(SessionMachineInput::RefreshRetry);
                    let delay = refresh.delay_for_attempt(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max_retries = refresh.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Refresh failed with transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if Self::rejects_credentials(&e) => {
                    warn!(kind = e.kind().name(), "Refresh rejected, clearing session");
                    self.cell.take();
                    self.clear_store();
                    *self.flow.lock() = None;
                    self.try_transition(SessionMachineInput::RefreshFailed);
                    return Err(e);
                }
                Err(e) => {
                    warn!(kind = e.kind().name(), "Refresh failed, keeping session");
                    self.try_transition(SessionMachineInput::RefreshAborted);
                    return Err(e);
                }
            }
        }
    }

    /// A 4xx answer to the refresh call means the credentials are dead.
    fn rejects_credentials(e: &AppException) -> bool {
        match e.kind() {
            ExceptionKind::ApiFailure { status, .. } => (400..500).contains(status),
            ExceptionKind::UnauthorizedAccess => true,
            _ => false,
        }
    }

    async fn logout(&self) {
        let record = self.cell.take();
        self.clear_store();
        *self.flow.lock() = None;
        self.force_anonymous();

        let Some(record) = record else {
            debug!("Logout without a session");
            return;
        };
        info!(user_id = %record.user_id, "Signed out locally");

        let headers = Headers::new().with(AUTHORIZATION, bearer(&record.token.access_token));
        let result = match json_body(&api::LogoutRequest {
            refresh_token: &record.token.refresh_token,
        }) {
            Ok(body) => {
                self.auth_api
                    .execute::<Value>(Method::POST, api::LOGOUT, Some(body), Some(&headers))
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(kind = e.kind().name(), "Remote logout failed");
            self.report(&e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_fsm::RefreshConfig;
    use chrono::{Duration as ChronoDuration, Utc};
    use crema_exceptions::PresentationSink;
    use crema_pipeline::{ErrorResult, HttpRequest, HttpResponse, ResponseEnvelope, ScriptedTransport};
    use crema_storage::{MemoryStorage, SecureStorage, StorageKeys};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use url::Url;

    const EXPIRED: &str = "Business.SessionExpired.Error";

    fn token_json(access: &str, refresh_in: ChronoDuration) -> Value {
        let now = Utc::now();
        json!({
            "accessToken": access,
            "refreshToken": format!("refresh-for-{}", access),
            "accessExpiry": (now + ChronoDuration::minutes(15)).to_rfc3339(),
            "refreshExpiry": (now + refresh_in).to_rfc3339(),
            "clientId": "client-1"
        })
    }

    fn record_json(access: &str) -> Value {
        json!({
            "userId": "user-1",
            "email": "a@b.com",
            "displayName": "Ada",
            "roles": ["member"],
            "isPremium": false,
            "token": token_json(access, ChronoDuration::days(7))
        })
    }

    fn ok(data: Value) -> ApiResult<HttpResponse> {
        Ok(HttpResponse::json(
            200,
            &serde_json::to_value(ResponseEnvelope::success(200, data)).unwrap(),
        ))
    }

    fn fail(status: u16, code: &str) -> ApiResult<HttpResponse> {
        Ok(HttpResponse::json(
            status,
            &serde_json::to_value(ResponseEnvelope::<Value>::failure(ErrorResult::new(
                status, code, "rejected",
            )))
            .unwrap(),
        ))
    }

    fn body_of(request: &HttpRequest) -> Value {
        serde_json::from_slice(request.body.as_deref().unwrap_or(&b"null"[..])).unwrap()
    }

    fn path_is(request: &HttpRequest, path: &str) -> bool {
        request.url.path() == format!("/api/v1/{}", path)
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(String, String)>>);

    impl PresentationSink for RecordingSink {
        fn present(&self, title: &str, message: &str) {
            self.0.lock().push((title.to_string(), message.to_string()));
        }
    }

    #[derive(Default)]
    struct CountingNavigator(AtomicUsize);

    impl Navigator for CountingNavigator {
        fn show_login(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        manager: SessionManager,
        transport: Arc<ScriptedTransport>,
        storage: MemoryStorage,
        dispatcher: Arc<ExceptionDispatcher>,
        navigator: Arc<CountingNavigator>,
    }

    impl Harness {
        fn store(&self) -> SessionStore {
            SessionStore::new(Box::new(self.storage.clone()))
        }
    }

    fn harness_with(transport: ScriptedTransport, storage: MemoryStorage) -> Harness {
        let transport = Arc::new(transport);
        let dispatcher = Arc::new(ExceptionDispatcher::new(Arc::new(RecordingSink::default())));
        let navigator = Arc::new(CountingNavigator::default());
        let settings = ClientSettings::new(Url::parse("https://api.crema.app/api/v1/").unwrap())
            .with_refresh(RefreshConfig {
                max_retries: 3,
                initial_delay_ms: 1,
                max_delay_ms: 5,
            });

        let manager = SessionManager::new(SessionManagerConfig {
            settings,
            transport: transport.clone(),
            store: SessionStore::new(Box::new(storage.clone())),
            dispatcher: Some(dispatcher.clone()),
            navigator: Some(navigator.clone()),
        });

        Harness {
            manager,
            transport,
            storage,
            dispatcher,
            navigator,
        }
    }

    fn harness<F>(handler: F) -> Harness
    where
        F: Fn(&HttpRequest) -> ApiResult<HttpResponse> + Send + Sync + 'static,
    {
        harness_with(ScriptedTransport::new(handler), MemoryStorage::new())
    }

    /// Backend that signs in, refreshes to `access-2`, and serves the profile
    /// only to the refreshed token.
    fn backend(request: &HttpRequest) -> ApiResult<HttpResponse> {
        if path_is(request, api::LOGIN) {
            ok(record_json("access-1"))
        } else if path_is(request, api::REFRESH_TOKEN) {
            ok(token_json("access-2", ChronoDuration::days(7)))
        } else if path_is(request, api::PROFILE) {
            if request.bearer_token() == Some("access-2") {
                ok(json!({
                    "userId": "user-1",
                    "email": "a@b.com",
                    "displayName": "Ada Lovelace",
                    "roles": ["member", "roaster"],
                    "isPremium": true
                }))
            } else {
                fail(401, "Auth.TokenInvalid")
            }
        } else {
            ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_login_then_logout() {
        let h = harness(backend);

        let record = h.manager.login("a@b.com", "Passw0rd!").await.unwrap();

        assert_eq!(record.user_id, "user-1");
        assert_eq!(h.manager.state(), SessionState::Authenticated);
        assert!(h.manager.is_authenticated());
        assert_eq!(h.store().load(), Some(record.clone()));
        let login = &h.transport.requests()[0];
        assert_eq!(body_of(login), json!({"email": "a@b.com", "password": "Passw0rd!"}));
        assert!(login.bearer_token().is_none());

        h.manager.logout().await;

        assert_eq!(h.manager.state(), SessionState::Anonymous);
        assert!(h.storage.is_empty());
        assert_eq!(h.store().load(), None);
        assert_eq!(h.navigator.0.load(Ordering::SeqCst), 1);

        let logout = h.transport.requests().pop().unwrap();
        assert!(path_is(&logout, api::LOGOUT));
        assert_eq!(logout.bearer_token(), Some("access-1"));
        assert_eq!(body_of(&logout)["refreshToken"], "refresh-for-access-1");
    }

    #[tokio::test]
    async fn test_failed_login_stays_anonymous_and_reports() {
        let h = harness(|_| fail(401, "Business.InvalidCredentials.Error"));

        let err = h.manager.login("a@b.com", "Wrong-pass1").await.unwrap_err();

        assert_eq!(err.status_code(), Some(401));
        assert_eq!(h.manager.state(), SessionState::Anonymous);
        assert!(h.storage.is_empty());
        assert_eq!(h.dispatcher.pending().map(|e| e.id()), Some(err.id()));
        assert_eq!(h.navigator.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_login_validates_input_before_network() {
        let h = harness(backend);

        let err = h.manager.login("not-an-email", "Passw0rd!").await.unwrap_err();
        assert_eq!(err.kind(), &ExceptionKind::InvalidInput);
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_login_when_signed_in_is_invalid_state() {
        let h = harness(backend);
        h.manager.login("a@b.com", "Passw0rd!").await.unwrap();

        let err = h.manager.login("a@b.com", "Passw0rd!").await.unwrap_err();
        assert_eq!(err.kind(), &ExceptionKind::InvalidState);
        assert_eq!(h.transport.count(api::LOGIN), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_weak_password_without_network() {
        let h = harness(backend);

        let err = h
            .manager
            .register("a@b.com", "password", "Ada")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), &ExceptionKind::InvalidInput);
        assert!(h.transport.requests().is_empty());
        assert_eq!(h.manager.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_registration_confirmed_with_login() {
        let h = harness(|request| {
            if path_is(request, api::VERIFY_OTP_AND_LOGIN) {
                ok(record_json("access-1"))
            } else {
                ok(Value::Null)
            }
        });

        h.manager.register("a@b.com", "Passw0rd!", "Ada").await.unwrap();
        assert_eq!(
            h.manager.state(),
            SessionState::AwaitingRegistrationConfirmation
        );
        assert_eq!(
            h.manager.pending_flow(),
            Some(PendingFlow::Registration {
                email: "a@b.com".to_string()
            })
        );
        assert_eq!(
            body_of(&h.transport.requests()[0]),
            json!({"email": "a@b.com", "password": "Passw0rd!", "displayName": "Ada"})
        );

        let record = h
            .manager
            .confirm_one_time_passcode_and_login("123456")
            .await
            .unwrap();

        assert_eq!(record.email, "a@b.com");
        assert_eq!(h.manager.state(), SessionState::Authenticated);
        assert_eq!(h.manager.pending_flow(), None);
        assert!(h.store().load().is_some());
        assert_eq!(
            body_of(&h.transport.requests()[1]),
            json!({"email": "a@b.com", "code": "123456"})
        );
    }

    #[tokio::test]
    async fn test_registration_confirmed_without_login() {
        let h = harness(|_| ok(Value::Null));

        h.manager.register("a@b.com", "Passw0rd!", "Ada").await.unwrap();
        let state = h.manager.confirm_one_time_passcode("123456").await.unwrap();

        assert_eq!(state, SessionState::Anonymous);
        assert_eq!(h.manager.pending_flow(), None);
        assert!(h.storage.is_empty());
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let h = harness(|request| {
            if path_is(request, api::VERIFY_OTP) {
                ok(json!({"resetToken": "rt-9"}))
            } else {
                ok(Value::Null)
            }
        });

        h.manager.request_password_reset("a@b.com").await.unwrap();
        assert_eq!(
            h.manager.state(),
            SessionState::AwaitingPasswordResetConfirmation
        );

        let state = h.manager.confirm_one_time_passcode("654321").await.unwrap();
        assert_eq!(state, SessionState::AwaitingNewPassword);

        let err = h.manager.complete_password_reset("short").await.unwrap_err();
        assert_eq!(err.kind(), &ExceptionKind::InvalidInput);
        assert_eq!(h.transport.requests().len(), 2);

        h.manager
            .complete_password_reset("N3w-Passw0rd")
            .await
            .unwrap();

        assert_eq!(h.manager.state(), SessionState::Anonymous);
        assert_eq!(h.manager.pending_flow(), None);
        let reset = h.transport.requests().pop().unwrap();
        assert!(path_is(&reset, api::RESET_FORGOTTEN_PASSWORD));
        assert_eq!(
            body_of(&reset),
            json!({
                "email": "a@b.com",
                "code": "654321",
                "newPassword": "N3w-Passw0rd",
                "resetToken": "rt-9"
            })
        );
    }

    #[tokio::test]
    async fn test_passcode_without_flow_is_invalid_state() {
        let h = harness(backend);

        let err = h.manager.confirm_one_time_passcode("123456").await.unwrap_err();
        assert_eq!(err.kind(), &ExceptionKind::InvalidState);

        let err = h
            .manager
            .complete_password_reset("N3w-Passw0rd")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &ExceptionKind::InvalidState);
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_and_resume_flow() {
        let h = harness(|_| ok(Value::Null));

        h.manager.request_password_reset("a@b.com").await.unwrap();
        h.manager.cancel_pending_flow().unwrap();
        assert_eq!(h.manager.state(), SessionState::Anonymous);
        assert_eq!(h.manager.pending_flow(), None);

        h.manager
            .resume_flow(PendingFlow::NewPassword {
                email: "a@b.com".to_string(),
                code: "111111".to_string(),
                reset_token: None,
            })
            .unwrap();
        assert_eq!(h.manager.state(), SessionState::AwaitingNewPassword);

        h.manager
            .complete_password_reset("N3w-Passw0rd")
            .await
            .unwrap();
        assert_eq!(h.manager.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let h = harness_with(
            ScriptedTransport::new(backend).with_delay(Duration::from_millis(30)),
            MemoryStorage::new(),
        );
        h.manager.login("a@b.com", "Passw0rd!").await.unwrap();
        let other = h.manager.clone();

        let (first, second) = tokio::join!(h.manager.refresh(), other.refresh());

        assert_eq!(first.unwrap().access_token, "access-2");
        assert_eq!(second.unwrap().access_token, "access-2");
        assert_eq!(h.transport.count(api::REFRESH_TOKEN), 1);
        assert_eq!(h.manager.state(), SessionState::Authenticated);
        assert_eq!(
            h.store().load_access_token().unwrap().as_deref(),
            Some("access-2")
        );

        let refresh = h.transport.requests().pop().unwrap();
        assert_eq!(
            body_of(&refresh),
            json!({"refreshToken": "refresh-for-access-1", "clientId": "client-1"})
        );
    }

    #[tokio::test]
    async fn test_unauthorized_profile_refreshes_and_retries_once() {
        let h = harness(backend);
        h.manager.login("a@b.com", "Passw0rd!").await.unwrap();

        let profile = h.manager.fetch_profile().await.unwrap();

        assert_eq!(profile.display_name, "Ada Lovelace");
        assert_eq!(h.transport.count(api::REFRESH_TOKEN), 1);
        assert_eq!(h.transport.count(api::PROFILE), 2);

        let session = h.manager.current_session().unwrap();
        assert_eq!(session.token.access_token, "access-2");
        assert!(session.is_premium);
        assert!(session.has_role("roaster"));
        assert_eq!(h.store().load(), Some(session));
    }

    #[tokio::test]
    async fn test_second_unauthorized_fails_without_second_refresh() {
        let h = harness(|request| {
            if path_is(request, api::PROFILE) {
                fail(401, "Auth.TokenInvalid")
            } else {
                backend(request)
            }
        });
        h.manager.login("a@b.com", "Passw0rd!").await.unwrap();

        let err = h.manager.fetch_profile().await.unwrap_err();

        assert_eq!(err.status_code(), Some(401));
        assert_eq!(h.transport.count(api::REFRESH_TOKEN), 1);
        assert_eq!(h.transport.count(api::PROFILE), 2);
        assert_eq!(h.manager.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_session_expired_code_signs_out() {
        let h = harness(|request| {
            if path_is(request, api::PROFILE) {
                fail(401, EXPIRED)
            } else {
                backend(request)
            }
        });
        h.manager.login("a@b.com", "Passw0rd!").await.unwrap();

        let err = h.manager.fetch_profile().await.unwrap_err();

        assert_eq!(err.kind(), &ExceptionKind::UnauthorizedAccess);
        assert_eq!(h.manager.state(), SessionState::Anonymous);
        assert!(h.storage.is_empty());
        assert_eq!(h.transport.count(api::REFRESH_TOKEN), 0);
        assert_eq!(h.transport.count(api::PROFILE), 1);
        assert_eq!(h.navigator.0.load(Ordering::SeqCst), 1);
        assert_eq!(h.dispatcher.pending().map(|e| e.id()), Some(err.id()));
    }

    #[tokio::test]
    async fn test_refresh_with_expired_refresh_token_signs_out() {
        let h = harness(|request| {
            if path_is(request, api::LOGIN) {
                let mut record = record_json("access-1");
                record["token"] = token_json("access-1", -ChronoDuration::minutes(1));
                ok(record)
            } else {
                backend(request)
            }
        });
        h.manager.login("a@b.com", "Passw0rd!").await.unwrap();

        let err = h.manager.refresh().await.unwrap_err();

        assert_eq!(err.kind(), &ExceptionKind::UnauthorizedAccess);
        assert_eq!(h.manager.state(), SessionState::Anonymous);
        assert!(h.storage.is_empty());
        assert_eq!(h.transport.count(api::REFRESH_TOKEN), 0);
    }

    #[tokio::test]
    async fn test_rejected_refresh_clears_session() {
        let h = harness(|request| {
            if path_is(request, api::REFRESH_TOKEN) {
                fail(400, "Business.InvalidRefreshToken.Error")
            } else {
                backend(request)
            }
        });
        h.manager.login("a@b.com", "Passw0rd!").await.unwrap();

        let err = h.manager.refresh().await.unwrap_err();

        assert_eq!(err.status_code(), Some(400));
        assert_eq!(h.manager.state(), SessionState::Anonymous);
        assert!(h.manager.current_session().is_none());
        assert!(h.storage.is_empty());
        assert_eq!(h.navigator.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_keeps_session() {
        let h = harness(|request| {
            if path_is(request, api::REFRESH_TOKEN) {
                fail(503, "Service.Unavailable")
            } else {
                backend(request)
            }
        });
        h.manager.login("a@b.com", "Passw0rd!").await.unwrap();

        let err = h.manager.refresh().await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(h.transport.count(api::REFRESH_TOKEN), 3);
        assert_eq!(h.manager.state(), SessionState::Authenticated);
        assert_eq!(
            h.store().load_access_token().unwrap().as_deref(),
            Some("access-1")
        );
    }

    #[tokio::test]
    async fn test_refresh_without_session_is_unauthorized() {
        let h = harness(backend);
        let err = h.manager.refresh().await.unwrap_err();
        assert_eq!(err.kind(), &ExceptionKind::UnauthorizedAccess);
    }

    #[tokio::test]
    async fn test_remote_logout_failure_still_clears() {
        let h = harness(|request| {
            if path_is(request, api::LOGOUT) {
                fail(500, "Internal.Error")
            } else {
                backend(request)
            }
        });
        h.manager.login("a@b.com", "Passw0rd!").await.unwrap();

        h.manager.logout().await;

        assert_eq!(h.manager.state(), SessionState::Anonymous);
        assert!(h.storage.is_empty());
        assert_eq!(h.dispatcher.pending().unwrap().status_code(), Some(500));
    }

    #[tokio::test]
    async fn test_restore_valid_session() {
        let storage = MemoryStorage::new();
        let record: SessionRecord = serde_json::from_value(record_json("access-1")).unwrap();
        SessionStore::new(Box::new(storage.clone()))
            .save(&record)
            .unwrap();
        let h = harness_with(ScriptedTransport::new(backend), storage);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        h.manager
            .set_state_callback(Box::new(move |change| sink.lock().push(change)));

        assert!(h.manager.restore());
        assert_eq!(h.manager.state(), SessionState::Authenticated);
        assert_eq!(h.manager.current_access_token().as_deref(), Some("access-1"));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].state, SessionState::Authenticated);
        assert_eq!(seen[0].user_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_restore_clears_unrefreshable_session() {
        let storage = MemoryStorage::new();
        let mut json = record_json("access-1");
        json["token"] = token_json("access-1", -ChronoDuration::hours(1));
        let record: SessionRecord = serde_json::from_value(json).unwrap();
        SessionStore::new(Box::new(storage.clone()))
            .save(&record)
            .unwrap();
        let h = harness_with(ScriptedTransport::new(backend), storage);

        assert!(!h.manager.restore());
        assert_eq!(h.manager.state(), SessionState::Anonymous);
        assert!(h.storage.is_empty());
    }

    #[tokio::test]
    async fn test_restore_with_corrupt_store() {
        let storage = MemoryStorage::new();
        storage.set(StorageKeys::SESSION_RECORD, "{broken").unwrap();
        let h = harness_with(ScriptedTransport::new(backend), storage);

        assert!(!h.manager.restore());
        assert!(h.storage.is_empty());
    }

    #[tokio::test]
    async fn test_change_password_checks() {
        let h = harness(backend);

        let err = h
            .manager
            .change_password("Passw0rd!", "N3w-Passw0rd")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &ExceptionKind::UnauthorizedAccess);

        h.manager.login("a@b.com", "Passw0rd!").await.unwrap();

        let err = h
            .manager
            .change_password("Passw0rd!", "weak")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &ExceptionKind::InvalidInput);

        let err = h
            .manager
            .change_password("Passw0rd!", "Passw0rd!")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &ExceptionKind::InvalidInput);
        assert_eq!(h.transport.count(api::CHANGE_PASSWORD), 0);

        h.manager
            .change_password("Passw0rd!", "N3w-Passw0rd")
            .await
            .unwrap();
        let request = h.transport.requests().pop().unwrap();
        assert_eq!(
            body_of(&request),
            json!({"currentPassword": "Passw0rd!", "newPassword": "N3w-Passw0rd"})
        );
        assert_eq!(request.bearer_token(), Some("access-1"));
    }

    #[tokio::test]
    async fn test_authorized_pipeline_refreshes_business_calls() {
        let h = harness(|request| {
            if request.url.path() == "/api/v1/beans" {
                if request.bearer_token() == Some("access-2") {
                    ok(json!([{"name": "Sidamo"}]))
                } else {
                    fail(401, "Auth.TokenInvalid")
                }
            } else {
                backend(request)
            }
        });
        h.manager.login("a@b.com", "Passw0rd!").await.unwrap();
        let catalog = h.manager.authorized_pipeline();

        let beans: Value = catalog.get("beans/").await.unwrap();

        assert_eq!(beans[0]["name"], "Sidamo");
        assert_eq!(h.transport.count(api::REFRESH_TOKEN), 1);
        let requests = h.transport.requests();
        let last = requests.last().unwrap();
        assert_eq!(last.url.as_str(), "https://api.crema.app/api/v1/beans");
        assert_eq!(last.headers.get("X-Language"), Some("tr"));
    }

    #[tokio::test]
    async fn test_concurrent_unauthorized_calls_share_one_refresh() {
        let transport = ScriptedTransport::new(|request| {
            if request.url.path() == "/api/v1/beans" {
                if request.bearer_token() == Some("access-2") {
                    ok(json!([{"name": "Yirgacheffe"}]))
                } else {
                    fail(401, "Auth.TokenInvalid")
                }
            } else {
                backend(request)
            }
        })
        .with_delay(Duration::from_millis(30));
        let h = harness_with(transport, MemoryStorage::new());
        h.manager.login("a@b.com", "Passw0rd!").await.unwrap();
        let catalog = h.manager.authorized_pipeline();

        let (first, second, third) = tokio::join!(
            catalog.get::<Value>("beans"),
            catalog.get::<Value>("beans"),
            catalog.get::<Value>("beans"),
        );

        for beans in [first, second, third] {
            assert_eq!(beans.unwrap()[0]["name"], "Yirgacheffe");
        }
        assert_eq!(h.transport.count(api::REFRESH_TOKEN), 1);
        assert_eq!(h.manager.state(), SessionState::Authenticated);
        let retried = h
            .transport
            .requests()
            .into_iter()
            .filter(|r| r.url.path() == "/api/v1/beans" && r.bearer_token() == Some("access-2"))
            .count();
        assert_eq!(retried, 3);
    }
}
