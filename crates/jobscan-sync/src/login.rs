//! Multi-step marketplace login with banner-driven retry strategies.

use std::time::Duration;

use jobscan_adapters::LoginFlow;
use jobscan_core::{Credentials, LoginFailure};
use jobscan_storage::{BrowserError, BrowserSession, Pacer, PageLoader, PauseWindow};
use tracing::{error, info, warn};

use crate::ScanError;

/// Login attempts allowed before the run gives up.
pub const MAX_LOGIN_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    NotStarted,
    UsernameEntered,
    PasswordEntered,
    SecretAnswerEntered,
    SecretAnswerSkipped,
    ErrorCheck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttemptState {
    pub attempt: u32,
    pub active_username: String,
}

impl LoginAttemptState {
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            attempt: 0,
            active_username: credentials.username.clone(),
        }
    }
}

/// Reaction to a detected error banner: the state for the next attempt, or a
/// fatal error.
pub type Strategy = fn(LoginAttemptState, &Credentials) -> Result<LoginAttemptState, ScanError>;

pub fn strategy_for(kind: LoginFailure) -> Strategy {
    match kind {
        LoginFailure::UsernameIncorrect | LoginFailure::SecurityQuestionReset => rotate_username,
        LoginFailure::TechnicalDifficulties => keep_credentials,
    }
}

/// Switch to backup one after the first attempt and backup two after the second.
pub fn rotate_username(state: LoginAttemptState, credentials: &Credentials) -> Result<LoginAttemptState, ScanError> {
    let (slot, backup) = match state.attempt {
        1 => ("one", credentials.username_backup_one.as_deref()),
        2 => ("two", credentials.username_backup_two.as_deref()),
        attempt => {
            return Err(ScanError::LoginFailed(format!(
                "username still rejected after {attempt} login attempts"
            )))
        }
    };

    match backup.map(str::trim).filter(|u| !u.is_empty()) {
        Some(username) => {
            info!(attempt = state.attempt, username, "changing to backup username {slot}");
            Ok(LoginAttemptState {
                active_username: username.to_string(),
                ..state
            })
        }
        None => Err(ScanError::LoginFailed(format!(
            "username rejected on attempt {} and backup username {slot} is not configured",
            state.attempt
        ))),
    }
}

/// Retry with the same credentials until the attempt ceiling.
pub fn keep_credentials(state: LoginAttemptState, _credentials: &Credentials) -> Result<LoginAttemptState, ScanError> {
    if state.attempt >= MAX_LOGIN_ATTEMPTS {
        return Err(ScanError::LoginFailed(format!(
            "site reported technical difficulties on {} login attempts",
            state.attempt
        )));
    }
    Ok(state)
}

pub struct LoginStateMachine<'a> {
    flow: LoginFlow,
    credentials: &'a Credentials,
    loader: &'a PageLoader,
    pacer: &'a dyn Pacer,
    element_timeout: Duration,
}

impl<'a> LoginStateMachine<'a> {
    pub fn new(
        flow: LoginFlow,
        credentials: &'a Credentials,
        loader: &'a PageLoader,
        pacer: &'a dyn Pacer,
        element_timeout: Duration,
    ) -> Self {
        Self {
            flow,
            credentials,
            loader,
            pacer,
            element_timeout,
        }
    }

    /// `Ok(true)` once logged in. `Ok(false)` when a step failed unexpectedly
    /// (the session is closed) or the login page is still shown.
    pub fn login<S: BrowserSession>(&self, session: &mut S) -> Result<bool, ScanError> {
        let mut state = LoginAttemptState::new(self.credentials);
        let loader = self.loader.clone().with_challenge_title(self.flow.challenge_title);

        loop {
            state.attempt += 1;
            info!(attempt = state.attempt, username = %state.active_username, "starting login process");

            loader.load(
                session,
                self.pacer,
                &self.flow.login_url,
                &self.flow.locators.username_field,
            )?;
            if session.title()? == self.flow.challenge_title {
                error!(url = %self.flow.login_url, "bot-check interstitial shown instead of login form");
                return Err(ScanError::BlockedByChallenge);
            }

            if let Err(err) = self.run_steps(session, &state) {
                error!(error = %err, attempt = state.attempt, "error attempting to log in");
                if let Err(close_err) = session.close() {
                    warn!(error = %close_err, "closing browser after login error failed");
                }
                return Ok(false);
            }

            info!(step = ?LoginStep::ErrorCheck, "checking page for login errors");
            let source = session.page_source()?;
            if let Some((banner, kind)) = self.flow.detect_banner(&source) {
                warn!(attempt = state.attempt, banner, kind = ?kind, "login error banner detected");
                state = strategy_for(kind)(state, self.credentials)?;
                continue;
            }

            let title = session.title()?;
            if title.contains(self.flow.login_title_marker) {
                warn!(title = %title, "still on the login page after submitting credentials");
                return Ok(false);
            }

            info!(attempt = state.attempt, "logged in successfully");
            return Ok(true);
        }
    }

    fn run_steps<S: BrowserSession>(&self, session: &mut S, state: &LoginAttemptState) -> Result<(), BrowserError> {
        let locators = &self.flow.locators;
        let timeout = self.element_timeout;

        info!(step = ?LoginStep::NotStarted, "typing username");
        let field = session.wait_for_visible(&locators.username_field, timeout)?;
        session.type_text(&field, &state.active_username)?;
        let submit = session.wait_for_visible(&locators.username_submit, timeout)?;
        session.click(&submit)?;
        self.pacer.pause(PauseWindow::USERNAME);
        info!(step = ?LoginStep::UsernameEntered, "username typed");

        let field = session.wait_for_visible(&locators.password_field, timeout)?;
        session.type_text(&field, &self.credentials.password)?;
        let submit = session.wait_for_visible(&locators.password_submit, timeout)?;
        session.click(&submit)?;
        self.pacer.pause(PauseWindow::PASSWORD);
        info!(step = ?LoginStep::PasswordEntered, "password typed");

        match session.wait_for_visible(&locators.secret_answer_probe, timeout) {
            Ok(_) => {
                let field = session.wait_for_visible(&locators.secret_answer_field, timeout)?;
                session.type_text(&field, &self.credentials.secret_answer)?;
                let submit = session.wait_for_visible(&locators.secret_answer_probe, timeout)?;
                session.click(&submit)?;
                self.pacer.pause(PauseWindow::SECRET_ANSWER);
                info!(step = ?LoginStep::SecretAnswerEntered, "secret answer typed");
            }
            Err(err) if err.is_timeout() => {
                info!(step = ?LoginStep::SecretAnswerSkipped, "secret-answer step not requested");
            }
            Err(err) => return Err(err),
        }

        Ok(())
    }
}
