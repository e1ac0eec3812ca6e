// session.rs - Request/response exchange with transparent digest authentication

use tracing::debug;

use crate::auth::{AuthContext, ChallengeKind, ChallengeParams, build_authorization, find_challenge};
use crate::config::ExchangeSettings;
use crate::message::{RequestLine, rebuild_request};
use crate::transport::Connection;
use crate::{MIN_CHALLENGE_RESPONSE_LEN, RECEIVE_BUFFER_SIZE, Result, WsctlError};

// Exchange progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Sent,
    AwaitingInitialResponse,
    ChallengeDetected,
    ResendingRequest,
    AwaitingFinalResponse,
    Done,
}

// What happened on the wire, for whoever is watching
#[derive(Debug, Clone, Copy)]
pub enum ExchangeEvent<'a> {
    Sent(&'a [u8]),
    Received(&'a [u8]),
    ChallengeParsed(&'a ChallengeParams),
    Resent(&'a [u8]),
    ReceivedFinal(&'a [u8]),
}

pub trait ExchangeObserver {
    fn on_event(&self, event: &ExchangeEvent<'_>);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeReport {
    pub sent: Vec<u8>,
    pub response: Option<Vec<u8>>,
    pub resent: Option<Vec<u8>>,
    pub final_response: Option<Vec<u8>>,
    // True only when a challenge was answered and the request resent
    pub auth_handled: bool,
}

impl ExchangeReport {
    /// The response that stands as the answer to the request.
    pub fn final_answer(&self) -> Option<&[u8]> {
        self.final_response.as_deref().or(self.response.as_deref())
    }
}

/// Drives one request over a connection.
///
/// Sends the request, reads the answer and, when it is a 401/407 Digest
/// challenge and a password is configured, resends the request once with an
/// incremented CSeq and the matching authorization header. A second challenge
/// is reported as it is. Parse problems along the way leave the first
/// response as the final answer; I/O failures are returned as errors.
pub struct ResponseManager<C, O> {
    conn: C,
    settings: ExchangeSettings,
    observer: O,
    state: ExchangeState,
}

impl<C: Connection, O: ExchangeObserver> ResponseManager<C, O> {
    pub fn new(conn: C, settings: ExchangeSettings, observer: O) -> Self {
        ResponseManager {
            conn,
            settings,
            observer,
            state: ExchangeState::Idle,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn into_connection(self) -> C {
        self.conn
    }

    fn transition(&mut self, next: ExchangeState) {
        debug!("Exchange state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub async fn run(&mut self, request: &[u8]) -> Result<ExchangeReport> {
        let mut report = ExchangeReport::default();

        self.conn.send(request, self.settings.send_timeout).await?;
        self.transition(ExchangeState::Sent);
        self.observer.on_event(&ExchangeEvent::Sent(request));
        report.sent = request.to_vec();

        if !self.settings.receive {
            self.transition(ExchangeState::Done);
            return Ok(report);
        }

        self.transition(ExchangeState::AwaitingInitialResponse);
        let response = self
            .conn
            .receive(RECEIVE_BUFFER_SIZE, self.settings.recv_timeout)
            .await?;
        self.observer.on_event(&ExchangeEvent::Received(&response));

        let Some((kind, params)) = self.detect_challenge(&response) else {
            report.response = Some(response);
            self.transition(ExchangeState::Done);
            return Ok(report);
        };
        report.response = Some(response);
        self.transition(ExchangeState::ChallengeDetected);

        let retry = match self.prepare_retry(request, kind, params) {
            Ok(retry) => retry,
            Err(WsctlError::Auth(e)) => {
                debug!("Not answering {:?} challenge: {}", kind, e);
                self.transition(ExchangeState::Done);
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        self.transition(ExchangeState::ResendingRequest);
        self.conn.send(&retry, self.settings.send_timeout).await?;
        self.observer.on_event(&ExchangeEvent::Resent(&retry));
        report.resent = Some(retry);
        report.auth_handled = true;

        self.transition(ExchangeState::AwaitingFinalResponse);
        let final_response = self
            .conn
            .receive(RECEIVE_BUFFER_SIZE, self.settings.recv_timeout)
            .await?;
        self.observer.on_event(&ExchangeEvent::ReceivedFinal(&final_response));
        report.final_response = Some(final_response);

        self.transition(ExchangeState::Done);
        Ok(report)
    }

    fn detect_challenge(&self, response: &[u8]) -> Option<(ChallengeKind, ChallengeParams)> {
        if !self.settings.sip || self.settings.password().is_none() {
            return None;
        }
        if response.len() <= MIN_CHALLENGE_RESPONSE_LEN {
            debug!("Response too short to carry a challenge ({} bytes)", response.len());
            return None;
        }

        let kind = ChallengeKind::from_response(response)?;
        match find_challenge(response, kind) {
            Ok(params) => Some((kind, params)),
            Err(e) => {
                debug!("Ignoring {:?} challenge: {}", kind, e);
                None
            }
        }
    }

    fn prepare_retry(&self, request: &[u8], kind: ChallengeKind, mut params: ChallengeParams) -> Result<Vec<u8>> {
        let line = RequestLine::parse(request)?;
        params.insert("method", line.method);
        params.insert("uri", line.uri);
        self.observer.on_event(&ExchangeEvent::ChallengeParsed(&params));

        let password = self.settings.password().unwrap_or_default();
        let ctx = AuthContext::new(self.settings.username.as_deref(), password, params);
        let authorization = build_authorization(&ctx)?;

        Ok(rebuild_request(request, kind, &authorization)?)
    }
}
