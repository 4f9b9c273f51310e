//! Client for the game server.
//!
//! Login, registration, power submission and status polling are plain request/response calls made from
//! the control/network task. Production ranges and coefficients are refreshed on worker threads instead:
//! each refresh kind has an in-flight flag so at most one request of that kind is ever outstanding, and
//! results come back over a channel that [`GameClient::update`] drains into the cached tables.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::de::DeserializeOwned;
use strum_macros::{Display, IntoStaticStr};
use tracing::{debug, info, warn};

use crate::{
    Duration, Instant, elapsed,
    error::ClientError,
    http::{ContentType, HttpRequest, HttpResponse, HttpTransport},
    protocol::{
        BoardType, DataFlags, LoginRequest, LoginResponse, PollResponse, PowerDataRequest,
        ProductionCoefficient, ProductionRange, RegistrationRequest, RegistrationResponse,
    },
};

pub const LOGIN_PATH: &str = "/coreapi/login";
pub const REGISTER_PATH: &str = "/coreapi/register_binary";
pub const POWER_DATA_PATH: &str = "/coreapi/power_data_binary";
pub const POLL_PATH: &str = "/coreapi/poll_binary";
pub const DEFAULT_RANGES_PATH: &str = "/coreapi/production_ranges";
pub const DEFAULT_COEFFICIENTS_PATH: &str = "/coreapi/production_coefficients";

pub type ClientResult<T> = Result<T, ClientError>;

/// Static client parameters, normally taken from the board profile.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub board_id: u32,
    pub board_name: String,
    pub board_type: BoardType,
    pub ranges_path: String,
    pub coefficients_path: String,
    pub refresh_interval: Duration,
}

impl ClientSettings {
    pub fn new(base_url: impl Into<String>, board_id: u32, board_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            board_id,
            board_name: board_name.into(),
            board_type: BoardType::Generic,
            ranges_path: DEFAULT_RANGES_PATH.to_owned(),
            coefficients_path: DEFAULT_COEFFICIENTS_PATH.to_owned(),
            refresh_interval: Duration::millis(3000),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Default)]
struct Session {
    token: Option<String>,
    logged_in: bool,
    registered: bool,
    last_round: u16,
}

/// Printable snapshot of the session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub board_id: u32,
    pub board_name: String,
    pub board_type: BoardType,
    pub logged_in: bool,
    pub registered: bool,
    pub last_round: u16,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        write!(
            f,
            "board {} ({}, {}): logged in {}, registered {}, last round {}",
            self.board_id,
            self.board_name,
            self.board_type,
            yes_no(self.logged_in),
            yes_no(self.registered),
            self.last_round
        )
    }
}

/// The two kinds of background refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RefreshKind {
    Ranges,
    Coefficients,
}

/// Outcome of asking for a background refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Dispatched,
    /// A request of the same kind is still outstanding, nothing was queued.
    AlreadyInFlight,
    NotLoggedIn,
    /// The worker thread could not be started.
    SpawnFailed,
}

#[derive(Debug)]
enum RefreshEvent {
    Ranges(Vec<ProductionRange>),
    Coefficients(Vec<ProductionCoefficient>),
    Failed(RefreshKind, ClientError),
}

/// Clears an in-flight flag when the worker that set it finishes, however it finishes.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct GameClient {
    transport: Arc<dyn HttpTransport>,
    settings: ClientSettings,
    session: Session,
    ranges_in_flight: Arc<AtomicBool>,
    coefficients_in_flight: Arc<AtomicBool>,
    events_tx: Sender<RefreshEvent>,
    events_rx: Receiver<RefreshEvent>,
    ranges: Vec<ProductionRange>,
    ranges_received: bool,
    coefficients: Vec<ProductionCoefficient>,
    last_refresh: Option<Instant>,
}

impl GameClient {
    pub fn new(transport: Arc<dyn HttpTransport>, settings: ClientSettings) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            transport,
            settings,
            session: Session::default(),
            ranges_in_flight: Arc::new(AtomicBool::new(false)),
            coefficients_in_flight: Arc::new(AtomicBool::new(false)),
            events_tx,
            events_rx,
            ranges: Vec::new(),
            ranges_received: false,
            coefficients: Vec::new(),
            last_refresh: None,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.logged_in
    }

    pub fn is_registered(&self) -> bool {
        self.session.registered
    }

    pub fn last_round(&self) -> u16 {
        self.session.last_round
    }

    /// Last ranges received from the server.
    pub fn production_ranges(&self) -> &[ProductionRange] {
        &self.ranges
    }

    /// Whether the server has delivered ranges at least once.
    pub fn has_production_ranges(&self) -> bool {
        self.ranges_received
    }

    /// Last coefficients received from the server.
    pub fn production_coefficients(&self) -> &[ProductionCoefficient] {
        &self.coefficients
    }

    /// Cached coefficient for a source, `0.0` when the server never sent one.
    pub fn coefficient_for(&self, source_id: u32) -> f32 {
        self.coefficients
            .iter()
            .find(|c| c.source_id == source_id)
            .map(|c| c.coefficient)
            .unwrap_or(0.0)
    }

    pub fn is_in_flight(&self, kind: RefreshKind) -> bool {
        self.in_flight_flag(kind).load(Ordering::Acquire)
    }

    pub fn status_summary(&self) -> SessionSummary {
        SessionSummary {
            board_id: self.settings.board_id,
            board_name: self.settings.board_name.clone(),
            board_type: self.settings.board_type,
            logged_in: self.session.logged_in,
            registered: self.session.registered,
            last_round: self.session.last_round,
        }
    }

    /// Authenticate and keep the returned token for every later request.
    ///
    /// Any failure leaves the client unauthenticated.
    pub fn login(&mut self, username: &str, password: &str) -> ClientResult<()> {
        self.invalidate_session();

        let body = serde_json::to_vec(&LoginRequest { username, password })?;
        let request = HttpRequest::post(self.settings.url(LOGIN_PATH), ContentType::Json, body);
        let response = self.execute(&request)?;
        if !response.is_ok() {
            warn!(status = response.status, "login failed");
            return Err(ClientError::HttpStatus(response.status));
        }

        let login: LoginResponse = serde_json::from_slice(&response.body)?;
        let Some(token) = login.token else {
            warn!("login response carried no token");
            return Err(ClientError::LoginRejected);
        };
        self.session.token = Some(token);
        self.session.logged_in = true;
        info!(board_id = self.settings.board_id, "logged in");
        Ok(())
    }

    /// Register this board with the running game.
    pub fn register_board(&mut self) -> ClientResult<()> {
        let token = self.token()?;
        let request = RegistrationRequest {
            board_id: self.settings.board_id,
            board_name: &self.settings.board_name,
            board_type: self.settings.board_type,
        };
        let request = HttpRequest::post(
            self.settings.url(REGISTER_PATH),
            ContentType::Binary,
            request.encode().to_vec(),
        )
        .with_bearer(&token);

        let response = self.execute_authenticated(&request)?;
        let registration = RegistrationResponse::decode(&response.body)?;
        if !registration.is_accepted() {
            let message = if registration.message.is_empty() {
                "unknown error".to_owned()
            } else {
                registration.message
            };
            warn!(%message, "registration rejected");
            return Err(ClientError::RegistrationRejected(message));
        }
        self.session.registered = true;
        info!(
            board_id = self.settings.board_id,
            name = %self.settings.board_name,
            "board registered"
        );
        Ok(())
    }

    /// Submit power values with explicit presence flags.
    ///
    /// A value is sent only when its flag is set and it is non-negative, otherwise the sentinel goes out.
    pub fn submit_power_data(
        &mut self,
        generation: f32,
        consumption: f32,
        flags: DataFlags,
    ) -> ClientResult<()> {
        let token = self.registered_token()?;
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        let data = PowerDataRequest::new(
            self.settings.board_id,
            timestamp,
            generation,
            consumption,
            flags,
        );
        let request = HttpRequest::post(
            self.settings.url(POWER_DATA_PATH),
            ContentType::Binary,
            data.encode().to_vec(),
        )
        .with_bearer(&token);

        self.execute_authenticated(&request)?;
        debug!(generation, consumption, "power data submitted");
        Ok(())
    }

    /// Submit power values, deriving the presence flags from which values are known.
    pub fn submit_power(
        &mut self,
        generation: Option<f32>,
        consumption: Option<f32>,
    ) -> ClientResult<()> {
        let generation = generation.filter(|g| *g >= 0.0);
        let consumption = consumption.filter(|c| *c >= 0.0);
        let flags = DataFlags::new()
            .with_generation_present(generation.is_some())
            .with_consumption_present(consumption.is_some());
        self.submit_power_data(
            generation.unwrap_or(-1.0),
            consumption.unwrap_or(-1.0),
            flags,
        )
    }

    /// Fetch the board's view of the current round.
    pub fn poll_status(&mut self) -> ClientResult<PollResponse> {
        let token = self.registered_token()?;
        let url = self
            .settings
            .url(&format!("{POLL_PATH}/{}", self.settings.board_id));
        let request = HttpRequest::get(url).with_bearer(&token);

        let response = self.execute_authenticated(&request)?;
        let status = PollResponse::decode(&response.body)?;
        if status.round > self.session.last_round {
            self.session.last_round = status.round;
            info!(
                round = status.round,
                day = status.flags.is_day(),
                "new round"
            );
        }
        Ok(status)
    }

    /// Start a background fetch of the production ranges.
    pub fn get_production_ranges(&mut self) -> Dispatch {
        self.dispatch(RefreshKind::Ranges)
    }

    /// Start a background fetch of the production coefficients.
    pub fn poll_coefficients(&mut self) -> Dispatch {
        self.dispatch(RefreshKind::Coefficients)
    }

    /// Collect finished refreshes and start new ones when the refresh interval has passed.
    ///
    /// Returns `true` when fresh ranges or coefficients arrived during this call.
    pub fn update(&mut self, now: Instant) -> bool {
        let mut refreshed = false;
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                RefreshEvent::Ranges(ranges) => {
                    debug!(count = ranges.len(), "production ranges updated");
                    self.ranges = ranges;
                    self.ranges_received = true;
                    refreshed = true;
                }
                RefreshEvent::Coefficients(coefficients) => {
                    debug!(count = coefficients.len(), "production coefficients updated");
                    self.coefficients = coefficients;
                    refreshed = true;
                }
                RefreshEvent::Failed(kind, error) => {
                    warn!(%kind, %error, "refresh failed");
                    if matches!(error, ClientError::HttpStatus(401)) {
                        self.invalidate_session();
                    }
                }
            }
        }

        if !self.session.logged_in {
            return refreshed;
        }
        let due = self
            .last_refresh
            .is_none_or(|last| elapsed(now, last) >= self.settings.refresh_interval);
        if due {
            self.last_refresh = Some(now);
            for kind in [RefreshKind::Ranges, RefreshKind::Coefficients] {
                if self.dispatch(kind) == Dispatch::AlreadyInFlight {
                    debug!(%kind, "refresh skipped, previous request outstanding");
                }
            }
        }
        refreshed
    }

    fn dispatch(&mut self, kind: RefreshKind) -> Dispatch {
        let Some(token) = self.session.token.clone().filter(|_| self.session.logged_in) else {
            return Dispatch::NotLoggedIn;
        };
        let flag = self.in_flight_flag(kind).clone();
        if flag.swap(true, Ordering::AcqRel) {
            return Dispatch::AlreadyInFlight;
        }
        let guard = InFlightGuard(flag);

        let path = match kind {
            RefreshKind::Ranges => &self.settings.ranges_path,
            RefreshKind::Coefficients => &self.settings.coefficients_path,
        };
        let request = HttpRequest::get(self.settings.url(path)).with_bearer(&token);
        let transport = Arc::clone(&self.transport);
        let events = self.events_tx.clone();

        let spawned = thread::Builder::new()
            .name(format!("refresh-{kind}"))
            .spawn(move || {
                let started = std::time::Instant::now();
                let event = match kind {
                    RefreshKind::Ranges => {
                        fetch_json(transport.as_ref(), &request).map(RefreshEvent::Ranges)
                    }
                    RefreshKind::Coefficients => {
                        fetch_json(transport.as_ref(), &request).map(RefreshEvent::Coefficients)
                    }
                }
                .unwrap_or_else(|error| RefreshEvent::Failed(kind, error));
                debug!(
                    %kind,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "refresh request finished"
                );
                // Clear the flag before publishing so a caller that sees the result can dispatch again.
                drop(guard);
                let _ = events.send(event);
            });

        match spawned {
            Ok(_) => Dispatch::Dispatched,
            Err(error) => {
                warn!(%kind, %error, "unable to start refresh worker");
                Dispatch::SpawnFailed
            }
        }
    }

    fn in_flight_flag(&self, kind: RefreshKind) -> &Arc<AtomicBool> {
        match kind {
            RefreshKind::Ranges => &self.ranges_in_flight,
            RefreshKind::Coefficients => &self.coefficients_in_flight,
        }
    }

    fn token(&self) -> ClientResult<String> {
        match &self.session.token {
            Some(token) if self.session.logged_in => Ok(token.clone()),
            _ => Err(ClientError::NotLoggedIn),
        }
    }

    fn registered_token(&self) -> ClientResult<String> {
        let token = self.token()?;
        if !self.session.registered {
            return Err(ClientError::NotRegistered);
        }
        Ok(token)
    }

    fn invalidate_session(&mut self) {
        if self.session.logged_in {
            info!("session invalidated");
        }
        self.session.token = None;
        self.session.logged_in = false;
        self.session.registered = false;
    }

    fn execute(&self, request: &HttpRequest) -> ClientResult<HttpResponse> {
        self.transport.execute(request).map_err(|error| {
            warn!(url = %request.url, %error, "request failed");
            ClientError::from(error)
        })
    }

    /// Execute a request that carries the session token. A 401 ends the session.
    fn execute_authenticated(&mut self, request: &HttpRequest) -> ClientResult<HttpResponse> {
        let response = self.execute(request)?;
        if response.status == 401 {
            self.invalidate_session();
        }
        if !response.is_ok() {
            warn!(url = %request.url, status = response.status, "request rejected");
            return Err(ClientError::HttpStatus(response.status));
        }
        Ok(response)
    }
}

fn fetch_json<T: DeserializeOwned>(
    transport: &dyn HttpTransport,
    request: &HttpRequest,
) -> ClientResult<T> {
    let response = transport.execute(request)?;
    if !response.is_ok() {
        return Err(ClientError::HttpStatus(response.status));
    }
    Ok(serde_json::from_slice(&response.body)?)
}
