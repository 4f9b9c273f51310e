//! The control/network task.
//!
//! [`ControlNode`] owns the relay link and the game client and runs both at their own cadence from a
//! single `tick`. Server failures never stop the link side: the board keeps driving its plants locally
//! and simply reports nothing until the server is reachable again.

use tracing::{info, warn};

use crate::{
    Duration, Instant,
    aggregator::LinkAggregator,
    client::{ClientResult, GameClient},
    elapsed,
    error::{ClientError, LinkResult},
    protocol::PollResponse,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    pub username: String,
    pub password: String,
    /// Spacing between status polls.
    pub poll_interval: Duration,
    /// Spacing between power submissions.
    pub submit_interval: Duration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            username: "board".to_owned(),
            password: String::new(),
            poll_interval: Duration::millis(2000),
            submit_interval: Duration::millis(500),
        }
    }
}

pub struct ControlNode<S: embedded_io::Read + embedded_io::Write> {
    aggregator: LinkAggregator<S>,
    client: GameClient,
    settings: NodeSettings,
    last_connect_at: Option<Instant>,
    last_poll_at: Option<Instant>,
    last_submit_at: Option<Instant>,
    last_status: Option<PollResponse>,
}

fn due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    last.is_none_or(|last| elapsed(now, last) >= interval)
}

impl<S: embedded_io::Read + embedded_io::Write> ControlNode<S> {
    pub fn new(aggregator: LinkAggregator<S>, client: GameClient, settings: NodeSettings) -> Self {
        Self {
            aggregator,
            client,
            settings,
            last_connect_at: None,
            last_poll_at: None,
            last_submit_at: None,
            last_status: None,
        }
    }

    pub fn aggregator(&self) -> &LinkAggregator<S> {
        &self.aggregator
    }

    pub fn client(&self) -> &GameClient {
        &self.client
    }

    /// Most recent successful status poll.
    pub fn last_status(&self) -> Option<&PollResponse> {
        self.last_status.as_ref()
    }

    /// Log in and register the board.
    ///
    /// On failure the board keeps running locally; call again later to retry.
    pub fn connect(&mut self) -> ClientResult<()> {
        let result = self
            .client
            .login(&self.settings.username, &self.settings.password)
            .and_then(|()| self.client.register_board());
        match &result {
            Ok(()) => info!(summary = %self.client.status_summary(), "connected to game server"),
            Err(error) => warn!(%error, "unable to connect to game server, running offline"),
        }
        result
    }

    /// Run one pass of the control/network task.
    ///
    /// The server side runs even when the relay link fails; the link error is returned afterwards.
    pub fn tick(&mut self, now: Instant) -> LinkResult<(), S::Error> {
        let link = self.service_link(now);
        self.service_server(now);
        link
    }

    /// Every step runs each tick so a dead adapter still times out the link. The first error wins.
    fn service_link(&mut self, now: Instant) -> LinkResult<(), S::Error> {
        let polled = self.aggregator.poll_link(now).map(|_| ());
        let status = self.aggregator.update_link_status(now).map(|_| ());
        let commands = self.aggregator.update_commands(now).map(|_| ());
        polled.and(status).and(commands)
    }

    fn service_server(&mut self, now: Instant) {
        if self.client.update(now) {
            let plants = self.aggregator.plants();
            // Ranges reset every slot, so only apply them once the server has actually sent some.
            if self.client.has_production_ranges() {
                plants.apply_production_ranges(self.client.production_ranges());
            }
            plants.apply_coefficients(self.client.production_coefficients());
        }

        if !self.client.is_registered() {
            // Retry at the poll cadence, counting from the first unregistered tick.
            match self.last_connect_at {
                None => self.last_connect_at = Some(now),
                Some(last) if elapsed(now, last) >= self.settings.poll_interval => {
                    self.last_connect_at = Some(now);
                    let _ = self.connect();
                }
                Some(_) => {}
            }
            return;
        }

        if due(self.last_poll_at, now, self.settings.poll_interval) {
            self.last_poll_at = Some(now);
            match self.client.poll_status() {
                Ok(status) => {
                    self.aggregator
                        .plants()
                        .set_game_active(status.flags.is_game_active());
                    self.last_status = Some(status);
                }
                Err(error) => Self::report_failure(&error, "status poll failed"),
            }
        }

        if due(self.last_submit_at, now, self.settings.submit_interval) {
            self.last_submit_at = Some(now);
            let generation = self.aggregator.total_production();
            if let Err(error) = self.client.submit_power(Some(generation), None) {
                Self::report_failure(&error, "power submission failed");
            }
        }
    }

    fn report_failure(error: &ClientError, what: &str) {
        if error.is_auth() {
            warn!(%error, "{what}, session lost");
        } else {
            warn!(%error, "{what}");
        }
    }
}
