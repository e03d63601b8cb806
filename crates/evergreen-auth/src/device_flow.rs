//! Device authorization polling (RFC 8628).

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::token::TokenRecord;
use crate::transport::{OAuthTransport, TokenError, TokenResponse};

/// Default ceiling on how long to wait for the user.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

/// Added to the poll interval on each `slow_down`.
pub const SLOW_DOWN_STEP: Duration = Duration::from_secs(2);

/// What to do after the token endpoint refused a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollDecision {
    Pending,
    SlowDown,
    Expired,
    Fail,
}

impl PollDecision {
    fn classify(error: &TokenError) -> Self {
        match error.error.as_str() {
            "authorization_pending" => PollDecision::Pending,
            "slow_down" => PollDecision::SlowDown,
            "expired_token" => PollDecision::Expired,
            // some providers answer 401 until the user approves
            _ if error.status == 401 => PollDecision::Pending,
            _ => PollDecision::Fail,
        }
    }
}

/// A single device authorization waiting for approval.
pub struct DevicePoll<'a> {
    pub transport: &'a dyn OAuthTransport,
    pub token_endpoint: &'a str,
    pub device_code: &'a str,
    pub client_id: &'a str,
    pub interval: Duration,
    pub max_wait: Duration,
}

impl DevicePoll<'_> {
    /// Poll until the user approves, the code expires, `max_wait` elapses,
    /// or `cancel` fires.
    ///
    /// Each poll is preceded by a sleep of the current interval.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<TokenRecord, AuthError> {
        let started = Instant::now();
        let mut interval = self.interval;
        let mut attempts: u32 = 0;

        loop {
            if started.elapsed() > self.max_wait {
                warn!(attempts, "Device flow timed out");
                return Err(AuthError::DeviceFlowTimedOut(self.max_wait.as_secs()));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Device flow cancelled");
                    return Err(AuthError::Cancelled);
                }
                _ = tokio::time::sleep(interval) => {}
            }

            attempts += 1;
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(attempts, "Device flow cancelled during poll");
                    return Err(AuthError::Cancelled);
                }
                response = self.transport.poll_for_token(
                    self.token_endpoint,
                    self.device_code,
                    self.client_id,
                ) => response?,
            };

            let error = match response {
                TokenResponse::Granted(record) => {
                    debug!(attempts, "Device flow approved");
                    return Ok(record);
                }
                TokenResponse::Rejected(error) => error,
            };

            match PollDecision::classify(&error) {
                PollDecision::Pending => {
                    debug!(attempts, status = error.status, "Authorization pending");
                }
                PollDecision::SlowDown => {
                    interval += SLOW_DOWN_STEP;
                    debug!(interval_secs = interval.as_secs(), "Slowing down polling");
                }
                PollDecision::Expired => return Err(AuthError::DeviceCodeExpired),
                PollDecision::Fail => {
                    return Err(AuthError::DeviceFlowRejected {
                        error: error.error,
                        description: error.description,
                    })
                }
            }
        }
    }
}
