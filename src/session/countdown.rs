//! Countdown Timer
//!
//! Posts one [`Input::Tick`] per second into the session's input queue. The
//! timer only emits ticks; decrementing `remaining_seconds` and detecting
//! zero is the controller's job. Stopping cancels the task outright, so no
//! tick can be produced after the session leaves `active`.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::controller::Input;

/// Tick period.
pub const TICK: Duration = Duration::from_secs(1);

/// Cancellable one-second ticker.
#[derive(Debug, Default)]
pub struct Countdown {
    cancel: Option<CancellationToken>,
}

impl Countdown {
    /// Creates a stopped countdown.
    #[must_use]
    pub const fn new() -> Self {
        Self { cancel: None }
    }

    /// Starts ticking into `inputs`, replacing any running ticker.
    ///
    /// The first tick fires one period after the call.
    pub fn start(&mut self, inputs: mpsc::UnboundedSender<Input>) {
        self.stop();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + TICK, TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        debug!("countdown cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        if inputs.send(Input::Tick).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        self.cancel = Some(cancel);
    }

    /// Stops the ticker. No-op when not running.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }

    /// Whether a ticker is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.stop();
    }
}
