//! Replay source for recorded sessions
//!
//! Recordings are JSON lines, one [`SourceEvent`] per line:
//!
//! ```text
//! {"event":"connected"}
//! {"event":"tick","readings":{"IsOnTrack":true,"Lap":2,"Speed":{"value":41.0,"unit":"m/s"}}}
//! {"event":"disconnected"}
//! ```
//!
//! Ticks are paced at the current sampling frequency, so a replay reacts to
//! the rate controller exactly like a live simulator would.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info, trace};

use crate::source::TelemetrySource;
use crate::types::{SamplingFrequency, SourceEvent};
use crate::{RelayError, Result};

/// Source that plays back a JSON-lines recording
pub struct ReplaySource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,

    /// Sampling frequency published by the rate controller
    frequency: watch::Receiver<SamplingFrequency>,

    /// Pacing for the frequency currently in effect
    pacing: Interval,
    current: SamplingFrequency,

    ticks: u64,
}

impl ReplaySource {
    /// Open a recording for playback.
    pub async fn open<P: AsRef<Path>>(
        path: P,
        mut frequency: watch::Receiver<SamplingFrequency>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file =
            File::open(&path).await.map_err(|e| RelayError::file_error(path.clone(), e))?;

        let current = *frequency.borrow_and_update();
        info!("Opened session recording {} ({})", path.display(), current);

        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
            frequency,
            pacing: pacing(current),
            current,
            ticks: 0,
        })
    }

    /// Ticks played back so far
    pub fn ticks_replayed(&self) -> u64 {
        self.ticks
    }

    /// Pick up a frequency change before the next poll.
    fn refresh_pacing(&mut self) {
        let latest = *self.frequency.borrow_and_update();
        if latest != self.current {
            debug!("Replay pacing {} -> {}", self.current, latest);
            self.current = latest;
            self.pacing = pacing(latest);
        }
    }
}

fn pacing(frequency: SamplingFrequency) -> Interval {
    let period = frequency.interval();
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[async_trait::async_trait]
impl TelemetrySource for ReplaySource {
    async fn next_event(&mut self) -> Result<Option<SourceEvent>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| RelayError::file_error(self.path.clone(), e))?;

            let Some(line) = line else {
                info!("Reached end of recording after {} ticks", self.ticks);
                return Ok(None);
            };
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let event: SourceEvent = serde_json::from_str(trimmed).map_err(|e| {
                RelayError::parse_error(
                    format!("{}:{}", self.path.display(), self.line_no),
                    e.to_string(),
                )
            })?;

            if matches!(event, SourceEvent::Tick(_)) {
                self.refresh_pacing();
                self.pacing.tick().await;
                self.ticks += 1;
                trace!("Replayed tick {} (line {})", self.ticks, self.line_no);
            }

            return Ok(Some(event));
        }
    }
}
