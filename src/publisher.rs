//! The publisher loop.
//!
//! One cooperative thread drives every tick:
//!
//! 1. Producing: pull a frame from the source; `None` skips straight to pacing
//! 2. Transforming: mirror the frame if the flip controller says so
//! 3. Publishing: build a wire message with the next sequence id and hand it
//!    to the transport, then feed the optional preview
//! 4. Paced: drain pending control values, sleep out the rest of the period
//!
//! The shutdown flag is polled between ticks; a tick in progress always runs
//! to completion. Per-frame problems (empty reads, unsupported layouts) are
//! logged and skipped. Only a transport failure ends the loop with an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{FramecastError, Result};
use crate::flip::FlipController;
use crate::frame::mirror_horizontal;
use crate::message;
use crate::preview::Preview;
use crate::source::FrameSource;
use crate::transport::Transport;

/// Longest single sleep while pacing, so shutdown is noticed promptly at low rates.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Process-wide "keep running" flag. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Fixed-period pacer. An overrun tick starts the next one immediately and
/// resets the schedule instead of bursting to catch up.
#[derive(Debug)]
pub struct Rate {
    period: Duration,
    next: Instant,
}

impl Rate {
    /// Slowest supported rate: one frame every ~17 minutes.
    pub const MIN_HZ: f64 = 1e-3;
    pub const MAX_HZ: f64 = 10_000.0;

    pub fn from_hz(hz: f64) -> Result<Self> {
        if !(Self::MIN_HZ..=Self::MAX_HZ).contains(&hz) {
            return Err(FramecastError::InvalidConfig(format!(
                "frequency must be between {} and {} Hz, got {}",
                Self::MIN_HZ,
                Self::MAX_HZ,
                hz
            )));
        }
        let period = Duration::try_from_secs_f64(1.0 / hz).map_err(|e| {
            FramecastError::InvalidConfig(format!(
                "frequency {} Hz has no valid period: {}",
                hz, e
            ))
        })?;
        Ok(Self {
            period,
            next: Instant::now(),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Time left until the next deadline, advancing the schedule.
    /// `None` means this tick overran and the next one should start now.
    fn advance(&mut self, now: Instant) -> Option<Duration> {
        self.next += self.period;
        if self.next > now {
            Some(self.next - now)
        } else {
            self.next = now;
            None
        }
    }

    /// Sleep out the remainder of the current period. Returns `false` on overrun.
    pub fn sleep(&mut self, shutdown: &ShutdownFlag) -> bool {
        let Some(mut remaining) = self.advance(Instant::now()) else {
            return false;
        };
        while !remaining.is_zero() && !shutdown.is_requested() {
            let step = remaining.min(SHUTDOWN_POLL);
            std::thread::sleep(step);
            remaining = self.next.saturating_duration_since(Instant::now());
        }
        true
    }
}

/// What a single tick did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Published { frame_id: u64 },
    /// The source had no frame ready.
    Empty,
    /// The frame could not be converted and was dropped.
    Skipped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub ticks: u64,
    pub published: u64,
    pub empty: u64,
    pub skipped: u64,
    pub control_messages: u64,
    pub overruns: u64,
}

pub struct Publisher<S, T> {
    source: S,
    transport: T,
    flip: FlipController,
    rate: Rate,
    next_sequence: u64,
    preview: Option<Preview>,
    stats: PublisherStats,
}

impl<S: FrameSource, T: Transport> Publisher<S, T> {
    pub fn new(source: S, transport: T, flip: FlipController, frequency_hz: f64) -> Result<Self> {
        Ok(Self {
            source,
            transport,
            flip,
            rate: Rate::from_hz(frequency_hz)?,
            next_sequence: 1,
            preview: None,
            stats: PublisherStats::default(),
        })
    }

    pub fn with_preview(mut self, preview: Preview) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }

    pub fn flip(&self) -> &FlipController {
        &self.flip
    }

    /// Run one full cycle without pacing.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        self.stats.ticks += 1;
        let outcome = self.produce()?;
        self.drain_control();
        Ok(outcome)
    }

    fn produce(&mut self) -> Result<TickOutcome> {
        let Some(mut frame) = self.source.next_frame() else {
            self.stats.empty += 1;
            return Ok(TickOutcome::Empty);
        };

        if self.flip.get() {
            mirror_horizontal(&mut frame);
        }

        let frame_id = self.next_sequence;
        let msg = match message::build(&frame, frame_id) {
            Ok(msg) => msg,
            Err(e) => {
                self.stats.skipped += 1;
                log::warn!("skipping frame from {}: {}", self.source.describe(), e);
                return Ok(TickOutcome::Skipped);
            }
        };
        self.next_sequence += 1;

        log::debug!("Publishing image #{}", frame_id);
        self.transport.publish(msg)?;
        self.stats.published += 1;

        if let Some(preview) = self.preview.as_mut() {
            preview.render(&frame);
        }
        Ok(TickOutcome::Published { frame_id })
    }

    /// Apply every queued control value in arrival order; the last one sticks.
    fn drain_control(&mut self) {
        while let Some(value) = self.transport.try_recv_control() {
            self.stats.control_messages += 1;
            self.flip.set(value);
        }
    }

    /// Tick at the configured rate until shutdown is requested.
    ///
    /// Consumes the publisher so the source (and any device handle it owns) is
    /// released exactly once, on both the clean and the error path.
    pub fn run(mut self, shutdown: &ShutdownFlag) -> Result<PublisherStats> {
        log::info!(
            "publishing from {} every {:?}",
            self.source.describe(),
            self.rate.period()
        );
        let mut last_health_log = Instant::now();

        while !shutdown.is_requested() {
            if let Err(e) = self.tick() {
                log::info!("publisher stopping: {}", self.health_line());
                return Err(e);
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!("{}", self.health_line());
                last_health_log = Instant::now();
            }

            if !self.rate.sleep(shutdown) {
                self.stats.overruns += 1;
            }
        }

        log::info!(
            "shutdown requested after {} ticks: {}",
            self.stats.ticks,
            self.health_line()
        );
        Ok(self.stats)
    }

    fn health_line(&self) -> String {
        let source = self.source.stats();
        format!(
            "captured={} empty_reads={} published={} empty={} skipped={} overruns={} flip={}",
            source.frames_captured,
            source.empty_reads,
            self.stats.published,
            self.stats.empty,
            self.stats.skipped,
            self.stats.overruns,
            self.flip.get()
        )
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PixelBuffer, PixelLayout, SampleDepth};
    use crate::message::WireMessage;
    use std::collections::VecDeque;

    /// Source that replays a fixed script of frames and gaps.
    struct ScriptedSource {
        script: VecDeque<Option<PixelBuffer>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Option<PixelBuffer>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Option<PixelBuffer> {
            self.script.pop_front().flatten()
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Vec<WireMessage>,
        control: VecDeque<bool>,
        fail: bool,
    }

    impl Transport for RecordingTransport {
        fn publish(&mut self, message: WireMessage) -> Result<()> {
            if self.fail {
                return Err(FramecastError::TransportPublish("down".into()));
            }
            self.sent.push(message);
            Ok(())
        }

        fn try_recv_control(&mut self) -> Option<bool> {
            self.control.pop_front()
        }
    }

    fn row(pixels: &[u8]) -> PixelBuffer {
        PixelBuffer::tight(pixels.len() as u32, 1, PixelLayout::MONO8, pixels.to_vec()).unwrap()
    }

    fn publisher(
        script: Vec<Option<PixelBuffer>>,
    ) -> Publisher<ScriptedSource, RecordingTransport> {
        Publisher::new(
            ScriptedSource::new(script),
            RecordingTransport::default(),
            FlipController::default(),
            100.0,
        )
        .unwrap()
    }

    #[test]
    fn frame_ids_ignore_empty_ticks() {
        let f = || Some(row(&[1, 2, 3]));
        let mut p = publisher(vec![f(), None, None, f(), f()]);
        let outcomes: Vec<_> = (0..5).map(|_| p.tick().unwrap()).collect();

        assert_eq!(
            outcomes,
            vec![
                TickOutcome::Published { frame_id: 1 },
                TickOutcome::Empty,
                TickOutcome::Empty,
                TickOutcome::Published { frame_id: 2 },
                TickOutcome::Published { frame_id: 3 },
            ]
        );
        let ids: Vec<_> = p.transport.sent.iter().map(|m| m.frame_id()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(p.stats().empty, 2);
    }

    #[test]
    fn unsupported_frames_are_skipped_without_consuming_ids() {
        let odd = PixelBuffer::tight(1, 1, PixelLayout::new(2, SampleDepth::U8), vec![0, 0]).unwrap();
        let mut p = publisher(vec![Some(odd), Some(row(&[5]))]);

        assert_eq!(p.tick().unwrap(), TickOutcome::Skipped);
        assert_eq!(p.tick().unwrap(), TickOutcome::Published { frame_id: 1 });
        assert_eq!(p.stats().skipped, 1);
    }

    #[test]
    fn flip_applies_to_frames_after_toggle() {
        let f = || Some(row(&[1, 2, 3]));
        let mut p = publisher(vec![f(), f()]);
        p.transport.control.push_back(true);

        p.tick().unwrap();
        p.tick().unwrap();
        assert_eq!(p.transport.sent[0].data(), &[1, 2, 3]);
        assert_eq!(p.transport.sent[1].data(), &[3, 2, 1]);
    }

    #[test]
    fn last_control_value_wins() {
        let mut p = publisher(vec![None, Some(row(&[1, 2]))]);
        p.transport.control.extend([true, false]);

        p.tick().unwrap();
        assert!(!p.flip().get());
        p.tick().unwrap();
        assert_eq!(p.transport.sent[0].data(), &[1, 2]);
        assert_eq!(p.stats().control_messages, 2);
    }

    #[test]
    fn direct_set_then_reset_publishes_unflipped() {
        let mut p = publisher(vec![Some(row(&[7, 8, 9]))]);
        p.flip().set(true);
        p.flip().set(false);
        p.tick().unwrap();
        assert_eq!(p.transport.sent[0].data(), &[7, 8, 9]);
    }

    #[test]
    fn health_line_reports_source_and_publish_counts() {
        let mut p = Publisher::new(
            crate::source::SyntheticSource::new(4, 2, PixelLayout::MONO8).unwrap(),
            RecordingTransport::default(),
            FlipController::new(true),
            10.0,
        )
        .unwrap();
        p.tick().unwrap();
        p.tick().unwrap();
        assert_eq!(
            p.health_line(),
            "captured=2 empty_reads=0 published=2 empty=0 skipped=0 overruns=0 flip=true"
        );
    }

    #[test]
    fn transport_failure_is_fatal() {
        let mut p = publisher(vec![Some(row(&[1]))]);
        p.transport.fail = true;
        let err = p.tick().unwrap_err();
        assert!(matches!(err, FramecastError::TransportPublish(_)));
    }

    #[test]
    fn run_stops_when_shutdown_already_requested() {
        let p = publisher(vec![Some(row(&[1]))]);
        let shutdown = ShutdownFlag::new();
        shutdown.request();
        let stats = p.run(&shutdown).unwrap();
        assert_eq!(stats.ticks, 0);
    }

    #[test]
    fn rate_rejects_non_positive_frequency() {
        assert!(Rate::from_hz(0.0).is_err());
        assert!(Rate::from_hz(-5.0).is_err());
        assert!(Rate::from_hz(f64::NAN).is_err());
        assert!(Rate::from_hz(f64::INFINITY).is_err());
        assert_eq!(Rate::from_hz(4.0).unwrap().period(), Duration::from_millis(250));
    }

    #[test]
    fn rate_rejects_frequencies_outside_supported_range() {
        for hz in [1e-20, 1e-300, f64::MIN_POSITIVE, 1e-4, 1e9] {
            let err = Rate::from_hz(hz).unwrap_err();
            assert!(matches!(err, FramecastError::InvalidConfig(_)), "{} Hz", hz);
        }
        let slowest = Rate::from_hz(Rate::MIN_HZ).unwrap().period();
        assert!((slowest.as_secs_f64() - 1000.0).abs() < 1e-6);
        assert!(Rate::from_hz(Rate::MAX_HZ).is_ok());
    }

    #[test]
    fn rate_does_not_catch_up_after_overrun() {
        let mut rate = Rate::from_hz(10.0).unwrap();
        let start = rate.next;
        // A tick that took three periods: no sleep, schedule resets to now.
        let late = start + Duration::from_millis(300);
        assert_eq!(rate.advance(late), None);
        // The following tick gets a full period again.
        assert_eq!(rate.advance(late), Some(Duration::from_millis(100)));
    }
}
