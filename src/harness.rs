/*!
 * Transmit/receive round trip against one adapter
 *
 * A run opens a [`Session`], then for a fixed number of ticks polls for
 * inbound frames and, once per tick, sends the next frame of a circular
 * outbound sequence. Inbound frames are handed to a [`FrameClassifier`].
 */

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::adapter::{AdapterMode, CanAdapter};
use crate::can_decoder::SignalsMap;
use crate::can_frame::CanFrame;
use crate::errors::ConfigurationError;
use crate::session::Session;

/// Knobs of a round trip run. The default is the reference scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub bitrate: u32,
    pub mode: AdapterMode,
    /// Number of transmit ticks before the run ends
    pub ticks: usize,
    pub tick: Duration,
    /// Upper bound for a single receive call
    pub poll_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            bitrate: 1_000_000,
            mode: AdapterMode::LoopBack,
            ticks: 6,
            tick: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(1),
        }
    }
}

impl HarnessConfig {
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn with_mode(mut self, mode: AdapterMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_ticks(mut self, ticks: usize) -> Self {
        self.ticks = ticks;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }
}

/// What a classifier made of an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Matched {
        label: String,
        /// Decoded values, for classifiers that know the message layout
        signals: Option<SignalsMap>,
    },
    Unclassified,
}

impl Classification {
    pub fn matched(label: impl Into<String>) -> Self {
        Classification::Matched {
            label: label.into(),
            signals: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Classification::Matched { .. })
    }
}

pub trait FrameClassifier {
    fn classify(&self, frame: &CanFrame) -> Classification;
}

impl<F> FrameClassifier for F
where
    F: Fn(&CanFrame) -> Classification,
{
    fn classify(&self, frame: &CanFrame) -> Classification {
        self(frame)
    }
}

/// Matches frames by identifier (EFF bit included, RTR/ERR ignored).
#[derive(Debug, Clone, Default)]
pub struct IdClassifier {
    expected: Vec<(u32, String)>,
}

impl IdClassifier {
    /// Expect every identifier that appears in `frames`.
    pub fn from_frames(frames: &[CanFrame]) -> Self {
        let mut classifier = IdClassifier::default();
        for frame in frames {
            let id = frame.message_id();
            if !classifier.expected.iter().any(|(known, _)| *known == id) {
                classifier.expected.push((id, format!("0x{:X}", frame.arbitration_id())));
            }
        }
        classifier
    }

    /// Expect `id` under `label`, replacing any label it already has.
    pub fn with_label(mut self, id: u32, label: impl Into<String>) -> Self {
        let label = label.into();
        match self.expected.iter_mut().find(|(known, _)| *known == id) {
            Some(entry) => entry.1 = label,
            None => self.expected.push((id, label)),
        }
        self
    }
}

impl FrameClassifier for IdClassifier {
    fn classify(&self, frame: &CanFrame) -> Classification {
        let id = frame.message_id();
        self.expected
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, label)| Classification::matched(label.clone()))
            .unwrap_or(Classification::Unclassified)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transmission {
    /// 1-based tick on which the frame went out
    pub tick: usize,
    /// Position in the outbound sequence
    pub index: usize,
    pub frame: CanFrame,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reception {
    pub frame: CanFrame,
    pub classification: Classification,
}

/// Everything a run sent and received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub transmissions: Vec<Transmission>,
    /// Non-error frames, in arrival order
    pub receptions: Vec<Reception>,
    pub error_frames: usize,
    pub read_failures: usize,
}

impl RunReport {
    pub fn sent_indices(&self) -> Vec<usize> {
        self.transmissions.iter().map(|t| t.index).collect()
    }

    pub fn send_failures(&self) -> usize {
        self.transmissions.iter().filter(|t| !t.ok).count()
    }

    pub fn matched(&self) -> impl Iterator<Item = &Reception> {
        self.receptions
            .iter()
            .filter(|r| r.classification.is_matched())
    }

    pub fn unclassified(&self) -> impl Iterator<Item = &Reception> {
        self.receptions
            .iter()
            .filter(|r| !r.classification.is_matched())
    }
}

/// An outbound sequence plus the classifier for what comes back.
pub struct RoundTrip<C> {
    outbound: Vec<CanFrame>,
    classifier: C,
    config: HarnessConfig,
}

impl<C: FrameClassifier> RoundTrip<C> {
    pub fn new(outbound: Vec<CanFrame>, classifier: C) -> Self {
        RoundTrip {
            outbound,
            classifier,
            config: HarnessConfig::default(),
        }
    }

    pub fn with_config(mut self, config: HarnessConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn outbound(&self) -> &[CanFrame] {
        &self.outbound
    }

    /// Drive `adapter` through setup, the tick loop and teardown.
    ///
    /// Setup failures abort the run. The adapter is stopped on every path.
    pub fn run<A: CanAdapter + ?Sized>(&self, adapter: &mut A) -> Result<RunReport, ConfigurationError> {
        let mut session = Session::open(adapter, self.config.bitrate, self.config.mode)?;
        let mut report = RunReport::default();
        if self.outbound.is_empty() {
            warn!("Outbound sequence is empty, nothing will be sent");
        }

        let mut tick = 0;
        let mut deadline = Instant::now() + self.config.tick;
        while tick < self.config.ticks {
            let now = Instant::now();
            if now >= deadline {
                tick += 1;
                self.transmit(&mut session, tick, &mut report);
                // An overlong poll pushes the next tick back instead of bunching sends
                deadline = Instant::now() + self.config.tick;
                continue;
            }

            let timeout = self.config.poll_timeout.min(deadline - now);
            match session.read(timeout) {
                Ok(Some(frame)) => self.receive(frame, &mut report),
                Ok(None) => {}
                Err(e) => {
                    warn!("Read failed: {}", e);
                    report.read_failures += 1;
                    thread::sleep(timeout);
                }
            }
        }

        session.close();
        info!(
            "Sent {} frames, received {} ({} unclassified, {} error frames)",
            report.transmissions.len(),
            report.receptions.len(),
            report.unclassified().count(),
            report.error_frames
        );
        Ok(report)
    }

    fn transmit<A: CanAdapter + ?Sized>(&self, session: &mut Session<'_, A>, tick: usize, report: &mut RunReport) {
        if self.outbound.is_empty() {
            return;
        }
        let index = (tick - 1) % self.outbound.len();
        let frame = self.outbound[index];
        let ok = match session.send(&frame) {
            Ok(()) => {
                info!("TX {}", frame);
                true
            }
            Err(e) => {
                warn!("TX failed {}: {}", frame, e);
                false
            }
        };
        report.transmissions.push(Transmission {
            tick,
            index,
            frame,
            ok,
        });
    }

    fn receive(&self, frame: CanFrame, report: &mut RunReport) {
        if frame.is_error() {
            debug!("Error frame {}", frame);
            report.error_frames += 1;
            return;
        }
        let classification = self.classifier.classify(&frame);
        match &classification {
            Classification::Matched {
                label,
                signals: Some(signals),
            } => info!("RX {} {} {}", label, frame, signals),
            Classification::Matched { label, signals: None } => info!("RX {} {}", label, frame),
            Classification::Unclassified => warn!("RX unclassified {}", frame),
        }
        report.receptions.push(Reception {
            frame,
            classification,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can_frame::{CAN_EFF_FLAG, CAN_ERR_FLAG, CAN_RTR_FLAG};
    use crate::virtual_adapter::VirtualAdapter;

    fn fast_config() -> HarnessConfig {
        HarnessConfig::default()
            .with_tick(Duration::from_millis(20))
            .with_poll_timeout(Duration::from_millis(20))
    }

    fn eight_frames() -> Vec<CanFrame> {
        (0..8u32).map(|i| CanFrame::new(0x100 + i, &[i as u8])).collect()
    }

    #[test]
    fn test_default_config_is_reference_scenario() {
        let config = HarnessConfig::default();
        assert_eq!(config.bitrate, 1_000_000);
        assert_eq!(config.mode, AdapterMode::LoopBack);
        assert_eq!(config.ticks, 6);
        assert_eq!(config.tick, Duration::from_secs(1));
        assert_eq!(config.poll_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_six_ticks_send_indices_zero_to_five() {
        let frames = eight_frames();
        let harness = RoundTrip::new(frames.clone(), IdClassifier::from_frames(&frames)).with_config(fast_config());
        let mut adapter = VirtualAdapter::new();
        let report = harness.run(&mut adapter).unwrap();

        assert_eq!(report.sent_indices(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(
            report.transmissions.iter().map(|t| t.tick).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5, 6]
        );
        assert_eq!(adapter.sent(), &frames[..6]);
        assert_eq!(report.send_failures(), 0);
        // at least one poll per tick
        assert!(adapter.read_calls >= 6);
    }

    #[test]
    fn test_short_sequence_wraps() {
        let frames = eight_frames()[..4].to_vec();
        let harness = RoundTrip::new(frames.clone(), IdClassifier::from_frames(&frames)).with_config(fast_config());
        let report = harness.run(&mut VirtualAdapter::new()).unwrap();
        assert_eq!(report.sent_indices(), vec![0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn test_loopback_echoes_are_classified() {
        let frames = eight_frames();
        let harness = RoundTrip::new(frames.clone(), IdClassifier::from_frames(&frames)).with_config(fast_config());
        let report = harness.run(&mut VirtualAdapter::new()).unwrap();

        // The sixth echo arrives after the last tick
        assert_eq!(report.receptions.len(), 5);
        assert_eq!(report.matched().count(), 5);
        assert_eq!(report.unclassified().count(), 0);
        assert_eq!(
            report.receptions[0].classification,
            Classification::matched("0x100")
        );
    }

    #[test]
    fn test_bitrate_failure_never_starts_and_stops_once() {
        let frames = eight_frames();
        let harness = RoundTrip::new(frames.clone(), IdClassifier::from_frames(&frames)).with_config(fast_config());
        let mut adapter = VirtualAdapter::with_bitrates(&[500_000]);

        let result = harness.run(&mut adapter);
        assert!(matches!(
            result,
            Err(ConfigurationError::Bitrate { bitrate: 1_000_000, .. })
        ));
        assert_eq!(adapter.start_calls, 0);
        assert_eq!(adapter.stop_calls, 1);
        assert!(adapter.sent().is_empty());
    }

    #[test]
    fn test_successful_run_leaves_adapter_stopped() {
        let frames = eight_frames();
        let harness = RoundTrip::new(frames.clone(), IdClassifier::from_frames(&frames)).with_config(fast_config());
        let mut adapter = VirtualAdapter::new();
        harness.run(&mut adapter).unwrap();
        assert!(!adapter.is_started());
        assert_eq!(adapter.start_calls, 1);

        // A second run against the same adapter configures cleanly
        harness.run(&mut adapter).unwrap();
        assert_eq!(adapter.start_calls, 2);
    }

    #[test]
    fn test_foreign_frame_is_unclassified() {
        let frames = eight_frames();
        let harness = RoundTrip::new(frames.clone(), IdClassifier::from_frames(&frames)).with_config(fast_config());
        let mut adapter = VirtualAdapter::new();
        let foreign = CanFrame::new(0x7E0, &[0x02, 0x01, 0x0C]);
        adapter.inject(foreign);

        let report = harness.run(&mut adapter).unwrap();
        let unclassified: Vec<_> = report.unclassified().collect();
        assert_eq!(unclassified.len(), 1);
        assert_eq!(unclassified[0].frame, foreign);
    }

    #[test]
    fn test_error_frames_are_filtered() {
        let frames = vec![
            CanFrame::new(0x7FF | CAN_ERR_FLAG, &[1, 2]),
            CanFrame::new(0x123, &[]),
        ];
        let harness = RoundTrip::new(frames.clone(), IdClassifier::from_frames(&frames))
            .with_config(fast_config().with_ticks(4));
        let report = harness.run(&mut VirtualAdapter::new()).unwrap();

        // echoes of indices 0, 1, 0 are read back; the error ones are only counted
        assert_eq!(report.error_frames, 2);
        assert_eq!(report.receptions.len(), 1);
        assert_eq!(report.receptions[0].frame.can_id, 0x123);
    }

    #[test]
    fn test_id_classifier_keeps_extended_apart() {
        let frames = vec![
            CanFrame::new(0x7FF, &[]),
            CanFrame::new(0x0000_07FF | CAN_EFF_FLAG, &[]),
        ];
        let classifier = IdClassifier::from_frames(&frames);
        assert_eq!(classifier.classify(&frames[0]), Classification::matched("0x7FF"));
        assert!(classifier.classify(&frames[1]).is_matched());
        // RTR does not change the identity of a frame
        assert!(classifier
            .classify(&CanFrame::new(0x7FF | CAN_RTR_FLAG, &[]))
            .is_matched());
        assert_eq!(
            classifier.classify(&CanFrame::new(0x12345678 | CAN_EFF_FLAG, &[])),
            Classification::Unclassified
        );
    }

    #[test]
    fn test_id_classifier_labels() {
        let frames = vec![CanFrame::new(0x100, &[]), CanFrame::new(0x200, &[])];
        let classifier = IdClassifier::from_frames(&frames)
            .with_label(0x100, "heartbeat")
            .with_label(0x300, "status");
        assert_eq!(classifier.classify(&frames[0]), Classification::matched("heartbeat"));
        assert_eq!(classifier.classify(&frames[1]), Classification::matched("0x200"));
        assert_eq!(
            classifier.classify(&CanFrame::new(0x300, &[1])),
            Classification::matched("status")
        );
    }

    #[test]
    fn test_closure_classifier() {
        let frames = vec![CanFrame::new(0x42, &[1])];
        let classify = |frame: &CanFrame| {
            if frame.can_id == 0x42 {
                Classification::matched("answer")
            } else {
                Classification::Unclassified
            }
        };
        let harness = RoundTrip::new(frames, classify).with_config(fast_config().with_ticks(2));
        let report = harness.run(&mut VirtualAdapter::new()).unwrap();
        assert_eq!(report.matched().count(), 1);
    }

    #[test]
    fn test_empty_sequence_still_ticks() {
        let harness = RoundTrip::new(Vec::new(), IdClassifier::default()).with_config(fast_config().with_ticks(2));
        let mut adapter = VirtualAdapter::new();
        let start = Instant::now();
        let report = harness.run(&mut adapter).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(report.transmissions.is_empty());
        assert!(adapter.sent().is_empty());
    }

    #[test]
    fn test_normal_mode_without_peer_receives_nothing() {
        let frames = eight_frames();
        let harness = RoundTrip::new(frames.clone(), IdClassifier::from_frames(&frames))
            .with_config(fast_config().with_mode(AdapterMode::Normal).with_ticks(3));
        let report = harness.run(&mut VirtualAdapter::new()).unwrap();
        assert_eq!(report.transmissions.len(), 3);
        assert!(report.receptions.is_empty());
    }
}
