/*!
 * In-process adapter used for self-tests without hardware
 */

use std::collections::{BTreeSet, VecDeque};
use std::thread;
use std::time::Duration;

use log::trace;

use crate::adapter::{AdapterMode, CanAdapter};
use crate::can_frame::CanFrame;
use crate::errors::AdapterError;

/// Clock reported in `UnsupportedBitrate` errors.
const VIRTUAL_CLOCK_HZ: u32 = 48_000_000;

/// A software adapter.
///
/// In loop-back mode every sent frame is queued for `read`. Frames passed to
/// `inject` are delivered in any mode once started. Every driver call is
/// counted so callers can check how the adapter was driven.
#[derive(Debug, Clone)]
pub struct VirtualAdapter {
    accepted_bitrates: BTreeSet<u32>,
    supported_modes: Vec<AdapterMode>,
    bitrate: Option<u32>,
    mode: Option<AdapterMode>,
    inbound: VecDeque<CanFrame>,
    sent: Vec<CanFrame>,
    pub stop_calls: usize,
    pub set_bitrate_calls: usize,
    pub start_calls: usize,
    pub read_calls: usize,
}

impl Default for VirtualAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualAdapter {
    /// Accepts the usual classic CAN rates and every mode.
    pub fn new() -> Self {
        Self::with_bitrates(&[10_000, 20_000, 50_000, 125_000, 250_000, 500_000, 800_000, 1_000_000])
    }

    pub fn with_bitrates(bitrates: &[u32]) -> Self {
        VirtualAdapter {
            accepted_bitrates: bitrates.iter().copied().collect(),
            supported_modes: vec![AdapterMode::Normal, AdapterMode::LoopBack, AdapterMode::ListenOnly],
            bitrate: None,
            mode: None,
            inbound: VecDeque::new(),
            sent: Vec::new(),
            stop_calls: 0,
            set_bitrate_calls: 0,
            start_calls: 0,
            read_calls: 0,
        }
    }

    /// Restrict the modes `start` accepts.
    pub fn with_modes(mut self, modes: &[AdapterMode]) -> Self {
        self.supported_modes = modes.to_vec();
        self
    }

    /// Queue a frame as if it arrived from the bus.
    pub fn inject(&mut self, frame: CanFrame) {
        self.inbound.push_back(frame);
    }

    /// Frames accepted by `send`, in order.
    pub fn sent(&self) -> &[CanFrame] {
        &self.sent
    }

    pub fn bitrate(&self) -> Option<u32> {
        self.bitrate
    }

    /// Mode of the running adapter, `None` when stopped.
    pub fn mode(&self) -> Option<AdapterMode> {
        self.mode
    }

    pub fn is_started(&self) -> bool {
        self.mode.is_some()
    }
}

impl CanAdapter for VirtualAdapter {
    fn stop(&mut self) {
        self.stop_calls += 1;
        self.mode = None;
    }

    fn set_bitrate(&mut self, bitrate: u32) -> Result<(), AdapterError> {
        self.set_bitrate_calls += 1;
        if !self.accepted_bitrates.contains(&bitrate) {
            return Err(AdapterError::UnsupportedBitrate {
                bitrate,
                clock: VIRTUAL_CLOCK_HZ,
            });
        }
        self.bitrate = Some(bitrate);
        Ok(())
    }

    fn start(&mut self, mode: AdapterMode) -> Result<(), AdapterError> {
        self.start_calls += 1;
        if !self.supported_modes.contains(&mode) {
            return Err(AdapterError::UnsupportedMode(mode));
        }
        self.mode = Some(mode);
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), AdapterError> {
        match self.mode {
            None => Err(AdapterError::NotStarted),
            Some(AdapterMode::ListenOnly) => Err(AdapterError::UnsupportedMode(AdapterMode::ListenOnly)),
            Some(mode) => {
                self.sent.push(*frame);
                if mode == AdapterMode::LoopBack {
                    trace!("echo {}", frame);
                    self.inbound.push_back(*frame);
                }
                Ok(())
            }
        }
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<CanFrame>, AdapterError> {
        self.read_calls += 1;
        if self.mode.is_none() {
            return Err(AdapterError::NotStarted);
        }
        match self.inbound.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => {
                // Behave like a real receive that waits out its timeout
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}
