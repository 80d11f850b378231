/*!
 * Driver-facing interface of a CAN adapter
 */

use std::time::Duration;

use crate::can_frame::CanFrame;
use crate::errors::AdapterError;

/// Operating mode requested when an adapter is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterMode {
    /// Frames go to the bus and need a live peer to be acknowledged
    Normal,
    /// Transmitted frames are returned as received, no bus needed
    #[default]
    LoopBack,
    /// Receive only, no ACKs are sent
    ListenOnly,
}

/// A USB-to-CAN adapter (or anything that behaves like one).
///
/// `stop` must be safe to call in any state, including before the first
/// `start`. `read` returns `Ok(None)` when nothing arrives within `timeout`.
pub trait CanAdapter {
    fn stop(&mut self);

    fn set_bitrate(&mut self, bitrate: u32) -> Result<(), AdapterError>;

    fn start(&mut self, mode: AdapterMode) -> Result<(), AdapterError>;

    fn send(&mut self, frame: &CanFrame) -> Result<(), AdapterError>;

    fn read(&mut self, timeout: Duration) -> Result<Option<CanFrame>, AdapterError>;
}

impl<A: CanAdapter + ?Sized> CanAdapter for &mut A {
    fn stop(&mut self) {
        (**self).stop()
    }

    fn set_bitrate(&mut self, bitrate: u32) -> Result<(), AdapterError> {
        (**self).set_bitrate(bitrate)
    }

    fn start(&mut self, mode: AdapterMode) -> Result<(), AdapterError> {
        (**self).start(mode)
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), AdapterError> {
        (**self).send(frame)
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<CanFrame>, AdapterError> {
        (**self).read(timeout)
    }
}

impl<A: CanAdapter + ?Sized> CanAdapter for Box<A> {
    fn stop(&mut self) {
        (**self).stop()
    }

    fn set_bitrate(&mut self, bitrate: u32) -> Result<(), AdapterError> {
        (**self).set_bitrate(bitrate)
    }

    fn start(&mut self, mode: AdapterMode) -> Result<(), AdapterError> {
        (**self).start(mode)
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), AdapterError> {
        (**self).send(frame)
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<CanFrame>, AdapterError> {
        (**self).read(timeout)
    }
}
