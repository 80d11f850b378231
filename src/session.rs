/*!
 * Scoped ownership of a running adapter
 */

use std::time::Duration;

use log::{debug, info, warn};

use crate::adapter::{AdapterMode, CanAdapter};
use crate::can_frame::CanFrame;
use crate::errors::{AdapterError, ConfigurationError};

/// Lifecycle of a session: Closed -> Configured -> Started -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Configured,
    Started,
    Stopped,
}

/// Exclusive use of an adapter between setup and teardown.
///
/// Dropping a session that was configured or started stops the adapter, so
/// every exit path leaves the device ready for the next session.
pub struct Session<'a, A: CanAdapter + ?Sized> {
    adapter: &'a mut A,
    state: SessionState,
}

impl<'a, A: CanAdapter + ?Sized> Session<'a, A> {
    pub fn new(adapter: &'a mut A) -> Self {
        Session {
            adapter,
            state: SessionState::Closed,
        }
    }

    /// Recover, configure and start in one go.
    pub fn open(adapter: &'a mut A, bitrate: u32, mode: AdapterMode) -> Result<Self, ConfigurationError> {
        let mut session = Session::new(adapter);
        session.recover();
        session.configure(bitrate)?;
        session.start(mode)?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Stop whatever a previous, uncleanly finished user left running.
    pub fn recover(&mut self) {
        self.adapter.stop();
        self.state = SessionState::Stopped;
    }

    pub fn configure(&mut self, bitrate: u32) -> Result<(), ConfigurationError> {
        self.adapter
            .set_bitrate(bitrate)
            .map_err(|source| ConfigurationError::Bitrate { bitrate, source })?;
        info!("Bit rate set to {} bit/s", bitrate);
        self.state = SessionState::Configured;
        Ok(())
    }

    pub fn start(&mut self, mode: AdapterMode) -> Result<(), ConfigurationError> {
        if self.state != SessionState::Configured {
            return Err(ConfigurationError::NotConfigured);
        }
        self.adapter
            .start(mode)
            .map_err(|source| ConfigurationError::Start { mode, source })?;
        info!("Started in {:?} mode", mode);
        self.state = SessionState::Started;
        Ok(())
    }

    pub fn send(&mut self, frame: &CanFrame) -> Result<(), AdapterError> {
        if self.state != SessionState::Started {
            return Err(AdapterError::NotStarted);
        }
        self.adapter.send(frame)
    }

    /// `Ok(None)` when nothing arrived within `timeout`.
    pub fn read(&mut self, timeout: Duration) -> Result<Option<CanFrame>, AdapterError> {
        if self.state != SessionState::Started {
            return Err(AdapterError::NotStarted);
        }
        self.adapter.read(timeout)
    }

    /// Stop the adapter now instead of at end of scope.
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        match self.state {
            SessionState::Configured | SessionState::Started => {
                self.adapter.stop();
                debug!("Session stopped");
            }
            SessionState::Closed => warn!("Session dropped before setup"),
            SessionState::Stopped => {}
        }
        self.state = SessionState::Stopped;
    }
}

impl<A: CanAdapter + ?Sized> Drop for Session<'_, A> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_adapter::VirtualAdapter;

    #[test]
    fn test_open_and_drop_stops_adapter() {
        let mut adapter = VirtualAdapter::new();
        {
            let session = Session::open(&mut adapter, 1_000_000, AdapterMode::LoopBack).unwrap();
            assert_eq!(session.state(), SessionState::Started);
        }
        // recovery stop plus teardown stop
        assert_eq!(adapter.stop_calls, 2);
        assert!(!adapter.is_started());
    }

    #[test]
    fn test_close_is_explicit_teardown() {
        let mut adapter = VirtualAdapter::new();
        let session = Session::open(&mut adapter, 500_000, AdapterMode::Normal).unwrap();
        session.close();
        assert_eq!(adapter.stop_calls, 2);
    }

    #[test]
    fn test_bitrate_failure_never_starts() {
        let mut adapter = VirtualAdapter::with_bitrates(&[500_000]);
        let result = Session::open(&mut adapter, 1_000_000, AdapterMode::LoopBack).map(|_| ());
        assert!(matches!(
            result,
            Err(ConfigurationError::Bitrate { bitrate: 1_000_000, .. })
        ));
        assert_eq!(adapter.start_calls, 0);
        assert_eq!(adapter.stop_calls, 1);
    }

    #[test]
    fn test_start_failure_still_stops() {
        let mut adapter = VirtualAdapter::new().with_modes(&[AdapterMode::Normal]);
        let result = Session::open(&mut adapter, 1_000_000, AdapterMode::ListenOnly).map(|_| ());
        assert!(matches!(result, Err(ConfigurationError::Start { .. })));
        assert_eq!(adapter.start_calls, 1);
        assert_eq!(adapter.stop_calls, 2);
    }

    #[test]
    fn test_start_requires_configure() {
        let mut adapter = VirtualAdapter::new();
        let mut session = Session::new(&mut adapter);
        session.recover();
        assert!(matches!(
            session.start(AdapterMode::LoopBack),
            Err(ConfigurationError::NotConfigured)
        ));
        assert!(matches!(
            session.send(&CanFrame::default()),
            Err(AdapterError::NotStarted)
        ));
        drop(session);
        assert_eq!(adapter.start_calls, 0);
    }

    #[test]
    fn test_send_and_read_through_session() {
        let mut adapter = VirtualAdapter::new();
        let mut session = Session::open(&mut adapter, 1_000_000, AdapterMode::LoopBack).unwrap();
        let frame = CanFrame::new(0x7FF, &[0xAA]);
        session.send(&frame).unwrap();
        assert_eq!(session.read(Duration::ZERO).unwrap(), Some(frame));
        assert_eq!(session.read(Duration::from_millis(1)).unwrap(), None);
    }

    #[test]
    fn test_works_with_trait_objects() {
        let mut adapter: Box<dyn CanAdapter> = Box::new(VirtualAdapter::new());
        let session = Session::open(adapter.as_mut(), 1_000_000, AdapterMode::LoopBack).unwrap();
        assert_eq!(session.state(), SessionState::Started);
    }
}
