use crate::error::{EwelinkError, Result};
use crate::types::{DeviceId, SwitchParams};
use tokio::sync::broadcast;

/// Push event received on the WebSocket session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Device went online or offline
    Online { device_id: DeviceId, online: bool },

    /// Device reported new switch state
    StateChanged {
        device_id: DeviceId,
        params: SwitchParams,
    },
}

/// Receiver for device events
pub struct EventReceiver {
    rx: broadcast::Receiver<DeviceEvent>,
}

impl EventReceiver {
    /// Create a new event receiver
    pub(crate) fn new(rx: broadcast::Receiver<DeviceEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    ///
    /// Fails with [`EwelinkError::ConnectionClosed`] once the session is gone.
    pub async fn recv(&mut self) -> Result<DeviceEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EwelinkError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                EwelinkError::InvalidResponse(format!("event receiver lagged by {} messages", n))
            }
        })
    }

    /// Try to receive an event without blocking
    ///
    /// Returns `None` if no event is available.
    pub fn try_recv(&mut self) -> Result<Option<DeviceEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(EwelinkError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(EwelinkError::InvalidResponse(
                format!("event receiver lagged by {} messages", n),
            )),
        }
    }
}
