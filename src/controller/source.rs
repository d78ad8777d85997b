//! Trait abstraction for the wheel event stream to enable testing

use async_trait::async_trait;

use super::mapper::InputEvent;
use crate::error::Result;

/// Source of wheel input events for the control loop.
#[async_trait]
pub trait InputSource: Send {
    /// Waits for the next relevant event.
    ///
    /// Must be cancel-safe: the control loop drops this future whenever a
    /// tick or command wins the race.
    async fn next_event(&mut self) -> Result<InputEvent>;

    /// Releases exclusive access to the device, if held.
    fn release(&mut self) -> Result<()>;
}
