//! Fault injection for simulated devices.
//!
//! A [`FaultPlan`] is a queue of error codes that a simulated driver returns
//! from its next primitive operations, one per call, before behaving normally
//! again. Tests use it to stage media changes and bus resets.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::status::WinError;

#[derive(Debug, Default)]
pub struct FaultPlan {
    queue: Mutex<VecDeque<WinError>>,
}

impl FaultPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `error` for the next `times` primitive operations.
    pub fn inject(&self, error: WinError, times: usize) {
        let mut queue = self.queue.lock();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Pop the next staged error, if any.
    pub fn next(&self) -> Option<WinError> {
        self.queue.lock().pop_front()
    }

    /// Fail the calling operation if an error is staged.
    pub fn check(&self) -> Result<(), WinError> {
        match self.next() {
            Some(error) => {
                log::trace!("fault plan: injecting {error}");
                Err(error)
            }
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}
