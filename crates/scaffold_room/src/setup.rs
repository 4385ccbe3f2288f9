//! One room at a time: a lock-free guard over the guest's setup state.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::RoomError;

const IDLE: u8 = 0;
const SETTING_UP: u8 = 1;
const READY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    Idle,
    SettingUp,
    Ready,
}

impl SetupState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            SETTING_UP => Self::SettingUp,
            READY => Self::Ready,
            _ => Self::Idle,
        }
    }
}

/// Moves `Idle -> SettingUp -> Ready` with compare-and-set, so only one
/// caller can be setting up at a time.
#[derive(Debug, Default)]
pub struct SetupGuard {
    state: AtomicU8,
}

impl SetupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SetupState {
        SetupState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Claim the guard for a new setup.
    pub fn try_begin(&self) -> Result<SetupTicket<'_>, RoomError> {
        match self
            .state
            .compare_exchange(IDLE, SETTING_UP, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(SetupTicket {
                guard: self,
                completed: false,
            }),
            Err(READY) => Err(RoomError::AlreadyJoined),
            Err(_) => Err(RoomError::SetupInProgress),
        }
    }

    /// Return to `Idle` after leaving a room.
    pub fn reset(&self) {
        self.state.store(IDLE, Ordering::Release);
    }
}

/// Held while a setup runs. Dropping it without [`complete`](Self::complete)
/// returns the guard to `Idle`.
#[derive(Debug)]
pub struct SetupTicket<'a> {
    guard: &'a SetupGuard,
    completed: bool,
}

impl SetupTicket<'_> {
    pub fn complete(mut self) {
        self.guard.state.store(READY, Ordering::Release);
        self.completed = true;
    }
}

impl Drop for SetupTicket<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.guard.state.store(IDLE, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_setup_is_rejected() {
        let guard = SetupGuard::new();
        let ticket = guard.try_begin().unwrap();
        assert_eq!(guard.state(), SetupState::SettingUp);
        assert!(matches!(guard.try_begin(), Err(RoomError::SetupInProgress)));
        drop(ticket);
    }

    #[test]
    fn test_abandoned_ticket_resets() {
        let guard = SetupGuard::new();
        drop(guard.try_begin().unwrap());
        assert_eq!(guard.state(), SetupState::Idle);
        assert!(guard.try_begin().is_ok());
    }

    #[test]
    fn test_complete_then_reset() {
        let guard = SetupGuard::new();
        guard.try_begin().unwrap().complete();
        assert_eq!(guard.state(), SetupState::Ready);
        assert!(matches!(guard.try_begin(), Err(RoomError::AlreadyJoined)));

        guard.reset();
        assert_eq!(guard.state(), SetupState::Idle);
    }

    #[test]
    fn test_concurrent_claims() {
        let guard = SetupGuard::new();
        let winners = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| match guard.try_begin() {
                        Ok(ticket) => {
                            // Keep the guard in SettingUp for the other threads.
                            std::mem::forget(ticket);
                            true
                        }
                        Err(_) => false,
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });
        assert_eq!(winners, 1);
        assert_eq!(guard.state(), SetupState::SettingUp);
    }
}
