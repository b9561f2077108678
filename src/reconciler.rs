//! Keeps the two external charger controls consistent with one register.
//!
//! The host platform renders two independent controls: a boolean "charging
//! enabled" switch and a 0/5..16 A "current limit" number. Both are backed
//! by the single [`Session`], and the two operations they map to are *not*
//! the same: disabling stops charging at the hardware level and is reversed
//! automatically at the prior rate, while setting 0 A stops charging but
//! must be raised again by the user. The [`Reconciler`] routes control
//! changes to the session, drives periodic polling, and pushes every
//! confirmed [`DeviceStatus`] to the registered observers so that manual
//! intervention at the charger shows up in the UI within one poll interval.

use crate::protocol as proto;
use crate::session::{DeviceStatus, Error, Session, Transport};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Receives status snapshots after every confirmed command or poll.
///
/// Registered once at startup; failed operations never notify, so observers
/// only ever see confirmed device state.
pub trait StatusObserver: Send + Sync {
    fn on_status_changed(&self, status: &DeviceStatus);
}

/// Result of one poll cycle.
#[derive(Debug)]
pub enum PollOutcome {
    /// Status was read and pushed to the observers.
    Updated(DeviceStatus),
    /// A command currently holds the bus; the cycle was dropped rather than
    /// contending for it.
    Skipped,
    /// The read failed; observers keep the last good status.
    Failed(Error),
}

pub struct Reconciler<T> {
    session: Arc<Session<T>>,
    observers: Vec<Box<dyn StatusObserver>>,
    /// Value the number control should display, in amperes. Falls back to
    /// 16 A whenever a current-set could not be confirmed, so the UI never
    /// shows an unconfirmed value as accepted.
    displayed_limit: AtomicU8,
}

impl<T: Transport> Reconciler<T> {
    pub fn new(session: Arc<Session<T>>) -> Self {
        Self {
            session,
            observers: Vec::new(),
            displayed_limit: AtomicU8::new(proto::CurrentLimit::FALLBACK.amps()),
        }
    }

    /// Registers an observer. Meant to be called during startup, before the
    /// reconciler starts handling control changes.
    pub fn register(&mut self, observer: Box<dyn StatusObserver>) {
        self.observers.push(observer);
    }

    /// The value the number control should currently display.
    pub fn displayed_limit(&self) -> u8 {
        self.displayed_limit.load(Ordering::Relaxed)
    }

    /// Handles a change of the boolean "charging enabled" switch.
    pub fn on_switch_changed(&self, on: bool) -> Result<(), Error> {
        self.session.set_enabled(on)?;
        self.publish(self.session.status());
        Ok(())
    }

    /// Handles a change of the numeric current control.
    ///
    /// On a communication failure the displayed value reverts to the 16 A
    /// default: the set was not confirmed and freezing on the requested
    /// number would misrepresent the charger. Invalid values are rejected
    /// without touching the display.
    pub fn on_number_changed(&self, amps: u8) -> Result<(), Error> {
        match self.session.set_current(amps) {
            Ok(()) => {
                self.displayed_limit.store(amps, Ordering::Relaxed);
                self.publish(self.session.status());
                Ok(())
            }
            Err(error) => {
                if matches!(error, Error::Communication(_) | Error::NotReady(_)) {
                    log::warn!(
                        "current-set not confirmed, reverting display to {}: {error}",
                        proto::CurrentLimit::FALLBACK
                    );
                    self.displayed_limit
                        .store(proto::CurrentLimit::FALLBACK.amps(), Ordering::Relaxed);
                }
                Err(error)
            }
        }
    }

    /// One poll cycle, invoked on a fixed interval by the caller.
    ///
    /// Skips without blocking when a command is in flight; an already
    /// started transaction is never aborted.
    pub fn poll(&self) -> PollOutcome {
        match self.session.try_read_status() {
            None => {
                log::debug!("bus busy, skipping poll cycle");
                PollOutcome::Skipped
            }
            Some(Ok(status)) => {
                if let Some(limit) = status.current_limit {
                    self.displayed_limit.store(limit.amps(), Ordering::Relaxed);
                }
                self.publish(status.clone());
                PollOutcome::Updated(status)
            }
            Some(Err(error)) => {
                log::warn!("status poll failed: {error}");
                PollOutcome::Failed(error)
            }
        }
    }

    fn publish(&self, status: DeviceStatus) {
        for observer in &self.observers {
            observer.on_status_changed(&status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokio_common;
    use assert_matches::assert_matches;
    use std::collections::VecDeque;
    use std::sync::{Condvar, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeState {
        limit: u8,
        enabled: bool,
        faults: VecDeque<tokio_common::Error>,
        hold_writes: bool,
    }

    /// Minimal scripted transport; `hold_writes` parks write transactions on
    /// a condvar so tests can observe a command holding the bus.
    #[derive(Clone)]
    struct FakeTransport(Arc<(Mutex<FakeState>, Condvar)>);

    impl FakeTransport {
        fn new() -> Self {
            Self(Arc::new((
                Mutex::new(FakeState {
                    enabled: true,
                    ..FakeState::default()
                }),
                Condvar::new(),
            )))
        }

        fn push_faults(&self, n: usize) {
            let mut state = self.0.0.lock().unwrap();
            for _ in 0..n {
                state.faults.push_back(tokio_common::Error::TokioError(
                    tokio_modbus::Error::Transport(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "timed out",
                    )),
                ));
            }
        }

        fn set_hold_writes(&self, hold: bool) {
            self.0.0.lock().unwrap().hold_writes = hold;
            self.0.1.notify_all();
        }
    }

    impl Transport for FakeTransport {
        fn read_status(&mut self) -> tokio_common::Result<proto::EvStatus> {
            let mut state = self.0.0.lock().unwrap();
            if let Some(error) = state.faults.pop_front() {
                return Err(error);
            }
            let code = if state.enabled { 0xC2 } else { 0xE0 };
            Ok(proto::EvStatus {
                current_limit: proto::CurrentLimit::try_from(state.limit).unwrap(),
                state: proto::ChargerState::from(code),
                phase_currents: proto::PhaseCurrents::default(),
            })
        }

        fn write_current_limit(
            &mut self,
            limit: proto::CurrentLimit,
        ) -> tokio_common::Result<()> {
            let (lock, condvar) = (&self.0.0, &self.0.1);
            let mut state = lock.lock().unwrap();
            while state.hold_writes {
                state = condvar.wait(state).unwrap();
            }
            if let Some(error) = state.faults.pop_front() {
                return Err(error);
            }
            state.limit = limit.amps();
            Ok(())
        }

        fn write_charging_switch(
            &mut self,
            switch: proto::ChargingSwitch,
        ) -> tokio_common::Result<()> {
            let mut state = self.0.0.lock().unwrap();
            if let Some(error) = state.faults.pop_front() {
                return Err(error);
            }
            state.enabled = switch == proto::ChargingSwitch::Enabled;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingObserver(Mutex<Vec<DeviceStatus>>);

    impl StatusObserver for Arc<RecordingObserver> {
        fn on_status_changed(&self, status: &DeviceStatus) {
            self.0.lock().unwrap().push(status.clone());
        }
    }

    fn reconciler() -> (Reconciler<FakeTransport>, FakeTransport, Arc<RecordingObserver>) {
        let transport = FakeTransport::new();
        let session = Arc::new(Session::with_retry_policy(
            transport.clone(),
            tokio_common::RetryPolicy {
                backoff: Duration::ZERO,
                ..tokio_common::RetryPolicy::default()
            },
        ));
        let observer = Arc::new(RecordingObserver::default());
        let mut reconciler = Reconciler::new(session);
        reconciler.register(Box::new(Arc::clone(&observer)));
        (reconciler, transport, observer)
    }

    #[test]
    fn starts_at_the_default_display_value() {
        let (reconciler, _, _) = reconciler();
        assert_eq!(reconciler.displayed_limit(), 16);
    }

    #[test]
    fn poll_pushes_status_to_observers() {
        let (reconciler, transport, observer) = reconciler();
        transport.0.0.lock().unwrap().limit = 10;

        assert_matches!(reconciler.poll(), PollOutcome::Updated(_));
        let seen = observer.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].current_limit.unwrap().amps(), 10);
        assert_eq!(seen[0].enabled, Some(true));
        drop(seen);
        assert_eq!(reconciler.displayed_limit(), 10);
    }

    #[test]
    fn failed_poll_does_not_notify() {
        let (reconciler, transport, observer) = reconciler();
        transport.push_faults(3);

        assert_matches!(reconciler.poll(), PollOutcome::Failed(Error::Communication(_)));
        assert!(observer.0.lock().unwrap().is_empty());
        assert_eq!(reconciler.displayed_limit(), 16);
    }

    #[test]
    fn switch_change_flows_to_session_and_observers() {
        let (reconciler, transport, observer) = reconciler();
        reconciler.on_switch_changed(false).unwrap();

        assert!(!transport.0.0.lock().unwrap().enabled);
        let seen = observer.0.lock().unwrap();
        assert_eq!(seen.last().unwrap().enabled, Some(false));
    }

    #[test]
    fn confirmed_number_change_updates_display() {
        let (reconciler, _, observer) = reconciler();
        reconciler.on_number_changed(8).unwrap();
        assert_eq!(reconciler.displayed_limit(), 8);
        assert_eq!(
            observer.0.lock().unwrap().last().unwrap().current_limit.unwrap().amps(),
            8
        );
    }

    #[test]
    fn unconfirmed_number_change_reverts_display_to_default() {
        let (reconciler, transport, observer) = reconciler();
        reconciler.on_number_changed(8).unwrap();

        transport.push_faults(3);
        assert_matches!(
            reconciler.on_number_changed(12),
            Err(Error::Communication(_))
        );
        assert_eq!(reconciler.displayed_limit(), 16);
        // Only the confirmed change was published.
        assert_eq!(observer.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn invalid_number_change_keeps_display() {
        let (reconciler, _, _) = reconciler();
        reconciler.on_number_changed(10).unwrap();
        assert_matches!(
            reconciler.on_number_changed(3),
            Err(Error::InvalidValue(_))
        );
        assert_eq!(reconciler.displayed_limit(), 10);
    }

    #[test]
    fn poll_skips_while_a_command_holds_the_bus() {
        let (reconciler, transport, _) = reconciler();
        let reconciler = Arc::new(reconciler);

        transport.set_hold_writes(true);
        let command = {
            let reconciler = Arc::clone(&reconciler);
            std::thread::spawn(move || reconciler.on_number_changed(10))
        };
        // Give the command thread time to take the bus, then poll.
        std::thread::sleep(Duration::from_millis(20));
        assert_matches!(reconciler.poll(), PollOutcome::Skipped);

        transport.set_hold_writes(false);
        command.join().unwrap().unwrap();
        assert_matches!(reconciler.poll(), PollOutcome::Updated(_));
    }
}
