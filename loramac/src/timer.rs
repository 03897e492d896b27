//! Software timer service
//!
//! All protocol timeouts run off one [`Clock`]. Timers are identified by
//! [`TimerId`]; an expired timer is reported once by
//! [`TimerService::poll_expired`] and the MAC dispatches it like any other
//! event, so timer callbacks are serialized with radio events.

/// Millisecond timestamp
pub type TimerTime = u64;

/// Monotonic millisecond clock driving every timer
pub trait Clock {
    /// Current time in milliseconds
    fn now_ms(&self) -> TimerTime;
}

/// Protocol timers
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerId {
    /// MAC state reconciliation
    MacStateCheck,
    /// Duty-cycle delayed transmission
    TxDelayed,
    /// First receive window
    RxWindow1,
    /// Second receive window
    RxWindow2,
    /// Confirmed uplink acknowledgement timeout
    AckTimeout,
    /// Class B beacon window opening
    BeaconWindow,
    /// Class B beacon acquisition timeout
    BeaconAcquisition,
    /// Class B ping slot opening
    PingSlot,
}

impl TimerId {
    /// Number of timers
    pub const COUNT: usize = 8;

    const ALL: [TimerId; Self::COUNT] = [
        TimerId::MacStateCheck,
        TimerId::TxDelayed,
        TimerId::RxWindow1,
        TimerId::RxWindow2,
        TimerId::AckTimeout,
        TimerId::BeaconWindow,
        TimerId::BeaconAcquisition,
        TimerId::PingSlot,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TimerSlot {
    reload_ms: u32,
    deadline: Option<TimerTime>,
}

/// Software timers plus GPS time tracking
pub struct TimerService<C: Clock> {
    clock: C,
    slots: [TimerSlot; TimerId::COUNT],
    /// GPS time minus device time, once known
    gps_offset: Option<i64>,
}

impl<C: Clock> TimerService<C> {
    /// Create a timer service with every timer stopped
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            slots: [TimerSlot::default(); TimerId::COUNT],
            gps_offset: None,
        }
    }

    /// Access the underlying clock
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Set the delay used by the next [`start`](Self::start)
    pub fn set_value(&mut self, timer: TimerId, delay_ms: u32) {
        self.slots[timer.index()].reload_ms = delay_ms;
    }

    /// Arm a timer with its current value; restarting re-arms from now
    pub fn start(&mut self, timer: TimerId) {
        let now = self.clock.now_ms();
        let slot = &mut self.slots[timer.index()];
        slot.deadline = Some(now + u64::from(slot.reload_ms));
    }

    /// Set the value and arm in one step
    pub fn start_with(&mut self, timer: TimerId, delay_ms: u32) {
        self.set_value(timer, delay_ms);
        self.start(timer);
    }

    /// Stop a timer; stopping a stopped timer is a no-op
    pub fn stop(&mut self, timer: TimerId) {
        self.slots[timer.index()].deadline = None;
    }

    /// Whether the timer is armed
    pub fn is_running(&self, timer: TimerId) -> bool {
        self.slots[timer.index()].deadline.is_some()
    }

    /// Current device time
    pub fn get_current_time(&self) -> TimerTime {
        self.clock.now_ms()
    }

    /// Milliseconds elapsed since `since` (zero if `since` is in the future)
    pub fn get_elapsed_time(&self, since: TimerTime) -> TimerTime {
        self.clock.now_ms().saturating_sub(since)
    }

    /// GPS time in milliseconds, zero while unknown
    pub fn get_gps_time(&self) -> TimerTime {
        match self.gps_offset {
            Some(offset) => (self.clock.now_ms() as i64 + offset).max(0) as TimerTime,
            None => 0,
        }
    }

    /// Synchronize GPS time to `gps_ms` at the current device time
    pub fn set_gps_time(&mut self, gps_ms: TimerTime) {
        self.gps_offset = Some(gps_ms as i64 - self.clock.now_ms() as i64);
    }

    /// Disarm and return the earliest expired timer, if any
    pub fn poll_expired(&mut self) -> Option<TimerId> {
        let now = self.clock.now_ms();
        let expired = TimerId::ALL
            .iter()
            .filter_map(|&id| match self.slots[id.index()].deadline {
                Some(deadline) if deadline <= now => Some((deadline, id)),
                _ => None,
            })
            .min_by_key(|&(deadline, _)| deadline)
            .map(|(_, id)| id)?;
        self.stop(expired);
        Some(expired)
    }

    /// Earliest armed deadline, for the application's sleep decision
    pub fn next_deadline(&self) -> Option<TimerTime> {
        self.slots.iter().filter_map(|slot| slot.deadline).min()
    }
}
