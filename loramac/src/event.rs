//! Event queue between interrupt context and the MAC engine
//!
//! Radio interrupt handlers never touch protocol state. They post a
//! [`MacEvent`] through the producer half of an [`EventQueue`]; the MAC
//! drains the consumer half from the main loop, so every state transition
//! runs to completion on one thread of control, in delivery order.

use heapless::spsc::{Consumer, Producer, Queue};
use heapless::Vec;

use crate::timer::{TimerId, TimerTime};

/// Largest PHY payload a radio can hand over
pub const MAX_RADIO_PAYLOAD: usize = 255;

/// Physical layer events
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// Transmission finished
    TxDone,
    /// A frame was received
    RxDone {
        /// Raw PHY payload
        payload: Vec<u8, MAX_RADIO_PAYLOAD>,
        /// Received signal strength (dBm)
        rssi: i16,
        /// Signal to noise ratio (dB)
        snr: i8,
        /// Device time at which the reception completed
        timestamp: TimerTime,
    },
    /// Reception failed (CRC or header error)
    RxError,
    /// Receive window closed without a frame
    RxTimeout,
    /// Transmission did not complete in time
    TxTimeout,
}

impl RadioEvent {
    /// Build an `RxDone` event, truncating payloads longer than the radio FIFO
    pub fn rx_done(payload: &[u8], rssi: i16, snr: i8, timestamp: TimerTime) -> Self {
        let len = payload.len().min(MAX_RADIO_PAYLOAD);
        let mut buffer = Vec::new();
        // Cannot fail: len is bounded by the capacity
        let _ = buffer.extend_from_slice(&payload[..len]);
        RadioEvent::RxDone {
            payload: buffer,
            rssi,
            snr,
            timestamp,
        }
    }
}

/// Everything the MAC engine reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum MacEvent {
    /// Radio driver callback
    Radio(RadioEvent),
    /// Software timer expiry
    Timer(TimerId),
}

impl From<RadioEvent> for MacEvent {
    fn from(event: RadioEvent) -> Self {
        MacEvent::Radio(event)
    }
}

/// Producer half, owned by the radio interrupt glue
pub type EventSender<'q, const N: usize> = Producer<'q, MacEvent, N>;
/// Consumer half, drained by [`crate::lorawan::mac::LoRaMac::process`]
pub type EventReceiver<'q, const N: usize> = Consumer<'q, MacEvent, N>;

/// Single-producer single-consumer event queue
///
/// Holds up to `N - 1` pending events.
pub struct EventQueue<const N: usize> {
    inner: Queue<MacEvent, N>,
}

impl<const N: usize> EventQueue<N> {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self {
            inner: Queue::new(),
        }
    }

    /// Split into the interrupt-side producer and main-loop consumer
    pub fn split(&mut self) -> (EventSender<'_, N>, EventReceiver<'_, N>) {
        self.inner.split()
    }

    /// Post an event without splitting (single-context use)
    ///
    /// Returns the event back when the queue is full.
    pub fn post(&mut self, event: MacEvent) -> Result<(), MacEvent> {
        self.inner.enqueue(event)
    }

    /// Take the oldest pending event
    pub fn next(&mut self) -> Option<MacEvent> {
        self.inner.dequeue()
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no event is pending
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_delivered_in_order() {
        let mut queue: EventQueue<4> = EventQueue::new();
        {
            let (mut tx, mut rx) = queue.split();
            tx.enqueue(RadioEvent::TxDone.into()).unwrap();
            tx.enqueue(MacEvent::Timer(TimerId::RxWindow1)).unwrap();
            assert_eq!(rx.dequeue(), Some(MacEvent::Radio(RadioEvent::TxDone)));
            assert_eq!(rx.dequeue(), Some(MacEvent::Timer(TimerId::RxWindow1)));
            assert_eq!(rx.dequeue(), None);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_hands_the_event_back() {
        let mut queue: EventQueue<2> = EventQueue::new();
        queue.post(RadioEvent::RxTimeout.into()).unwrap();
        assert_eq!(
            queue.post(RadioEvent::RxError.into()),
            Err(MacEvent::Radio(RadioEvent::RxError))
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn oversized_payload_is_truncated() {
        let data = [0xAAu8; 300];
        match RadioEvent::rx_done(&data, -40, 7, 12) {
            RadioEvent::RxDone { payload, .. } => assert_eq!(payload.len(), MAX_RADIO_PAYLOAD),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
