//! Periodic ABP uplinks against a simulated radio
//!
//! The radio never hears anything, so every cycle ends with two empty
//! receive windows. Run with `cargo run --example abp_uplink --features std`.

use std::cell::Cell;
use std::rc::Rc;

use loramac::{
    config::device::{ClassBConfig, DeviceConfig, MacConfig},
    event::{EventQueue, MacEvent, RadioEvent},
    lorawan::{
        primitives::{MacPrimitives, McpsConfirm, McpsIndication, McpsRequest, MlmeConfirm, MlmeIndication},
        region::EU868,
        LoRaMac,
    },
    radio::{Radio, RxConfig, TxConfig},
    timer::{Clock, TimerTime},
};

/// Radio that completes every operation on the next loop iteration
#[derive(Default)]
struct SimRadio {
    pending: Option<RadioEvent>,
    seed: u32,
}

impl Radio for SimRadio {
    type Error = ();

    fn configure_tx(&mut self, config: TxConfig) -> Result<(), ()> {
        println!("radio: tx on {} Hz, SF{}", config.frequency, config.modulation.spreading_factor);
        Ok(())
    }

    fn configure_rx(&mut self, config: RxConfig) -> Result<(), ()> {
        println!("radio: rx on {} Hz", config.frequency);
        Ok(())
    }

    fn send(&mut self, buffer: &[u8]) -> Result<(), ()> {
        println!("radio: sending {:02x?}", buffer);
        self.pending = Some(RadioEvent::TxDone);
        Ok(())
    }

    fn receive(&mut self, _timeout_ms: u32) -> Result<(), ()> {
        self.pending = Some(RadioEvent::RxTimeout);
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn standby(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn random(&mut self) -> u32 {
        self.seed = self.seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        self.seed
    }

    fn set_public_network(&mut self, _public: bool) -> Result<(), ()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SimClock(Rc<Cell<TimerTime>>);

impl Clock for SimClock {
    fn now_ms(&self) -> TimerTime {
        self.0.get()
    }
}

struct App;

impl MacPrimitives for App {
    fn mcps_confirm(&mut self, confirm: &McpsConfirm) {
        println!(
            "app: uplink {} done, status {:?}, {} ms on air",
            confirm.uplink_counter, confirm.status, confirm.tx_time_on_air
        );
    }

    fn mcps_indication(&mut self, indication: &McpsIndication) {
        println!("app: downlink on port {}: {:02x?}", indication.port, indication.payload);
    }

    fn mlme_confirm(&mut self, confirm: &MlmeConfirm) {
        println!("app: {:?} {:?}", confirm.mlme_type, confirm.status);
    }

    fn mlme_indication(&mut self, indication: &MlmeIndication) {
        println!("app: {:?}", indication.indication);
    }
}

fn main() {
    let clock = SimClock::default();
    let device = DeviceConfig::new_abp(
        [0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0x00, 0x01],
        [0x70, 0xB3, 0xD5, 0x7E, 0xF0, 0x00, 0x00, 0x00],
        0x13,
        0x2601_1F00,
        [0x2B; 16],
        [0x3C; 16],
    );
    let mut mac = LoRaMac::new(
        EU868::new(SimRadio::default()),
        clock.clone(),
        App,
        device,
        MacConfig::default(),
        ClassBConfig::default(),
    );

    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut sender, mut receiver) = queue.split();

    let mut sent = 0u8;
    while sent < 3 {
        if mac.state().is_idle() {
            let request = McpsRequest::Unconfirmed {
                port: 1,
                payload: &[sent],
                datarate: 0,
            };
            match mac.mcps_request(request) {
                Ok(()) => sent += 1,
                Err(e) => println!("app: request refused: {:?}", e),
            }
        }

        // Jump to the next deadline, as a sleeping device would
        if let Some(deadline) = mac.next_deadline() {
            clock.0.set(deadline.max(clock.0.get()));
        }
        // The interrupt glue posts radio completions
        if let Some(event) = mac.phy_mut().radio_mut().pending.take() {
            let _ = sender.enqueue(MacEvent::Radio(event));
        }
        mac.process(&mut receiver);
    }
}
