use loramac::{
    class::class_b::beacon::beacon_crc,
    config::device::{ClassBConfig, DeviceClass, DeviceConfig, MacConfig},
    event::{EventQueue, EventReceiver, RadioEvent},
    lorawan::{
        primitives::{EventInfoStatus, McpsRequest, MlmeIndicationType, MlmeRequest, MlmeType},
        region::EU868,
        LoRaMac, MacError,
    },
    timer::TimerId,
};

use mock::{MockClock, MockRadio, RecordingPrimitives};

type Mac = LoRaMac<EU868<MockRadio>, MockClock, RecordingPrimitives>;

fn create_mac() -> (Mac, MockClock) {
    let clock = MockClock::default();
    let device = DeviceConfig::new_abp([1; 8], [2; 8], 0, 0x2601_1234, [0x11; 16], [0x22; 16]);
    let mut mac = LoRaMac::new(
        EU868::new(MockRadio::new()),
        clock.clone(),
        RecordingPrimitives::default(),
        device,
        MacConfig::default(),
        ClassBConfig::default(),
    );
    mac.set_duty_cycle_on(false);
    (mac, clock)
}

/// EU868 beacon: RFU(2) | Time(4) | CRC(2) | GwSpecific(7) | CRC(2)
fn beacon_frame(time: u32) -> [u8; 17] {
    let mut frame = [0u8; 17];
    frame[2..6].copy_from_slice(&time.to_le_bytes());
    let crc1 = beacon_crc(&frame[..6]);
    frame[6..8].copy_from_slice(&crc1.to_le_bytes());
    frame[8] = 0x01;
    let crc2 = beacon_crc(&frame[8..15]);
    frame[15..17].copy_from_slice(&crc2.to_le_bytes());
    frame
}

fn run(mac: &mut Mac, events: &mut EventReceiver<'_, 8>, clock: &MockClock, ms: u64) {
    for _ in 0..ms / 10 {
        clock.advance(10);
        mac.process(events);
    }
}

fn run_until_rx(mac: &mut Mac, events: &mut EventReceiver<'_, 8>, clock: &MockClock, limit_ms: u64) {
    let opened = mac.phy().radio().rx_count();
    for _ in 0..limit_ms / 10 {
        clock.advance(10);
        mac.process(events);
        if mac.phy().radio().rx_count() > opened {
            return;
        }
    }
    panic!("no receive window opened");
}

/// Acquire the beacon at GPS second 1280
fn acquire(mac: &mut Mac, clock: &MockClock) -> RadioEvent {
    mac.mlme_request(MlmeRequest::BeaconAcquisition).unwrap();
    RadioEvent::rx_done(&beacon_frame(1_280), -95, 3, clock.now())
}

#[test]
fn test_class_b_requires_beacon() {
    let (mut mac, _) = create_mac();
    assert_eq!(mac.set_device_class(DeviceClass::B), Err(MacError::NoBeaconFound));
    assert_eq!(mac.device_class(), DeviceClass::A);
}

#[test]
fn test_beacon_acquisition() {
    let (mut mac, clock) = create_mac();
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut tx, mut rx) = queue.split();

    let beacon = acquire(&mut mac, &clock);
    // Without network time the radio listens continuously
    assert_eq!(mac.phy().radio().last_rx_timeout(), Some(0));
    assert_eq!(mac.phy().radio().frequency(), 869_525_000);

    tx.enqueue(beacon.into()).unwrap();
    run(&mut mac, &mut rx, &clock, 50);

    let status = mac.class_b().status();
    assert!(status.beacon_found);
    assert!(!status.beacon_acquisition);
    assert!(mac.timers().get_gps_time() >= 1_280_000);
    assert!(mac.timers().is_running(TimerId::BeaconWindow));
    assert!(!mac.timers().is_running(TimerId::BeaconAcquisition));

    let confirms = &mac.primitives().mlme_confirms;
    assert_eq!(confirms.len(), 1);
    assert_eq!(confirms[0].mlme_type, MlmeType::BeaconAcquisition);
    assert_eq!(confirms[0].status, EventInfoStatus::Ok);

    let indications = &mac.primitives().mlme_indications;
    assert_eq!(indications.len(), 1);
    assert_eq!(indications[0].indication, MlmeIndicationType::Beacon);
    assert_eq!(indications[0].status, EventInfoStatus::BeaconLocked);
    let info = indications[0].beacon.unwrap();
    assert_eq!(info.time, 1_280);
    assert_eq!(info.gw_specific[0], 0x01);
    assert_eq!(info.rssi, -95);
}

#[test]
fn test_class_b_ping_slots() {
    let (mut mac, clock) = create_mac();
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut tx, mut rx) = queue.split();

    let beacon = acquire(&mut mac, &clock);
    tx.enqueue(beacon.into()).unwrap();
    run(&mut mac, &mut rx, &clock, 50);

    mac.set_device_class(DeviceClass::B).unwrap();
    assert_eq!(mac.device_class(), DeviceClass::B);
    assert!(mac.class_b().status().ping_on);
    assert!(mac.timers().is_running(TimerId::PingSlot));

    // The next window is a ping slot or the next beacon
    run_until_rx(&mut mac, &mut rx, &clock, 130_000);
    let status = *mac.class_b().status();
    assert!(status.ping_rx || status.beacon_rx);

    tx.enqueue(RadioEvent::RxTimeout.into()).unwrap();
    run(&mut mac, &mut rx, &clock, 10);
    let status = mac.class_b().status();
    assert!(!status.ping_rx);
    assert!(!status.beacon_rx);
    assert!(mac.timers().is_running(TimerId::PingSlot) || mac.timers().is_running(TimerId::BeaconWindow));
}

#[test]
fn test_uplink_pauses_class_b() {
    let (mut mac, clock) = create_mac();
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut tx, mut rx) = queue.split();

    let beacon = acquire(&mut mac, &clock);
    tx.enqueue(beacon.into()).unwrap();
    run(&mut mac, &mut rx, &clock, 50);
    mac.set_device_class(DeviceClass::B).unwrap();

    mac.mcps_request(McpsRequest::Unconfirmed {
        port: 2,
        payload: &[0xAA],
        datarate: 0,
    })
    .unwrap();
    assert!(mac.class_b().status().paused);
    // Class B devices announce it in FCtrl
    let frame = mac.phy().radio().get_last_tx().unwrap();
    assert_eq!(frame[5] & 0x10, 0x10);

    tx.enqueue(RadioEvent::TxDone.into()).unwrap();
    run_until_rx(&mut mac, &mut rx, &clock, 10_000);
    tx.enqueue(RadioEvent::RxTimeout.into()).unwrap();
    run_until_rx(&mut mac, &mut rx, &clock, 10_000);
    tx.enqueue(RadioEvent::RxTimeout.into()).unwrap();
    run(&mut mac, &mut rx, &clock, 50);

    assert!(mac.state().is_idle());
    assert!(!mac.class_b().status().paused);
    assert!(mac.class_b().status().ping_on);
    assert_eq!(mac.primitives().mcps_confirms.len(), 1);
}

#[test]
fn test_back_to_class_a() {
    let (mut mac, clock) = create_mac();
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut tx, mut rx) = queue.split();

    let beacon = acquire(&mut mac, &clock);
    tx.enqueue(beacon.into()).unwrap();
    run(&mut mac, &mut rx, &clock, 50);
    mac.set_device_class(DeviceClass::B).unwrap();

    mac.set_device_class(DeviceClass::A).unwrap();
    assert_eq!(mac.device_class(), DeviceClass::A);
    assert!(!mac.class_b().status().ping_on);
    assert!(!mac.timers().is_running(TimerId::PingSlot));
    assert!(!mac.timers().is_running(TimerId::BeaconWindow));
}
