use aes::cipher::{BlockDecrypt, KeyInit};
use aes::Aes128;
use loramac::{
    config::device::{ClassBConfig, DeviceClass, DeviceConfig, MacConfig},
    crypto::{self, Direction},
    event::{EventQueue, EventReceiver, RadioEvent},
    lorawan::{
        phy::RxSlot,
        primitives::{EventInfoStatus, McpsRequest, McpsType, MlmeRequest, MlmeType},
        region::EU868,
        LoRaMac,
    },
};

use mock::{MockClock, MockRadio, RecordingPrimitives};

type Mac = LoRaMac<EU868<MockRadio>, MockClock, RecordingPrimitives>;

const DEV_ADDR: u32 = 0x2601_1F00;
const NWK_SKEY: [u8; 16] = [0x11; 16];
const APP_SKEY: [u8; 16] = [0x22; 16];
const APP_KEY: [u8; 16] = [0x33; 16];

fn create_mac(device: DeviceConfig) -> (Mac, MockClock) {
    let clock = MockClock::default();
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

fn create_abp_mac() -> (Mac, MockClock) {
    create_mac(DeviceConfig::new_abp([1; 8], [2; 8], 0, DEV_ADDR, NWK_SKEY, APP_SKEY))
}

fn radio(mac: &Mac) -> &MockRadio {
    mac.phy().radio()
}

/// Let time pass in 10 ms steps, processing events on each step
fn run(mac: &mut Mac, events: &mut EventReceiver<'_, 8>, clock: &MockClock, ms: u64) {
    for _ in 0..ms / 10 {
        clock.advance(10);
        mac.process(events);
    }
}

/// Run until the MAC opens its next receive window
fn run_until_rx(mac: &mut Mac, events: &mut EventReceiver<'_, 8>, clock: &MockClock) {
    let opened = radio(mac).rx_count();
    for _ in 0..1_000 {
        clock.advance(10);
        mac.process(events);
        if radio(mac).rx_count() > opened {
            return;
        }
    }
    panic!("no receive window opened");
}

fn downlink(fcnt: u32, port: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x60];
    frame.extend_from_slice(&DEV_ADDR.to_le_bytes());
    frame.push(0x00);
    frame.extend_from_slice(&(fcnt as u16).to_le_bytes());
    frame.push(port);
    let mut encrypted = vec![0u8; data.len()];
    crypto::encrypt_payload(data, &APP_SKEY, DEV_ADDR, Direction::Down, fcnt, &mut encrypted).unwrap();
    frame.extend_from_slice(&encrypted);
    let mic = crypto::compute_mic(&frame, &NWK_SKEY, DEV_ADDR, Direction::Down, fcnt).unwrap();
    frame.extend_from_slice(&mic.to_le_bytes());
    frame
}

#[test]
fn test_unconfirmed_uplink_end_to_end() {
    let (mut mac, clock) = create_abp_mac();
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut tx, mut rx) = queue.split();

    mac.mcps_request(McpsRequest::Unconfirmed {
        port: 10,
        payload: b"hello",
        datarate: 0,
    })
    .unwrap();

    let frame = radio(&mac).get_last_tx().unwrap().to_vec();
    assert_eq!(frame[0], 0x40);
    assert_eq!(&frame[1..5], &DEV_ADDR.to_le_bytes());
    assert_eq!(frame[8], 10);
    assert_eq!(frame.len(), 8 + 1 + 5 + 4);
    let (body, mic) = frame.split_at(frame.len() - 4);
    let expected = crypto::compute_mic(body, &NWK_SKEY, DEV_ADDR, Direction::Up, 0).unwrap();
    assert_eq!(mic, &expected.to_le_bytes());

    tx.enqueue(RadioEvent::TxDone.into()).unwrap();
    run_until_rx(&mut mac, &mut rx, &clock);
    tx.enqueue(RadioEvent::RxTimeout.into()).unwrap();
    run_until_rx(&mut mac, &mut rx, &clock);
    tx.enqueue(RadioEvent::RxTimeout.into()).unwrap();
    run(&mut mac, &mut rx, &clock, 100);

    assert!(mac.state().is_idle());
    assert_eq!(radio(&mac).tx_count(), 1);
    assert_eq!(radio(&mac).rx_count(), 2);
    let confirms = &mac.primitives().mcps_confirms;
    assert_eq!(confirms.len(), 1);
    assert_eq!(confirms[0].mcps_type, McpsType::Unconfirmed);
    assert_eq!(confirms[0].status, EventInfoStatus::Ok);
    assert_eq!(confirms[0].uplink_counter, 0);
    assert_eq!(mac.uplink_counter(), 1);
}

#[test]
fn test_downlink_in_rx1_reaches_application() {
    let (mut mac, clock) = create_abp_mac();
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut tx, mut rx) = queue.split();

    mac.mcps_request(McpsRequest::Unconfirmed {
        port: 1,
        payload: &[0x01],
        datarate: 0,
    })
    .unwrap();
    tx.enqueue(RadioEvent::TxDone.into()).unwrap();
    run_until_rx(&mut mac, &mut rx, &clock);

    let frame = downlink(1, 42, &[0xCA, 0xFE]);
    tx.enqueue(RadioEvent::rx_done(&frame, -70, 8, clock.now()).into()).unwrap();
    run(&mut mac, &mut rx, &clock, 100);

    // RX2 is skipped once RX1 delivered a frame
    run(&mut mac, &mut rx, &clock, 2_000);
    assert_eq!(radio(&mac).rx_count(), 1);
    assert!(mac.state().is_idle());

    let indications = &mac.primitives().mcps_indications;
    assert_eq!(indications.len(), 1);
    assert_eq!(indications[0].status, EventInfoStatus::Ok);
    assert_eq!(indications[0].port, 42);
    assert_eq!(indications[0].payload.as_slice(), &[0xCA, 0xFE]);
    assert_eq!(indications[0].rx_slot, RxSlot::Rx1);
    assert_eq!(indications[0].rssi, -70);
    assert_eq!(mac.downlink_counter(), 1);
    assert_eq!(mac.primitives().mcps_confirms.len(), 1);
}

fn join_accept(dev_addr: u32) -> Vec<u8> {
    // AppNonce, NetID, DevAddr, DLSettings, RxDelay
    let mut plain = vec![0x20, 0x0A, 0x0B, 0x0C, 0x13, 0x00, 0x00];
    plain.extend_from_slice(&dev_addr.to_le_bytes());
    plain.push(0x00);
    plain.push(0x01);
    let mic = crypto::compute_join_frame_mic(&plain, &APP_KEY).unwrap();
    plain.extend_from_slice(&mic.to_le_bytes());

    // The network encrypts with AES decrypt so the device can use encrypt
    let cipher = Aes128::new_from_slice(&APP_KEY).unwrap();
    let mut block = [0u8; 16];
    block.copy_from_slice(&plain[1..17]);
    cipher.decrypt_block((&mut block).into());

    let mut frame = vec![0x20];
    frame.extend_from_slice(&block);
    frame
}

#[test]
fn test_otaa_join() {
    let (mut mac, clock) = create_mac(DeviceConfig::new_otaa([0xA1; 8], [0xB2; 8], APP_KEY));
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut tx, mut rx) = queue.split();
    assert!(!mac.is_network_joined());

    // Uplinks need a session
    assert!(mac
        .mcps_request(McpsRequest::Unconfirmed {
            port: 1,
            payload: &[],
            datarate: 0,
        })
        .is_err());

    mac.mlme_request(MlmeRequest::Join { nb_trials: 3 }).unwrap();
    let request = radio(&mac).get_last_tx().unwrap().to_vec();
    assert_eq!(request.len(), 23);
    assert_eq!(request[0], 0x00);
    assert_eq!(&request[1..9], &[0xB2; 8]);
    assert_eq!(&request[9..17], &[0xA1; 8]);

    tx.enqueue(RadioEvent::TxDone.into()).unwrap();
    run_until_rx(&mut mac, &mut rx, &clock);
    let accept = join_accept(0x2601_1BDA);
    tx.enqueue(RadioEvent::rx_done(&accept, -80, 5, clock.now()).into()).unwrap();
    run(&mut mac, &mut rx, &clock, 100);

    assert!(mac.is_network_joined());
    assert_eq!(mac.dev_addr(), 0x2601_1BDA);
    let confirms = &mac.primitives().mlme_confirms;
    assert_eq!(confirms.len(), 1);
    assert_eq!(confirms[0].mlme_type, MlmeType::Join);
    assert_eq!(confirms[0].status, EventInfoStatus::Ok);
    assert_eq!(confirms[0].nb_retries, 1);
    assert_eq!(mac.params().receive_delay1, 1_000);
}

#[test]
fn test_class_c_continuous_reception() {
    let (mut mac, clock) = create_abp_mac();
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut tx, mut rx) = queue.split();

    mac.set_device_class(DeviceClass::C).unwrap();
    assert_eq!(mac.device_class(), DeviceClass::C);
    assert_eq!(radio(&mac).rx_count(), 1);
    assert_eq!(radio(&mac).last_rx_timeout(), Some(0));
    assert_eq!(radio(&mac).frequency(), mac.params().rx2_frequency);

    let frame = downlink(1, 3, &[0x55]);
    tx.enqueue(RadioEvent::rx_done(&frame, -90, 2, clock.now()).into()).unwrap();
    run(&mut mac, &mut rx, &clock, 100);

    let indications = &mac.primitives().mcps_indications;
    assert_eq!(indications.len(), 1);
    assert_eq!(indications[0].rx_slot, RxSlot::Rx2ClassC);
    assert_eq!(indications[0].payload.as_slice(), &[0x55]);
    // Listening resumes after the frame
    assert_eq!(radio(&mac).rx_count(), 2);
    assert_eq!(radio(&mac).last_rx_timeout(), Some(0));

    mac.set_device_class(DeviceClass::A).unwrap();
    assert_eq!(mac.device_class(), DeviceClass::A);
}

#[test]
fn test_radio_failure_is_reported() {
    let (mut mac, _) = create_abp_mac();
    mac.phy_mut().radio_mut().set_fail_tx(true);
    let result = mac.mcps_request(McpsRequest::Unconfirmed {
        port: 1,
        payload: &[1],
        datarate: 0,
    });
    assert!(result.is_err());
    assert!(mac.state().is_idle());
    assert_eq!(radio(&mac).tx_count(), 0);
}
