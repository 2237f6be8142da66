#![allow(clippy::unwrap_used)]

use fanfleet_proto::{DeviceMessage, ExternalReply, ExternalRequest, RawCommand, StateBroadcast};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Alphabet biased towards bytes that reach deep into the decoders.
const WIRE_BYTES: &[u8] = b"0123456789|,.- :abcdefABCDEF\0\nSTDHSKRIPB";

fn random_datagram(rng: &mut StdRng) -> Vec<u8> {
    let len = rng.gen_range(0..96);
    if rng.gen_bool(0.5) {
        (0..len).map(|_| rng.r#gen::<u8>()).collect()
    } else {
        (0..len)
            .map(|_| WIRE_BYTES[rng.gen_range(0..WIRE_BYTES.len())])
            .collect()
    }
}

#[test]
fn random_bytes_never_panic_any_decoder() {
    let mut rng = StdRng::seed_from_u64(0x00fa_f1ee);
    let mut valid = 0usize;

    for _ in 0..1_000 {
        let datagram = random_datagram(&mut rng);

        if DeviceMessage::decode(&datagram).is_ok() {
            valid += 1;
        }
        if let Ok(raw) = RawCommand::parse(&datagram) {
            let _ = ExternalRequest::from_raw(&raw);
        }
        let _ = ExternalReply::decode(&datagram);
        let _ = StateBroadcast::decode(&datagram);
    }

    // Pure noise almost never forms a device message.
    assert!(valid < 1_000);
}

#[test]
fn truncations_of_valid_messages_are_total() {
    let samples: [&[u8]; 4] = [
        b"0|secret|AA:BB:CC:DD:EE:FF|6001|6002",
        b"0|HSK|40001,40002,100,S 1 1 21 25000 2 2 16000 1200 0.1000 0.05 1",
        b"7|STD|3|1000,2000|0.5,0.25",
        b"4|B|5001|1700000000000|2|2|1|100,200,-1,-1",
    ];

    for sample in samples {
        for cut in 0..=sample.len() {
            let prefix = &sample[..cut];
            let _ = DeviceMessage::decode(prefix);
            let _ = StateBroadcast::decode(prefix);
            let _ = RawCommand::parse(prefix);
        }
    }
}

#[test]
fn broadcast_wire_form_is_stable() {
    let msg = StateBroadcast::decode(b"4|B|5001|1700000000000|2|2|1|100,200,-1,-1").unwrap();
    assert_eq!(msg.shape.cells(), 4);
    assert_eq!(msg.values, vec![100, 200, -1, -1]);
    assert_eq!(
        msg.encode(),
        "4|B|5001|1700000000000|2|2|1|100,200,-1,-1"
    );
}
