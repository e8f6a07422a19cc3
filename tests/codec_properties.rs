use bacnet_sc::bvlc::{decode_message, encode_encapsulated_npdu};
use bacnet_sc::identity::Vmac;
use proptest::prelude::*;

fn arb_vmac() -> impl Strategy<Value = Vmac> {
    any::<[u8; 6]>().prop_map(Vmac::new)
}

proptest! {
    /// Any Encapsulated-NPDU frame, with or without addresses, round-trips
    /// through encode/decode with its payload bytes intact.
    #[test]
    fn encapsulated_npdu_round_trips(
        message_id: u16,
        origin in proptest::option::of(arb_vmac()),
        destination in proptest::option::of(arb_vmac()),
        npdu in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let frame = encode_encapsulated_npdu(message_id, origin, destination, npdu.clone());
        let decoded = decode_message(&frame).unwrap();
        prop_assert_eq!(decoded.message_id, message_id);
        prop_assert_eq!(decoded.origin, origin);
        prop_assert_eq!(decoded.destination, destination);
        match decoded.payload {
            bacnet_sc::bvlc::Payload::EncapsulatedNpdu(bytes) => prop_assert_eq!(bytes, npdu),
            other => prop_assert!(false, "unexpected payload {:?}", other),
        }
    }

    /// Truncating a valid frame at any prefix length must never decode
    /// successfully (§8's length-checked-before-interpreted invariant).
    #[test]
    fn truncated_valid_frames_never_decode(
        message_id: u16,
        destination in arb_vmac(),
        npdu in proptest::collection::vec(any::<u8>(), 1..64),
    ) {
        let frame = encode_encapsulated_npdu(message_id, None, Some(destination), npdu);
        for cut in 0..frame.len() {
            prop_assert!(decode_message(&frame[..cut]).is_err());
        }
    }
}
