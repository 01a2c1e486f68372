use dsync_messages::{DiffLayerResponsePacket, DiffLayersPacket, DiffPacket, GetDiffLayerPacket};
use dsync_protocol::{decode_packet, encode_packet};
use dsync_types::BlockHash;
use proptest::prelude::*;

fn arb_packet() -> impl Strategy<Value = DiffPacket> {
    prop_oneof![
        prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..4)
            .prop_map(|diffs| DiffPacket::DiffLayers(DiffLayersPacket { diffs })),
        (any::<u64>(), any::<[u8; 32]>()).prop_map(|(request_id, h)| {
            DiffPacket::GetDiffLayer(GetDiffLayerPacket {
                request_id,
                block_hash: BlockHash::new(h),
            })
        }),
        (any::<u64>(), any::<[u8; 32]>(), prop::option::of(prop::collection::vec(any::<u8>(), 0..64)))
            .prop_map(|(request_id, h, diff)| {
                DiffPacket::DiffLayerResponse(DiffLayerResponsePacket {
                    request_id,
                    block_hash: BlockHash::new(h),
                    diff,
                })
            }),
    ]
}

proptest! {
    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode_packet(&bytes);
    }

    #[test]
    fn any_truncation_fails(packet in arb_packet(), cut in 1usize..16) {
        let bytes = encode_packet(&packet).unwrap();
        let cut = cut.min(bytes.len());
        prop_assert!(decode_packet(&bytes[..bytes.len() - cut]).is_err());
    }
}
