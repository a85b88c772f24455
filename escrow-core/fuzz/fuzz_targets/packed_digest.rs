#![no_main]

use escrow_core::crypto::{keccak256, personal_digest, PackedDigest, RecoverableSignature};
use escrow_core::types::Address;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Packed digests are deterministic and never panic on any field mix
    let mut a = PackedDigest::new();
    let mut b = PackedDigest::new();
    for (i, chunk) in data.chunks(21).enumerate() {
        match i % 3 {
            0 => {
                let mut addr = [0u8; 20];
                addr[..chunk.len().min(20)].copy_from_slice(&chunk[..chunk.len().min(20)]);
                a.write_address(&Address::from_bytes(addr));
                b.write_address(&Address::from_bytes(addr));
            }
            1 => {
                let mut word = [0u8; 16];
                word[..chunk.len().min(16)].copy_from_slice(&chunk[..chunk.len().min(16)]);
                let value = u128::from_be_bytes(word);
                a.write_u256(value);
                b.write_u256(value);
            }
            _ => {
                a.write_bytes(chunk);
                b.write_bytes(chunk);
            }
        }
    }
    assert_eq!(a.finalize(), b.finalize(), "packed digest nondeterministic");

    // Personal-sign wrapping is deterministic for every payload
    assert_eq!(personal_digest(data), personal_digest(data));
    assert_ne!(personal_digest(data), keccak256(data));

    // Signature parsing never panics: any 65 bytes either parse and fail
    // recovery cleanly, or are rejected
    if data.len() >= 65 {
        let mut raw = [0u8; 65];
        raw.copy_from_slice(&data[..65]);
        let signature = RecoverableSignature::from_bytes(raw);
        let digest = keccak256(data);
        let _ = escrow_core::crypto::recover_signer(&digest, &signature);
    }
});
