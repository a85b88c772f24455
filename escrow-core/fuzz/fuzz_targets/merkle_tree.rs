#![no_main]

use escrow_core::crypto::keccak256;
use escrow_core::merkle::{verify, MerkleTree};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Skip very small inputs
    if data.len() < 32 {
        return;
    }

    // Split data into variable-length chunks (leaf preimages)
    let chunk_size = ((data[0] as usize) % 32) + 1;
    let num_chunks = data.len() / chunk_size;

    if num_chunks == 0 {
        return;
    }

    let mut leaves = Vec::new();
    for i in 0..num_chunks.min(100) {
        // Limit to 100 leaves to avoid OOM
        let start = i * chunk_size;
        let end = ((i + 1) * chunk_size).min(data.len());
        if start < end {
            leaves.push(keccak256(&data[start..end]));
        }
    }

    if leaves.is_empty() {
        return;
    }

    // Build the tree incrementally (should not panic)
    let mut tree = MerkleTree::new();
    for leaf in &leaves {
        tree.insert(*leaf);
    }
    let root = tree.root();

    // Every leaf must prove against the root
    for (i, leaf) in leaves.iter().enumerate() {
        let path = tree.prove(i).expect("in-bounds proof");
        assert!(verify(leaf, &path, &root), "proof failed for leaf {}", i);
    }

    // A foreign leaf must not prove against any in-bounds path
    let foreign = keccak256(b"fuzz-foreign-leaf");
    if !leaves.contains(&foreign) {
        let path = tree.prove(0).expect("in-bounds proof");
        assert!(!verify(&foreign, &path, &root), "foreign leaf verified");
    }

    // Out-of-bounds proofs are errors, never panics
    assert!(tree.prove(leaves.len()).is_err());
});
