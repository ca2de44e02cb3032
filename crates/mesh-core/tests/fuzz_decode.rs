use mesh_core::beacon::{SECURE_NETWORK_BEACON_SIZE, SECURE_NETWORK_BEACON_TYPE};
use mesh_core::SecureNetworkBeacon;
use rand::{thread_rng, Rng};

#[test]
fn fuzz_decode_beacon_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let len: usize = rng.gen_range(0..64);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        let _ = SecureNetworkBeacon::decode(&data);
    }
}

#[test]
fn random_mutation_of_valid_beacon_is_handled() {
    let mut rng = thread_rng();
    let mut beacon = vec![0u8; SECURE_NETWORK_BEACON_SIZE];
    beacon[0] = SECURE_NETWORK_BEACON_TYPE;

    for _ in 0..1_000 {
        let mut mutated = beacon.clone();
        let flip_count = rng.gen_range(1..6);
        for _ in 0..flip_count {
            let idx = rng.gen_range(0..mutated.len());
            mutated[idx] ^= rng.gen::<u8>();
        }
        if let Ok(decoded) = SecureNetworkBeacon::decode(&mutated) {
            assert_eq!(decoded.encode().to_vec(), mutated);
        }
    }
}

#[test]
fn fuzz_hex_input_never_panics() {
    let mut rng = thread_rng();
    let alphabet = b"0123456789abcdefABCDEFxz \n";
    for _ in 0..2_000 {
        let len: usize = rng.gen_range(0..60);
        let text: String = (0..len)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
            .collect();
        let _ = SecureNetworkBeacon::from_hex(&text);
    }
}
