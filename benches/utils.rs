use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Builds `n` profile contexts from a fixed seed, so every engine renders the
/// same data.
pub fn generate_random_contexts(n: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(42);

    (0..n)
        .map(|_| {
            let item_count = rng.random_range(0..10);
            let items: Vec<Value> = (0..item_count)
                .map(|_| {
                    json!({
                        "name": random_word(&mut rng, 3, 8),
                        "value": rng.random_range(10..1000),
                        "special": rng.random_bool(0.3),
                    })
                })
                .collect();

            json!({
                "user": {
                    "name": random_word(&mut rng, 5, 10),
                    "age": rng.random_range(16..80),
                    "active": rng.random_bool(0.7),
                },
                "items": items,
                "show_details": rng.random_bool(0.8),
                "has_access": rng.random_bool(0.6),
            })
        })
        .collect()
}

fn random_word(rng: &mut StdRng, min_len: usize, max_len: usize) -> String {
    let len = rng.random_range(min_len..=max_len);
    (0..len)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect()
}

pub fn print_binary_size() {
    let binary_path = std::env::current_exe().unwrap();
    let size_bytes = std::fs::metadata(&binary_path).unwrap().len();
    let size_kb = size_bytes as f64 / 1024.0;

    println!(
        "Binary size: {:.2} MB ({size_kb:.2} KB, {size_bytes} bytes)",
        size_kb / 1024.0
    );
    println!("Binary path: {}", binary_path.display());
}
