use std::time::{SystemTime, UNIX_EPOCH};

pub const EXCHANGE: &str = "test_ex";
pub const KEY: &str = "test_key";
pub const QUEUE: &str = "test_q";

/// Generates a random 6-character token to use as a globally unique name or
/// value.
pub fn random_token() -> String {
    use rand::Rng;

    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

/// Adds a randomized suffix to the given name to make it globally unique on a
/// shared broker.
pub fn mangle(name: &str) -> String {
    format!(
        "{}.{}.{}",
        name.replace("::tests::", "::").replace("::", "."),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        random_token(),
    )
}
