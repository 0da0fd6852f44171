use rand::rngs::OsRng;
use rand::{Rng, RngCore};

/// Alphabet for confirmation keys mailed to users.
pub const CONFIRMATION_KEY_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
pub const CONFIRMATION_KEY_LENGTH: usize = 32;

/// No 0/O, 1/l/I: generated passwords are read off an email by humans.
const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz23456789";
pub const GENERATED_PASSWORD_LENGTH: usize = 16;

fn random_string(alphabet: &[u8], len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

pub fn generate_confirmation_key() -> String {
    random_string(CONFIRMATION_KEY_ALPHABET, CONFIRMATION_KEY_LENGTH)
}

pub fn is_confirmation_key(key: &str) -> bool {
    key.len() == CONFIRMATION_KEY_LENGTH
        && key.bytes().all(|b| CONFIRMATION_KEY_ALPHABET.contains(&b))
}

/// 32 bytes from the OS CSPRNG, hex encoded.
pub fn generate_public_session_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn generate_password() -> String {
    random_string(PASSWORD_ALPHABET, GENERATED_PASSWORD_LENGTH)
}
