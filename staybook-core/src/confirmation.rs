use rand::Rng;

/// No 0/O or 1/I, so codes survive being read out over the phone.
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const PREFIX: &str = "HM";
const LENGTH: usize = 8;

/// Short, human-friendly confirmation code such as `HMQ7X2K9PL`.
///
/// 32^8 combinations; the store's unique index catches the rare collision and
/// the booking service retries with a fresh code.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    let mut code = String::with_capacity(PREFIX.len() + LENGTH);
    code.push_str(PREFIX);
    for _ in 0..LENGTH {
        code.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
    }
    code
}
