use rand::Rng;

const BASE62: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const SHORT_ID_LEN: usize = 6;
pub const MAX_ID_ATTEMPTS: usize = 100;

/// Random base62 identifier of `len` characters.
pub fn short_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE62[rng.gen_range(0..BASE62.len())] as char)
        .collect()
}

/// Short id not rejected by `is_taken`, or `None` once `max_attempts`
/// candidates collided.
pub fn unique_short_id(
    len: usize,
    max_attempts: usize,
    is_taken: impl Fn(&str) -> bool,
) -> Option<String> {
    (0..max_attempts)
        .map(|_| short_id(len))
        .find(|candidate| !is_taken(candidate))
}
