use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Look-alike characters (I, O, 0, 1) are left out so ids survive being read aloud
const ID_LETTERS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const ID_DIGITS: &[u8] = b"23456789";

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Generate a short shareable session id: three letters then three digits
pub fn generate_session_id<R: Rng>(rng: &mut R) -> String {
    let mut id: String = (0..3)
        .map(|_| ID_LETTERS[rng.gen_range(0..ID_LETTERS.len())] as char)
        .collect();
    id.extend((0..3).map(|_| ID_DIGITS[rng.gen_range(0..ID_DIGITS.len())] as char));
    id
}

// Clamp a duration to whole milliseconds for the wire
pub fn duration_to_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}
