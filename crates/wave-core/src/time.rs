/// Milliseconds since the Unix epoch. Used for wire timestamps
/// (question deadlines, game start times).
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
