use shared::{ConnId, STUDENT_COLORS};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Assign display colors round-robin by connection ID
pub fn color_for(conn_id: ConnId) -> String {
    STUDENT_COLORS[(conn_id as usize) % STUDENT_COLORS.len()].to_string()
}
