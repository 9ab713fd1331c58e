use rand::distributions::Alphanumeric;
use rand::Rng;

const CHANNEL_PREFIX: &str = "session:";
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque per-connection identifier assigned by the transport layer
pub type ConnectionId = String;

/// Wire-level channel name for a session. Depends on the session id only.
pub fn channel_name(session_id: &str) -> String {
    format!("{}{}", CHANNEL_PREFIX, session_id)
}

pub fn generate_connection_id() -> ConnectionId {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect()
}

/// `<unix-millis>-<9 base36 chars>`
pub fn generate_message_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}-{}", millis, suffix)
}
