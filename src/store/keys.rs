//! Keys of the persisted namespace

/// JSON array of conversation snapshots
pub const LOCAL_MESSAGES: &str = "local_messages";

/// Cumulative tokens consumed (integer)
pub const TOTAL_TOKEN: &str = "total_token";

/// Speech rate (float)
pub const SPEAKER_RATE: &str = "speaker_rate";

/// Speech pitch multiplier (float)
pub const SPEAKER_PITCH: &str = "speaker_pitch";

/// User-supplied API credential (string)
pub const API_KEY: &str = "api_key";
