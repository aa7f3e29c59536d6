//! Header names of the scheduling and dedup wire contract.

/// Broker dedup key; carries the envelope's jid.
pub const MSG_ID: &str = "Nats-Msg-Id";

/// Asserts the stream a publish must land on.
pub const EXPECTED_STREAM: &str = "Nats-Expected-Stream";

/// Absolute Unix-seconds timestamp at which a scheduled envelope promotes.
pub const EXECUTE_AT: &str = "X-Execute-At";

/// Promotion target stream of a scheduled envelope.
pub const TARGET_STREAM: &str = "X-Stream";

/// Promotion target subject of a scheduled envelope.
pub const TARGET_SUBJECT: &str = "X-Subject";

/// Headers stripped before promoting a scheduled envelope; everything else
/// is carried over to the target publish.
pub const SCHEDULING_HEADERS: [&str; 4] = [EXECUTE_AT, TARGET_STREAM, TARGET_SUBJECT, EXPECTED_STREAM];
