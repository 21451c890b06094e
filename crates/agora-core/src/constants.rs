//! TigerStyle constants for Agora
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Identity Limits
// =============================================================================

/// Maximum length of an agent type name in bytes
pub const AGENT_TYPE_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of an agent key in bytes
pub const AGENT_KEY_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a topic type in bytes
pub const TOPIC_TYPE_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a topic source in bytes
pub const TOPIC_SOURCE_LENGTH_BYTES_MAX: usize = 1024;

/// Maximum length of a subscription id in bytes
pub const SUBSCRIPTION_ID_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a client id in bytes
pub const CLIENT_ID_LENGTH_BYTES_MAX: usize = 256;

// =============================================================================
// Message Limits
// =============================================================================

/// Maximum length of a message type name in bytes
pub const MESSAGE_TYPE_NAME_LENGTH_BYTES_MAX: usize = 256;

/// Maximum size of a single message payload in bytes (4 MB)
pub const PAYLOAD_SIZE_BYTES_MAX: usize = 4 * 1024 * 1024;

/// Maximum size of a wire frame in bytes (16 MB)
///
/// JSON encodes payload bytes as number arrays, so a frame can be several
/// times larger than the payload it carries.
pub const FRAME_SIZE_BYTES_MAX: usize = 16 * 1024 * 1024;

/// Maximum size of a persisted agent state blob in bytes (10 MB)
pub const AGENT_STATE_SIZE_BYTES_MAX: usize = 10 * 1024 * 1024;

// =============================================================================
// Router Limits
// =============================================================================

/// Default capacity of the outbound envelope queue
pub const OUTBOUND_QUEUE_CAPACITY_DEFAULT: usize = 1024;

/// Maximum capacity of the outbound envelope queue
pub const OUTBOUND_QUEUE_CAPACITY_MAX: usize = 64 * 1024;

/// Default number of times a write is retried after a transient fault
pub const WRITE_RETRY_COUNT_DEFAULT: u32 = 1;

/// Maximum number of times a write may be retried
pub const WRITE_RETRY_COUNT_MAX: u32 = 16;

// =============================================================================
// Connection Limits
// =============================================================================

/// Initial reconnect delay in milliseconds
pub const RECONNECT_DELAY_MS_INITIAL: u64 = 50;

/// Maximum reconnect delay in milliseconds (5 sec)
pub const RECONNECT_DELAY_MS_MAX: u64 = 5 * 1000;

/// Default number of connect attempts before a reconnect is abandoned
pub const RECONNECT_ATTEMPTS_COUNT_DEFAULT: u32 = 10;

/// Maximum configurable number of connect attempts
pub const RECONNECT_ATTEMPTS_COUNT_MAX: u32 = 1000;

/// Default timeout for a single connect attempt in milliseconds (5 sec)
pub const CONNECT_TIMEOUT_MS_DEFAULT: u64 = 5 * 1000;

/// Default timeout for gateway control requests in milliseconds (10 sec)
pub const CONTROL_REQUEST_TIMEOUT_MS_DEFAULT: u64 = 10 * 1000;

/// Maximum timeout for gateway control requests in milliseconds (5 min)
pub const CONTROL_REQUEST_TIMEOUT_MS_MAX: u64 = 5 * 60 * 1000;

/// Wire protocol version sent in the connection handshake
pub const PROTOCOL_VERSION: u32 = 1;

/// Default gateway address
pub const GATEWAY_ADDRESS_DEFAULT: &str = "127.0.0.1:5001";

// =============================================================================
// Observability - Metric Names (TigerStyle: explicit, with units)
// =============================================================================

/// Metric: Total number of agent activations (counter)
pub const METRIC_NAME_AGENTS_ACTIVATED_TOTAL: &str = "agora_agents_activated_total";

/// Metric: Total envelopes written to the gateway (counter, labels: kind)
pub const METRIC_NAME_ENVELOPES_SENT_TOTAL: &str = "agora_envelopes_sent_total";

/// Metric: Total envelopes read from the gateway (counter, labels: kind)
pub const METRIC_NAME_ENVELOPES_RECEIVED_TOTAL: &str = "agora_envelopes_received_total";

/// Metric: Request round-trip duration in seconds (histogram, labels: status)
pub const METRIC_NAME_REQUEST_DURATION_SECONDS: &str = "agora_request_duration_seconds";

/// Metric: Total channel reconnects (counter)
pub const METRIC_NAME_RECONNECTS_TOTAL: &str = "agora_reconnects_total";

// Compile-time assertions for constant validity
const _: () = {
    assert!(AGENT_TYPE_LENGTH_BYTES_MAX >= 64);
    assert!(FRAME_SIZE_BYTES_MAX > PAYLOAD_SIZE_BYTES_MAX);
    assert!(OUTBOUND_QUEUE_CAPACITY_DEFAULT <= OUTBOUND_QUEUE_CAPACITY_MAX);
    assert!(WRITE_RETRY_COUNT_DEFAULT >= 1);
    assert!(WRITE_RETRY_COUNT_DEFAULT <= WRITE_RETRY_COUNT_MAX);
    assert!(RECONNECT_DELAY_MS_INITIAL < RECONNECT_DELAY_MS_MAX);
    assert!(RECONNECT_ATTEMPTS_COUNT_DEFAULT <= RECONNECT_ATTEMPTS_COUNT_MAX);
    assert!(CONTROL_REQUEST_TIMEOUT_MS_DEFAULT <= CONTROL_REQUEST_TIMEOUT_MS_MAX);
};
