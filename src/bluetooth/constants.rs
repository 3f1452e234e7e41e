//! Constants used throughout the sync core: service and characteristic
//! UUIDs, signal thresholds and retry timing.

use uuid::Uuid;

/// Name used when a device reports no usable label.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// Service advertised to mark a device as running this app.
pub const UUID_PRESENCE_SERVICE: Uuid = Uuid::from_u128(0x43616c53_796e_6350_7273_656e63653031);

/// Service exposing the calendar transfer characteristic.
pub const UUID_CALENDAR_SERVICE: Uuid = Uuid::from_u128(0x43616c53_796e_6353_6572_766963653031);

/// The write/notify characteristic carrying calendar chunk frames, both
/// directions.
pub const UUID_CALENDAR_SYNC_CHAR: Uuid = Uuid::from_u128(0x43616c53_796e_6343_6861_6e6e656c3031);

/// Maximum number of connection retries
pub const MAX_CONNECT_RETRIES: u32 = 3;

/// Delay between connection retries in milliseconds
pub const CONNECT_RETRY_DELAY_MS: u64 = 1000;

/// Display signal stronger than this is category 1 (strong).
pub const STRONG_RSSI_THRESHOLD: i16 = -50;

/// Display signal stronger than this is category 2 (medium); anything
/// weaker is category 3.
pub const MEDIUM_RSSI_THRESHOLD: i16 = -80;

/// A raw reading within this many dB of the displayed value does not move
/// it before the hold expires. Keeps the sorted list from reordering on
/// every reading.
pub const SIGNAL_JUMP_THRESHOLD: i16 = 20;

/// How long the displayed signal holds before any differing reading may
/// replace it, in seconds.
pub const SIGNAL_SNAPSHOT_HOLD_SECS: u64 = 60;

/// Signal assumed when the platform reports no reading at all.
pub const NO_READING_RSSI: i16 = -100;
