//! Cross-cutting application constants.

/// Maximum number of characters of unit content forwarded to the classifier.
pub const MAX_UNIT_CONTENT_CHARS: usize = 50_000;

/// Marker appended when unit content is cut at [`MAX_UNIT_CONTENT_CHARS`].
pub const TRUNCATION_MARKER: &str = "\n\n[... content truncated ...]";

/// Global ceiling on concurrently analyzed units.
pub const MAX_CONCURRENT_UNITS: usize = 50;

/// Ceiling on concurrent durable writes during archive unpacking.
pub const MAX_CONCURRENT_UPLOADS: usize = 16;

/// Number of per-unit detail rows persisted per insert batch.
pub const DETAIL_INSERT_BATCH: usize = 50;

/// Default classifier model identifier.
pub const DEFAULT_CLASSIFIER_MODEL: &str = "gemini-2.5-flash";

/// Default per-unit analysis timeout in seconds.
pub const DEFAULT_UNIT_TIMEOUT_SECS: u64 = 120;

/// Default deadline for a whole analysis batch in seconds.
pub const DEFAULT_BATCH_DEADLINE_SECS: u64 = 1_800;
