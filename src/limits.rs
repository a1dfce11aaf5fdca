use crate::model::Ms;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

/// User ids are opaque tokens from the identity provider.
pub const MAX_USER_ID_LEN: usize = 128;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_TIMEZONE_LEN: usize = 64;
pub const MAX_TOKEN_LEN: usize = 4096;

pub const MAX_SLOTS_PER_DAY: usize = 288; // 5-minute slots over 24h
pub const MAX_SLOT_DURATION_MS: Ms = 24 * 3_600_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

pub const MAX_NOTIFICATIONS_PER_QUERY: usize = 500;
