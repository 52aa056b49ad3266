pub mod audit;
pub mod digest;
pub mod error;
pub mod lifecycle;
pub mod record;
pub mod risk;
pub mod types;

pub use types::*;

/// Current UTC time in RFC 3339.
pub fn now_rfc3339() -> String {
    let now = time::OffsetDateTime::now_utc();
    now.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
