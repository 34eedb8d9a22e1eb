//! Feed decoding and single-event re-encoding (RFC 5545).

mod generate;
mod parse;

pub use generate::encode_event;
pub use parse::{parse_feed, parse_feed_bytes};
