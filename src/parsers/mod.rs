//! Playlist parsing
//!
//! Only the segment-list dialect served by the course CDN is understood;
//! see [`m3u8_parser`].

pub mod m3u8_parser;

pub use m3u8_parser::*;
