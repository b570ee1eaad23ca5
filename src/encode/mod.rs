//! Compact JSON encoding: cell records and the key-abbreviation table.

pub mod cell;
pub mod keys;

pub use cell::encode_cell;
pub use keys::Keys;
