//! Conversions between wire-level CDC values and typed view fields.

pub mod date;
