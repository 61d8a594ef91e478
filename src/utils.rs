mod varint;

pub use varint::{read_varint32, write_varint32};
