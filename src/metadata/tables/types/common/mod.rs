//! Column types shared by several tables.

mod codedindex;

pub use codedindex::{CodedIndex, CodedIndexType};
