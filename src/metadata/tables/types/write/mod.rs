mod traits;

pub use traits::RowWritable;
