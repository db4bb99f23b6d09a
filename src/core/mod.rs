pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use types::{Column, Row, Schema, split_qualified, validate_identifier};
pub use value::{DataType, Value, parse_timestamp};
