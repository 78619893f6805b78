pub mod value;

pub mod connection;
pub mod deserializer;
pub mod driver;
pub mod result;
pub mod serializer;
pub mod statement;

pub const DEFAULT_DB_NAME: &str = "default";
