pub mod connection;
pub mod driver;
pub mod value_codec;

pub use connection::MysqlConnection;
pub use driver::MysqlDriver;
