pub mod concurrent;
pub mod consumer;
pub mod encoding;
pub mod error_reporter;
pub mod file;
pub mod http;
pub mod socket;

pub use concurrent::ConcurrentHttpConsumer;
pub use consumer::{
    Consumer, ConsumerConfig, ConsumerError, ConsumerFactory, ConsumerKind, ConsumerRegistry,
    DeliveryMode, build_consumer,
};
pub use encoding::EncodingError;
pub use error_reporter::{ErrorCallback, ErrorReporter};
pub use file::FileConsumer;
pub use http::HttpConsumer;
pub use socket::{SocketConnector, SocketConsumer, SocketResponse, SocketStream, TcpConnector};
