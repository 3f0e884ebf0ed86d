#![warn(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
#![allow(
    clippy::cast_possible_truncation, // Sizes and durations stay far below the limits
    clippy::cast_possible_wrap,       // Status codes and OS error numbers are small
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,  // e.g. ConsumerError in sender::consumer
    clippy::must_use_candidate
)]

pub mod app;
pub mod buffer;
pub mod domain;
pub mod producer;
pub mod sender;

pub use app::{App, Config};
pub use buffer::{Batch, EventQueue, QueueConfig};
pub use domain::{ClientError, Record};
pub use producer::{Client, ClientOptions, Events, People, PeopleOptions, ProducerError};
pub use sender::{Consumer, ConsumerConfig, ConsumerKind, ConsumerRegistry, DeliveryMode, build_consumer};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
