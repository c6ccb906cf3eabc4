//! Client for ingesting rows into a time-series database over the line
//! protocol.
//!
//! Rows are encoded by [`protocol::Buffer`] and delivered by a
//! [`transport::LineChannel`] over TCP, UDP or HTTP. [`Sender`] ties the two
//! together and adds auto-flush and a configuration string:
//!
//! ```no_run
//! use ilp_client::{Sender, protocol::TimeUnit};
//!
//! # fn main() -> ilp_client::Result<()> {
//! let mut sender = Sender::from_conf("tcp::addr=localhost:9009;")?;
//! sender.table("cpu")?.symbol("host", "a")?.column_f64("load", 0.5)?.at_now()?;
//! sender.flush()?;
//! # Ok(())
//! # }
//! ```
pub mod cli;
pub mod conf;
pub mod error;
pub mod http;
pub mod net;
pub mod protocol;
pub mod sender;
pub mod transport;

pub use conf::Conf;
pub use error::{Error, ErrorCode, Result};
pub use sender::{AutoFlush, Sender, SenderBuilder, Transport};
