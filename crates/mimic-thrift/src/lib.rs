//! Thrift provider for Mimic.
//!
//! Parses Thrift IDL into a normalized type graph, serves RPC calls with
//! canned or synthesized responses across the Binary/Compact/JSON protocols
//! and Buffered/Framed transports (over raw TCP or HTTP), and builds clients
//! for proxy mode and one-shot request dispatch.

pub mod ast;
pub mod client;
pub mod codec;
pub mod file;
pub mod grammar;
pub mod parser;
pub mod protocol;
pub mod provider;
pub mod response;
pub mod server;

pub use client::{ClientOutcome, ThriftClient};
pub use codec::ApplicationException;
pub use file::{sort_services, ThriftJson};
pub use parser::{ParseError, ThriftParser};
pub use provider::ThriftProvider;
pub use response::{format_thrift, generate_response, GenerateError};
pub use server::{CallOutcome, ThriftDispatcher};
