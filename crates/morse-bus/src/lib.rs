//! Middleware adapter: the `morse-core` ports spoken as newline-delimited
//! JSON-RPC over stdio.
//!
//! Requests from the middleware become `Connection` calls; signals become
//! notifications. Both directions share one line channel, drained by
//! [`signals::write_lines`].

pub mod methods;
pub mod rpc;
pub mod signals;

pub use methods::handle_request;
pub use signals::StdioBus;
