//! Web framework integration surface.
//!
//! This module is the boundary between a hosting framework and the
//! connector. It defines what a framework binding must provide and ships a
//! framework-neutral request object that bindings can map onto:
//!
//! - [`FrameworkAdapter`]: read fields, write defused values back, abort
//! - [`RequestContext`]: an owned WSGI/CGI-style request implementing it
//!
//! # Design Principles
//!
//! 1. **No Framework Dependencies**: nothing here links against a framework.
//!    Bindings for CGI, Django or Werkzeug live with the host application.
//!
//! 2. **Explicit Mutation**: defusing rewrites the adapter's own request
//!    value. The connector never edits process environment variables.
//!
//! 3. **All or Nothing**: an adapter either neutralizes every threat or
//!    none, so an aborted request is never half cleaned.
//!
//! # Integration Flow
//!
//! ```text
//! framework request
//!   ↓
//! binding fills a RequestContext (or implements FrameworkAdapter itself)
//!   ↓
//! Connector::start(&mut adapter, &sink)
//!   ↓
//! Outcome::Continue → copy defused fields back, run the handler
//! Outcome::Abort    → return the error response
//! ```

mod adapter;
mod extract;

pub use adapter::{ErrorResponse, MultiDict, RequestContext, ERROR_BODY, ERROR_STATUS};
pub use extract::FrameworkAdapter;
