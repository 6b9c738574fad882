//! The contract every framework binding implements.

use std::collections::{BTreeMap, BTreeSet};

use crate::snapshot::{InputMap, RequestSnapshot};

/// Bridges one framework's native request object to the connector.
///
/// Implementations read fields out of the request for the snapshot and
/// write neutralized values back when the daemon flags them. The connector
/// never touches the request or the process environment directly.
///
/// # Design Notes
///
/// Bindings hold no connector state of their own. Anything configurable
/// (which environment key names the client address, for example) is passed
/// in when the binding is constructed.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use shadowd_connector::web::FrameworkAdapter;
/// use shadowd_connector::{Category, InputMap, SnapshotBuilder};
///
/// struct Plain {
///     query: Vec<(String, String)>,
/// }
///
/// impl FrameworkAdapter for Plain {
///     type ErrorResponse = u16;
///
///     fn client_ip(&self) -> String { "127.0.0.1".into() }
///     fn caller(&self) -> String { "/plain".into() }
///     fn resource(&self) -> String { "/plain".into() }
///
///     fn gather_input(&self) -> InputMap {
///         let mut builder = SnapshotBuilder::new();
///         for (key, value) in &self.query {
///             builder.add_field(Category::Get, key, [value.as_str()]);
///         }
///         builder.build()
///     }
///
///     fn defuse_input(&mut self, threats: &BTreeSet<String>) -> bool {
///         for (key, value) in &mut self.query {
///             if threats.contains(&format!("GET|{}", key)) {
///                 value.clear();
///             }
///         }
///         true
///     }
///
///     fn error(&self) -> u16 { 500 }
/// }
///
/// let adapter = Plain { query: vec![("q".into(), "x".into())] };
/// assert_eq!(adapter.snapshot().input.get("GET|q"), Some("x"));
/// ```
pub trait FrameworkAdapter {
    /// What the framework returns to abort a request.
    type ErrorResponse;

    /// Address of the remote client.
    fn client_ip(&self) -> String;

    /// Identifier of the script or handler serving the request.
    fn caller(&self) -> String;

    /// Requested resource, usually the URL path.
    fn resource(&self) -> String;

    /// Collects all input fields.
    ///
    /// Implementations should build the map with
    /// [`SnapshotBuilder`](crate::SnapshotBuilder) so paths, indexing and
    /// category order follow the protocol.
    fn gather_input(&self) -> InputMap;

    /// Digests of the handler's source, keyed by algorithm.
    ///
    /// The default reports none.
    fn gather_hashes(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Neutralizes the given paths in the live request.
    ///
    /// Returns `false` if any threat cannot be neutralized safely. In that
    /// case the request must be left as it was, since it will be aborted.
    fn defuse_input(&mut self, threats: &BTreeSet<String>) -> bool;

    /// Produces the framework's abort response.
    fn error(&self) -> Self::ErrorResponse;

    /// Captures the full request snapshot.
    fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot::new(self.client_ip(), self.caller(), self.resource())
            .with_input(self.gather_input())
            .with_hashes(self.gather_hashes())
    }
}
