//! Outbound push notifications: callback URL validation, path templating
//! and the one-shot HTTP GET.

mod dispatch;
mod url;

pub use dispatch::{Connection, Connector, Dispatcher, Push, TcpConnector, build_request};
pub use url::{parse_callback_url, parse_stored_callback, render_path, validate_callback};
