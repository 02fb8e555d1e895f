/*! HTTP to FastCGI gateway in pure Rust.

Sits inside a web server's request pipeline and forwards requests that
were routed to it to a FastCGI application such as PHP-FPM:
- builds the CGI environment from the request and the host's server variables
- keeps one pooled connection per backend `host:port`
- parses the application's output and writes status, headers and body
  to the host's response through a [`ResponseSink`]

```no_run
# use std::io::Cursor;
# use std::sync::Arc;
use fcgi_gateway::client::{con_pool::ConPool, connection::FcgiConnector};
use fcgi_gateway::context::{vars, RequestContext, ServerVars};
use fcgi_gateway::{Gateway, GatewayConfig, Outcome, ResponseBuffer};
# #[tokio::main(flavor = "current_thread")]
# async fn main() -> Result<(), fcgi_gateway::GatewayError> {
let gateway = Gateway::new(Arc::new(ConPool::new(FcgiConnector)), GatewayConfig::default());

let mut sv = ServerVars::new();
sv.set(vars::SERVER_HANDLER, "fastcgi")
  .set(vars::SCRIPT_FILENAME, "/var/www/index.php");
let mut req = http::Request::get("/index.php").body(Cursor::new(Vec::new())).unwrap();
let mut res = ResponseBuffer::new();

if gateway.handle(&mut req, &mut res, &RequestContext::new(sv)).await? == Outcome::Dispatched {
    println!("{:?}", res.into_response());
}
# Ok(())
# }
```

 Features:
 - `fcgi` (default): [`FcgiConnector`], the bundled TCP transport
 - `serde`: deserialize [`GatewayConfig`] and [`BackendAddress`]

[`FcgiConnector`]: ./client/connection/struct.FcgiConnector.html
*/
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod address;
pub mod client;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod fastcgi;
pub mod gateway;
pub mod httpparse;
pub mod sink;

pub use address::BackendAddress;
pub use config::GatewayConfig;
pub use context::{RequestContext, ServerVars};
pub use error::GatewayError;
pub use gateway::{Gateway, Outcome};
pub use sink::{ResponseBuffer, ResponseSink};
