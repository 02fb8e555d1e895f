/*! Hand one HTTP request to a FastCGI backend and write back its answer.

[`Gateway::handle`] runs once per request and keeps no state between
requests apart from the shared [`ConPool`]:

1. decline requests whose `SERVER_HANDLER` is not ours
2. fail with 404 if no `SCRIPT_FILENAME` was resolved
3. build the CGI environment
4. pick the backend: the request's override or the default
5. get a pooled connection, or step aside if the default backend is not there
6. rewind the body and run the request, optionally under a deadline
7. parse the output and write status, body and headers to the sink
*/

use std::io::SeekFrom;
use std::sync::Arc;

use bytes::Bytes;
use http::Request;
use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt};

use crate::address::BackendAddress;
use crate::client::con_pool::{Acquired, Backend, ConPool, PooledConnection};
use crate::client::{Connector, Transport};
use crate::config::GatewayConfig;
use crate::context::{vars, RequestContext};
use crate::env::{self, CgiEnvironment};
use crate::error::{wrap, GatewayError};
use crate::httpparse::{self, HeaderField, ParsedResponse};
use crate::sink::ResponseSink;

const X_POWERED_BY: &str = "X-Powered-By";

/// What [`Gateway::handle`] did with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The backend answered and the response is complete
    Dispatched,
    /// The request is meant for another handler, nothing was touched
    Declined,
    /// No backend at the default address, let other handlers try
    NoBackend,
}

pub struct Gateway<C: Connector> {
    pool: Arc<ConPool<C>>,
    config: GatewayConfig,
}

impl<C: Connector> Gateway<C> {
    pub fn new(pool: Arc<ConPool<C>>, config: GatewayConfig) -> Gateway<C> {
        Gateway { pool, config }
    }
    pub fn pool(&self) -> &Arc<ConPool<C>> {
        &self.pool
    }
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The backend for this request. An override with a host or a port
    /// makes it explicit, missing parts are taken from the default address.
    pub fn backend_for(&self, ctx: &RequestContext) -> Backend {
        let default = self.config.default_address();
        match ctx.backend_override().filter(|o| o.host.is_some() || o.port.is_some()) {
            None => Backend::Default(default.clone()),
            Some(o) => Backend::Override(BackendAddress::new(
                o.host.as_deref().unwrap_or(default.host()),
                o.port.unwrap_or(default.port()),
            )),
        }
    }

    /// Forward `req` to its FastCGI backend and write the answer to `sink`.
    ///
    /// The body is rewound before it is sent.
    pub async fn handle<B, S>(
        &self,
        req: &mut Request<B>,
        sink: &mut S,
        ctx: &RequestContext,
    ) -> Result<Outcome, GatewayError>
    where
        B: AsyncRead + AsyncSeek + Unpin + Send,
        S: ResponseSink,
    {
        let server_vars = ctx.server_vars();
        if server_vars.get(vars::SERVER_HANDLER) != Some(self.config.handler_name()) {
            trace!("not a {} request", self.config.handler_name());
            return Ok(Outcome::Declined);
        }
        if !server_vars.has(vars::SCRIPT_FILENAME) {
            debug!("no script for {}", req.uri());
            sink.set_status_code(404).map_err(|e| wrap(e.into()))?;
            return Err(GatewayError::MissingScript);
        }

        let env = env::build(req, server_vars);
        let backend = self.backend_for(ctx);
        let con = match self.pool.get(&backend).await? {
            Acquired::Ready(con) => con,
            Acquired::NotConfigured => return Ok(Outcome::NoBackend),
        };
        debug!(
            "{} {} -> {}",
            req.method(),
            env.get(vars::SCRIPT_FILENAME).unwrap_or_default(),
            con.address()
        );

        let raw = self.dispatch(&con, &env, req.body_mut()).await?;
        let parsed = httpparse::parse(raw)?;
        info!("{} answered {}", con.address(), parsed.status_code);
        self.apply(parsed, sink).map_err(|e| wrap(e.into()))?;
        Ok(Outcome::Dispatched)
    }

    async fn dispatch<B>(
        &self,
        con: &PooledConnection<C::Connection>,
        env: &CgiEnvironment,
        body: &mut B,
    ) -> Result<Bytes, GatewayError>
    where
        B: AsyncRead + AsyncSeek + Unpin + Send,
    {
        body.seek(SeekFrom::Start(0)).await.map_err(GatewayError::failed)?;

        let exchange = con.transport().send(env, body);
        let res = match self.config.dispatch_timeout() {
            None => exchange.await,
            Some(after) => match tokio::time::timeout(after, exchange).await {
                Ok(res) => res,
                Err(_) => {
                    error!("{} did not answer within {:?}", con.address(), after);
                    //state of the connection is unknown now
                    con.mark_dead();
                    return Err(GatewayError::Timeout {
                        address: con.address().clone(),
                        after,
                    });
                }
            },
        };
        res.map_err(|e| {
            con.mark_dead();
            GatewayError::from(e)
        })
    }

    /// A header the sink does not accept is dropped, the rest of the response still goes out.
    fn apply<S: ResponseSink>(&self, parsed: ParsedResponse, sink: &mut S) -> Result<(), S::Error> {
        sink.set_status_code(parsed.status_code)?;
        sink.append_body(&parsed.body)?;
        for (name, field) in parsed.headers.iter() {
            let duplicates = matches!(field, HeaderField::Multiple(_));
            for value in field.values() {
                if let Err(e) = sink.add_header(name, value, duplicates) {
                    warn!("dropped header {} {:?}: {}", name, String::from_utf8_lossy(value), e);
                }
            }
        }
        sink.add_header(X_POWERED_BY, self.config.powered_by().as_bytes(), false)?;
        sink.mark_dispatched();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::con_pool::tests::MockConnector;
    use crate::context::{BackendOverride, ServerVars};
    use crate::sink::ResponseBuffer;
    use http::StatusCode;
    use std::io::Cursor;
    use std::time::Duration;

    fn server_vars() -> ServerVars {
        let mut sv = ServerVars::new();
        sv.set(vars::SERVER_HANDLER, "fastcgi")
            .set(vars::SCRIPT_FILENAME, "/var/www/index.php")
            .set(vars::REQUEST_METHOD, "POST");
        sv
    }

    fn gateway(connector: MockConnector) -> Gateway<MockConnector> {
        Gateway::new(Arc::new(ConPool::new(connector)), GatewayConfig::default())
    }

    fn request(body: &'static [u8]) -> Request<Cursor<&'static [u8]>> {
        Request::post("/index.php")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(Cursor::new(body))
            .unwrap()
    }

    const PHP_OUT: &[u8] =
        b"Status: 201 Created\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\nX-Powered-By: PHP/8.2\r\nContent-Type: text/html\r\n\r\n<p>hi</p>\n";

    #[tokio::test]
    async fn dispatches() {
        let gw = gateway(MockConnector::new(&["127.0.0.1:9010"], PHP_OUT));
        let ctx = RequestContext::new(server_vars());
        let mut req = request(b"a=1&b=2");
        let mut res = ResponseBuffer::new();

        let outcome = gw.handle(&mut req, &mut res, &ctx).await.unwrap();
        assert_eq!(outcome, Outcome::Dispatched);
        assert!(res.is_dispatched());
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.body(), b"<p>hi</p>");
        let cookies: Vec<_> = res.headers().get_all("set-cookie").iter().collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
        assert_eq!(res.headers()["content-type"], "text/html");
        assert_eq!(res.headers()["status"], "201 Created");
        assert_eq!(res.headers()["x-powered-by"], gw.config().powered_by());

        let seen = gw.pool().connector().seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (env, stdin) = &seen[0];
        assert_eq!(env.get("SCRIPT_FILENAME"), Some("/var/www/index.php"));
        assert_eq!(env.get("CONTENT_TYPE"), Some("application/x-www-form-urlencoded"));
        assert_eq!(stdin, b"a=1&b=2");
    }

    #[tokio::test]
    async fn body_is_rewound() {
        let gw = gateway(MockConnector::new(&["127.0.0.1:9010"], b"\r\n\r\nok"));
        let ctx = RequestContext::new(server_vars());
        let mut req = request(b"payload");
        //somebody already read the body
        req.body_mut().set_position(7);
        let mut res = ResponseBuffer::new();
        gw.handle(&mut req, &mut res, &ctx).await.unwrap();
        assert_eq!(gw.pool().connector().seen.lock().unwrap()[0].1, b"payload");
    }

    #[tokio::test]
    async fn connection_is_reused() {
        let gw = gateway(MockConnector::new(&["127.0.0.1:9010"], b"\r\n\r\nok"));
        let ctx = RequestContext::new(server_vars());
        for _ in 0..3 {
            let mut res = ResponseBuffer::new();
            gw.handle(&mut request(b""), &mut res, &ctx).await.unwrap();
            assert_eq!(res.body(), b"ok");
        }
        assert_eq!(gw.pool().connector().connects(), 1);
    }

    #[tokio::test]
    async fn other_handler_is_declined() {
        let gw = gateway(MockConnector::new(&["127.0.0.1:9010"], b""));
        let mut sv = server_vars();
        sv.set(vars::SERVER_HANDLER, "core");
        let ctx = RequestContext::new(sv);
        let mut res = ResponseBuffer::new();
        let outcome = gw.handle(&mut request(b""), &mut res, &ctx).await.unwrap();
        assert_eq!(outcome, Outcome::Declined);
        assert!(res.is_untouched());
        assert_eq!(gw.pool().connector().connects(), 0);
    }

    #[tokio::test]
    async fn missing_script() {
        let gw = gateway(MockConnector::new(&["127.0.0.1:9010"], b""));
        let mut sv = server_vars();
        sv.remove(vars::SCRIPT_FILENAME);
        let ctx = RequestContext::new(sv);
        let mut res = ResponseBuffer::new();
        let err = gw.handle(&mut request(b""), &mut res, &ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingScript));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(gw.pool().connector().connects(), 0);
    }

    #[tokio::test]
    async fn default_backend_missing() {
        let gw = gateway(MockConnector::new(&[], b""));
        let ctx = RequestContext::new(server_vars());
        let mut res = ResponseBuffer::new();
        let outcome = gw.handle(&mut request(b""), &mut res, &ctx).await.unwrap();
        assert_eq!(outcome, Outcome::NoBackend);
        assert!(res.is_untouched());
    }

    #[tokio::test]
    async fn override_unreachable() {
        let gw = gateway(MockConnector::new(&["127.0.0.1:9010"], b""));
        let ctx = RequestContext::new(server_vars()).with_override(BackendOverride {
            host: Some("10.0.0.7".to_owned()),
            port: Some(9000),
        });
        let mut res = ResponseBuffer::new();
        match gw.handle(&mut request(b""), &mut res, &ctx).await {
            Err(GatewayError::BackendUnavailable { address, message }) => {
                assert_eq!(address.key(), "10.0.0.7:9000");
                assert!(message.contains("Connection refused"));
            }
            other => panic!("{:?}", other),
        }
        assert!(res.is_untouched());
    }

    #[test]
    fn partial_override() {
        let gw = gateway(MockConnector::new(&[], b""));
        let ctx = RequestContext::new(server_vars()).with_override(BackendOverride {
            host: None,
            port: Some(9001),
        });
        assert_eq!(
            gw.backend_for(&ctx),
            Backend::Override(BackendAddress::new("127.0.0.1", 9001))
        );
        let ctx = RequestContext::new(server_vars()).with_override(BackendOverride {
            host: Some("10.0.0.7".to_owned()),
            port: None,
        });
        assert_eq!(
            gw.backend_for(&ctx),
            Backend::Override(BackendAddress::new("10.0.0.7", 9010))
        );
        //nothing designated
        let ctx = RequestContext::new(server_vars()).with_override(BackendOverride::default());
        assert!(!gw.backend_for(&ctx).is_explicit());
        let ctx = RequestContext::new(server_vars());
        assert_eq!(
            gw.backend_for(&ctx),
            Backend::Default(BackendAddress::new("127.0.0.1", 9010))
        );
    }

    #[tokio::test]
    async fn override_is_used() {
        let gw = gateway(MockConnector::new(&["php82:9000"], b"\r\n\r\nfrom 8.2"));
        let ctx = RequestContext::new(server_vars()).with_override(BackendOverride {
            host: Some("php82".to_owned()),
            port: Some(9000),
        });
        let mut res = ResponseBuffer::new();
        gw.handle(&mut request(b""), &mut res, &ctx).await.unwrap();
        assert_eq!(res.body(), b"from 8.2");
    }

    #[tokio::test]
    async fn malformed_status() {
        let gw = gateway(MockConnector::new(&["127.0.0.1:9010"], b"Status: ERR\r\n\r\n"));
        let ctx = RequestContext::new(server_vars());
        let mut res = ResponseBuffer::new();
        match gw.handle(&mut request(b""), &mut res, &ctx).await {
            Err(GatewayError::MalformedBackendResponse { token }) => assert_eq!(token, "ERR"),
            other => panic!("{:?}", other),
        }
        assert!(!res.is_dispatched());
    }

    #[tokio::test]
    async fn status_the_sink_rejects() {
        let gw = gateway(MockConnector::new(&["127.0.0.1:9010"], b"Status: 1000 Huge\r\n\r\n"));
        let ctx = RequestContext::new(server_vars());
        let mut res = ResponseBuffer::new();
        let err = gw.handle(&mut request(b""), &mut res, &ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::Failed { transport: false, .. }));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn empty_override_falls_through() {
        let gw = gateway(MockConnector::new(&[], b""));
        let ctx = RequestContext::new(server_vars()).with_override(BackendOverride::default());
        let mut res = ResponseBuffer::new();
        let outcome = gw.handle(&mut request(b""), &mut res, &ctx).await.unwrap();
        assert_eq!(outcome, Outcome::NoBackend);
        assert!(res.is_untouched());
    }

    #[tokio::test]
    async fn header_the_sink_rejects_is_dropped() {
        let gw = gateway(MockConnector::new(
            &["127.0.0.1:9010"],
            b"Status: 201 Created\r\nX-Bad: a\x01b\r\nContent-Type: text/plain\r\n\r\nbody",
        ));
        let ctx = RequestContext::new(server_vars());
        let mut res = ResponseBuffer::new();
        let outcome = gw.handle(&mut request(b""), &mut res, &ctx).await.unwrap();
        assert_eq!(outcome, Outcome::Dispatched);
        assert!(res.is_dispatched());
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.body(), b"body");
        assert!(!res.headers().contains_key("x-bad"));
        assert_eq!(res.headers()["content-type"], "text/plain");
        assert_eq!(res.headers()["x-powered-by"], gw.config().powered_by());
    }

    #[tokio::test]
    async fn hung_backend_times_out() {
        let mut connector = MockConnector::new(&["127.0.0.1:9010"], b"");
        connector.hang = true;
        let gw = Gateway::new(
            Arc::new(ConPool::new(connector)),
            GatewayConfig::default().with_dispatch_timeout(Duration::from_millis(20)),
        );
        let ctx = RequestContext::new(server_vars());
        let mut res = ResponseBuffer::new();
        match gw.handle(&mut request(b""), &mut res, &ctx).await {
            Err(e @ GatewayError::Timeout { .. }) => assert_eq!(e.status(), StatusCode::GATEWAY_TIMEOUT),
            other => panic!("{:?}", other),
        }
        //the next request gets a fresh connection
        assert_eq!(gw.pool().live_connections().await, 0);
        let _ = tokio::time::timeout(
            Duration::from_millis(50),
            gw.handle(&mut request(b""), &mut ResponseBuffer::new(), &ctx),
        )
        .await;
        assert_eq!(gw.pool().connector().connects(), 2);
    }
}
