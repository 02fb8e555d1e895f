//! Simple HTTP Server that forwards every request to an FCGI App on 127.0.0.1:9010.
//! Such an App could be php-fpm (`listen = 127.0.0.1:9010`) serving
//! scripts from the current directory, or flup/python:
//! ```
//! def myapp(environ, start_response):
//!     start_response('200 OK', [('Content-Type', 'text/plain')])
//!     return [environ['SCRIPT_FILENAME'].encode() + b'\n']
//!
//! if __name__ == '__main__':
//!     from flup.server.fcgi import WSGIServer
//!     WSGIServer(myapp, bindAddress=('127.0.0.1',9010)).run()
//! ```

#![deny(warnings)]
use bytes::Bytes;
use fcgi_gateway::client::{con_pool::ConPool, connection::FcgiConnector};
use fcgi_gateway::context::{vars, RequestContext, ServerVars};
use fcgi_gateway::{Gateway, GatewayConfig, Outcome, ResponseBuffer};
use http::{Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use log::error;
use std::convert::Infallible;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Builder;

async fn fwd_to_fcgi(
    gateway: Arc<Gateway<FcgiConnector>>,
    remote: SocketAddr,
    local: SocketAddr,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(b) => b.to_bytes(),
        Err(e) => {
            error!("{}", e);
            return Ok(status_only(StatusCode::BAD_REQUEST));
        }
    };
    let mut req = Request::from_parts(parts, Cursor::new(body));

    let script = format!(".{}", req.uri().path());
    let mut sv = ServerVars::new();
    sv.set(vars::SERVER_HANDLER, "fastcgi")
        .set(vars::SCRIPT_FILENAME, script.as_str())
        .set(vars::SCRIPT_NAME, req.uri().path())
        .set(vars::REQUEST_METHOD, req.method().as_str())
        .set(vars::REQUEST_URI, req.uri().to_string())
        .set(vars::QUERY_STRING, req.uri().query().unwrap_or_default())
        .set(vars::DOCUMENT_ROOT, ".")
        .set(vars::SERVER_PROTOCOL, format!("{:?}", req.version()))
        .set(vars::SERVER_SOFTWARE, "Awesome Server 1.0")
        .set(vars::SERVER_NAME, "localhost")
        .set(vars::SERVER_ADDR, local.ip().to_string())
        .set(vars::SERVER_PORT, local.port().to_string())
        .set(vars::REMOTE_ADDR, remote.ip().to_string())
        .set(vars::REMOTE_PORT, remote.port().to_string())
        .set(vars::REDIRECT_STATUS, "200");

    let mut res = ResponseBuffer::new();
    match gateway.handle(&mut req, &mut res, &RequestContext::new(sv)).await {
        Ok(Outcome::Dispatched) => {
            let res = res.into_response();
            let (parts, body) = res.into_parts();
            Ok(Response::from_parts(parts, Full::new(body)))
        }
        Ok(_) => Ok(status_only(StatusCode::NOT_FOUND)),
        Err(e) => {
            error!("{}", e);
            Ok(status_only(e.status()))
        }
    }
}

fn status_only(status: StatusCode) -> Response<Full<Bytes>> {
    let mut res = Response::new(Full::new(Bytes::new()));
    *res.status_mut() = status;
    res
}

async fn amain() {
    pretty_env_logger::init();

    let gateway = Arc::new(Gateway::new(
        Arc::new(ConPool::new(FcgiConnector)),
        GatewayConfig::default(),
    ));

    let in_addr: SocketAddr = ([127, 0, 0, 1], 1337).into();
    let listener = match TcpListener::bind(in_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };
    println!("Listening on http://{}", in_addr);
    while let Ok((stream, remote)) = listener.accept().await {
        let io = TokioIo::new(stream);
        let gw = gateway.clone();
        let service = service_fn(move |req: Request<hyper::body::Incoming>| {
            fwd_to_fcgi(gw.clone(), remote, in_addr, req)
        });

        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                println!("Error serving connection: {:?}", err);
            }
        });
    }
}
fn main() {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(amain());
}
