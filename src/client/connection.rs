/*! A single TCP connection to an FCGI application.

Requests are not multiplexed: concurrent callers of [`FcgiConnection::send`]
wait for the connection's lock and run one after the other.
The connection is opened with `FCGI_KEEP_CONN` so it can be reused.
A request that fails or is dropped before END_REQUEST closes the
connection for good: requests still waiting for it fail instead of
reading what was left on the stream.

# Example
```no_run
use std::io::Cursor;
use fcgi_gateway::address::BackendAddress;
use fcgi_gateway::client::{Connector, Transport};
use fcgi_gateway::client::connection::FcgiConnector;
use fcgi_gateway::env::CgiEnvironment;

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    let con = FcgiConnector.connect(&BackendAddress::new("127.0.0.1", 9000)).await?;
    let mut env = CgiEnvironment::new();
    env.insert("SCRIPT_FILENAME", "/srv/www/index.php");
    env.insert("REQUEST_METHOD", "GET");
    let stdout = con.send(&env, &mut Cursor::new(Vec::new())).await?;
    println!("{:?}", stdout);
    Ok(())
}
```
*/
use std::io::{Error as IoError, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::address::BackendAddress;
use crate::client::{Connector, Transport};
use crate::env::CgiEnvironment;
use crate::fastcgi::{self, BeginRequestBody, Body, EndRequestBody, Record};

/// Only one request is in flight per connection
const REQUEST_ID: u16 = 1;

/// Connects to FastCGI applications over TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct FcgiConnector;

impl Connector for FcgiConnector {
    type Connection = FcgiConnection;

    async fn connect(&self, addr: &BackendAddress) -> Result<FcgiConnection, IoError> {
        FcgiConnection::connect(addr).await
    }
}

struct InnerConnection {
    io: TcpStream,
    rbuf: BytesMut,
}

/// Single transport connection to a FCGI application
pub struct FcgiConnection {
    addr: BackendAddress,
    inner: Mutex<InnerConnection>,
    closed: AtomicBool,
}

impl FcgiConnection {
    /// Connect to a peer
    pub async fn connect(addr: &BackendAddress) -> Result<FcgiConnection, IoError> {
        let io = TcpStream::connect((addr.host(), addr.port())).await?;
        io.set_nodelay(true)?;
        debug!("tcp connection to {} established", addr);
        Ok(FcgiConnection {
            addr: addr.clone(),
            inner: Mutex::new(InnerConnection {
                io,
                rbuf: BytesMut::with_capacity(4096),
            }),
            closed: AtomicBool::new(false),
        })
    }

    pub fn address(&self) -> &BackendAddress {
        &self.addr
    }

    async fn exchange<R>(&self, inner: &mut InnerConnection, env: &CgiEnvironment, body: &mut R) -> Result<Bytes, IoError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut wbuf = BytesMut::with_capacity(4096);
        fastcgi::write_begin_request(
            &mut wbuf,
            REQUEST_ID,
            BeginRequestBody::RESPONDER,
            BeginRequestBody::KEEP_CONN,
        );
        let params = fastcgi::encode_params(env.iter().map(|(k, v)| (k.as_bytes(), &v[..])))?;
        fastcgi::write_stream(&mut wbuf, Record::PARAMS, REQUEST_ID, &params);
        fastcgi::write_end_of_stream(&mut wbuf, Record::PARAMS, REQUEST_ID);
        inner.io.write_all(&wbuf).await?;
        trace!("sent {} params to {}", env.len(), self.addr);

        //send the body to the FCGI App
        let mut chunk = BytesMut::with_capacity(fastcgi::MAX_CONTENT);
        let mut sent = 0;
        loop {
            chunk.clear();
            if body.read_buf(&mut chunk).await? == 0 {
                break;
            }
            sent += chunk.len();
            wbuf.clear();
            fastcgi::write_stream(&mut wbuf, Record::STDIN, REQUEST_ID, &chunk);
            inner.io.write_all(&wbuf).await?;
        }
        wbuf.clear();
        fastcgi::write_end_of_stream(&mut wbuf, Record::STDIN, REQUEST_ID);
        inner.io.write_all(&wbuf).await?;
        inner.io.flush().await?;
        debug!("sent req body ({} bytes) to {}", sent, self.addr);

        let mut stdout = BytesMut::new();
        loop {
            let mut data = inner.rbuf.split().freeze();
            while let Some(rec) = Record::read(&mut data) {
                if rec.request_id != REQUEST_ID {
                    debug!("record for #{} ignored", rec.request_id);
                    continue;
                }
                match rec.body {
                    Body::StdOut(s) => stdout.extend_from_slice(&s),
                    Body::StdErr(s) if s.is_empty() => {}
                    Body::StdErr(s) => error!("FCGI {} Err: {}", self.addr, String::from_utf8_lossy(&s).trim_end()),
                    Body::EndRequest(status) => {
                        if !data.is_empty() {
                            warn!("{} bytes after end of request discarded", data.len());
                        }
                        return end_of_request(status, stdout.freeze());
                    }
                    _ => warn!("unexpected record type {} from {}", rec.rtype, self.addr),
                }
            }
            inner.rbuf.extend_from_slice(&data);
            if inner.io.read_buf(&mut inner.rbuf).await? == 0 {
                info!("connection to {} closed", self.addr);
                return Err(IoError::new(
                    ErrorKind::UnexpectedEof,
                    "FastCGI application closed the connection before ending the request",
                ));
            }
        }
    }
}

/// Closes the connection unless the request it guards ran to its end,
/// also when the request future is dropped halfway.
struct InFlight<'a> {
    closed: &'a AtomicBool,
    done: bool,
}

impl<'a> InFlight<'a> {
    fn new(closed: &'a AtomicBool) -> InFlight<'a> {
        InFlight { closed, done: false }
    }
    fn finish(&mut self) {
        self.done = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.closed.store(true, Ordering::Release);
        }
    }
}

fn end_of_request(status: EndRequestBody, stdout: Bytes) -> Result<Bytes, IoError> {
    match status.protocol_status {
        EndRequestBody::REQUEST_COMPLETE => {
            debug!("request ended with {}", status.app_status);
            Ok(stdout)
        }
        EndRequestBody::CANT_MPX_CONN => Err(IoError::new(ErrorKind::Other, "application refused: can't multiplex")),
        EndRequestBody::OVERLOADED => Err(IoError::new(ErrorKind::Other, "application is overloaded")),
        EndRequestBody::UNKNOWN_ROLE => Err(IoError::new(ErrorKind::Other, "application does not know the responder role")),
        other => Err(IoError::new(ErrorKind::InvalidData, format!("unknown protocol status {}", other))),
    }
}

impl Transport for FcgiConnection {
    async fn send<R>(&self, env: &CgiEnvironment, body: &mut R) -> Result<Bytes, IoError>
    where
        R: AsyncRead + Unpin + Send,
    {
        trace!("wait for lock on {}", self.addr);
        let mut inner = self.inner.lock().await;
        if !self.is_alive() {
            //the stream may still carry output of an abandoned request
            return Err(IoError::new(
                ErrorKind::NotConnected,
                format!("connection to {} is closed", self.addr),
            ));
        }
        let mut in_flight = InFlight::new(&self.closed);
        let res = self.exchange(&mut inner, env, body).await;
        match &res {
            Ok(_) => in_flight.finish(),
            Err(e) => {
                error!("request to {} failed: {}", self.addr, e);
                inner.rbuf.clear();
            }
        }
        res
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}
