/*! Fast CGI client/webserver side
 *
 * [`Connector`] and [`Transport`] are the seams to whatever speaks the
 * FastCGI wire protocol. [`con_pool::ConPool`] keeps one connection per
 * backend, `connection` (feature `fcgi`) is the bundled TCP transport.
*/

use std::future::Future;
use std::io::Error as IoError;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::address::BackendAddress;
use crate::env::CgiEnvironment;

pub mod con_pool;
#[cfg(feature = "fcgi")]
#[cfg_attr(docsrs, doc(cfg(feature = "fcgi")))]
pub mod connection;

/// Opens transport connections to backends
pub trait Connector: Send + Sync + 'static {
    type Connection: Transport;

    fn connect(&self, addr: &BackendAddress) -> impl Future<Output = Result<Self::Connection, IoError>> + Send;
}

/// One established connection to a FastCGI application
pub trait Transport: Send + Sync + 'static {
    /// Run one request: send `env` and all of `body` as STDIN,
    /// return the complete STDOUT once the application ended the request.
    fn send<R>(
        &self,
        env: &CgiEnvironment,
        body: &mut R,
    ) -> impl Future<Output = Result<Bytes, IoError>> + Send
    where
        R: AsyncRead + Unpin + Send;

    /// false once the transport knows the peer is gone
    fn is_alive(&self) -> bool {
        true
    }
}
