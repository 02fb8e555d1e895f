/*! Backend connections, one per `host:port`, reused for the life of the pool.

 * [`ConPool`]: lazily connects and hands out [`PooledConnection`]s
 * [`Backend`]: the address to use and whether it was asked for explicitly

Lookups for the same key are serialized, two requests racing for a new
backend will result in a single connect. There is no health checking,
idle eviction or limit on the number of backends. A connection that
failed is replaced the next time its key is requested.
*/

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::Mutex;

use crate::address::BackendAddress;
use crate::client::{Connector, Transport};
use crate::error::GatewayError;

/// A live transport to one backend, owned by the [`ConPool`]
pub struct PooledConnection<T> {
    address: BackendAddress,
    transport: T,
    alive: AtomicBool,
}

impl<T: Transport> PooledConnection<T> {
    fn new(address: BackendAddress, transport: T) -> PooledConnection<T> {
        PooledConnection {
            address,
            transport,
            alive: AtomicBool::new(true),
        }
    }
    pub fn address(&self) -> &BackendAddress {
        &self.address
    }
    pub fn transport(&self) -> &T {
        &self.transport
    }
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.transport.is_alive()
    }
    /// The next [`ConPool::get`] for this address will reconnect
    pub fn mark_dead(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            info!("connection to {} marked dead", self.address);
        }
    }
}

impl<T> fmt::Debug for PooledConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("address", &self.address)
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish()
    }
}

/// Which backend a request goes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// nothing was designated for the request
    Default(BackendAddress),
    /// upstream routing picked this backend for the request
    Override(BackendAddress),
}

impl Backend {
    pub fn address(&self) -> &BackendAddress {
        match self {
            Backend::Default(a) | Backend::Override(a) => a,
        }
    }
    pub fn is_explicit(&self) -> bool {
        matches!(self, Backend::Override(_))
    }
}

/// Result of [`ConPool::get`]
pub enum Acquired<T> {
    Ready(Arc<PooledConnection<T>>),
    /// The default backend is not reachable. Not an error,
    /// the request should be left to other handlers.
    NotConfigured,
}

type Slot<T> = Arc<Mutex<Option<Arc<PooledConnection<T>>>>>;

/// manage connections to FastCGI backends
pub struct ConPool<C: Connector> {
    connector: C,
    slots: Mutex<HashMap<String, Slot<C::Connection>>>,
}

impl<C: Connector> ConPool<C> {
    pub fn new(connector: C) -> ConPool<C> {
        ConPool {
            connector,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Get the connection for `backend`, connecting if there is none or it died.
    ///
    /// A failed connect is [`GatewayError::BackendUnavailable`] if the backend
    /// was designated explicitly and [`Acquired::NotConfigured`] otherwise.
    pub async fn get(&self, backend: &Backend) -> Result<Acquired<C::Connection>, GatewayError> {
        let addr = backend.address();
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(
                slots
                    .entry(addr.key())
                    .or_insert_with(|| Arc::new(Mutex::new(None))),
            )
        };
        //held until the slot is settled
        let mut entry = slot.lock().await;

        if let Some(con) = entry.as_ref() {
            if con.is_alive() {
                debug!("reuse connection to {}", addr);
                return Ok(Acquired::Ready(Arc::clone(con)));
            }
            info!("reconnect to {}...", addr);
        }
        *entry = None;

        match self.connector.connect(addr).await {
            Ok(transport) => {
                info!("connected to {}", addr);
                let con = Arc::new(PooledConnection::new(addr.clone(), transport));
                *entry = Some(Arc::clone(&con));
                Ok(Acquired::Ready(con))
            }
            Err(e) if !backend.is_explicit() => {
                info!("no FastCGI backend at default {}: {}", addr, e);
                Ok(Acquired::NotConfigured)
            }
            Err(e) => {
                error!("FastCGI backend {}: {}", addr, e);
                Err(GatewayError::BackendUnavailable {
                    address: addr.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Number of backends with a connection that is believed to be alive
    pub async fn live_connections(&self) -> usize {
        let slots: Vec<Slot<C::Connection>> = self.slots.lock().await.values().cloned().collect();
        let mut n = 0;
        for slot in slots {
            if let Some(con) = slot.lock().await.as_ref() {
                if con.is_alive() {
                    n += 1;
                }
            }
        }
        n
    }
}

impl<C: Connector> fmt::Debug for ConPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backends = match self.slots.try_lock() {
            Ok(slots) => slots.len(),
            Err(_) => return f.write_str("ConPool { <locked> }"),
        };
        f.debug_struct("ConPool").field("backends", &backends).finish()
    }
}
