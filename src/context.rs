/*! Request scoped state the host resolved before handing the request over.

 * [`ServerVars`]: CGI variables the host computed (script, document root, peer, ...)
   plus pass-through process environment entries
 * [`BackendOverride`]: volatile routing decision naming a non-default backend
*/

use std::collections::HashMap;

/// Names of the server variables the gateway reads
pub mod vars {
    pub const SERVER_HANDLER: &str = "SERVER_HANDLER";
    pub const GATEWAY_INTERFACE: &str = "GATEWAY_INTERFACE";
    pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
    pub const SCRIPT_FILENAME: &str = "SCRIPT_FILENAME";
    pub const QUERY_STRING: &str = "QUERY_STRING";
    pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
    pub const REQUEST_URI: &str = "REQUEST_URI";
    pub const DOCUMENT_ROOT: &str = "DOCUMENT_ROOT";
    pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";
    pub const HTTPS: &str = "HTTPS";
    pub const SERVER_SOFTWARE: &str = "SERVER_SOFTWARE";
    pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
    pub const REMOTE_PORT: &str = "REMOTE_PORT";
    pub const SERVER_ADDR: &str = "SERVER_ADDR";
    pub const SERVER_PORT: &str = "SERVER_PORT";
    pub const SERVER_NAME: &str = "SERVER_NAME";
    pub const REDIRECT_STATUS: &str = "REDIRECT_STATUS";
}

#[derive(Debug, Clone, Default)]
pub struct ServerVars {
    vars: HashMap<String, String>,
    env: Vec<(String, String)>,
}

impl ServerVars {
    pub fn new() -> ServerVars {
        ServerVars::default()
    }
    pub fn has(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
    pub fn set<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) -> &mut ServerVars {
        self.vars.insert(name.into(), value.into());
        self
    }
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.vars.remove(name)
    }
    /// Add a process environment entry that is passed through to the backend as is
    pub fn add_env<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) -> &mut ServerVars {
        self.env.push((name.into(), value.into()));
        self
    }
    pub fn env_vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ServerVars {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> ServerVars {
        let mut sv = ServerVars::new();
        for (k, v) in iter {
            sv.set(k, v);
        }
        sv
    }
}

/// Backend chosen by upstream routing for this request only.
///
/// A missing part falls back to the default backend's host or port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOverride {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    server_vars: ServerVars,
    backend_override: Option<BackendOverride>,
}

impl RequestContext {
    pub fn new(server_vars: ServerVars) -> RequestContext {
        RequestContext {
            server_vars,
            backend_override: None,
        }
    }
    pub fn with_override(mut self, backend: BackendOverride) -> RequestContext {
        self.backend_override = Some(backend);
        self
    }
    pub fn server_vars(&self) -> &ServerVars {
        &self.server_vars
    }
    pub fn server_vars_mut(&mut self) -> &mut ServerVars {
        &mut self.server_vars
    }
    pub fn backend_override(&self) -> Option<&BackendOverride> {
        self.backend_override.as_ref()
    }
}
