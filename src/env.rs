/*! CGI environment for one request.

[`build`] turns an HTTP request and the host's [`ServerVars`] into the
name/value params sent to the FastCGI application.

```
use http::Request;
use fcgi_gateway::context::{vars, ServerVars};
use fcgi_gateway::env;

let req = Request::get("/index.php?a=1").header("X-Foo-Bar", "v").body(()).unwrap();
let mut sv = ServerVars::new();
sv.set(vars::SCRIPT_FILENAME, "/srv/www/index.php");
let env = env::build(&req, &sv);
assert_eq!(env.get("HTTP_X_FOO_BAR"), Some("v"));
assert_eq!(env.get("SCRIPT_FILENAME"), Some("/srv/www/index.php"));
assert_eq!(env.get("CONTENT_TYPE"), None);
```
*/

use std::collections::BTreeMap;
use std::collections::btree_map;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::Request;

use crate::context::{vars, ServerVars};

/// Value of `GATEWAY_INTERFACE` when the host does not provide one
pub const GATEWAY_INTERFACE: &str = "FastCGI/1.0";

/// Copied from the server vars, present even if the host left them unset
const REQUIRED: [&str; 14] = [
    vars::REQUEST_METHOD,
    vars::SCRIPT_FILENAME,
    vars::QUERY_STRING,
    vars::SCRIPT_NAME,
    vars::REQUEST_URI,
    vars::DOCUMENT_ROOT,
    vars::SERVER_PROTOCOL,
    vars::HTTPS,
    vars::SERVER_SOFTWARE,
    vars::REMOTE_ADDR,
    vars::REMOTE_PORT,
    vars::SERVER_ADDR,
    vars::SERVER_PORT,
    vars::SERVER_NAME,
];

/// CGI meta-variables. Unique names, last write wins.
///
/// Values are raw bytes: header values that are not UTF-8 reach the
/// application unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CgiEnvironment {
    vars: BTreeMap<String, Bytes>,
}

impl CgiEnvironment {
    pub fn new() -> CgiEnvironment {
        CgiEnvironment::default()
    }
    pub fn insert<K: Into<String>, V: AsRef<[u8]>>(&mut self, name: K, value: V) {
        self.vars.insert(name.into(), Bytes::copy_from_slice(value.as_ref()));
    }
    /// The value of `name`, if it is set and valid UTF-8
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_bytes(name).and_then(|v| std::str::from_utf8(v).ok())
    }
    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        self.vars.get(name).map(|v| &v[..])
    }
    pub fn contains_key(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }
    pub fn len(&self) -> usize {
        self.vars.len()
    }
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
    pub fn iter(&self) -> btree_map::Iter<'_, String, Bytes> {
        self.vars.iter()
    }
}

impl<'a> IntoIterator for &'a CgiEnvironment {
    type Item = (&'a String, &'a Bytes);
    type IntoIter = btree_map::Iter<'a, String, Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.iter()
    }
}

/// Build the environment for `req`.
///
/// Server vars are not validated: an unset required variable becomes an
/// empty value. `REDIRECT_STATUS` is only added if the host set it,
/// `CONTENT_TYPE`/`CONTENT_LENGTH` only if the request carries the header.
/// Pass-through environment entries go in last and may replace `HTTP_*` values.
pub fn build<B>(req: &Request<B>, server_vars: &ServerVars) -> CgiEnvironment {
    let mut env = CgiEnvironment::new();

    env.insert(
        vars::GATEWAY_INTERFACE,
        server_vars
            .get(vars::GATEWAY_INTERFACE)
            .unwrap_or(GATEWAY_INTERFACE),
    );
    for name in REQUIRED {
        env.insert(name, server_vars.get(name).unwrap_or_default());
    }
    if let Some(status) = server_vars.get(vars::REDIRECT_STATUS) {
        env.insert(vars::REDIRECT_STATUS, status);
    }

    let headers = req.headers();
    if let Some(value) = headers.get(CONTENT_TYPE) {
        env.insert("CONTENT_TYPE", value.as_bytes());
    }
    if let Some(value) = headers.get(CONTENT_LENGTH) {
        env.insert("CONTENT_LENGTH", value.as_bytes());
    }

    for (key, value) in headers.iter() {
        /*rfc3875
        The HTTP header field name is converted to upper case, has all
        occurrences of "-" replaced with "_" and has "HTTP_" prepended to
        give the meta-variable name.
        */
        env.insert(meta_name(key.as_str()), value.as_bytes());
    }

    for (key, value) in server_vars.env_vars() {
        env.insert(key, value);
    }
    env
}

fn meta_name(header: &str) -> String {
    let mut k = String::with_capacity(header.len() + 5);
    k.push_str("HTTP_");
    for c in header.chars() {
        k.push(match c {
            '-' => '_',
            c => c.to_ascii_uppercase(),
        });
    }
    k
}
