/*! Turn the raw STDOUT of a FastCGI application into status, headers and body.

The header block ends at the first `\r\n\r\n`. Lines that do not look
like `name: value` are skipped instead of failing the whole response.
Header values are kept as the bytes the application sent.
```
use bytes::Bytes;
use fcgi_gateway::httpparse::{parse, HeaderField};

let res = parse(Bytes::from_static(b"Status: 404 Not Found\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\nnope")).unwrap();
assert_eq!(res.status_code, 404);
assert_eq!(res.headers.get("status"), Some(&HeaderField::Single(Bytes::from_static(b"404 Not Found"))));
assert_eq!(res.headers.get("set-cookie").unwrap().values().collect::<Vec<_>>(), [b"a=1", b"b=2"]);
assert_eq!(res.body, "nope");
```
*/

use std::slice;

use bytes::Bytes;
use log::{debug, trace};

use crate::error::GatewayError;

const HEADER_END: &[u8] = b"\r\n\r\n";
const STATUS: &str = "status";
const DEFAULT_STATUS: &[u8] = b"200 OK";
const DEFAULT_CODE: u16 = 200;
/// characters stripped around values and the body
const BLANK: &[char] = &[' ', '\t', '\n', '\r', '\0', '\x0B'];

/// One or more values received under the same header name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderField {
    Single(Bytes),
    Multiple(Vec<Bytes>),
}

impl HeaderField {
    fn push(&mut self, value: Bytes) {
        match self {
            HeaderField::Single(first) => {
                let first = std::mem::take(first);
                *self = HeaderField::Multiple(vec![first, value]);
            }
            HeaderField::Multiple(all) => all.push(value),
        }
    }
    /// all values in the order they were received
    pub fn values(&self) -> Values<'_> {
        match self {
            HeaderField::Single(v) => Values::Single(Some(v)),
            HeaderField::Multiple(all) => Values::Multiple(all.iter()),
        }
    }
}

pub enum Values<'a> {
    Single(Option<&'a Bytes>),
    Multiple(slice::Iter<'a, Bytes>),
}

impl<'a> Iterator for Values<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        match self {
            Values::Single(v) => v.take().map(|v| &v[..]),
            Values::Multiple(it) => it.next().map(|v| &v[..]),
        }
    }
}

/// Response headers by lowercased name, in order of first appearance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    fields: Vec<(String, HeaderField)>,
}

impl ResponseHeaders {
    pub fn get(&self, name: &str) -> Option<&HeaderField> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }
    pub fn len(&self) -> usize {
        self.fields.len()
    }
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderField)> {
        self.fields.iter().map(|(n, f)| (n.as_str(), f))
    }
    /// add another value for `name`
    fn append(&mut self, name: String, value: Bytes) {
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, field)) => field.push(value),
            None => self.fields.push((name, HeaderField::Single(value))),
        }
    }
    /// replace all values of `name`, keeping its position
    fn set(&mut self, name: &str, value: Bytes) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, field)) => *field = HeaderField::Single(value),
            None => self.fields.push((name.to_owned(), HeaderField::Single(value))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub status_code: u16,
    pub headers: ResponseHeaders,
    pub body: Bytes,
}

/// Parse the complete STDOUT of one request.
///
/// Without a `Status` header the code is 200 and `status: 200 OK` is recorded.
/// A status whose leading token is not all digits is an error.
pub fn parse(raw: Bytes) -> Result<ParsedResponse, GatewayError> {
    let (head, body) = match raw.windows(HEADER_END.len()).position(|w| w == HEADER_END) {
        Some(pos) => (raw.slice(..pos), trim(raw.slice(pos..))),
        None => {
            debug!("no end of headers, treating everything as header");
            (raw.clone(), Bytes::new())
        }
    };

    let mut headers = ResponseHeaders::default();
    let mut status = Bytes::from_static(DEFAULT_STATUS);
    let mut code: Option<Bytes> = None;

    for line in head.split(|&b| b == b'\n') {
        let (name, value) = match split_header(line) {
            Some(h) => h,
            None => {
                trace!("skip {:?}", String::from_utf8_lossy(line));
                continue;
            }
        };
        //token characters only
        let name: String = name.iter().map(|&b| char::from(b.to_ascii_lowercase())).collect();
        let value = trim(head.slice_ref(value));
        if name == STATUS {
            code = Some(match value.iter().position(|&b| b == b' ') {
                Some(pos) => value.slice(..pos),
                None => value.clone(),
            });
            status = value.clone();
        }
        headers.append(name, value);
    }
    headers.set(STATUS, status);

    let status_code = match code {
        None => DEFAULT_CODE,
        Some(code) => status_code(&code).ok_or_else(|| GatewayError::MalformedBackendResponse {
            token: String::from_utf8_lossy(&code).into_owned(),
        })?,
    };
    Ok(ParsedResponse {
        status_code,
        headers,
        body,
    })
}

fn status_code(token: &[u8]) -> Option<u16> {
    if token.is_empty() || !token.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(token).ok()?.parse().ok()
}

fn is_token(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Find the first run of token characters that is directly followed by `:`.
/// Anything in front of it is ignored.
fn split_header(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let mut start = None;
    for (i, &b) in line.iter().enumerate() {
        if is_token(b) {
            start.get_or_insert(i);
        } else if b == b':' && start.is_some() {
            let s = start?;
            return Some((&line[s..i], &line[i + 1..]));
        } else {
            start = None;
        }
    }
    None
}

fn trim(b: Bytes) -> Bytes {
    let blank = |c: &u8| BLANK.contains(&(*c as char));
    let start = b.iter().position(|c| !blank(c)).unwrap_or(b.len());
    let end = b.iter().rposition(|c| !blank(c)).map_or(start, |p| p + 1);
    b.slice(start..end)
}
