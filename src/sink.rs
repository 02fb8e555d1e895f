/*! Where the gateway writes the translated response.

Hosts with their own response object implement [`ResponseSink`] for it.
[`ResponseBuffer`] collects everything into an [`http::Response`].
*/

use std::error::Error;

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Response, StatusCode};

pub trait ResponseSink {
    type Error: Error + Send + Sync + 'static;

    fn set_status_code(&mut self, code: u16) -> Result<(), Self::Error>;
    fn append_body(&mut self, data: &[u8]) -> Result<(), Self::Error>;
    /// `allow_duplicate` adds another occurrence instead of replacing existing ones.
    /// `value` is passed on as the backend sent it and need not be UTF-8.
    fn add_header(&mut self, name: &str, value: &[u8], allow_duplicate: bool) -> Result<(), Self::Error>;
    /// No further processing stage should touch this response
    fn mark_dispatched(&mut self);
}

#[derive(Debug, Default)]
pub struct ResponseBuffer {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    dispatched: bool,
}

impl ResponseBuffer {
    pub fn new() -> ResponseBuffer {
        ResponseBuffer::default()
    }
    pub fn status(&self) -> StatusCode {
        self.status
    }
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
    pub fn body(&self) -> &[u8] {
        &self.body
    }
    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }
    /// true if nothing was written yet
    pub fn is_untouched(&self) -> bool {
        self.status == StatusCode::OK && self.headers.is_empty() && self.body.is_empty() && !self.dispatched
    }
    pub fn into_response(self) -> Response<Bytes> {
        let mut res = Response::new(self.body.freeze());
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

impl ResponseSink for ResponseBuffer {
    type Error = http::Error;

    fn set_status_code(&mut self, code: u16) -> Result<(), http::Error> {
        self.status = StatusCode::from_u16(code)?;
        Ok(())
    }
    fn append_body(&mut self, data: &[u8]) -> Result<(), http::Error> {
        self.body.extend_from_slice(data);
        Ok(())
    }
    fn add_header(&mut self, name: &str, value: &[u8], allow_duplicate: bool) -> Result<(), http::Error> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_bytes(value)?;
        if allow_duplicate {
            self.headers.append(name, value);
        } else {
            self.headers.insert(name, value);
        }
        Ok(())
    }
    fn mark_dispatched(&mut self) {
        self.dispatched = true;
    }
}
