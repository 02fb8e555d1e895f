/*! FastCGI 1.0 records as far as a responder client needs them.

Encoding writes into a [`BytesMut`], decoding reads complete records from [`Bytes`].
```
use bytes::BytesMut;
use fcgi_gateway::fastcgi::*;

let mut buf = BytesMut::new();
write_begin_request(&mut buf, 1, BeginRequestBody::RESPONDER, BeginRequestBody::KEEP_CONN);
let params = encode_params([(&b"SCRIPT_FILENAME"[..], &b"/srv/index.php"[..])]).unwrap();
write_stream(&mut buf, Record::PARAMS, 1, &params);
write_end_of_stream(&mut buf, Record::PARAMS, 1);

let mut data = buf.freeze();
let rec = Record::read(&mut data).unwrap();
assert_eq!(rec.request_id, 1);
assert!(matches!(rec.body, Body::BeginRequest(_)));
```
*/
use std::io::{Error as IoError, ErrorKind};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::trace;

/// Number of bytes in a record header
pub const HEADER_LEN: usize = 8;
/// Maximum content length of one record
pub const MAX_CONTENT: usize = 0xffff;
/// version component of Header
pub const VERSION_1: u8 = 1;
/// Name and value lengths are encoded in 31 bits
const MAX_NV_LEN: usize = 0x7fff_ffff;

/// FCGI record header
#[derive(Debug, Clone, PartialEq, Eq)]
struct Header {
    version: u8,
    rtype: u8,
    request_id: u16,
    content_length: u16,
    padding_length: u8, // align by 8
}

impl Header {
    fn new(rtype: u8, request_id: u16, len: u16) -> Header {
        let mut pad: u8 = (len % 8) as u8;
        if pad != 0 {
            pad = 8 - pad;
        }
        Header {
            version: VERSION_1,
            rtype,
            request_id,
            content_length: len,
            padding_length: pad,
        }
    }
    fn write_into(&self, data: &mut BytesMut) {
        data.put_u8(self.version);
        data.put_u8(self.rtype);
        data.put_u16(self.request_id);
        data.put_u16(self.content_length);
        data.put_u8(self.padding_length);
        data.put_u8(0); // reserved
    }
    /// `data` must hold at least [`HEADER_LEN`] bytes
    fn parse(mut data: &[u8]) -> Header {
        Header {
            version: data.get_u8(),
            rtype: data.get_u8(),
            request_id: data.get_u16(),
            content_length: data.get_u16(),
            padding_length: data.get_u8(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeginRequestBody {
    pub role: u16,
    pub flags: u8,
}

impl BeginRequestBody {
    /// Mask for flags component of BeginRequestBody
    pub const KEEP_CONN: u8 = 1;

    /// FastCGI role
    /// emulated CGI/1.1 program
    pub const RESPONDER: u16 = 1;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndRequestBody {
    pub app_status: u32,
    pub protocol_status: u8,
}

impl EndRequestBody {
    /// Normal end of request
    pub const REQUEST_COMPLETE: u8 = 0;
    /// Application is designed to process one request at a time per connection
    pub const CANT_MPX_CONN: u8 = 1;
    /// The application runs out of some resource, e.g. database connections
    pub const OVERLOADED: u8 = 2;
    /// Web server has specified a role that is unknown to the application
    pub const UNKNOWN_ROLE: u8 = 3;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    BeginRequest(BeginRequestBody),
    EndRequest(EndRequestBody),
    Params(Bytes),
    StdIn(Bytes),
    StdOut(Bytes),
    StdErr(Bytes),
    /// anything this client does not deal with, or a malformed fixed size body
    Other(Bytes),
}

/// FCGI record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub rtype: u8,
    pub request_id: u16,
    pub body: Body,
}

impl Record {
    /// The Web server sends a FCGI_BEGIN_REQUEST record to start a request
    pub const BEGIN_REQUEST: u8 = 1;
    /// The application sends a FCGI_END_REQUEST record to terminate a request
    pub const END_REQUEST: u8 = 3;
    /// Name-value pairs from the Web server to the application
    pub const PARAMS: u8 = 4;
    /// Byte Stream
    pub const STDIN: u8 = 5;
    /// Byte Stream
    pub const STDOUT: u8 = 6;
    /// Byte Stream
    pub const STDERR: u8 = 7;

    /// parse bytes to a single record
    /// returns `None` and leaves data untouched if not enough data is available
    pub fn read(data: &mut Bytes) -> Option<Record> {
        if data.remaining() < HEADER_LEN {
            return None;
        }
        let header = Header::parse(&data[..HEADER_LEN]);
        let len = header.content_length as usize;
        if data.remaining() < HEADER_LEN + len + header.padding_length as usize {
            return None;
        }
        data.advance(HEADER_LEN);
        let payload = data.split_to(len);
        data.advance(header.padding_length as usize);
        trace!("record v{} type {} #{} ({} bytes)", header.version, header.rtype, header.request_id, len);

        Some(Record {
            rtype: header.rtype,
            request_id: header.request_id,
            body: Record::parse_body(payload, header.rtype),
        })
    }
    fn parse_body(mut payload: Bytes, rtype: u8) -> Body {
        match rtype {
            Record::STDOUT => Body::StdOut(payload),
            Record::STDERR => Body::StdErr(payload),
            Record::PARAMS => Body::Params(payload),
            Record::STDIN => Body::StdIn(payload),
            Record::END_REQUEST if payload.len() >= 8 => Body::EndRequest(EndRequestBody {
                app_status: payload.get_u32(),
                protocol_status: payload.get_u8(),
            }),
            Record::BEGIN_REQUEST if payload.len() >= 8 => Body::BeginRequest(BeginRequestBody {
                role: payload.get_u16(),
                flags: payload.get_u8(),
            }),
            _ => Body::Other(payload),
        }
    }
}

pub fn write_begin_request(buf: &mut BytesMut, request_id: u16, role: u16, flags: u8) {
    Header::new(Record::BEGIN_REQUEST, request_id, 8).write_into(buf);
    buf.put_u16(role);
    buf.put_u8(flags);
    buf.put_slice(&[0; 5]); // reserved
}

pub fn write_end_request(buf: &mut BytesMut, request_id: u16, app_status: u32, protocol_status: u8) {
    Header::new(Record::END_REQUEST, request_id, 8).write_into(buf);
    buf.put_u32(app_status);
    buf.put_u8(protocol_status);
    buf.put_slice(&[0; 3]); // reserved
}

/// Append `data` to a stream as one or more padded records.
/// Empty data writes nothing, see [`write_end_of_stream`].
pub fn write_stream(buf: &mut BytesMut, rtype: u8, request_id: u16, data: &[u8]) {
    for part in data.chunks(MAX_CONTENT) {
        let header = Header::new(rtype, request_id, part.len() as u16);
        header.write_into(buf);
        buf.put_slice(part);
        buf.put_bytes(0, header.padding_length as usize);
    }
}

/// An empty record closes a stream
pub fn write_end_of_stream(buf: &mut BytesMut, rtype: u8, request_id: u16) {
    Header::new(rtype, request_id, 0).write_into(buf);
}

/// Encode name-value pairs as the content of a PARAMS stream.
/// Fails if a name or value is longer than 0x7fffffff bytes.
pub fn encode_params<'a, I>(pairs: I) -> Result<Bytes, IoError>
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let mut buf = BytesMut::new();
    for (name, value) in pairs {
        put_nv_len(&mut buf, name.len())?;
        put_nv_len(&mut buf, value.len())?;
        buf.put_slice(name);
        buf.put_slice(value);
    }
    Ok(buf.freeze())
}

fn put_nv_len(buf: &mut BytesMut, len: usize) -> Result<(), IoError> {
    if len > MAX_NV_LEN {
        return Err(IoError::new(ErrorKind::InvalidInput, "param too long for FastCGI"));
    }
    if len > 0x7f {
        buf.put_u32(len as u32 | 0x8000_0000);
    } else {
        buf.put_u8(len as u8);
    }
    Ok(())
}

/// Decode the content of a PARAMS stream. Stops at a truncated pair.
pub fn parse_params(mut data: Bytes) -> Vec<(Bytes, Bytes)> {
    let mut pairs = Vec::new();
    while data.has_remaining() {
        let mut peek = &data[..];
        let (ln, lv) = match (get_nv_len(&mut peek), get_nv_len(&mut peek)) {
            (Some(ln), Some(lv)) => (ln, lv),
            _ => break,
        };
        if peek.len() < ln + lv {
            break;
        }
        let consumed = data.len() - peek.len();
        data.advance(consumed);
        let name = data.split_to(ln);
        let value = data.split_to(lv);
        pairs.push((name, value));
    }
    pairs
}

fn get_nv_len(data: &mut &[u8]) -> Option<usize> {
    let first = *data.first()?;
    if first >> 7 == 1 {
        if data.len() < 4 {
            return None;
        }
        Some((data.get_u32() & 0x7fff_ffff) as usize)
    } else {
        data.advance(1);
        Some(first as usize)
    }
}
