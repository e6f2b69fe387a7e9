//! HTTP/1.1 message types and wire codec.

mod codec;
mod headers;
mod request;
mod response;

pub use codec::{read_request, BufferedConn, CodecLimits, HttpParseError, RawRequest};
pub use headers::{is_hop_by_hop, HttpHeaders, HOP_BY_HOP};
pub use request::{split_authority, ListenerKind, LoggedRequest, RequestContext, TunnelInfo};
pub use response::{encode_chunk, Framing, HttpResponse, LAST_CHUNK};
