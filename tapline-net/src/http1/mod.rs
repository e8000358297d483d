mod parser;
mod types;

pub use parser::{ParseStatus, RequestParser, ResponseParser};
pub use types::{
    Header, HttpVersion, Limits, ParseError, ParseErrorKind, Request, RequestLine, Response,
    StatusLine,
};
