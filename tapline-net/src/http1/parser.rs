use super::types::{
    Header, HttpVersion, Limits, ParseError, ParseErrorKind, Request, RequestLine, Response,
    StatusLine,
};

const CRLF: &[u8] = b"\r\n";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus<T> {
    NeedMore,
    Complete(T),
    Error(ParseError),
}

/// Incremental request parser. Progress is kept between pushes, so each
/// received byte is examined once; bytes past a complete request stay
/// buffered for the next one.
#[derive(Debug, Default)]
pub struct RequestParser {
    reader: MessageReader<RequestLine>,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self {
            reader: MessageReader::new(limits),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> ParseStatus<Request> {
        self.reader.buffer.extend_from_slice(bytes);
        let status = self.reader.advance(
            parse_request_head,
            |_, headers, limits| request_framing(headers, limits),
            false,
        );
        into_status(status, |(line, headers, body)| Request {
            line,
            headers,
            body,
        })
    }

    /// Whether the head of the next request has been parsed and its body is
    /// still arriving.
    pub fn head_received(&self) -> bool {
        self.reader.pending.is_some()
    }

    /// Bytes received after the last complete request.
    pub fn take_buffered(&mut self) -> Vec<u8> {
        self.reader.scanned = 0;
        std::mem::take(&mut self.reader.buffer)
    }
}

#[derive(Debug, Default)]
pub struct ResponseParser {
    reader: MessageReader<StatusLine>,
    head_request: bool,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        Self {
            reader: MessageReader::new(limits),
            head_request: false,
        }
    }

    /// Parser for the response to a request sent with `method`.
    pub fn for_method(method: &str) -> Self {
        Self {
            head_request: method.eq_ignore_ascii_case("HEAD"),
            ..Self::new()
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> ParseStatus<Response> {
        self.reader.buffer.extend_from_slice(bytes);
        self.advance(false)
    }

    /// Completes the buffered response once the peer has closed the
    /// connection; a response without framing headers ends here.
    pub fn finish(&mut self) -> ParseStatus<Response> {
        self.advance(true)
    }

    fn advance(&mut self, at_eof: bool) -> ParseStatus<Response> {
        let head_request = self.head_request;
        let status = self.reader.advance(
            parse_response_head,
            |line, headers, limits| response_framing(line, headers, limits, head_request),
            at_eof,
        );
        into_status(status, |(line, headers, body)| Response {
            line,
            headers,
            body,
        })
    }
}

type Parts<L> = (L, Vec<Header>, Vec<u8>);

fn into_status<L, T>(
    result: Result<Option<Parts<L>>, ParseError>,
    build: impl FnOnce(Parts<L>) -> T,
) -> ParseStatus<T> {
    match result {
        Ok(Some(parts)) => ParseStatus::Complete(build(parts)),
        Ok(None) => ParseStatus::NeedMore,
        Err(error) => ParseStatus::Error(error),
    }
}

#[derive(Debug)]
struct MessageReader<L> {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for the end of the head.
    scanned: usize,
    limits: Limits,
    pending: Option<PendingMessage<L>>,
}

impl<L> Default for MessageReader<L> {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

impl<L> MessageReader<L> {
    fn new(limits: Limits) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            limits,
            pending: None,
        }
    }

    fn advance(
        &mut self,
        parse_head: impl FnOnce(&[u8]) -> Result<(L, Vec<Header>), ParseError>,
        select_framing: impl FnOnce(&L, &[Header], Limits) -> Result<Framing, ParseError>,
        at_eof: bool,
    ) -> Result<Option<Parts<L>>, ParseError> {
        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => {
                let Some(head_end) = self.find_head_end()? else {
                    if at_eof && !self.buffer.is_empty() {
                        return Err(unexpected_eof(self.buffer.len()));
                    }
                    return Ok(None);
                };
                let (line, headers) = parse_head(&self.buffer[..head_end])?;
                let framing = select_framing(&line, &headers, self.limits)?;
                let consumed = head_end + HEADER_TERMINATOR.len();
                self.buffer.drain(..consumed);
                self.scanned = 0;
                PendingMessage {
                    line,
                    headers,
                    framing,
                    body: Vec::new(),
                    offset: consumed,
                }
            }
        };

        if pending.read_body(&mut self.buffer, self.limits, at_eof)? {
            Ok(Some((pending.line, pending.headers, pending.body)))
        } else if at_eof {
            Err(unexpected_eof(pending.offset))
        } else {
            self.pending = Some(pending);
            Ok(None)
        }
    }

    fn find_head_end(&mut self) -> Result<Option<usize>, ParseError> {
        let start = self.scanned;
        match twoway::find_bytes(&self.buffer[start..], HEADER_TERMINATOR) {
            Some(index) if start + index > self.limits.max_header_bytes => {
                Err(header_too_large(self.limits))
            }
            Some(index) => Ok(Some(start + index)),
            None if self.buffer.len() > self.limits.max_header_bytes => {
                Err(header_too_large(self.limits))
            }
            None => {
                // the terminator may straddle the next push
                self.scanned = self
                    .buffer
                    .len()
                    .saturating_sub(HEADER_TERMINATOR.len() - 1);
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(usize),
    Chunked(ChunkPhase),
    /// Responses without framing headers run until the connection closes.
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    Size,
    Data(usize),
    DataEnd,
    Trailer,
}

#[derive(Debug)]
struct PendingMessage<L> {
    line: L,
    headers: Vec<Header>,
    framing: Framing,
    body: Vec<u8>,
    /// Message offset of `buffer[0]`, for error reporting.
    offset: usize,
}

impl<L> PendingMessage<L> {
    /// Moves body bytes out of `buffer`. Returns true once the body is
    /// complete, leaving any following bytes in `buffer`.
    fn read_body(
        &mut self,
        buffer: &mut Vec<u8>,
        limits: Limits,
        at_eof: bool,
    ) -> Result<bool, ParseError> {
        let mut cursor = 0;
        let done = loop {
            let available = buffer.len() - cursor;
            match &mut self.framing {
                Framing::Empty => break true,
                Framing::Length(remaining) => {
                    let take = (*remaining).min(available);
                    self.body.extend_from_slice(&buffer[cursor..cursor + take]);
                    cursor += take;
                    *remaining -= take;
                    break *remaining == 0;
                }
                Framing::UntilClose => {
                    if self.body.len() + available > limits.max_body_bytes {
                        return Err(ParseError {
                            kind: ParseErrorKind::BodyTooLarge,
                            offset: self.offset + cursor,
                        });
                    }
                    self.body.extend_from_slice(&buffer[cursor..]);
                    cursor = buffer.len();
                    break at_eof;
                }
                Framing::Chunked(phase) => match *phase {
                    ChunkPhase::Size => {
                        let Some(line_end) = find_line(buffer, cursor, limits, self.offset)? else {
                            break false;
                        };
                        let offset = self.offset + cursor;
                        let size = parse_chunk_size(&buffer[cursor..line_end], offset)?;
                        cursor = line_end + CRLF.len();
                        if size == 0 {
                            *phase = ChunkPhase::Trailer;
                            continue;
                        }
                        let total = self.body.len().checked_add(size).ok_or(ParseError {
                            kind: ParseErrorKind::InvalidChunkSize,
                            offset,
                        })?;
                        if total > limits.max_body_bytes {
                            return Err(ParseError {
                                kind: ParseErrorKind::BodyTooLarge,
                                offset,
                            });
                        }
                        *phase = ChunkPhase::Data(size);
                    }
                    ChunkPhase::Data(remaining) => {
                        let take = remaining.min(available);
                        self.body.extend_from_slice(&buffer[cursor..cursor + take]);
                        cursor += take;
                        if take < remaining {
                            *phase = ChunkPhase::Data(remaining - take);
                            break false;
                        }
                        *phase = ChunkPhase::DataEnd;
                    }
                    ChunkPhase::DataEnd => {
                        if available < CRLF.len() {
                            break false;
                        }
                        if &buffer[cursor..cursor + CRLF.len()] != CRLF {
                            return Err(ParseError {
                                kind: ParseErrorKind::InvalidChunkTerminator,
                                offset: self.offset + cursor,
                            });
                        }
                        cursor += CRLF.len();
                        *phase = ChunkPhase::Size;
                    }
                    // trailer fields are read and dropped
                    ChunkPhase::Trailer => {
                        let Some(line_end) = find_line(buffer, cursor, limits, self.offset)? else {
                            break false;
                        };
                        let last = line_end == cursor;
                        cursor = line_end + CRLF.len();
                        if last {
                            break true;
                        }
                    }
                },
            }
        };

        buffer.drain(..cursor);
        self.offset += cursor;
        Ok(done)
    }
}

/// End of the CRLF-terminated line starting at `start`. A line longer than
/// the header limit is rejected.
fn find_line(
    buffer: &[u8],
    start: usize,
    limits: Limits,
    base_offset: usize,
) -> Result<Option<usize>, ParseError> {
    match twoway::find_bytes(&buffer[start..], CRLF) {
        Some(index) => Ok(Some(start + index)),
        None if buffer.len() - start > limits.max_header_bytes => Err(ParseError {
            kind: ParseErrorKind::InvalidChunkSize,
            offset: base_offset + start,
        }),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8], offset: usize) -> Result<usize, ParseError> {
    let invalid = ParseError {
        kind: ParseErrorKind::InvalidChunkSize,
        offset,
    };
    let line = std::str::from_utf8(line).map_err(|_| invalid.clone())?;
    let digits = line.split(';').next().unwrap_or("").trim();
    let digits = digits.strip_prefix("0x").unwrap_or(digits);
    usize::from_str_radix(digits, 16).map_err(|_| invalid)
}

fn request_framing(headers: &[Header], limits: Limits) -> Result<Framing, ParseError> {
    Ok(declared_framing(headers, limits)?.unwrap_or(Framing::Empty))
}

fn response_framing(
    line: &StatusLine,
    headers: &[Header],
    limits: Limits,
    head_request: bool,
) -> Result<Framing, ParseError> {
    if head_request || status_has_no_body(line.status_code) {
        return Ok(Framing::Empty);
    }
    Ok(declared_framing(headers, limits)?.unwrap_or(Framing::UntilClose))
}

/// Framing from `Transfer-Encoding` or `Content-Length`; chunked wins when
/// both are present.
fn declared_framing(headers: &[Header], limits: Limits) -> Result<Option<Framing>, ParseError> {
    let chunked = headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case("transfer-encoding"))
        .flat_map(|header| header.value.split(','))
        .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
    if chunked {
        return Ok(Some(Framing::Chunked(ChunkPhase::Size)));
    }

    let Some(header) = headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case("content-length"))
    else {
        return Ok(None);
    };
    let length = header.value.parse::<usize>().map_err(|_| ParseError {
        kind: ParseErrorKind::InvalidContentLength,
        offset: 0,
    })?;
    if length > limits.max_body_bytes {
        return Err(ParseError {
            kind: ParseErrorKind::BodyTooLarge,
            offset: 0,
        });
    }
    Ok(Some(Framing::Length(length)))
}

fn status_has_no_body(status_code: u16) -> bool {
    (100..200).contains(&status_code) || status_code == 204 || status_code == 304
}

fn unexpected_eof(offset: usize) -> ParseError {
    ParseError {
        kind: ParseErrorKind::UnexpectedEof,
        offset,
    }
}

fn header_too_large(limits: Limits) -> ParseError {
    ParseError {
        kind: ParseErrorKind::HeaderTooLarge,
        offset: limits.max_header_bytes,
    }
}

/// Splits a head (without its terminator) into the start line and the
/// header block.
fn split_head(head: &[u8]) -> (&[u8], &[u8], usize) {
    match twoway::find_bytes(head, CRLF) {
        Some(index) => (&head[..index], &head[index + CRLF.len()..], index + CRLF.len()),
        None => (head, &head[head.len()..], head.len()),
    }
}

fn parse_request_head(head: &[u8]) -> Result<(RequestLine, Vec<Header>), ParseError> {
    let (line, block, block_offset) = split_head(head);
    let line = parse_request_line(line)?;
    Ok((line, parse_headers(block, block_offset)?))
}

fn parse_response_head(head: &[u8]) -> Result<(StatusLine, Vec<Header>), ParseError> {
    let (line, block, block_offset) = split_head(head);
    let line = parse_status_line(line)?;
    Ok((line, parse_headers(block, block_offset)?))
}

fn parse_request_line(line: &[u8]) -> Result<RequestLine, ParseError> {
    let invalid = ParseError {
        kind: ParseErrorKind::InvalidStartLine,
        offset: 0,
    };
    let text = std::str::from_utf8(line).map_err(|_| invalid.clone())?;

    let mut parts = text.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(invalid);
    };
    let version = parts.next().map_or(HttpVersion::Http11, parse_http_version);
    if parts.next().is_some() {
        return Err(invalid);
    }

    Ok(RequestLine {
        method: method.to_string(),
        target: target.to_string(),
        version,
    })
}

fn parse_status_line(line: &[u8]) -> Result<StatusLine, ParseError> {
    let invalid = ParseError {
        kind: ParseErrorKind::InvalidStatusLine,
        offset: 0,
    };
    let text = std::str::from_utf8(line).map_err(|_| invalid.clone())?;

    let mut parts = text.splitn(3, ' ');
    let version = parts.next().unwrap_or("HTTP/1.1");
    let status_code = parts
        .next()
        .and_then(|status| status.parse::<u16>().ok())
        .ok_or(invalid)?;

    Ok(StatusLine {
        version: parse_http_version(version),
        status_code,
        reason: parts.next().unwrap_or("").to_string(),
    })
}

fn parse_http_version(version: &str) -> HttpVersion {
    match version {
        "HTTP/1.0" => HttpVersion::Http10,
        "HTTP/1.1" => HttpVersion::Http11,
        other => HttpVersion::Other(other.to_string()),
    }
}

/// Parses a header block. Obsolete line folding is joined into the previous
/// value with a single space.
fn parse_headers(block: &[u8], base_offset: usize) -> Result<Vec<Header>, ParseError> {
    let text = std::str::from_utf8(block).map_err(|_| ParseError {
        kind: ParseErrorKind::InvalidHeader,
        offset: base_offset,
    })?;

    let mut headers: Vec<Header> = Vec::new();
    let mut offset = base_offset;
    for line in text.split("\r\n") {
        let line_offset = offset;
        offset += line.len() + CRLF.len();
        if line.is_empty() {
            continue;
        }

        if line.starts_with([' ', '\t']) {
            if let Some(previous) = headers.last_mut() {
                previous.value.push(' ');
                previous.value.push_str(line.trim());
                continue;
            }
        }

        let Some((raw_name, value)) = line.split_once(':') else {
            return Err(ParseError {
                kind: ParseErrorKind::InvalidHeader,
                offset: line_offset,
            });
        };
        let name = raw_name.trim();
        if name.is_empty() {
            return Err(ParseError {
                kind: ParseErrorKind::InvalidHeader,
                offset: line_offset,
            });
        }
        headers.push(Header {
            name: name.to_string(),
            value: value.trim().to_string(),
            raw_name: raw_name.to_string(),
        });
    }

    Ok(headers)
}
