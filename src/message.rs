// Byte-level access to raw SIP messages: line tokenizer, header lookup and
// request rebuilding. Buffers are never modified in place.
use std::borrow::Cow;
use std::ops::Range;

use crate::{AuthError, ChallengeKind, HeaderName};

const LINE_TRIM: &[u8] = b" \t\r";

fn trim_line(mut bytes: &[u8]) -> &[u8] {
    while let Some((first, rest)) = bytes.split_first() {
        if !LINE_TRIM.contains(first) {
            break;
        }
        bytes = rest;
    }
    while let Some((last, rest)) = bytes.split_last() {
        if !LINE_TRIM.contains(last) {
            break;
        }
        bytes = rest;
    }
    bytes
}

// A single line of a raw message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine<'a> {
    /// Line bytes without the terminating LF.
    pub raw: &'a [u8],
    /// Line bytes trimmed of surrounding spaces, tabs and CR.
    pub content: &'a [u8],
    /// Byte span of the whole line in the buffer, terminator included.
    pub span: Range<usize>,
}

// Splits a buffer on LF, so CRLF and bare LF framing both work
pub struct MessageLines<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MessageLines<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        MessageLines { data, pos: 0 }
    }
}

impl<'a> Iterator for MessageLines<'a> {
    type Item = RawLine<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let start = self.pos;
        let rest = &self.data[start..];
        let (raw, end) = match rest.iter().position(|&b| b == b'\n') {
            Some(lf) => (&rest[..lf], start + lf + 1),
            None => (rest, self.data.len()),
        };
        self.pos = end;

        Some(RawLine {
            raw,
            content: trim_line(raw),
            span: start..end,
        })
    }
}

// A header line found by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine<'a> {
    /// Whole trimmed line, header name included.
    pub line: &'a [u8],
    /// Byte span of the line in the buffer, terminator included.
    pub span: Range<usize>,
    name_len: usize,
}

impl<'a> HeaderLine<'a> {
    pub fn text(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.line)
    }

    /// Header value after the name token, trimmed.
    pub fn value(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(trim_line(&self.line[self.name_len..]))
    }
}

/// Finds the first header line that starts with `name` (colon included).
///
/// Only the header section is searched: scanning stops at the first empty
/// line so body content can never be mistaken for a header.
pub fn find_header<'a>(data: &'a [u8], name: &str) -> Option<HeaderLine<'a>> {
    let name = name.as_bytes();
    for line in MessageLines::new(data) {
        if line.content.is_empty() {
            break;
        }
        if line.content.starts_with(name) {
            return Some(HeaderLine {
                line: line.content,
                span: line.span,
                name_len: name.len(),
            });
        }
    }
    None
}

/// Finds the sequence header, preferring `CSeq:` over its compact form `s:`.
pub fn find_sequence_header(data: &[u8]) -> Option<HeaderLine<'_>> {
    find_header(data, HeaderName::CSEQ).or_else(|| find_header(data, HeaderName::CSEQ_COMPACT))
}

/// First line of the buffer, untrimmed bytes available through `raw`.
pub fn start_line(data: &[u8]) -> Option<RawLine<'_>> {
    MessageLines::new(data).next()
}

// Request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub version: &'a str,
}

impl<'a> RequestLine<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, AuthError> {
        let line = start_line(data).ok_or(AuthError::MalformedRequestLine)?;
        let text = std::str::from_utf8(line.content).map_err(|_| AuthError::MalformedRequestLine)?;

        let parts: Vec<&str> = text.splitn(3, ' ').collect();
        if parts.len() != 3 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(AuthError::MalformedRequestLine);
        }

        Ok(RequestLine {
            method: parts[0],
            uri: parts[1],
            version: parts[2],
        })
    }
}

// Parsed sequence header: number plus whatever follows it (normally the method)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceHeader {
    pub number: u32,
    pub reason: String,
}

impl SequenceHeader {
    pub fn parse(header: &HeaderLine<'_>) -> Result<Self, AuthError> {
        let text = header.text();
        let malformed = || AuthError::MalformedSequenceHeader(text.to_string());

        // Name, number and reason must be separate tokens: `CSeq:5 INVITE` is rejected
        let mut tokens = text.splitn(3, char::is_whitespace);
        let (Some(name), Some(number), Some(reason)) = (tokens.next(), tokens.next(), tokens.next()) else {
            return Err(malformed());
        };
        if name.len() != header.name_len {
            return Err(malformed());
        }
        let reason = reason.trim_start();
        if reason.is_empty() {
            return Err(malformed());
        }
        let number = number.parse::<u32>().map_err(|_| malformed())?;

        Ok(SequenceHeader {
            number,
            reason: reason.to_string(),
        })
    }

    pub fn next(&self) -> Option<SequenceHeader> {
        self.number.checked_add(1).map(|number| SequenceHeader {
            number,
            reason: self.reason.clone(),
        })
    }
}

/// Builds the authenticated retry of `original`.
///
/// The sequence header line is replaced by `CSeq: <n+1> <reason>` followed by
/// the authorization header matching `kind`. Every other byte is copied as is.
pub fn rebuild_request(original: &[u8], kind: ChallengeKind, authorization: &str) -> Result<Vec<u8>, AuthError> {
    let header = find_sequence_header(original).ok_or(AuthError::MissingSequenceHeader)?;
    let sequence = SequenceHeader::parse(&header)?;
    let next = sequence
        .next()
        .ok_or_else(|| AuthError::MalformedSequenceHeader(header.text().into_owned()))?;

    let cseq_line = format!("{} {} {}\r\n", HeaderName::CSEQ, next.number, next.reason);
    let auth_line = format!("{} {}\r\n", kind.authorization_header(), authorization);

    let mut rebuilt =
        Vec::with_capacity(original.len() + cseq_line.len() + auth_line.len());
    rebuilt.extend_from_slice(&original[..header.span.start]);
    rebuilt.extend_from_slice(cseq_line.as_bytes());
    rebuilt.extend_from_slice(auth_line.as_bytes());
    rebuilt.extend_from_slice(&original[header.span.end..]);

    Ok(rebuilt)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTER: &[u8] = b"REGISTER sip:test@sip.test SIP/2.0\r\n\
                              Via: SIP/2.0/WSS df7jal23ls0d.invalid;branch=z9hG4bKnashds7\r\n\
                              Max-Forwards: 70\r\n\
                              From: <sip:alice@sip.test>;tag=a73kszlfl\r\n\
                              To: <sip:alice@sip.test>\r\n\
                              Call-ID: 1j9FpLxk3uxtm8tn@sip.test\r\n\
                              CSeq: 5 REGISTER\r\n\
                              Contact: <sip:alice@df7jal23ls0d.invalid;transport=ws>\r\n\
                              Content-Length: 0\r\n\
                              \r\n";

    #[test]
    fn test_lines_crlf_and_lf() {
        let data = b"first\r\nsecond\nthird";
        let lines: Vec<RawLine> = MessageLines::new(data).collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].raw, b"first\r");
        assert_eq!(lines[0].content, b"first");
        assert_eq!(lines[0].span, 0..7);
        assert_eq!(lines[1].content, b"second");
        assert_eq!(lines[2].content, b"third");
        assert_eq!(lines[2].span, 14..19);
    }

    #[test]
    fn test_find_header() {
        let header = find_header(REGISTER, "Call-ID:").unwrap();
        assert_eq!(header.text(), "Call-ID: 1j9FpLxk3uxtm8tn@sip.test");
        assert_eq!(header.value(), "1j9FpLxk3uxtm8tn@sip.test");
        assert_eq!(&REGISTER[header.span.clone()], b"Call-ID: 1j9FpLxk3uxtm8tn@sip.test\r\n");

        assert!(find_header(REGISTER, "Route:").is_none());
    }

    #[test]
    fn test_find_header_stops_at_body() {
        let data = b"MESSAGE sip:bob@sip.test SIP/2.0\r\nContent-Length: 16\r\n\r\ns: 9 not-a-header";
        assert!(find_sequence_header(data).is_none());
    }

    #[test]
    fn test_sequence_header_compact_fallback() {
        let data = b"OPTIONS sip:sip.test SIP/2.0\nMax-Forwards: 70\ns: 12 OPTIONS\n\n";
        let header = find_sequence_header(data).unwrap();
        assert_eq!(header.text(), "s: 12 OPTIONS");
    }

    #[test]
    fn test_sequence_header_prefers_full_name() {
        let data = b"OPTIONS sip:sip.test SIP/2.0\r\ns: 1 OPTIONS\r\nCSeq: 7 OPTIONS\r\n\r\n";
        let header = find_sequence_header(data).unwrap();
        assert_eq!(header.value(), "7 OPTIONS");
    }

    #[test]
    fn test_request_line_parsing() {
        let line = RequestLine::parse(REGISTER).unwrap();
        assert_eq!(line.method, "REGISTER");
        assert_eq!(line.uri, "sip:test@sip.test");
        assert_eq!(line.version, "SIP/2.0");

        assert_eq!(RequestLine::parse(b"REGISTER\r\n\r\n"), Err(AuthError::MalformedRequestLine));
        assert_eq!(RequestLine::parse(b""), Err(AuthError::MalformedRequestLine));
    }

    #[test]
    fn test_rebuild_increments_sequence_and_inserts_authorization() {
        let rebuilt = rebuild_request(REGISTER, ChallengeKind::Www, "Digest username=\"alice\"").unwrap();

        let marker = b"CSeq: 5 REGISTER\r\n";
        let at = REGISTER.windows(marker.len()).position(|w| w == marker).unwrap();
        let inserted = b"CSeq: 6 REGISTER\r\nAuthorization: Digest username=\"alice\"\r\n";

        assert_eq!(&rebuilt[..at], &REGISTER[..at]);
        assert_eq!(&rebuilt[at..at + inserted.len()], inserted);
        assert_eq!(&rebuilt[at + inserted.len()..], &REGISTER[at + marker.len()..]);
    }

    #[test]
    fn test_rebuild_proxy_challenge() {
        let rebuilt = rebuild_request(REGISTER, ChallengeKind::Proxy, "Digest x=\"y\"").unwrap();
        let text = String::from_utf8(rebuilt).unwrap();

        assert!(text.contains("CSeq: 6 REGISTER\r\nProxy-Authorization: Digest x=\"y\"\r\n"));
        assert!(!text.contains("\r\nAuthorization:"));
    }

    #[test]
    fn test_rebuild_compact_header_with_lf() {
        let data = b"INVITE sip:bob@sip.test SIP/2.0\ns: 41 INVITE\nl: 0\n\n";
        let rebuilt = rebuild_request(data, ChallengeKind::Www, "Digest a=\"b\"").unwrap();

        assert_eq!(
            rebuilt,
            b"INVITE sip:bob@sip.test SIP/2.0\nCSeq: 42 INVITE\r\nAuthorization: Digest a=\"b\"\r\nl: 0\n\n".to_vec()
        );
    }

    #[test]
    fn test_rebuild_failures() {
        let missing = b"OPTIONS sip:sip.test SIP/2.0\r\nMax-Forwards: 70\r\n\r\n";
        assert_eq!(
            rebuild_request(missing, ChallengeKind::Www, "Digest"),
            Err(AuthError::MissingSequenceHeader)
        );

        let two_tokens = b"OPTIONS sip:sip.test SIP/2.0\r\nCSeq: 5\r\n\r\n";
        assert!(matches!(
            rebuild_request(two_tokens, ChallengeKind::Www, "Digest"),
            Err(AuthError::MalformedSequenceHeader(_))
        ));

        let not_a_number = b"OPTIONS sip:sip.test SIP/2.0\r\nCSeq: five OPTIONS\r\n\r\n";
        assert!(matches!(
            rebuild_request(not_a_number, ChallengeKind::Www, "Digest"),
            Err(AuthError::MalformedSequenceHeader(_))
        ));
    }

    #[test]
    fn test_rebuild_rejects_number_glued_to_name() {
        let glued = b"REGISTER sip:a SIP/2.0\r\nCSeq:5 REGISTER\r\n\r\n";
        assert_eq!(
            rebuild_request(glued, ChallengeKind::Www, "Digest x"),
            Err(AuthError::MalformedSequenceHeader("CSeq:5 REGISTER".to_string()))
        );

        let compact = b"REGISTER sip:a SIP/2.0\ns:5 REGISTER\n\n";
        assert!(matches!(
            rebuild_request(compact, ChallengeKind::Proxy, "Digest x"),
            Err(AuthError::MalformedSequenceHeader(_))
        ));
    }

    #[test]
    fn test_sequence_header_tokens() {
        let data = b"OPTIONS sip:sip.test SIP/2.0\r\nCSeq:\t9   OPTIONS\r\n\r\n";
        let header = find_sequence_header(data).unwrap();
        let sequence = SequenceHeader::parse(&header).unwrap();

        assert_eq!(sequence.number, 9);
        assert_eq!(sequence.reason, "OPTIONS");
        assert_eq!(sequence.next().unwrap().number, 10);
    }
}
