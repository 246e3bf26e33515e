//! SMTP reply parsing.

use super::error::{ClientError, Result};

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    pub fn message(&self) -> String {
        self.lines.join(" ")
    }

    /// 2xx reply.
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx reply (e.g. 354 after DATA).
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Parse one reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it consumed, or `None` when
    /// the buffer does not yet hold a complete reply.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut lines = Vec::new();
        let mut code = None;
        let mut consumed = 0;

        loop {
            let rest = &buffer[consumed..];
            let Some(end) = rest.iter().position(|byte| *byte == b'\n') else {
                return Ok(None);
            };

            let raw = &rest[..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = std::str::from_utf8(raw)
                .map_err(|err| ClientError::Parse(err.to_string()))?;
            consumed += end + 1;

            if line.len() < 3 {
                return Err(ClientError::Parse(format!("reply line too short: '{line}'")));
            }

            let line_code: u16 = line[..3]
                .parse()
                .map_err(|_| ClientError::Parse(format!("invalid reply code in '{line}'")))?;

            match code {
                None => code = Some(line_code),
                Some(code) if code != line_code => {
                    return Err(ClientError::Parse(format!(
                        "reply code changed mid-reply: {code} then {line_code}"
                    )));
                }
                Some(_) => {}
            }

            let (last, text) = match line.as_bytes().get(3) {
                None => (true, ""),
                Some(b' ') => (true, line[4..].trim_start()),
                Some(b'-') => (false, line[4..].trim_start()),
                Some(other) => {
                    return Err(ClientError::Parse(format!(
                        "invalid separator {:?} in '{line}'",
                        char::from(*other)
                    )));
                }
            };

            lines.push(text.to_string());

            if last {
                let code = code.unwrap_or_default();
                return Ok(Some((Self { code, lines }, consumed)));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::Response;

    #[test]
    fn single_line() {
        let (response, consumed) = Response::parse(b"250 OK\r\n").unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(response.lines, vec!["OK"]);
        assert_eq!(consumed, 8);
        assert!(response.is_success());
    }

    #[test]
    fn multi_line() {
        let data = b"250-mail.example.com\r\n250-SIZE 10240000\r\n250 STARTTLS\r\n";
        let (response, consumed) = Response::parse(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(response.lines, vec!["mail.example.com", "SIZE 10240000", "STARTTLS"]);
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn incomplete_reply_needs_more_data() {
        assert!(Response::parse(b"250-mail.example.com\r\n250-SIZ")
            .unwrap()
            .is_none());
        assert!(Response::parse(b"25").unwrap().is_none());
    }

    #[test]
    fn trailing_bytes_are_not_consumed() {
        let data = b"354 go ahead\r\n250 queued\r\n";
        let (response, consumed) = Response::parse(data).unwrap().unwrap();
        assert_eq!(response.code, 354);
        assert!(response.is_intermediate());
        assert_eq!(consumed, 14);
    }

    #[test]
    fn mismatched_codes_are_rejected() {
        assert!(Response::parse(b"250-one\r\n550 two\r\n").is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Response::parse(b"xx\r\n").is_err());
        assert!(Response::parse(b"2a0 hello\r\n").is_err());
    }
}
