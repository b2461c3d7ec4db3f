use std::collections::HashMap;
use std::time::SystemTime;

/// Outbound response sink filled in by handlers.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Response::new(200)
    }
}

impl Response {
    pub fn new(status: u16) -> Response {
        Response {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    pub fn header<K: AsRef<str>, V: AsRef<str>>(&mut self, name: K, value: V) -> &mut Self {
        self.headers.insert(name.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Appends to the body.
    pub fn write<T: AsRef<[u8]>>(&mut self, chunk: T) -> &mut Self {
        self.body.extend_from_slice(chunk.as_ref());
        self
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Drops headers and body, keeping nothing but the given status.
    pub fn clear(&mut self, status: u16) {
        self.status = status;
        self.headers.clear();
        self.body.clear();
    }

    /// Serializes the response as HTTP/1.1.
    ///
    /// `Content-Length` always reflects the body; the body itself is left out
    /// when `with_body` is false, as a reply to `HEAD` requires.
    pub(crate) fn to_bytes(&self, keep_alive: bool, with_body: bool) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection") {
                continue;
            }
            head += &format!("{}: {}\r\n", name, value);
        }
        if self.get_header("date").is_none() {
            head += &format!("Date: {}\r\n", httpdate::fmt_http_date(SystemTime::now()));
        }
        head += &format!(
            "Connection: {}\r\nContent-Length: {}\r\n\r\n",
            if keep_alive { "keep-alive" } else { "close" },
            self.body.len()
        );

        let mut bytes = head.into_bytes();
        if with_body {
            bytes.extend_from_slice(&self.body);
        }
        bytes
    }
}

pub(crate) fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}
