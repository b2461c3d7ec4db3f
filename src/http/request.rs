use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Header names are stored lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    /// Builds a request from a method and a request target such as `/users/7?full=1`.
    ///
    /// A trailing `/` is trimmed from the path, except for the root.
    pub fn new(method: impl Into<String>, target: &str) -> Self {
        let mut parts = target.splitn(2, '?');
        let path = normalize_path(parts.next().unwrap_or("/"));
        let query = parts.next().map(parse_query).unwrap_or_default();
        Self {
            method: method.into(),
            path,
            query,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header<K: AsRef<str>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.as_ref().to_lowercase(), value.into());
        self
    }

    pub fn with_body<T: Into<Vec<u8>>>(mut self, body: T) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_lowercase())
            .map(String::as_str)
    }

    pub fn get_query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Whether the client asked to keep the connection open after this request.
    pub(crate) fn keep_alive(&self) -> bool {
        !matches!(self.get_header("connection"), Some(v) if v.eq_ignore_ascii_case("close"))
    }
}

pub(crate) fn normalize_path(path: &str) -> String {
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

pub(crate) fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            Some((
                decode(parts.next()?),
                decode(parts.next().unwrap_or("")),
            ))
        })
        .collect()
}

pub(crate) fn decode(raw: &str) -> String {
    decode_segment(&raw.replace('+', " "))
}

/// Percent-decodes a path segment; `+` stays literal there.
pub(crate) fn decode_segment(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_path_and_query() {
        let req = Request::new("GET", "/users/?name=ada%20l&admin");
        assert_eq!(req.path(), "/users");
        assert_eq!(req.get_query("name"), Some("ada l"));
        assert_eq!(req.get_query("admin"), Some(""));
    }

    #[test]
    fn root_stays_root() {
        assert_eq!(Request::new("GET", "/").path(), "/");
        assert_eq!(Request::new("GET", "").path(), "/");
    }

    #[test]
    fn headers_are_case_insensitive() {
        let req = Request::new("GET", "/").with_header("Content-Type", "application/json");
        assert_eq!(req.get_header("content-type"), Some("application/json"));
        assert_eq!(req.get_header("CONTENT-TYPE"), Some("application/json"));
        assert!(req.keep_alive());
        assert!(!req.with_header("Connection", "Close").keep_alive());
    }
}
