use crate::error::Error;
use std::fmt;
use std::str::FromStr;

#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug)]
pub enum Method {
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    HEAD,
    OPTIONS,
    TRACE,
    CONNECT,
}

impl Method {
    /// Every method a router keeps a trie for.
    pub const ALL: [Method; 9] = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::HEAD,
        Method::OPTIONS,
        Method::TRACE,
        Method::CONNECT,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::PATCH => "PATCH",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::TRACE => "TRACE",
            Method::CONNECT => "CONNECT",
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "PATCH" => Ok(Method::PATCH),
            "DELETE" => Ok(Method::DELETE),
            "HEAD" => Ok(Method::HEAD),
            "OPTIONS" => Ok(Method::OPTIONS),
            "TRACE" => Ok(Method::TRACE),
            "CONNECT" => Ok(Method::CONNECT),
            _ => Err(Error::NotSupportedMethod(s.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_supported_method(method: &str) -> bool {
    !method.is_empty() && method.parse::<Method>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_methods() {
        for method in Method::ALL {
            assert!(is_supported_method(method.as_str()), "{method}");
        }
        assert!(!is_supported_method("FOO"));
        assert!(!is_supported_method(""));
        assert!(!is_supported_method("get"));
    }

    #[test]
    fn parse_rejects_unknown() {
        assert!(matches!(
            "BREW".parse::<Method>(),
            Err(Error::NotSupportedMethod(m)) if m == "BREW"
        ));
    }
}
