mod node;

pub use node::{Node, RouteMatch, PARAM_PREFIX};

use crate::error::{Error, Result};
use crate::handler::BoxedHandler;
use crate::http::Method;
use crate::middleware::BoxedMiddleware;
use std::collections::HashMap;

/// Maps `(method, path)` to a handler, the middlewares along the way and the
/// bound path parameters.
///
/// Registration happens through `&mut self` before the server starts;
/// lookups only need `&self`.
pub trait Router<B>: Send + Sync + 'static {
    fn add(&mut self, method: &str, path: &str, handler: BoxedHandler<B>) -> Result<()>;

    /// Attaches middlewares at `path` for every method.
    fn use_middleware(&mut self, path: &str, middlewares: &[BoxedMiddleware<B>]) -> Result<()>;

    fn find(&self, method: &str, path: &str) -> RouteMatch<'_, B>;

    fn get(&mut self, path: &str, handler: BoxedHandler<B>) -> Result<()> {
        self.add(Method::GET.as_str(), path, handler)
    }

    fn post(&mut self, path: &str, handler: BoxedHandler<B>) -> Result<()> {
        self.add(Method::POST.as_str(), path, handler)
    }

    fn put(&mut self, path: &str, handler: BoxedHandler<B>) -> Result<()> {
        self.add(Method::PUT.as_str(), path, handler)
    }

    fn patch(&mut self, path: &str, handler: BoxedHandler<B>) -> Result<()> {
        self.add(Method::PATCH.as_str(), path, handler)
    }

    fn delete(&mut self, path: &str, handler: BoxedHandler<B>) -> Result<()> {
        self.add(Method::DELETE.as_str(), path, handler)
    }

    fn head(&mut self, path: &str, handler: BoxedHandler<B>) -> Result<()> {
        self.add(Method::HEAD.as_str(), path, handler)
    }

    fn options(&mut self, path: &str, handler: BoxedHandler<B>) -> Result<()> {
        self.add(Method::OPTIONS.as_str(), path, handler)
    }

    fn trace(&mut self, path: &str, handler: BoxedHandler<B>) -> Result<()> {
        self.add(Method::TRACE.as_str(), path, handler)
    }

    fn connect(&mut self, path: &str, handler: BoxedHandler<B>) -> Result<()> {
        self.add(Method::CONNECT.as_str(), path, handler)
    }
}

/// One routing trie per supported method.
pub struct TrieRouter<B> {
    trees: HashMap<Method, Node<B>>,
}

impl<B> Default for TrieRouter<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> TrieRouter<B> {
    pub fn new() -> Self {
        Self {
            trees: Method::ALL.into_iter().map(|method| (method, Node::new())).collect(),
        }
    }

    pub fn tree(&self, method: Method) -> Option<&Node<B>> {
        self.trees.get(&method)
    }
}

impl<B: 'static> Router<B> for TrieRouter<B> {
    fn add(&mut self, method: &str, path: &str, handler: BoxedHandler<B>) -> Result<()> {
        let parsed: Method = method.parse()?;
        // "/users/" registers as "/users"; "/" stays the root
        let path = match path.trim_end_matches('/') {
            "" if path.starts_with('/') => "/",
            trimmed => trimmed,
        };
        let tree = self.trees.entry(parsed).or_default();
        match tree.add(path, handler) {
            Err(err @ Error::HandlerAlreadyExists) => Err(Error::RouteInUse {
                method: method.to_string(),
                path: path.to_string(),
                source: Box::new(err),
            }),
            other => other,
        }
    }

    fn use_middleware(&mut self, path: &str, middlewares: &[BoxedMiddleware<B>]) -> Result<()> {
        for tree in self.trees.values_mut() {
            tree.add_middleware(path, middlewares)?;
        }
        Ok(())
    }

    fn find(&self, method: &str, path: &str) -> RouteMatch<'_, B> {
        match method.parse::<Method>().ok().and_then(|m| self.trees.get(&m)) {
            Some(tree) => tree.find(path),
            None => RouteMatch::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler;
    use crate::middleware;

    fn noop() -> BoxedHandler<()> {
        handler::from_fn(|_| Box::pin(async { Ok(()) }))
    }

    fn passthrough() -> BoxedMiddleware<()> {
        middleware::from_fn(|ctx, next| Box::pin(async move { next.handle(ctx).await }))
    }

    #[test]
    fn keeps_a_tree_per_method() {
        let router = TrieRouter::<()>::new();
        for method in Method::ALL {
            assert!(router.tree(method).is_some());
        }
    }

    #[test]
    fn adds_into_each_tree() {
        let mut router = TrieRouter::new();
        router.add("GET", "/", noop()).unwrap();
        for method in Method::ALL {
            router.add(method.as_str(), "/users", noop()).unwrap();
        }
        for method in Method::ALL {
            assert!(router.find(method.as_str(), "/users").handler().is_some());
        }
    }

    #[test]
    fn duplicate_names_method_and_path() {
        let mut router = TrieRouter::new();
        router.get("/users", noop()).unwrap();
        let err = router.get("/users/", noop()).unwrap_err();
        assert!(err.is_handler_already_exists());
        assert!(matches!(
            &err,
            Error::RouteInUse { method, path, .. } if method == "GET" && path == "/users"
        ));

        // same path under another method is fine
        router.post("/users", noop()).unwrap();
    }

    #[test]
    fn root_is_not_trimmed() {
        let mut router = TrieRouter::new();
        router.get("/", noop()).unwrap();
        assert!(router.get("/", noop()).unwrap_err().is_handler_already_exists());
        assert!(router.find("GET", "/").handler().is_some());
    }

    #[test]
    fn rejects_unsupported_methods() {
        let mut router = TrieRouter::new();
        assert!(matches!(
            router.add("FOO", "/users", noop()),
            Err(Error::NotSupportedMethod(m)) if m == "FOO"
        ));
        assert!(matches!(
            router.add("", "/users", noop()),
            Err(Error::NotSupportedMethod(_))
        ));
    }

    #[test]
    fn unknown_method_finds_nothing() {
        let mut router = TrieRouter::new();
        router.get("/users", noop()).unwrap();
        let found = router.find("BREW", "/users");
        assert!(found.node.is_none());
        assert!(found.middlewares.is_empty());
    }

    #[test]
    fn finds_params() {
        let mut router = TrieRouter::new();
        router.get("/users/:id/name", noop()).unwrap();
        let found = router.find("GET", "/users/123/name");
        assert!(found.node.is_some());
        assert_eq!(found.params, HashMap::from([("id".to_string(), "123".to_string())]));
        assert!(router.find("POST", "/users/123/name").node.is_none());
    }

    #[test]
    fn use_applies_to_every_method() {
        let mut router = TrieRouter::new();
        router.use_middleware("/", &[passthrough()]).unwrap();
        for method in Method::ALL {
            assert_eq!(router.tree(method).unwrap().middlewares().len(), 1);
        }

        router.use_middleware("/api", &[passthrough()]).unwrap();
        let found = router.find("DELETE", "/api");
        assert!(found.node.is_some());
        assert!(found.handler().is_none());
        assert_eq!(found.middlewares.len(), 2);

        assert!(matches!(
            router.use_middleware("api", &[passthrough()]),
            Err(Error::InvalidPath(_))
        ));
    }
}
