use crate::error::{Error, Result};
use crate::handler::BoxedHandler;
use crate::middleware::BoxedMiddleware;
use std::collections::HashMap;

/// Marks a segment that binds a path parameter, as in `/users/:id`.
pub const PARAM_PREFIX: char = ':';

pub(crate) fn has_param_prefix(segment: &str) -> bool {
    segment.starts_with(PARAM_PREFIX)
}

/// One path segment of a method's routing trie.
pub struct Node<B> {
    children: HashMap<String, Node<B>>,
    param_key: Option<String>,
    handler: Option<BoxedHandler<B>>,
    middlewares: Vec<BoxedMiddleware<B>>,
}

/// Result of walking the trie for a request path.
///
/// On a miss `node` is `None` while `middlewares` and `params` still hold
/// whatever was collected before the first unmatched segment.
pub struct RouteMatch<'r, B> {
    pub node: Option<&'r Node<B>>,
    pub middlewares: Vec<BoxedMiddleware<B>>,
    pub params: HashMap<String, String>,
}

impl<'r, B> RouteMatch<'r, B> {
    pub fn empty() -> Self {
        Self {
            node: None,
            middlewares: Vec::new(),
            params: HashMap::new(),
        }
    }

    pub fn handler(&self) -> Option<&'r BoxedHandler<B>> {
        self.node.and_then(Node::handler)
    }
}

impl<B> Default for Node<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> Node<B> {
    pub fn new() -> Self {
        Self {
            children: HashMap::new(),
            param_key: None,
            handler: None,
            middlewares: Vec::new(),
        }
    }

    pub fn handler(&self) -> Option<&BoxedHandler<B>> {
        self.handler.as_ref()
    }

    pub fn middlewares(&self) -> &[BoxedMiddleware<B>] {
        &self.middlewares
    }

    /// Name of the parameter child, marker included (`:id`).
    pub fn param_key(&self) -> Option<&str> {
        self.param_key.as_deref()
    }

    /// Sets the handler at `path`, creating nodes on the way.
    pub fn add(&mut self, path: &str, handler: BoxedHandler<B>) -> Result<()> {
        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
        let node = self.walk_or_create(rest);
        if node.handler.is_some() {
            return Err(Error::HandlerAlreadyExists);
        }
        node.handler = Some(handler);
        Ok(())
    }

    /// Appends middlewares at `path`.
    ///
    /// `*` and a trailing `/*` attach to the subtree root; lookups inherit
    /// them for every path below.
    pub fn add_middleware(&mut self, path: &str, middlewares: &[BoxedMiddleware<B>]) -> Result<()> {
        let path = if path == "*" { "/" } else { path };
        let path = path.strip_suffix("/*").unwrap_or(path);
        if !path.is_empty() && !path.starts_with('/') {
            return Err(Error::InvalidPath(path.to_string()));
        }

        let rest = path.strip_prefix('/').unwrap_or(path);
        let node = self.walk_or_create(rest);
        node.middlewares.extend(middlewares.iter().cloned());
        Ok(())
    }

    /// Resolves `path`: literal children win, the parameter child is the fallback.
    pub fn find(&self, path: &str) -> RouteMatch<'_, B> {
        let rest = path.strip_prefix('/').unwrap_or(path);
        let mut current = self;
        let mut found = RouteMatch {
            node: None,
            middlewares: current.middlewares.clone(),
            params: HashMap::new(),
        };
        if rest.is_empty() {
            found.node = Some(current);
            return found;
        }

        for segment in rest.split('/') {
            if let Some(child) = current.children.get(segment) {
                current = child;
            } else if let Some((key, child)) = current
                .param_key
                .as_ref()
                .and_then(|key| current.children.get(key).map(|child| (key, child)))
            {
                found.params.insert(
                    key.trim_start_matches(PARAM_PREFIX).to_string(),
                    segment.to_string(),
                );
                current = child;
            } else {
                return found;
            }
            found.middlewares.extend(current.middlewares.iter().cloned());
        }

        found.node = Some(current);
        found
    }

    fn walk_or_create(&mut self, rest: &str) -> &mut Node<B> {
        if rest.is_empty() {
            return self;
        }
        let mut current = self;
        for segment in rest.split('/') {
            if has_param_prefix(segment) && !current.children.contains_key(segment) {
                current.param_key = Some(segment.to_string());
            }
            current = current.children.entry(segment.to_string()).or_default();
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::handler;
    use crate::middleware;
    use crate::http::Request;
    use std::sync::Arc;

    fn noop() -> BoxedHandler<()> {
        handler::from_fn(|_| Box::pin(async { Ok(()) }))
    }

    fn named(name: &'static str) -> BoxedHandler<()> {
        handler::from_fn(move |ctx: &mut Context<()>| Box::pin(async move { ctx.text(name) }))
    }

    fn passthrough() -> BoxedMiddleware<()> {
        middleware::from_fn(|ctx, next| Box::pin(async move { next.handle(ctx).await }))
    }

    async fn body_of(handler: &BoxedHandler<()>) -> String {
        let mut ctx = Context::new(Request::new("GET", "/"), Arc::new(()));
        handler.call(&mut ctx).await.unwrap();
        ctx.response().body_string()
    }

    #[test]
    fn param_prefix() {
        assert!(has_param_prefix(":foo"));
        assert!(!has_param_prefix("foo"));
        assert!(!has_param_prefix(""));
    }

    #[test]
    fn duplicate_handler_is_rejected() {
        let mut root = Node::new();
        root.add("/foo", noop()).unwrap();
        assert!(matches!(root.add("/foo", noop()), Err(Error::HandlerAlreadyExists)));
    }

    #[test]
    fn duplicate_root_handler_is_rejected() {
        let mut root = Node::new();
        root.add("/", noop()).unwrap();
        assert!(matches!(root.add("/", noop()), Err(Error::HandlerAlreadyExists)));
    }

    #[test]
    fn path_without_leading_slash_is_rejected() {
        let mut root = Node::new();
        assert!(matches!(root.add("foo", noop()), Err(Error::InvalidPath(_))));
    }

    #[tokio::test]
    async fn disjoint_literal_paths_resolve_to_their_own_handler() {
        let mut root = Node::new();
        root.add("/alpha", named("alpha")).unwrap();
        root.add("/beta/gamma", named("gamma")).unwrap();

        let alpha = root.find("/alpha");
        assert_eq!(body_of(alpha.handler().unwrap()).await, "alpha");
        let gamma = root.find("/beta/gamma");
        assert_eq!(body_of(gamma.handler().unwrap()).await, "gamma");
        assert!(root.find("/beta").handler().is_none());
    }

    #[tokio::test]
    async fn params_bind_at_every_depth() {
        let mut root = Node::new();
        root.add("/", named("root")).unwrap();
        root.add("/foo/:bar", named("shallow")).unwrap();
        root.add("/foo/:bar/baz", named("deep")).unwrap();

        let found = root.find("/");
        assert!(found.node.is_some());
        assert!(found.params.is_empty());

        let found = root.find("/foo/X");
        assert_eq!(found.params, HashMap::from([("bar".to_string(), "X".to_string())]));
        assert_eq!(body_of(found.handler().unwrap()).await, "shallow");

        let found = root.find("/foo/X/baz");
        assert_eq!(found.params, HashMap::from([("bar".to_string(), "X".to_string())]));
        assert_eq!(body_of(found.handler().unwrap()).await, "deep");

        let found = root.find("/not-found");
        assert!(found.node.is_none());
        assert!(found.params.is_empty());
    }

    #[tokio::test]
    async fn literal_segment_beats_parameter() {
        let mut root = Node::new();
        root.add("/users/:id", named("by-id")).unwrap();
        root.add("/users/me", named("me")).unwrap();

        let found = root.find("/users/me");
        assert!(found.params.is_empty());
        assert_eq!(body_of(found.handler().unwrap()).await, "me");

        let found = root.find("/users/42");
        assert_eq!(found.params.get("id").map(String::as_str), Some("42"));
        assert_eq!(body_of(found.handler().unwrap()).await, "by-id");
    }

    #[test]
    fn last_parameter_name_wins_at_a_position() {
        let mut root = Node::new();
        root.add("/foo/:bar", noop()).unwrap();
        root.add("/foo/:baz/qux", noop()).unwrap();

        let foo = root.find("/foo").node.unwrap();
        assert_eq!(foo.param_key(), Some(":baz"));

        // `/foo/:bar` is still in the trie but no longer reachable through a parameter
        let found = root.find("/foo/1");
        assert!(found.handler().is_none());
        assert_eq!(found.params.get("baz").map(String::as_str), Some("1"));
        let found = root.find("/foo/1/qux");
        assert!(found.handler().is_some());
        assert_eq!(found.params.get("baz").map(String::as_str), Some("1"));
    }

    #[test]
    fn middleware_at_root_and_star() {
        let mut root = Node::new();
        root.add_middleware("/", &[passthrough()]).unwrap();
        assert_eq!(root.middlewares().len(), 1);

        let mut root = Node::new();
        root.add_middleware("*", &[passthrough()]).unwrap();
        root.add_middleware("/*", &[passthrough()]).unwrap();
        assert_eq!(root.middlewares().len(), 2);
    }

    #[test]
    fn middlewares_accumulate_root_to_leaf() {
        let mut root = Node::new();
        root.add_middleware("/", &[passthrough()]).unwrap();
        root.add_middleware("/api/users/:id/auth", &[passthrough(), passthrough()]).unwrap();

        let found = root.find("/api/users/1/auth");
        assert!(found.node.is_some());
        assert_eq!(found.middlewares.len(), 3);
        assert_eq!(found.params.get("id").map(String::as_str), Some("1"));
    }

    #[test]
    fn middleware_path_needs_leading_slash() {
        let mut root: Node<()> = Node::new();
        assert!(matches!(
            root.add_middleware("api", &[passthrough()]),
            Err(Error::InvalidPath(p)) if p == "api"
        ));
        assert!(matches!(
            root.add_middleware("api/*", &[passthrough()]),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn miss_keeps_middlewares_collected_so_far() {
        let mut root = Node::new();
        root.add_middleware("*", &[passthrough()]).unwrap();
        root.add_middleware("/api/*", &[passthrough()]).unwrap();
        root.add("/api/users", noop()).unwrap();

        let found = root.find("/api/orders");
        assert!(found.node.is_none());
        assert_eq!(found.middlewares.len(), 2);

        let found = root.find("/other");
        assert!(found.node.is_none());
        assert_eq!(found.middlewares.len(), 1);
    }
}
