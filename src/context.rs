//! Per-request carrier handed to handlers and middlewares.

use crate::handler::HandlerResult;
use crate::http::{Request, Response};
use serde::Serialize;
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

pub struct Context<B> {
    env: Arc<B>,
    request: Request,
    response: Response,
    status: u16,
    params: HashMap<String, String>,
}

impl<B> Context<B> {
    pub fn new(request: Request, env: Arc<B>) -> Self {
        Self {
            env,
            request,
            response: Response::default(),
            status: 200,
            params: HashMap::new(),
        }
    }

    /// The environment shared by every request and background task.
    ///
    /// It is not locked: put a `Mutex` or atomics inside `B` for anything mutable.
    pub fn env(&self) -> &Arc<B> {
        &self.env
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Swaps in a new request and a fresh response; status goes back to 200.
    pub fn reset(&mut self, request: Request) {
        self.request = request;
        self.response = Response::default();
        self.status = 200;
        self.params.clear();
    }

    /// Sets the status used by the next `text`, `json` write.
    pub fn status(&mut self, code: u16) -> &mut Self {
        self.status = code;
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn text<T: AsRef<str>>(&mut self, text: T) -> HandlerResult {
        self.response
            .header("Content-Type", "text/plain")
            .status(self.status)
            .write(text.as_ref());
        Ok(())
    }

    /// Writes `data` as JSON. The request must itself declare a JSON content type.
    pub fn json<T: Serialize>(&mut self, data: &T) -> HandlerResult {
        let accepts_json = self
            .request
            .get_header("content-type")
            .is_some_and(|ct| ct.contains("application/json"));
        if !accepts_json {
            return Err("content-type must be application/json".into());
        }
        let body = serde_json::to_vec(data)?;
        self.response
            .header("Content-Type", "application/json")
            .status(self.status)
            .write(body);
        Ok(())
    }

    pub fn redirect(&mut self, url: &str) -> HandlerResult {
        self.response.header("Location", url).status(302);
        Ok(())
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub(crate) fn take_response(&mut self) -> Response {
        mem::take(&mut self.response)
    }

    /// Drops request data so an idle pooled context holds nothing from its last use.
    pub(crate) fn recycle(&mut self) {
        self.request = Request::default();
        self.response = Response::default();
        self.status = 200;
        self.params.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(request: Request) -> Context<()> {
        Context::new(request, Arc::new(()))
    }

    #[test]
    fn text_uses_the_pending_status() {
        let mut ctx = context(Request::new("GET", "/"));
        ctx.status(418).text("teapot").unwrap();
        assert_eq!(ctx.response().status, 418);
        assert_eq!(ctx.response().body_string(), "teapot");
        assert_eq!(ctx.response().get_header("content-type"), Some("text/plain"));
    }

    #[test]
    fn json_requires_json_request() {
        let mut ctx = context(Request::new("POST", "/"));
        assert!(ctx.json(&serde_json::json!({"ok": true})).is_err());

        let mut ctx = context(
            Request::new("POST", "/").with_header("Content-Type", "application/json; charset=utf-8"),
        );
        ctx.status(201).json(&serde_json::json!({"ok": true})).unwrap();
        assert_eq!(ctx.response().status, 201);
        assert_eq!(ctx.response().body_string(), r#"{"ok":true}"#);
    }

    #[test]
    fn redirect_sets_location() {
        let mut ctx = context(Request::new("GET", "/old"));
        ctx.redirect("/new").unwrap();
        assert_eq!(ctx.response().status, 302);
        assert_eq!(ctx.response().get_header("location"), Some("/new"));
    }

    #[test]
    fn reset_restores_defaults() {
        let mut ctx = context(Request::new("GET", "/1"));
        ctx.set_params(HashMap::from([("id".to_string(), "1".to_string())]));
        ctx.status(500).text("boom").unwrap();

        ctx.reset(Request::new("GET", "/2"));
        assert_eq!(ctx.request().path(), "/2");
        assert_eq!(ctx.status_code(), 200);
        assert_eq!(ctx.response().status, 200);
        assert!(ctx.response().body.is_empty());
        assert!(ctx.params().is_empty());
    }
}
