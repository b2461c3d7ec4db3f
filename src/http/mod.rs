pub(crate) mod method;
pub(crate) mod request;
pub(crate) mod response;

pub use method::{is_supported_method, Method};
pub use request::Request;
pub use response::Response;
