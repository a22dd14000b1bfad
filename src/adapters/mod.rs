pub mod firebase;
pub mod http_client;
pub mod rest_backend;

pub use firebase::FirebaseIdentityProvider;
pub use http_client::{HttpClient, HttpMethod, ReqwestHttpClient, SimpleHttpResponse};
pub use rest_backend::RestBackend;
