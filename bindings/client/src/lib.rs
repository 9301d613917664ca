mod checks;
mod client;
mod response;

pub mod prelude {
    pub use crate::checks::{BodyContains, StatusIs};
    pub use crate::client::{HttpClientConfig, HttpClientInstrumented, DEFAULT_TIMEOUT};
    pub use crate::response::HttpResponse;
}
