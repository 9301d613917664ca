use http_client_instrumented::prelude::HttpClientConfig;
use surge_runner::prelude::UserValuesConstraint;
use url::Url;

#[derive(Default, Debug)]
pub struct HttpRunnerContext {
    /// Set by [crate::prelude::configure_target_url].
    pub base_url: Option<Url>,
    pub client_config: HttpClientConfig,
}

impl UserValuesConstraint for HttpRunnerContext {}
