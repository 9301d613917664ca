use http_client_instrumented::prelude::HttpClientInstrumented;
use surge_runner::prelude::UserValuesConstraint;

/// Per virtual user values for HTTP scenarios.
///
/// `SV` holds anything else the scenario wants to keep across iterations of one user.
#[derive(Default, Debug)]
pub struct HttpUserContext<SV: UserValuesConstraint = ()> {
    pub client: Option<HttpClientInstrumented>,
    pub scenario_values: SV,
}

impl<SV: UserValuesConstraint> UserValuesConstraint for HttpUserContext<SV> {}
