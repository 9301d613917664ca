use anyhow::Context;
use http_client_instrumented::prelude::{HttpClientInstrumented, HttpResponse};
use serde::Serialize;
use surge_runner::prelude::{
    OperationRecorder, RunnerContext, SurgeResult, UserValuesConstraint, VirtualUserContext,
};
use url::Url;

use crate::context::HttpUserContext;
use crate::runner_context::HttpRunnerContext;

/// Sets the `base_url` value in [HttpRunnerContext] from the `--target-url` option.
///
/// Call this at the start of your scenario's `setup`. The URL is checked once here, so that a typo
/// fails the run before any virtual user is started.
pub fn configure_target_url(ctx: &mut RunnerContext<HttpRunnerContext>) -> SurgeResult<()> {
    let target_url = ctx
        .target_url()
        .context("No target URL configured, pass one with --target-url")?
        .to_string();
    let base_url =
        Url::parse(&target_url).with_context(|| format!("Invalid target URL: {}", target_url))?;

    log::info!("Targeting {}", base_url);
    ctx.get_mut().base_url = Some(base_url);

    Ok(())
}

/// Create a client for requests made by `setup` or `teardown`.
///
/// These requests are not part of any iteration, so they are not included in the run's metrics.
pub fn setup_client(ctx: &RunnerContext<HttpRunnerContext>) -> SurgeResult<HttpClientInstrumented> {
    let base_url = base_url(ctx)?;
    HttpClientInstrumented::with_config(
        base_url.as_str(),
        OperationRecorder::new(),
        ctx.get().client_config.clone(),
    )
}

/// Create this virtual user's client and store it in [HttpUserContext].
///
/// Call this from `setup_user`. Requests made with the client are reported to the user's
/// recorder, so they count towards the `request_*` metrics.
pub fn connect_http_client<SV: UserValuesConstraint>(
    ctx: &mut VirtualUserContext<HttpRunnerContext, HttpUserContext<SV>>,
) -> SurgeResult<()> {
    let runner_values = ctx.runner_context().get();
    let base_url = base_url(ctx.runner_context())?;
    let client = HttpClientInstrumented::with_config(
        base_url.as_str(),
        ctx.recorder().clone(),
        runner_values.client_config.clone(),
    )?;

    log::debug!("Connected HTTP client for vu-{}", ctx.vu_id());
    ctx.get_mut().client = Some(client);

    Ok(())
}

/// Get this virtual user's client.
pub fn http_client<SV: UserValuesConstraint>(
    ctx: &VirtualUserContext<HttpRunnerContext, HttpUserContext<SV>>,
) -> SurgeResult<&HttpClientInstrumented> {
    ctx.get()
        .client
        .as_ref()
        .context("HTTP client not connected, call 'connect_http_client' in 'setup_user'")
}

/// POST `body` as JSON to `path`, relative to the target URL, and wait for the response.
///
/// The request is timed as the operation `operation_id`. A response with an error status, or a
/// transport error, is returned rather than failing the iteration so that checks can run on it.
pub fn post_json<SV, T>(
    ctx: &VirtualUserContext<HttpRunnerContext, HttpUserContext<SV>>,
    operation_id: &str,
    path: &str,
    body: &T,
) -> SurgeResult<HttpResponse>
where
    SV: UserValuesConstraint,
    T: Serialize + ?Sized,
{
    let client = http_client(ctx)?;
    ctx.runner_context()
        .executor()
        .execute_in_place(async move { client.post_json(operation_id, path, body).await })
}

/// GET `path`, relative to the target URL, and wait for the response.
pub fn get<SV: UserValuesConstraint>(
    ctx: &VirtualUserContext<HttpRunnerContext, HttpUserContext<SV>>,
    operation_id: &str,
    path: &str,
) -> SurgeResult<HttpResponse> {
    let client = http_client(ctx)?;
    ctx.runner_context()
        .executor()
        .execute_in_place(async move { client.get(operation_id, path).await })
}

fn base_url(ctx: &RunnerContext<HttpRunnerContext>) -> SurgeResult<&Url> {
    ctx.get()
        .base_url
        .as_ref()
        .context("Target URL not configured, call 'configure_target_url' in 'setup'")
}
