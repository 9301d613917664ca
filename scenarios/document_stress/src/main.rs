use std::time::Duration;

use http_surge_runner::prelude::*;
use rand::Rng;
use serde::Serialize;

#[derive(Serialize)]
struct Query {
    query: String,
}

impl Query {
    fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

struct DocumentStress;

impl Scenario for DocumentStress {
    type RunnerValue = HttpRunnerContext;
    type UserValue = HttpUserContext;

    fn setup(&self, ctx: &mut RunnerContext<HttpRunnerContext>) -> HookResult {
        configure_target_url(ctx)?;

        log::info!("Creating schema...");
        let client = setup_client(ctx)?;
        let response = ctx.executor().execute_in_place(async move {
            client
                .post_json(
                    "create_schema",
                    "",
                    &Query::new(r#"create document test {"name":"STRING"}"#),
                )
                .await
        })?;
        if !ctx.check_with(&StatusIs::new("schema created", 200), &response) {
            log::warn!("Schema creation returned status {}", response.status());
        }

        Ok(())
    }

    fn setup_user(
        &self,
        ctx: &mut VirtualUserContext<HttpRunnerContext, HttpUserContext>,
    ) -> HookResult {
        connect_http_client(ctx)
    }

    fn iterate(
        &self,
        ctx: &mut VirtualUserContext<HttpRunnerContext, HttpUserContext>,
    ) -> HookResult {
        let id: u32 = rand::thread_rng().gen_range(1..=20);

        let insert = post_json(
            ctx,
            "insert",
            "",
            &Query::new(format!(
                r#"insert value into test {{"_ID": {id}, "name": "hello-{id}"}}"#
            )),
        )?;
        ctx.check_with(&StatusIs::new("insert succeeded", 200), &insert);

        ctx.sleep(Duration::from_millis(500))?;

        let select = post_json(
            ctx,
            "select",
            "",
            &Query::new(format!("select * from test where _ID = {id}")),
        )?;
        let checks: [&dyn Check<HttpResponse>; 2] = [
            &StatusIs::new("search succeeded", 200),
            &BodyContains::new("response has result", format!("\"hello-{id}\"")),
        ];
        ctx.check_all(&checks, &select);

        Ok(())
    }
}

fn main() -> SurgeResult<()> {
    let builder = ScenarioDefinitionBuilder::new_with_init(env!("CARGO_PKG_NAME"), DocumentStress)
        .with_default_target_url("http://localhost:8000")
        .with_default_stage(Duration::from_secs(60), 100)
        .with_default_stage(Duration::from_secs(60), 300)
        .with_default_stage(Duration::from_secs(60), 600)
        .with_default_stage(Duration::from_secs(60), 1000)
        .with_default_stage(Duration::from_secs(120), 0)
        .with_default_threshold("http_req_failed", "rate<0.05")
        .with_default_threshold("http_req_duration", "p(95)<1000")
        .with_default_pacing(Duration::from_millis(500));

    let outcome = run(builder)?;

    std::process::exit(outcome.exit_code());
}
