use tabled::Tabled;

#[derive(Tabled)]
pub struct CheckRow {
    pub check: String,
    pub passes: u64,
    pub fails: u64,
    #[tabled(rename = "pass %", display = "percent")]
    pub pass_rate: Option<f64>,
}

#[derive(Tabled)]
pub struct TrendRow {
    pub metric: String,
    pub count: u64,
    #[tabled(rename = "avg ms", display = "float2")]
    pub avg_ms: Option<f64>,
    #[tabled(rename = "min ms", display = "float2")]
    pub min_ms: Option<f64>,
    #[tabled(rename = "med ms", display = "float2")]
    pub med_ms: Option<f64>,
    #[tabled(rename = "max ms", display = "float2")]
    pub max_ms: Option<f64>,
    #[tabled(rename = "p(90) ms", display = "float2")]
    pub p90_ms: Option<f64>,
    #[tabled(rename = "p(95) ms", display = "float2")]
    pub p95_ms: Option<f64>,
}

#[derive(Tabled)]
pub struct CounterRow {
    pub metric: String,
    pub count: u64,
    #[tabled(rename = "per second", display = "float2")]
    pub per_second: Option<f64>,
    #[tabled(rename = "failed %", display = "percent")]
    pub failed_rate: Option<f64>,
}

#[derive(Tabled)]
pub struct VirtualUserRow {
    #[tabled(rename = "virtual users")]
    pub label: &'static str,
    pub count: usize,
}

#[derive(Tabled)]
pub struct ThresholdRow {
    pub metric: String,
    pub expression: String,
    #[tabled(display = "float2")]
    pub observed: Option<f64>,
    pub verdict: String,
}

fn float2(n: &Option<f64>) -> String {
    match n {
        Some(n) => format!("{:.2}", n),
        None => "-".to_string(),
    }
}

fn percent(n: &Option<f64>) -> String {
    match n {
        Some(n) => format!("{:.2}%", n * 100.0),
        None => "-".to_string(),
    }
}
