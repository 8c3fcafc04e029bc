use std::time::Instant;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::app::App;
use crate::auth::BEARER_TOKEN_ENV;
use crate::sources::bloomeo::{GatewayRequest, endpoints};

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthRow {
    pub api: String,
    pub status: String,
    pub latency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affects: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub base_url: String,
    pub checked_at: String,
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.healthy == self.total
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let show_affects = self.rows.iter().any(|row| row.affects.is_some());
        out.push_str("# Bloomeo Health Check\n\n");
        out.push_str(&format!(
            "Base URL: {}\nChecked: {}\n\n",
            self.base_url, self.checked_at
        ));
        if show_affects {
            out.push_str("| Endpoint | Status | Latency | Affects |\n");
            out.push_str("|----------|--------|---------|---------|\n");
        } else {
            out.push_str("| Endpoint | Status | Latency |\n");
            out.push_str("|----------|--------|---------|\n");
        }
        for row in &self.rows {
            if show_affects {
                let affects = row.affects.as_deref().unwrap_or("-");
                out.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    row.api, row.status, row.latency, affects
                ));
            } else {
                out.push_str(&format!(
                    "| {} | {} | {} |\n",
                    row.api, row.status, row.latency
                ));
            }
        }
        out.push_str(&format!(
            "\nStatus: {}/{} endpoints healthy\n",
            self.healthy, self.total
        ));
        out
    }
}

const EXPERIMENT_LISTING: &str = "Experiment listing";
const VARIABLE_CATALOGUE: &str = "Variable catalogue";

fn affects_for_api(api: &str) -> Option<&'static str> {
    match api {
        EXPERIMENT_LISTING => Some("experiment count, listing and search tools"),
        VARIABLE_CATALOGUE => Some("get_variables_by_experiment"),
        "Credential" => Some("every tool without an explicit bearer_token"),
        _ => None,
    }
}

fn unhealthy(api: &str, status: &str, latency: String) -> HealthRow {
    HealthRow {
        api: api.to_string(),
        status: status.to_string(),
        latency,
        affects: affects_for_api(api).map(str::to_string),
    }
}

async fn check_one(app: &App, token: &str, api: &str, request: GatewayRequest) -> HealthRow {
    let start = Instant::now();
    let result = app.gateway().call(&request, token).await;
    let elapsed = start.elapsed().as_millis();
    match result {
        Ok(_) => HealthRow {
            api: api.to_string(),
            status: "ok".into(),
            latency: format!("{elapsed}ms"),
            affects: None,
        },
        Err(err) => unhealthy(api, "error", format!("{elapsed}ms ({})", err.kind())),
    }
}

fn probe_page(path: &'static str) -> GatewayRequest {
    GatewayRequest::get(path)
        .query("page", "0")
        .query("pageSize", "1")
}

/// Probes the listing and catalogue endpoints with the resolved credential.
pub async fn check(app: &App) -> HealthReport {
    let base_url = app.config().base_url.to_string();
    let checked_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".into());
    let rows = match app.resolve_token(None) {
        Ok(token) => {
            let (listing, catalogue) = tokio::join!(
                check_one(app, &token, EXPERIMENT_LISTING, probe_page(endpoints::TRIAL_LIST)),
                check_one(
                    app,
                    &token,
                    VARIABLE_CATALOGUE,
                    probe_page(endpoints::CUSTOM_VARIABLES)
                ),
            );
            vec![listing, catalogue]
        }
        Err(_) => vec![
            unhealthy("Credential", "error", format!("{BEARER_TOKEN_ENV} not set")),
            unhealthy(EXPERIMENT_LISTING, "skipped", "-".into()),
            unhealthy(VARIABLE_CATALOGUE, "skipped", "-".into()),
        ],
    };
    let healthy = rows.iter().filter(|r| r.status == "ok").count();
    HealthReport {
        base_url,
        checked_at,
        healthy,
        total: rows.len(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenStore;
    use crate::config::BloomeoConfig;
    use crate::sources::bloomeo::BloomeoClient;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app_for(server: &MockServer, token: Option<&str>) -> App {
        let config = BloomeoConfig::default().with_base_url(server.uri());
        let client = BloomeoClient::new(&config).unwrap();
        App::new(
            Arc::new(client),
            TokenStore::new(token.map(str::to_string)),
            config,
        )
    }

    #[tokio::test]
    async fn failing_endpoint_lists_affected_tools() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/experiment/v2/trial"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/core/variables/custom/paginated"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let report = check(&app_for(&server, Some("tok"))).await;
        assert_eq!(report.healthy, 1);
        assert_eq!(report.total, 2);
        assert!(!report.all_healthy());
        let md = report.to_markdown();
        assert!(md.contains("| Endpoint | Status | Latency | Affects |"));
        assert!(md.contains("UpstreamError"));
        assert!(md.contains("get_variables_by_experiment"));
    }

    #[tokio::test]
    async fn missing_credential_skips_probes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let report = check(&app_for(&server, None)).await;
        assert_eq!(report.healthy, 0);
        assert_eq!(report.rows[0].api, "Credential");
        assert_eq!(report.rows[1].status, "skipped");
    }

    #[test]
    fn markdown_omits_affects_column_when_all_healthy() {
        let report = HealthReport {
            base_url: "http://localhost".into(),
            checked_at: "2026-01-01T00:00:00Z".into(),
            healthy: 1,
            total: 1,
            rows: vec![HealthRow {
                api: EXPERIMENT_LISTING.into(),
                status: "ok".into(),
                latency: "10ms".into(),
                affects: None,
            }],
        };
        let md = report.to_markdown();
        assert!(md.contains("| Endpoint | Status | Latency |\n"));
        assert!(!md.contains("Affects"));
        assert!(md.contains("Status: 1/1 endpoints healthy"));
    }
}
