use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool, ToolsCapability,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::app::App;
use crate::error::{BloomeoError, ErrorKind};
use crate::mcp::tools::{
    self, CountParams, ExperimentDataParams, ExperimentParams, ExperimentTaskParams,
    GenotypeParams, GenotypesParams, ListPageParams, PaginatedParams, SearchAdvancedParams,
    SearchByNameParams, SetTokenParams, TrialParams, VariableGroupParams, VariableParams,
};

#[derive(Clone)]
pub struct BloomeoServer {
    app: App,
}

fn parse<P: DeserializeOwned>(
    arguments: Option<serde_json::Map<String, Value>>,
) -> Result<P, McpError> {
    serde_json::from_value(Value::Object(arguments.unwrap_or_default()))
        .map_err(|e| McpError::invalid_params(e.to_string(), None))
}

fn tool_result(tool: &str, outcome: Result<Value, BloomeoError>) -> CallToolResult {
    match outcome {
        Ok(value) => CallToolResult::success(vec![Content::text(value.to_string())]),
        Err(err) => {
            match err.kind() {
                ErrorKind::NotFound | ErrorKind::InvalidArgument => {
                    debug!(tool, kind = %err.kind(), "tool call rejected");
                }
                kind => warn!(tool, %kind, error = %err, "tool call failed"),
            }
            CallToolResult::error(vec![Content::text(err.to_payload().to_string())])
        }
    }
}

impl BloomeoServer {
    pub fn new(app: App) -> Self {
        Self { app }
    }

    pub(crate) async fn dispatch(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, Value>>,
    ) -> Result<CallToolResult, McpError> {
        let app = &self.app;
        let outcome = match name {
            "get_experiments_count" => {
                let p: CountParams = parse(arguments)?;
                app.experiments_count(p.filters, p.bearer_token.as_deref())
                    .await
            }
            "get_all_experiments" => {
                let p: ListPageParams = parse(arguments)?;
                app.all_experiments(
                    p.page,
                    p.page_size,
                    p.filters,
                    p.sort,
                    p.bearer_token.as_deref(),
                )
                .await
            }
            "get_all_experiments_paginated" => {
                let p: PaginatedParams = parse(arguments)?;
                app.all_experiments_paginated(
                    p.max_pages,
                    p.include_full_data,
                    p.filters,
                    p.sort,
                    p.bearer_token.as_deref(),
                )
                .await
            }
            "get_experiment_data" => {
                let p: ExperimentDataParams = parse(arguments)?;
                app.experiment_data(&p.experiment_id, p.mode, p.bearer_token.as_deref())
                    .await
            }
            "get_experiment_task" => {
                let p: ExperimentTaskParams = parse(arguments)?;
                app.experiment_task(
                    &p.experiment_id,
                    p.task_type.as_deref(),
                    p.bearer_token.as_deref(),
                )
                .await
            }
            "get_experiment_structure" => {
                let p: ExperimentParams = parse(arguments)?;
                app.experiment_structure(&p.experiment_id, p.bearer_token.as_deref())
                    .await
            }
            "get_experiment_notebook" => {
                let p: TrialParams = parse(arguments)?;
                app.experiment_notebook(&p.trial_id, p.bearer_token.as_deref())
                    .await
            }
            "get_experiment_treatment" => {
                let p: TrialParams = parse(arguments)?;
                app.experiment_treatment(&p.trial_id, p.bearer_token.as_deref())
                    .await
            }
            "get_trial_notation" => {
                let p: TrialParams = parse(arguments)?;
                app.trial_notation(&p.trial_id, p.bearer_token.as_deref())
                    .await
            }
            "get_variable_groups" => {
                let p: TrialParams = parse(arguments)?;
                app.variable_groups(&p.trial_id, p.bearer_token.as_deref())
                    .await
            }
            "get_genotypes" => {
                let p: GenotypesParams = parse(arguments)?;
                app.genotypes(&p.genotype_ids, p.bearer_token.as_deref())
                    .await
            }
            "get_genotype_details" => {
                let p: GenotypeParams = parse(arguments)?;
                app.genotype_details(&p.genotype_id, p.bearer_token.as_deref())
                    .await
            }
            "get_variable_details" => {
                let p: VariableParams = parse(arguments)?;
                app.variable_details(&p.variable_id, p.bearer_token.as_deref())
                    .await
            }
            "get_variable_group_details" => {
                let p: VariableGroupParams = parse(arguments)?;
                app.variable_group_details(&p.variable_group_id, p.bearer_token.as_deref())
                    .await
            }
            "get_variables_by_experiment" => {
                let p: ExperimentParams = parse(arguments)?;
                app.variables_by_experiment(&p.experiment_id, p.bearer_token.as_deref())
                    .await
            }
            "search_experiments_by_name" => {
                let p: SearchByNameParams = parse(arguments)?;
                app.search_experiments_by_name(
                    &p.search_term,
                    p.exact_match,
                    p.bearer_token.as_deref(),
                )
                .await
            }
            "search_experiments_advanced" => {
                let p: SearchAdvancedParams = parse(arguments)?;
                app.search_experiments_advanced(&p.search_criteria, p.bearer_token.as_deref())
                    .await
            }
            "set_bearer_token" => {
                let p: SetTokenParams = parse(arguments)?;
                app.set_bearer_token(&p.bearer_token)
            }
            _ => {
                return Err(McpError::invalid_params(
                    format!("Unknown tool: {name}"),
                    None,
                ));
            }
        };
        Ok(tool_result(name, outcome))
    }
}

impl ServerHandler for BloomeoServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(true),
                }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "bloomeo-mcp".to_string(),
                title: Some("Bloomeo".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: crate::cli::list::render(None).ok(),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = tools::TOOLS
            .iter()
            .map(|spec| Tool {
                name: spec.name.into(),
                title: Some(spec.title.to_string()),
                description: Some(spec.description.into()),
                input_schema: (spec.schema)(),
                output_schema: None,
                annotations: None,
                icons: None,
                meta: None,
            })
            .collect();

        Ok(ListToolsResult {
            next_cursor: None,
            tools,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        debug!(tool = %request.name, "tool call");
        self.dispatch(request.name.as_ref(), request.arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenStore;
    use crate::config::BloomeoConfig;
    use crate::sources::bloomeo::BloomeoClient;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn server_for(mock: &MockServer, token: Option<&str>) -> BloomeoServer {
        let config = BloomeoConfig::default().with_base_url(mock.uri());
        let client = BloomeoClient::new(&config).unwrap();
        let app = App::new(
            Arc::new(client),
            TokenStore::new(token.map(str::to_string)),
            config,
        );
        BloomeoServer::new(app)
    }

    fn args(value: Value) -> Option<serde_json::Map<String, Value>> {
        value.as_object().cloned()
    }

    fn text_of(result: &CallToolResult) -> Value {
        let raw = serde_json::to_value(result).unwrap();
        let text = raw["content"][0]["text"].as_str().unwrap().to_string();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn unknown_tool_is_a_protocol_error() {
        let mock = MockServer::start().await;
        let err = server_for(&mock, Some("tok"))
            .dispatch("drop_everything", None)
            .await
            .unwrap_err();
        assert!(err.message.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn malformed_arguments_are_invalid_params() {
        let mock = MockServer::start().await;
        let result = server_for(&mock, Some("tok"))
            .dispatch("get_all_experiments", args(json!({"page": "first"})))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn out_of_range_paging_is_an_invalid_argument_payload() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(0)
            .mount(&mock)
            .await;
        let server = server_for(&mock, Some("tok"));

        for (tool, arguments) in [
            ("get_all_experiments", json!({"page_size": 5_000_000_000u64})),
            ("get_all_experiments", json!({"page_size": -5})),
            ("get_all_experiments", json!({"page": -1})),
            ("get_all_experiments_paginated", json!({"max_pages": 5_000_000_000u64})),
            ("get_all_experiments_paginated", json!({"max_pages": -1})),
        ] {
            let result = server.dispatch(tool, args(arguments)).await.unwrap();
            assert_eq!(result.is_error, Some(true), "{tool}");
            assert_eq!(text_of(&result)["error"]["kind"], "InvalidArgument", "{tool}");
        }
    }

    #[tokio::test]
    async fn missing_credential_is_a_tool_error_payload() {
        let mock = MockServer::start().await;
        let result = server_for(&mock, None)
            .dispatch("get_experiment_notebook", args(json!({"trial_id": "t-1"})))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert_eq!(text_of(&result)["error"]["kind"], "MissingCredential");
    }

    #[tokio::test]
    async fn stored_token_is_used_by_later_calls() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/experiment/treatment/trial/t-1"))
            .and(header("authorization", "Bearer later"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"dose": 3})))
            .expect(1)
            .mount(&mock)
            .await;

        let server = server_for(&mock, None);
        let ack = server
            .dispatch("set_bearer_token", args(json!({"bearer_token": "later"})))
            .await
            .unwrap();
        assert_eq!(text_of(&ack)["ok"], true);

        let result = server
            .dispatch("get_experiment_treatment", args(json!({"trial_id": "t-1"})))
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));
        assert_eq!(text_of(&result)["dose"], 3);
    }
}
