//! Tool-level facade shared by the MCP server and the CLI.
//!
//! Each method validates its arguments, resolves the bearer credential once,
//! runs the entity operation and returns JSON bounded by
//! `config.max_response_bytes`.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};

use crate::auth::TokenStore;
use crate::config::BloomeoConfig;
use crate::entities::listing::{self, ListQuery, PageWindow, SearchCriteria};
use crate::entities::{experiment, variable};
use crate::error::BloomeoError;
use crate::sources::bloomeo::{BloomeoClient, Gateway};
use crate::transform::shape::{self, ResponseMode};

#[derive(Clone)]
pub struct App {
    gateway: Arc<dyn Gateway>,
    tokens: Arc<TokenStore>,
    config: Arc<BloomeoConfig>,
}

impl App {
    pub fn new(gateway: Arc<dyn Gateway>, tokens: TokenStore, config: BloomeoConfig) -> Self {
        Self {
            gateway,
            tokens: Arc::new(tokens),
            config: Arc::new(config),
        }
    }

    /// Builds the HTTP gateway from `config` and reads the default token from the environment.
    pub fn from_config(config: BloomeoConfig) -> Result<Self, BloomeoError> {
        let client = BloomeoClient::new(&config)?;
        Ok(Self::new(Arc::new(client), TokenStore::from_env(), config))
    }

    pub fn config(&self) -> &BloomeoConfig {
        &self.config
    }

    pub fn gateway(&self) -> &dyn Gateway {
        self.gateway.as_ref()
    }

    pub fn has_token(&self) -> bool {
        self.tokens.has_token()
    }

    pub fn resolve_token(&self, explicit: Option<&str>) -> Result<String, BloomeoError> {
        self.tokens.resolve(explicit)
    }

    fn bounded<T: Serialize>(&self, value: &T) -> Result<Value, BloomeoError> {
        let value =
            serde_json::to_value(value).map_err(|source| BloomeoError::ResultEncoding { source })?;
        Ok(shape::fit_to_budget(value, self.config.max_response_bytes))
    }

    pub fn set_bearer_token(&self, bearer_token: &str) -> Result<Value, BloomeoError> {
        self.tokens.set(bearer_token)?;
        Ok(json!({"ok": true}))
    }

    pub async fn experiments_count(
        &self,
        filters: Option<Value>,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        let query = ListQuery::new(filters, None)?;
        let token = self.resolve_token(bearer_token)?;
        let count = listing::count(self.gateway(), &token, &query).await?;
        self.bounded(&count)
    }

    pub async fn all_experiments(
        &self,
        page: i64,
        page_size: i64,
        filters: Option<Value>,
        sort: Option<Value>,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        let window = PageWindow::new(page, page_size)?;
        let query = ListQuery::new(filters, sort)?;
        let token = self.resolve_token(bearer_token)?;
        let page = listing::page(
            self.gateway(),
            &token,
            window,
            &query,
            self.config.max_response_bytes,
        )
        .await?;
        self.bounded(&page)
    }

    pub async fn all_experiments_paginated(
        &self,
        max_pages: i64,
        include_full_data: bool,
        filters: Option<Value>,
        sort: Option<Value>,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        let query = ListQuery::new(filters, sort)?;
        let max_pages = listing::validate_max_pages(max_pages)?;
        let token = self.resolve_token(bearer_token)?;
        let pages = listing::paginate_auto(
            self.gateway(),
            &token,
            &query,
            max_pages,
            include_full_data,
            self.config.max_response_bytes,
        )
        .await?;
        self.bounded(&pages)
    }

    pub async fn experiment_data(
        &self,
        experiment_id: &str,
        mode: ResponseMode,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        crate::sources::path_segment("experiment_id", experiment_id)?;
        let token = self.resolve_token(bearer_token)?;
        let data = experiment::get(self.gateway(), &token, experiment_id, &self.config).await?;
        data.shape(mode, self.config.max_response_bytes)
    }

    pub async fn experiment_task(
        &self,
        experiment_id: &str,
        task_type: Option<&str>,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        crate::sources::path_segment("experiment_id", experiment_id)?;
        let token = self.resolve_token(bearer_token)?;
        let task = experiment::task(self.gateway(), &token, experiment_id, task_type).await?;
        self.bounded(&task)
    }

    pub async fn experiment_structure(
        &self,
        experiment_id: &str,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        crate::sources::path_segment("experiment_id", experiment_id)?;
        let token = self.resolve_token(bearer_token)?;
        let structure = experiment::structure(self.gateway(), &token, experiment_id).await?;
        self.bounded(&structure)
    }

    pub async fn experiment_notebook(
        &self,
        trial_id: &str,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        crate::sources::path_segment("trial_id", trial_id)?;
        let token = self.resolve_token(bearer_token)?;
        let entries = experiment::notebook(self.gateway(), &token, trial_id).await?;
        self.bounded(&entries)
    }

    pub async fn experiment_treatment(
        &self,
        trial_id: &str,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        crate::sources::path_segment("trial_id", trial_id)?;
        let token = self.resolve_token(bearer_token)?;
        let treatment = experiment::treatment(self.gateway(), &token, trial_id).await?;
        self.bounded(&treatment)
    }

    pub async fn trial_notation(
        &self,
        trial_id: &str,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        crate::sources::path_segment("trial_id", trial_id)?;
        let token = self.resolve_token(bearer_token)?;
        let notation = experiment::trial_notation(self.gateway(), &token, trial_id).await?;
        self.bounded(&notation)
    }

    pub async fn variable_groups(
        &self,
        trial_id: &str,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        crate::sources::path_segment("trial_id", trial_id)?;
        let token = self.resolve_token(bearer_token)?;
        let groups = experiment::variable_groups(self.gateway(), &token, trial_id).await?;
        self.bounded(&groups)
    }

    pub async fn genotypes(
        &self,
        genotype_ids: &[String],
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        if genotype_ids.iter().all(|id| id.trim().is_empty()) {
            return Err(BloomeoError::InvalidArgument(
                "genotype_ids must contain at least one id".into(),
            ));
        }
        let token = self.resolve_token(bearer_token)?;
        let genotypes = experiment::genotypes(self.gateway(), &token, genotype_ids).await?;
        self.bounded(&genotypes)
    }

    pub async fn search_experiments_by_name(
        &self,
        search_term: &str,
        exact_match: bool,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        if search_term.trim().is_empty() {
            return Err(BloomeoError::InvalidArgument(
                "search_term must not be empty".into(),
            ));
        }
        let token = self.resolve_token(bearer_token)?;
        let results = listing::search_by_name(
            self.gateway(),
            &token,
            search_term,
            exact_match,
            self.config.max_response_bytes,
        )
        .await?;
        self.bounded(&results)
    }

    pub async fn search_experiments_advanced(
        &self,
        criteria: &SearchCriteria,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        criteria.to_filter()?;
        let token = self.resolve_token(bearer_token)?;
        let results = listing::search_advanced(
            self.gateway(),
            &token,
            criteria,
            self.config.max_response_bytes,
        )
        .await?;
        self.bounded(&results)
    }

    pub async fn variable_details(
        &self,
        variable_id: &str,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        crate::sources::path_segment("variable_id", variable_id)?;
        let token = self.resolve_token(bearer_token)?;
        let details = variable::details(self.gateway(), &token, variable_id).await?;
        self.bounded(&details)
    }

    pub async fn variable_group_details(
        &self,
        variable_group_id: &str,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        crate::sources::path_segment("variable_group_id", variable_group_id)?;
        let token = self.resolve_token(bearer_token)?;
        let details = variable::group_details(self.gateway(), &token, variable_group_id).await?;
        self.bounded(&details)
    }

    pub async fn genotype_details(
        &self,
        genotype_id: &str,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        crate::sources::path_segment("genotype_id", genotype_id)?;
        let token = self.resolve_token(bearer_token)?;
        let details = variable::genotype_details(self.gateway(), &token, genotype_id).await?;
        self.bounded(&details)
    }

    pub async fn variables_by_experiment(
        &self,
        experiment_id: &str,
        bearer_token: Option<&str>,
    ) -> Result<Value, BloomeoError> {
        crate::sources::path_segment("experiment_id", experiment_id)?;
        let token = self.resolve_token(bearer_token)?;
        let variables = variable::by_experiment(self.gateway(), &token, experiment_id).await?;
        self.bounded(&variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::sources::bloomeo::GatewayRequest;

    #[derive(Default)]
    struct CountingGateway {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Gateway for CountingGateway {
        async fn call(
            &self,
            _request: &GatewayRequest,
            _bearer_token: &str,
        ) -> Result<Value, BloomeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"data": [], "total": 0}))
        }
    }

    fn app_with(gateway: Arc<CountingGateway>, token: Option<&str>) -> App {
        App::new(
            gateway,
            TokenStore::new(token.map(str::to_string)),
            BloomeoConfig::default(),
        )
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_the_gateway() {
        let gateway = Arc::new(CountingGateway::default());
        let app = app_with(gateway.clone(), Some("tok"));

        let err = app.all_experiments(0, 101, None, None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = app.search_experiments_by_name(" ", false, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = app
            .all_experiments_paginated(51, false, None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = app
            .search_experiments_advanced(&SearchCriteria::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = app.experiment_notebook("a/b", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_credential_is_reported_before_io() {
        let gateway = Arc::new(CountingGateway::default());
        let app = app_with(gateway.clone(), None);

        let err = app.experiment_treatment("trial-1", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredential);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);

        app.set_bearer_token("fresh").unwrap();
        app.experiment_treatment("trial-1", None).await.unwrap();
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_bearer_token_acknowledges() {
        let app = app_with(Arc::new(CountingGateway::default()), None);
        assert_eq!(app.set_bearer_token("abc").unwrap(), json!({"ok": true}));
        assert!(app.has_token());
    }
}
