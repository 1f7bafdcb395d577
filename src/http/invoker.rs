//! Action invoker backed by a JSON write endpoint.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{build_client, classify_response, classify_transport};
use crate::batch::ActionInvoker;
use crate::domain::{ActionError, ProcessableItem};
use crate::error::Result;

#[derive(Debug, Serialize)]
struct ActionRequest<'a> {
    external_id: &'a str,
    payload: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ActionResponse {
    outcome_ref: String,
}

#[derive(Debug, Deserialize)]
struct ReconcileResponse {
    #[serde(default)]
    outcome_ref: Option<String>,
}

/// `POST {url}` with `{external_id, payload}`, expecting `{outcome_ref}`.
///
/// When a reconcile URL is configured, `GET {reconcile_url}?external_id=`
/// answers whether an earlier attempt already took effect.
#[derive(Debug, Clone)]
pub struct HttpActionInvoker {
    client: Client,
    url: String,
    token: String,
    reconcile_url: Option<String>,
}

impl HttpActionInvoker {
    pub fn new(url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
            token: token.into(),
            reconcile_url: None,
        })
    }

    pub fn with_reconcile_url(mut self, url: impl Into<String>) -> Self {
        self.reconcile_url = Some(url.into());
        self
    }
}

#[async_trait]
impl ActionInvoker for HttpActionInvoker {
    async fn perform(&self, item: &ProcessableItem) -> std::result::Result<String, ActionError> {
        let body = ActionRequest {
            external_id: &item.external_id,
            payload: &item.payload,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            let err = classify_response(status, &headers, &text);
            log::debug!("POST {} for {} -> {}", self.url, item.external_id, err);
            return Err(err);
        }

        let parsed: ActionResponse = response.json().await.map_err(classify_transport)?;
        Ok(parsed.outcome_ref)
    }

    async fn reconcile(&self, item: &ProcessableItem) -> std::result::Result<Option<String>, ActionError> {
        let Some(url) = &self.reconcile_url else {
            return Ok(None);
        };

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("external_id", item.external_id.as_str())])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_response(status, &headers, &text));
        }

        let parsed: ReconcileResponse = response.json().await.map_err(classify_transport)?;
        Ok(parsed.outcome_ref)
    }
}
