//! Candidate source backed by a JSON search endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{build_client, classify_response, classify_transport};
use crate::batch::CandidateSource;
use crate::domain::{ActionError, CandidatePage, Cursor, PageRequest, ProcessableItem};
use crate::error::Result;

#[derive(Debug, Deserialize)]
struct PageBody {
    #[serde(default)]
    items: Vec<ItemBody>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemBody {
    id: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    score: Option<f64>,
}

/// `GET {url}?limit=&cursor=&query=` returning `{items, next_cursor}`.
#[derive(Debug, Clone)]
pub struct HttpCandidateSource {
    client: Client,
    url: String,
    token: String,
    query: Option<String>,
}

impl HttpCandidateSource {
    pub fn new(url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
            token: token.into(),
            query: None,
        })
    }

    /// Restrict results to one search query.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

#[async_trait]
impl CandidateSource for HttpCandidateSource {
    async fn fetch_candidates(&self, request: PageRequest) -> std::result::Result<CandidatePage, ActionError> {
        let mut params: Vec<(&str, String)> = vec![("limit", request.limit.to_string())];
        if let Some(cursor) = &request.cursor {
            params.push(("cursor", cursor.as_str().to_string()));
        }
        if let Some(query) = &self.query {
            params.push(("query", query.clone()));
        }

        log::debug!("GET {} {:?}", self.url, params);
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(&self.token)
            .query(&params)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_response(status, &headers, &body));
        }

        let body: PageBody = response.json().await.map_err(classify_transport)?;
        let items = body
            .items
            .into_iter()
            .map(|i| {
                let item = ProcessableItem::new(i.id, i.payload);
                match i.score {
                    Some(score) => item.with_score(score),
                    None => item,
                }
            })
            .collect();

        Ok(CandidatePage {
            items,
            next_cursor: body.next_cursor.filter(|c| !c.is_empty()).map(Cursor),
        })
    }
}
