use anyhow::{Context, Result};
use async_trait::async_trait;
use lexaxis_contexts::{ContextError, MaskedLmOracle, MaskedSentence, ModelId};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Masked-LM oracle served over HTTP.
///
/// Each method is one JSON `POST` to `<endpoint>/subwords`, `<endpoint>/top_k` or
/// `<endpoint>/candidate_probs`.
pub struct HttpOracle {
    client: Client,
    endpoint: String,
    model: ModelId,
}

#[derive(Serialize)]
struct SubwordsRequest<'a> {
    model: ModelId,
    words: &'a [String],
}

#[derive(Deserialize)]
struct SubwordsResponse {
    counts: Vec<usize>,
}

#[derive(Serialize)]
struct TopKRequest<'a> {
    model: ModelId,
    sentences: &'a [MaskedSentence],
    k: usize,
}

#[derive(Deserialize)]
struct TopKResponse {
    predictions: Vec<Vec<String>>,
}

#[derive(Serialize)]
struct CandidateProbsRequest<'a> {
    model: ModelId,
    sentences: &'a [MaskedSentence],
    candidates: &'a [Vec<String>],
}

#[derive(Deserialize)]
struct CandidateProbsResponse {
    probabilities: Vec<Vec<f64>>,
}

impl HttpOracle {
    pub fn new(endpoint: &str, model: ModelId, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
        })
    }

    async fn post<B, R>(&self, route: &str, body: &B) -> lexaxis_contexts::Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{route}", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| ContextError::oracle(format!("POST {url}: {err}")))?;
        response
            .json::<R>()
            .await
            .map_err(|err| ContextError::oracle(format!("Invalid response from {url}: {err}")))
    }
}

#[async_trait]
impl MaskedLmOracle for HttpOracle {
    fn model(&self) -> ModelId {
        self.model
    }

    async fn subword_counts(&self, words: &[String]) -> lexaxis_contexts::Result<Vec<usize>> {
        let body = SubwordsRequest {
            model: self.model,
            words,
        };
        let response: SubwordsResponse = self.post("subwords", &body).await?;
        Ok(response.counts)
    }

    async fn top_k(
        &self,
        batch: &[MaskedSentence],
        k: usize,
    ) -> lexaxis_contexts::Result<Vec<Vec<String>>> {
        let body = TopKRequest {
            model: self.model,
            sentences: batch,
            k,
        };
        let response: TopKResponse = self.post("top_k", &body).await?;
        Ok(response.predictions)
    }

    async fn candidate_probs(
        &self,
        batch: &[MaskedSentence],
        candidates: &[Vec<String>],
    ) -> lexaxis_contexts::Result<Vec<Vec<f64>>> {
        let body = CandidateProbsRequest {
            model: self.model,
            sentences: batch,
            candidates,
        };
        let response: CandidateProbsResponse = self.post("candidate_probs", &body).await?;
        Ok(response.probabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_bodies_carry_model_and_sentences() {
        let sentences = vec![MaskedSentence {
            tokens: vec!["he".to_string(), "[MASK]".to_string()],
            mask_index: 1,
        }];
        let body = TopKRequest {
            model: ModelId::BertBaseUncased,
            sentences: &sentences,
            k: 20,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "bert-base-uncased");
        assert_eq!(json["k"], 20);
        assert_eq!(json["sentences"][0]["mask_index"], 1);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_oracle_error() {
        let oracle = HttpOracle::new(
            "http://127.0.0.1:9/",
            ModelId::RobertaBase,
            Duration::from_millis(200),
        )
        .unwrap();
        assert_eq!(oracle.endpoint, "http://127.0.0.1:9");
        let err = oracle
            .subword_counts(&["strong".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::OracleError(_)));
    }
}
