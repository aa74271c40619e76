use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use rastro_domain::{CellLocator, CellTowerRef, DomainError, DomainResult, Position};

/// Unwired Labs / OpenCellID-style cell geolocation client.
pub struct UnwiredCellLocator {
    http_client: Client,
    endpoint: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct CellResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

impl UnwiredCellLocator {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl CellLocator for UnwiredCellLocator {
    async fn locate(&self, cell: &CellTowerRef) -> DomainResult<Position> {
        let body = json!({
            "token": self.token,
            "radio": "gsm",
            "mcc": cell.mcc,
            "mnc": cell.mnc,
            "cells": [{ "lac": cell.lac, "cid": cell.cid }],
            "address": 0,
        });

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::CellLookup(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DomainError::CellLookup(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: CellResponse = response
            .json()
            .await
            .map_err(|e| DomainError::CellLookup(format!("failed to parse response: {e}")))?;

        if body.status != "ok" {
            return Err(DomainError::CellLookup(
                body.message
                    .unwrap_or_else(|| format!("provider status {}", body.status)),
            ));
        }

        match (body.lat, body.lon) {
            (Some(latitude), Some(longitude)) => Ok(Position::new(latitude, longitude)),
            _ => Err(DomainError::CellLookup(
                "response missing coordinates".to_string(),
            )),
        }
    }
}
