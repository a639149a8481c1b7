// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.


use serde_json::json;
use url::Url;

use crate::prelude::*;

/// Outbound webhook for conditions an operator must see (stalled head,
/// aborted export, fatal invariant). Delivery is best-effort: a failed POST
/// is logged, never propagated, so alerting can't take down the exporter.
#[derive(Clone)]
pub struct Alert {
    client: reqwest::Client,
    webhook: Option<Url>,
}

impl Alert {
    pub fn new(webhook: Option<Url>) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, webhook })
    }

    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook: None,
        }
    }

    pub async fn send(&self, subject: &str, body: &str) {
        let Some(webhook) = &self.webhook else {
            debug!(subject, body, "alert webhook not configured, skipping");
            return;
        };
        let payload = json!({"text": format!("{subject}: {body}")});
        match self.client.post(webhook.clone()).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(subject, status = %resp.status(), "alert webhook rejected"),
            Err(err) => warn!(subject, %err, "alert webhook unreachable"),
        }
    }
}
