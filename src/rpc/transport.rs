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


use serde::Deserialize;
use serde_json::{json, value::RawValue, Value};
use url::Url;

use crate::prelude::*;

/// Bodies quoted in errors are cut to this many bytes so a multi-megabyte
/// batch response cannot flood the logs.
const MAX_ERROR_BODY: usize = 512;

const ELEMENT_MARKER: &str = "{\"jsonrpc\"";

#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub method: &'static str,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: &'static str, params: Value) -> Self {
        Self { method, params }
    }
}

/// One element of a split batch response, raw JSON text plus its id. An
/// element may itself be a JSON array when the node returned several results
/// under one id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResponse {
    pub id: i64,
    pub body: String,
}

#[derive(Deserialize)]
struct IdProbe {
    id: i64,
}

#[derive(Deserialize)]
struct ResultProbe {
    result: Option<Box<RawValue>>,
}

impl RpcResponse {
    /// The element's `result` field as raw JSON, `None` when absent or null.
    pub fn raw_result(&self) -> Result<Option<String>> {
        let probe: ResultProbe = serde_json::from_str(&self.body)
            .wrap_err_with(|| format!("malformed rpc element: {}", truncated(&self.body)))?;
        Ok(probe
            .result
            .filter(|raw| raw.get() != "null")
            .map(|raw| raw.get().to_owned()))
    }

    pub fn parse_result<T: serde::de::DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.raw_result()? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).wrap_err_with(|| {
                format!("unexpected rpc result shape: {}", truncated(&raw))
            })?)),
            None => Ok(None),
        }
    }
}

fn truncated(body: &str) -> &str {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Serialize a request list with sequential ids. A single request is sent
/// bare, without the array wrapper, because some nodes report "payload too
/// large" even for one-element arrays.
pub fn build_batch(requests: &[RpcRequest]) -> Result<String> {
    ensure!(!requests.is_empty(), "empty rpc batch");
    let elements: Vec<Value> = requests
        .iter()
        .enumerate()
        .map(|(id, req)| {
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": req.method,
                "params": req.params,
            })
        })
        .collect();
    let body = if elements.len() == 1 {
        serde_json::to_string(&elements[0])?
    } else {
        serde_json::to_string(&elements)?
    };
    Ok(body)
}

/// Split a batch response on `{"jsonrpc"` boundaries rather than parsing the
/// whole body, so one malformed element cannot poison its siblings. Ids must
/// be non-negative and non-decreasing; consecutive elements under one id are
/// merged into a JSON array.
pub fn split_batch(body: &str, expected: usize) -> Result<Vec<RpcResponse>> {
    let elements = split_elements(body);
    ensure!(
        !elements.is_empty(),
        "no rpc elements in response: {}",
        truncated(body)
    );

    let mut grouped: Vec<(i64, Vec<&str>)> = Vec::with_capacity(expected);
    for element in elements {
        let probe: IdProbe = serde_json::from_str(element)
            .wrap_err_with(|| format!("rpc element missing id: {}", truncated(element)))?;
        ensure!(
            probe.id >= 0,
            "negative rpc id {} in response: {}",
            probe.id,
            truncated(element)
        );
        match grouped.last_mut() {
            Some((id, parts)) if *id == probe.id => parts.push(element),
            Some((id, _)) if *id > probe.id => {
                bail!("rpc ids out of order: {} after {}", probe.id, id)
            }
            _ => grouped.push((probe.id, vec![element])),
        }
    }

    ensure!(
        grouped.len() == expected,
        "rpc batch returned {} responses, expected {}",
        grouped.len(),
        expected
    );

    Ok(grouped
        .into_iter()
        .map(|(id, parts)| RpcResponse {
            id,
            body: if parts.len() == 1 {
                parts[0].to_owned()
            } else {
                format!("[{}]", parts.join(","))
            },
        })
        .collect())
}

fn split_elements(body: &str) -> Vec<&str> {
    let mut starts = Vec::new();
    let mut at = 0;
    while let Some(pos) = body[at..].find(ELEMENT_MARKER) {
        starts.push(at + pos);
        at += pos + ELEMENT_MARKER.len();
    }
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(body.len());
            body[start..end]
                .trim_end_matches(|c: char| c.is_whitespace() || c == ',' || c == ']')
        })
        .collect()
}

/// HTTP JSON-RPC client. Cheap to clone, shares one connection pool.
#[derive(Clone)]
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: Url,
}

impl JsonRpcClient {
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::ClientBuilder::new().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    /// Send a batch and split the response. Returned elements are ordered by
    /// id, matching the request order.
    pub async fn batch(&self, requests: &[RpcRequest]) -> Result<Vec<RpcResponse>> {
        let body = build_batch(requests)?;
        let resp = self
            .client
            .post(self.url.clone())
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .wrap_err("rpc request failed")?;
        let status = resp.status();
        let text = resp.text().await.wrap_err("reading rpc response body")?;
        ensure!(
            status.as_u16() == 200,
            "rpc returned status {status}: {}",
            truncated(&text)
        );
        if text.contains("\"error\":{\"code\"") {
            bail!("rpc error in response: {}", truncated(&text));
        }
        split_batch(&text, requests.len())
    }

    pub async fn call(&self, method: &'static str, params: Value) -> Result<RpcResponse> {
        let mut responses = self.batch(&[RpcRequest::new(method, params)]).await?;
        responses
            .pop()
            .ok_or_else(|| eyre!("empty rpc response for {method}"))
    }
}
