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


use super::{keys, Filter, Interaction, InteractionKind};
use crate::prelude::*;

/// One lookup: the cross product of chains and addresses, a shared result
/// limit, optional per-source filters, and per-(chain, address, source)
/// resume cursors from an earlier page. Cursors are source-scoped because
/// the two sources use different key suffix shapes; a single shared cursor
/// would let a returned transfer skip an unread transaction at the same
/// timestamp.
#[derive(Debug, Clone)]
pub struct InteractionQuery {
    pub chain_ids: Vec<u64>,
    pub addresses: Vec<Address>,
    pub limit: usize,
    /// Empty means both sources, unfiltered.
    pub filters: Vec<Filter>,
    pub cursors: HashMap<(u64, Address, InteractionKind), String>,
}

impl InteractionQuery {
    pub fn new(chain_ids: Vec<u64>, addresses: Vec<Address>, limit: usize) -> Self {
        Self {
            chain_ids,
            addresses,
            limit,
            filters: Vec::new(),
            cursors: HashMap::new(),
        }
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn scrolled(mut self, cursors: HashMap<(u64, Address, InteractionKind), String>) -> Self {
        self.cursors = cursors;
        self
    }
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Time-descending, truncated to the query limit.
    pub interactions: Vec<Interaction>,
    /// Feed back via [`InteractionQuery::scrolled`] for the next page.
    pub cursors: HashMap<(u64, Address, InteractionKind), String>,
}

struct Hit {
    chain_id: u64,
    address: Address,
    source: InteractionKind,
    time: u64,
    suffix: String,
    key: String,
    canonical: String,
}

/// Write-amplified secondary index: every interaction is stored once
/// canonically and pointed at by its enumerated pointer rows, so any
/// supported filter combination resolves to a single prefix scan.
#[derive(Clone)]
pub struct InteractionIndex<Store = KVStoreErased> {
    pub store: Store,
}

impl<Store: KVStore> InteractionIndex<Store> {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn put(&self, interactions: &[Interaction]) -> Result<()> {
        let mut rows = Vec::with_capacity(interactions.len() * 17);
        for interaction in interactions {
            interaction.validate()?;
            let canonical = keys::canonical_key(interaction);
            let record = serde_json::to_vec(interaction)?;
            for pointer in keys::pointer_keys(interaction) {
                rows.push((pointer, canonical.clone().into_bytes()));
            }
            rows.push((canonical, record));
        }
        self.store.bulk_put(rows).await
    }

    /// Scan one prefix per (chain x address x filter), merge, sort by time
    /// descending with the key string as tie-break, truncate to the limit,
    /// and hand back advanced cursors for every page that produced results.
    pub async fn get(&self, query: &InteractionQuery) -> Result<QueryResult> {
        ensure!(query.limit > 0, "query limit must be positive");
        ensure!(!query.chain_ids.is_empty(), "query needs at least one chain");
        ensure!(!query.addresses.is_empty(), "query needs at least one address");

        let default_filters = [Filter::transactions(), Filter::transfers()];
        let filters: &[Filter] = if query.filters.is_empty() {
            &default_filters
        } else {
            &query.filters
        };

        let mut hits = Vec::new();
        for &chain_id in &query.chain_ids {
            for &address in &query.addresses {
                for filter in filters {
                    let prefix = filter.scan_prefix(chain_id, &address);
                    let (mut start, end) = filter.scan_bounds(chain_id, &address);
                    if let Some(cursor) = query.cursors.get(&(chain_id, address, filter.source())) {
                        // resume strictly after the last returned row
                        let resume = format!("{prefix}{cursor}\0");
                        if resume > end {
                            // the cursor already passed this scan's window
                            continue;
                        }
                        if resume > start {
                            start = resume;
                        }
                    }
                    for (key, value) in
                        self.store.scan_range(&start, &end, query.limit).await?
                    {
                        let suffix = key
                            .strip_prefix(&prefix)
                            .ok_or_else(|| eyre!("scan escaped prefix: {key}"))?
                            .to_owned();
                        hits.push(Hit {
                            chain_id,
                            address,
                            source: filter.source(),
                            time: keys::time_from_suffix(&suffix)?,
                            suffix,
                            key,
                            canonical: String::from_utf8(value.to_vec())
                                .wrap_err("non-utf8 pointer value")?,
                        });
                    }
                }
            }
        }

        hits.sort_by(|a, b| b.time.cmp(&a.time).then_with(|| a.key.cmp(&b.key)));
        hits.truncate(query.limit);

        let canonical_keys: Vec<String> = hits.iter().map(|h| h.canonical.clone()).collect();
        let records = self.store.bulk_get(&canonical_keys).await?;

        let mut interactions = Vec::with_capacity(hits.len());
        let mut cursors = query.cursors.clone();
        for hit in hits {
            let bytes = records
                .get(&hit.canonical)
                .ok_or_else(|| eyre!("dangling pointer row {}", hit.key))?;
            interactions.push(serde_json::from_slice(bytes).wrap_err_with(|| {
                format!("corrupt interaction record at {}", hit.canonical)
            })?);
            let entry = cursors
                .entry((hit.chain_id, hit.address, hit.source))
                .or_default();
            if hit.suffix > *entry {
                *entry = hit.suffix;
            }
        }
        Ok(QueryResult {
            interactions,
            cursors,
        })
    }
}
