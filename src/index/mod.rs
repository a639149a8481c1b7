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


pub mod filter;
pub mod keys;
pub mod query;

use serde::{Deserialize, Serialize};

use crate::prelude::*;

pub use filter::{Direction, Filter};
pub use query::{InteractionIndex, InteractionQuery, QueryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Tx,
    Transfer,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Tx => "tx",
            InteractionKind::Transfer => "tf",
        }
    }
}

/// One address-to-address event, either a transaction or a token transfer
/// inside one. Immutable once written; content-addressed by
/// (kind, chain, hash[, logIndex]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub kind: InteractionKind,
    pub chain_id: u64,
    pub hash: B256,
    /// Set for transfers only; several transfers share one tx hash.
    pub log_index: Option<u64>,
    /// Decoded method selector/name, transactions only.
    pub method: Option<String>,
    /// Token identifier, transfers only.
    pub asset: Option<String>,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub time: u64,
}

impl Interaction {
    /// The filterable secondary dimension: method for txs, asset for
    /// transfers.
    pub fn dimension(&self) -> Option<String> {
        match self.kind {
            InteractionKind::Tx => self.method.clone(),
            InteractionKind::Transfer => self.asset.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.time <= keys::MAX_TIME,
            "interaction time {} beyond representable range",
            self.time
        );
        match self.kind {
            InteractionKind::Tx => {
                ensure!(self.log_index.is_none(), "tx cannot carry a log index");
                ensure!(self.asset.is_none(), "tx cannot carry an asset");
            }
            InteractionKind::Transfer => {
                ensure!(
                    self.log_index.is_some(),
                    "transfer {} missing its log index",
                    self.hash
                );
                ensure!(self.method.is_none(), "transfer cannot carry a method");
            }
        }
        Ok(())
    }
}
