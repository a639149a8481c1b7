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


use super::{Interaction, InteractionKind};
use crate::prelude::*;

/// Upper bound on interaction timestamps; keys store `MAX_TIME - time` so
/// ascending key order is newest-first, like the raw store's block keys.
pub const MAX_TIME: u64 = 9_999_999_999;

const CANONICAL_PREFIX: &str = "i";
const POINTER_PREFIX: &str = "x";
/// Placeholder for an unset counterparty/dimension segment.
pub const NONE_SEGMENT: &str = "-";

pub fn reverse_time(time: u64) -> String {
    format!("{:010}", MAX_TIME - time)
}

pub fn time_from_suffix(suffix: &str) -> Result<u64> {
    let reversed: u64 = suffix
        .get(..10)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| eyre!("malformed pointer key suffix: {suffix}"))?;
    Ok(MAX_TIME - reversed)
}

/// Key suffix for a transfer's log index. Index 0 deliberately emits nothing,
/// so the first transfer of a tx shares its bare time suffix; downstream code
/// relies on that layout (see `log_index_zero_keeps_legacy_layout`).
pub fn pad_log_index(index: u64) -> String {
    if index == 0 {
        String::new()
    } else {
        format!("-{index:05}")
    }
}

pub fn addr_segment(address: &Address) -> String {
    hex::encode(address.as_slice())
}

/// `i:{kind}:{chain}:{hash}[:{log_index}]`, the one row holding the record.
pub fn canonical_key(interaction: &Interaction) -> String {
    let mut key = format!(
        "{}:{}:{}:{}",
        CANONICAL_PREFIX,
        interaction.kind.as_str(),
        interaction.chain_id,
        hex::encode(interaction.hash)
    );
    if let Some(index) = interaction.log_index {
        key.push_str(&format!(":{index}"));
    }
    key
}

pub fn pointer_prefix(
    chain_id: u64,
    address: &Address,
    kind: InteractionKind,
    direction: &str,
    counterparty: &str,
    dimension: &str,
) -> String {
    format!(
        "{}:{}:{}:{}:{}:{}:{}:",
        POINTER_PREFIX,
        chain_id,
        addr_segment(address),
        kind.as_str(),
        direction,
        counterparty,
        dimension
    )
}

/// The full enumerable set of pointer rows for one interaction: for each of
/// the two parties, {all, sent|received} x {with counterparty?} x
/// {method|asset?}, all ending in the reverse-time suffix. 16 rows when the
/// dimension is set, fewer for self-sends (duplicates collapse).
pub fn pointer_keys(interaction: &Interaction) -> Vec<String> {
    let suffix = match interaction.log_index {
        Some(index) => format!("{}{}", reverse_time(interaction.time), pad_log_index(index)),
        None => reverse_time(interaction.time),
    };
    let dimension = interaction.dimension();

    let mut keys = std::collections::BTreeSet::new();
    let parties = [
        (&interaction.from, "s", &interaction.to),
        (&interaction.to, "r", &interaction.from),
    ];
    for (owner, directed, counterparty) in parties {
        for direction in ["a", directed] {
            for cp in [NONE_SEGMENT.to_owned(), addr_segment(counterparty)] {
                for dim in [Some(NONE_SEGMENT), dimension.as_deref()] {
                    let Some(dim) = dim else { continue };
                    let prefix = pointer_prefix(
                        interaction.chain_id,
                        owner,
                        interaction.kind,
                        direction,
                        &cp,
                        dim,
                    );
                    keys.insert(format!("{prefix}{suffix}"));
                }
            }
        }
    }
    keys.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_hash;

    fn tx(from: Address, to: Address, time: u64) -> Interaction {
        Interaction {
            kind: InteractionKind::Tx,
            chain_id: 1,
            hash: test_hash(1),
            log_index: None,
            method: Some("transfer".to_owned()),
            asset: None,
            from,
            to,
            value: U256::from(10),
            time,
        }
    }

    #[test]
    fn newer_interactions_sort_first() {
        assert!(reverse_time(100) > reverse_time(101));
        assert_eq!(time_from_suffix(&reverse_time(1234)).unwrap(), 1234);
    }

    #[test]
    fn log_index_zero_keeps_legacy_layout() {
        // index 0 has always emitted an empty suffix; rows written under the
        // old layout must stay addressable
        assert_eq!(pad_log_index(0), "");
        assert_eq!(pad_log_index(1), "-00001");
        assert_eq!(pad_log_index(42), "-00042");

        // consequence: index 0 sorts before every sibling at the same time
        let zero = format!("{}{}", reverse_time(5), pad_log_index(0));
        let one = format!("{}{}", reverse_time(5), pad_log_index(1));
        assert!(zero < one);
    }

    #[test]
    fn full_cross_product_is_sixteen_rows() {
        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0xbb);
        assert_eq!(pointer_keys(&tx(a, b, 7)).len(), 16);

        // without a method there is no dimension axis
        let mut plain = tx(a, b, 7);
        plain.method = None;
        assert_eq!(pointer_keys(&plain).len(), 8);

        // self-send collapses the owner axis
        assert_eq!(pointer_keys(&tx(a, a, 7)).len(), 12);
    }
}
