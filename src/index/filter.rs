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


use super::{
    keys::{self, NONE_SEGMENT},
    InteractionKind,
};
use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    fn segment(&self) -> &'static str {
        match self {
            Direction::Sent => "s",
            Direction::Received => "r",
        }
    }
}

/// Dimension selectors composing into one pointer-row scan prefix. Builder
/// methods are order-independent and validate on the spot, so an impossible
/// combination fails before any storage I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    source: InteractionKind,
    method: Option<String>,
    asset: Option<String>,
    counterparty: Option<Address>,
    direction: Option<Direction>,
    time: Option<(u64, u64)>,
}

impl Filter {
    pub fn transactions() -> Self {
        Self::bare(InteractionKind::Tx)
    }

    pub fn transfers() -> Self {
        Self::bare(InteractionKind::Transfer)
    }

    fn bare(source: InteractionKind) -> Self {
        Self {
            source,
            method: None,
            asset: None,
            counterparty: None,
            direction: None,
            time: None,
        }
    }

    pub fn source(&self) -> InteractionKind {
        self.source
    }

    pub fn by_method(mut self, method: impl Into<String>) -> Result<Self> {
        ensure!(
            self.source == InteractionKind::Tx,
            "transfers cannot be filtered by method"
        );
        self.method = Some(method.into());
        Ok(self)
    }

    pub fn by_asset(mut self, asset: impl Into<String>) -> Result<Self> {
        ensure!(
            self.source == InteractionKind::Transfer,
            "transactions cannot be filtered by asset"
        );
        self.asset = Some(asset.into());
        Ok(self)
    }

    pub fn with_counterparty(mut self, address: Address) -> Result<Self> {
        self.counterparty = Some(address);
        Ok(self)
    }

    pub fn only_sent(self) -> Result<Self> {
        self.directed(Direction::Sent)
    }

    pub fn only_received(self) -> Result<Self> {
        self.directed(Direction::Received)
    }

    fn directed(mut self, direction: Direction) -> Result<Self> {
        ensure!(
            self.source != InteractionKind::Transfer || self.time.is_none(),
            "sent/received cannot combine with a time range over transfers"
        );
        self.direction = Some(direction);
        Ok(self)
    }

    pub fn time_range(mut self, from: u64, to: u64) -> Result<Self> {
        ensure!(from <= to, "invalid time range: {from} > {to}");
        ensure!(to <= keys::MAX_TIME, "time {to} beyond representable range");
        ensure!(
            self.source != InteractionKind::Transfer || self.direction.is_none(),
            "sent/received cannot combine with a time range over transfers"
        );
        self.time = Some((from, to));
        Ok(self)
    }

    pub(crate) fn scan_prefix(&self, chain_id: u64, address: &Address) -> String {
        let counterparty = match &self.counterparty {
            Some(addr) => keys::addr_segment(addr),
            None => NONE_SEGMENT.to_owned(),
        };
        let dimension = self
            .method
            .as_deref()
            .or(self.asset.as_deref())
            .unwrap_or(NONE_SEGMENT);
        keys::pointer_prefix(
            chain_id,
            address,
            self.source,
            self.direction.map(|d| d.segment()).unwrap_or("a"),
            &counterparty,
            dimension,
        )
    }

    /// Inclusive scan bounds over the prefix, narrowed by the time range.
    /// A time range [from, to] maps to reverse-time [MAX−to, MAX−from].
    pub(crate) fn scan_bounds(&self, chain_id: u64, address: &Address) -> (String, String) {
        let prefix = self.scan_prefix(chain_id, address);
        match self.time {
            Some((from, to)) => (
                format!("{prefix}{}", keys::reverse_time(to)),
                format!("{prefix}{}\u{7f}", keys::reverse_time(from)),
            ),
            None => {
                let end = format!("{prefix}\u{7f}");
                (prefix, end)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Address {
        Address::repeat_byte(0xaa)
    }

    #[test]
    fn builder_order_does_not_change_the_prefix() {
        let a = Filter::transfers()
            .by_asset("usdc")
            .unwrap()
            .only_sent()
            .unwrap();
        let b = Filter::transfers()
            .only_sent()
            .unwrap()
            .by_asset("usdc")
            .unwrap();
        assert_eq!(a.scan_prefix(1, &alice()), b.scan_prefix(1, &alice()));

        let c = Filter::transactions()
            .by_method("approve")
            .unwrap()
            .only_received()
            .unwrap();
        let d = Filter::transactions()
            .only_received()
            .unwrap()
            .by_method("approve")
            .unwrap();
        assert_eq!(c.scan_prefix(1, &alice()), d.scan_prefix(1, &alice()));
    }

    #[test]
    fn cross_source_dimensions_fail_before_io() {
        assert!(Filter::transactions().by_asset("usdc").is_err());
        assert!(Filter::transfers().by_method("approve").is_err());
    }

    #[test]
    fn transfer_direction_and_time_exclude_each_other() {
        assert!(Filter::transfers()
            .only_sent()
            .unwrap()
            .time_range(0, 10)
            .is_err());
        assert!(Filter::transfers()
            .time_range(0, 10)
            .unwrap()
            .only_received()
            .is_err());
        // the same combination is fine over transactions
        assert!(Filter::transactions()
            .only_sent()
            .unwrap()
            .time_range(0, 10)
            .is_ok());
        // asset + direction is a dedicated index, also fine
        assert!(Filter::transfers()
            .by_asset("usdc")
            .unwrap()
            .only_sent()
            .is_ok());
    }

    #[test]
    fn time_bounds_invert_into_reverse_time() {
        let filter = Filter::transactions().time_range(10, 20).unwrap();
        let (start, end) = filter.scan_bounds(1, &alice());
        let prefix = filter.scan_prefix(1, &alice());
        assert_eq!(start, format!("{prefix}{}", keys::reverse_time(20)));
        assert!(end.starts_with(&format!("{prefix}{}", keys::reverse_time(10))));
        assert!(start < end);
    }
}
