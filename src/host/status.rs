use tracing::warn;

use super::Host;
use crate::{
    collaborators::{FileStore, Node, PeerDirectory, ProofBuilder},
    types::{BLOCKS_PER_MONTH, BYTES_PER_GB, Currency, HostStatus, PriceQuote},
};

/// Quotes requested from the peer directory for the competition estimate.
pub const COMPETITION_SAMPLE: usize = 15;
/// Cheapest quotes skipped before averaging.
const COMPETITION_SKIP: usize = 8;

/// Average price per GB per month among the quotes ranked 9th to 15th by
/// price. `None` unless at least one such quote exists.
pub fn competition_estimate(mut quotes: Vec<PriceQuote>) -> Option<Currency> {
    quotes.sort_by_key(|q| q.price);
    let ranked = quotes.get(COMPETITION_SKIP..COMPETITION_SAMPLE.min(quotes.len()))?;
    if ranked.is_empty() {
        return None;
    }
    let average = ranked
        .iter()
        .map(|q| q.price)
        .sum::<Currency>()
        .div(ranked.len() as u128);
    Some(average.saturating_mul(BLOCKS_PER_MONTH * BYTES_PER_GB))
}

impl<N: Node, F: FileStore, P: ProofBuilder> Host<N, F, P> {
    pub async fn status_snapshot(&self) -> HostStatus {
        // the peer directory is a network call; keep it outside the lock
        let competition = match PeerDirectory::sample(&self.inner.node, COMPETITION_SAMPLE).await
        {
            Ok(quotes) => competition_estimate(quotes),
            Err(e) => {
                warn!("Failed to sample peer prices: {:#}", e);
                None
            }
        };

        let state = self.inner.state.read().await;
        HostStatus {
            block_height: state.block_height,
            storage_remaining: state.ledger.space_remaining(),
            num_contracts: state.store.len(),
            profit: state.ledger.profit(),
            potential_profit: state
                .store
                .iter()
                .map(|r| r.contract.payout.post_tax())
                .sum(),
            competition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quotes(prices: impl IntoIterator<Item = u128>) -> Vec<PriceQuote> {
        prices
            .into_iter()
            .enumerate()
            .map(|(i, p)| PriceQuote {
                net_address: format!("host{}:9982", i),
                price: Currency::new(p),
            })
            .collect()
    }

    #[test]
    fn test_too_few_quotes() {
        assert_eq!(competition_estimate(vec![]), None);
        assert_eq!(competition_estimate(quotes(1..=7)), None);
        assert_eq!(competition_estimate(quotes(1..=8)), None);
    }

    #[test]
    fn test_averages_upper_ranks() {
        // shuffled 1..=15; ranks 9..=15 are 9..=15, average 12
        let estimate = competition_estimate(quotes([
            15, 3, 9, 1, 12, 7, 14, 2, 10, 5, 13, 8, 4, 11, 6,
        ]));
        assert_eq!(
            estimate,
            Some(Currency::new(12 * BLOCKS_PER_MONTH * BYTES_PER_GB))
        );
    }

    #[test]
    fn test_partial_upper_ranks() {
        let estimate = competition_estimate(quotes(1..=10));
        // ranks 9 and 10
        assert_eq!(
            estimate,
            Some(Currency::new(9 * BLOCKS_PER_MONTH * BYTES_PER_GB))
        );
    }
}
