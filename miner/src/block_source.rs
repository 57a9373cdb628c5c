use std::{sync::Arc, time::Duration};

use futures_util::{future::BoxFuture, FutureExt};
use primitive_types::U256;
use tokio::time::{sleep_until, Instant};
use tracing::*;

use shared::{
    errors::{LedgerError, LedgerResult},
    interaction::LedgerClient,
    types::{Round, MAX_DIFFICULTY},
};

use crate::sink::Sink;

/// Wait before asking again when the ledger answers with an older round.
pub const STALE_RETRY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    NewRound(Round),
    RoundUpdated(Round),
    /// Terminal; the source does not retry on its own.
    Error(LedgerError),
}

/// Tracks the ledger's current round.
///
/// Fetches are coalesced: at most one is in flight, and refresh requests that
/// arrive meanwhile only raise the floor. The floor is the lowest round id
/// the source accepts; anything older is treated as a lagging replica.
pub struct BlockSource {
    ledger: Arc<dyn LedgerClient>,
    sink: Sink<SourceEvent>,
    round: Option<Round>,
    floor: U256,
    in_flight: Option<BoxFuture<'static, LedgerResult<Round>>>,
    retry_at: Option<Instant>,
}

impl BlockSource {
    pub fn new(ledger: Arc<dyn LedgerClient>, sink: Sink<SourceEvent>) -> Self {
        Self {
            ledger,
            sink,
            round: None,
            floor: U256::zero(),
            in_flight: None,
            retry_at: None,
        }
    }

    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    pub fn floor(&self) -> U256 {
        self.floor
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_at.is_some()
    }

    pub fn request_refresh(&mut self, min_round_id: U256) {
        if min_round_id > self.floor {
            self.floor = min_round_id;
        }
        self.retry_at = None;
        self.fetch();
    }

    fn fetch(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let ledger = self.ledger.clone();
        self.in_flight = Some(async move { ledger.current_round().await }.boxed());
    }

    /// Drives the pending fetch or stale retry. Pending forever when idle.
    /// Cancel safe.
    pub async fn tick(&mut self) {
        if let Some(fetch) = self.in_flight.as_mut() {
            let fetched = fetch.await;
            self.in_flight = None;
            self.on_fetched(fetched);
            return;
        }
        if let Some(at) = self.retry_at {
            sleep_until(at).await;
            self.retry_at = None;
            debug!("retrying stale round fetch");
            self.fetch();
            return;
        }
        std::future::pending::<()>().await
    }

    fn on_fetched(&mut self, fetched: LedgerResult<Round>) {
        let round = match fetched {
            Ok(round) => round,
            Err(err) => {
                error!("round fetch failed: {err}");
                self.sink.emit(SourceEvent::Error(err));
                return;
            }
        };

        if let Err(err) = self.check(&round) {
            error!("{err}");
            self.sink.emit(SourceEvent::Error(err));
            return;
        }

        let Some(current) = self.round.as_ref() else {
            debug!("first round {}", round.id);
            self.floor = round.id;
            self.round = Some(round.clone());
            self.sink.emit(SourceEvent::NewRound(round));
            return;
        };

        if round.id < self.floor {
            warn!("ledger returned round {} below floor {}, retry in {:?}", round.id, self.floor, STALE_RETRY);
            self.retry_at = Some(Instant::now() + STALE_RETRY);
            return;
        }
        self.floor = round.id;

        if round.id > current.id {
            debug!("new round {}", round.id);
            self.round = Some(round.clone());
            self.sink.emit(SourceEvent::NewRound(round));
        } else {
            trace!("round {} updated", round.id);
            self.round = Some(round.clone());
            self.sink.emit(SourceEvent::RoundUpdated(round));
        }
    }

    fn check(&self, round: &Round) -> Result<(), LedgerError> {
        if round.difficulty == 0 || round.difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::Malformed(format!(
                "round {} difficulty {} outside 1..={MAX_DIFFICULTY}",
                round.id, round.difficulty
            )));
        }
        if let Some(current) = &self.round {
            if current.id == round.id && round.difficulty < current.difficulty {
                return Err(LedgerError::Malformed(format!(
                    "round {} difficulty went down {} -> {}",
                    round.id, current.difficulty, round.difficulty
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};

    use super::*;
    use crate::mock::{round, MockLedger};

    fn source(ledger: &Arc<MockLedger>) -> (BlockSource, UnboundedReceiver<SourceEvent>) {
        let (sink, rx) = Sink::channel();
        (BlockSource::new(ledger.clone(), sink), rx)
    }

    #[tokio::test]
    async fn first_round_is_new_and_sets_the_floor() {
        let ledger = Arc::new(MockLedger::default());
        ledger.push_round(Ok(round(50, 8)));
        let (mut source, mut rx) = source(&ledger);

        source.request_refresh(U256::zero());
        source.tick().await;
        assert_eq!(rx.try_recv().unwrap(), SourceEvent::NewRound(round(50, 8)));
        assert_eq!(source.floor(), U256::from(50));
    }

    #[tokio::test]
    async fn refreshes_coalesce_into_one_fetch() {
        let ledger = Arc::new(MockLedger::default());
        ledger.push_round(Ok(round(50, 8)));
        let (mut source, mut rx) = source(&ledger);

        source.request_refresh(U256::zero());
        source.request_refresh(U256::zero());
        source.request_refresh(U256::zero());
        source.tick().await;
        assert_eq!(ledger.round_fetches(), 1);
        assert!(matches!(rx.try_recv(), Ok(SourceEvent::NewRound(_))));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn same_id_is_an_update() {
        let ledger = Arc::new(MockLedger::default());
        ledger.push_round(Ok(round(50, 8)));
        let mut updated = round(50, 8);
        updated.winner_count = 3;
        ledger.push_round(Ok(updated.clone()));
        let (mut source, mut rx) = source(&ledger);

        source.request_refresh(U256::zero());
        source.tick().await;
        source.request_refresh(U256::zero());
        source.tick().await;
        assert!(matches!(rx.try_recv(), Ok(SourceEvent::NewRound(_))));
        assert_eq!(rx.try_recv().unwrap(), SourceEvent::RoundUpdated(updated));
    }

    #[tokio::test(start_paused = true)]
    async fn older_round_is_ignored_and_retried() {
        let ledger = Arc::new(MockLedger::default());
        ledger.push_round(Ok(round(50, 8)));
        ledger.push_round(Ok(round(49, 8)));
        let (mut source, mut rx) = source(&ledger);

        source.request_refresh(U256::zero());
        source.tick().await;
        assert!(matches!(rx.try_recv(), Ok(SourceEvent::NewRound(_))));

        source.request_refresh(U256::zero());
        source.tick().await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(source.round().map(|r| r.id), Some(U256::from(50)));
        assert!(source.retry_pending());

        // the retry fires after the backoff and fetches again
        ledger.set_round(Ok(round(51, 8)));
        let before = Instant::now();
        source.tick().await;
        assert!(Instant::now() - before >= STALE_RETRY);
        assert!(source.is_fetching());
        source.tick().await;
        assert_eq!(rx.try_recv().unwrap(), SourceEvent::NewRound(round(51, 8)));
    }

    #[tokio::test(start_paused = true)]
    async fn raised_floor_waits_for_the_next_round() {
        let ledger = Arc::new(MockLedger::default());
        ledger.push_round(Ok(round(50, 8)));
        let (mut source, mut rx) = source(&ledger);
        source.request_refresh(U256::zero());
        source.tick().await;
        let _ = rx.try_recv();

        // ledger still on 50 while we ask for 51
        source.request_refresh(U256::from(51));
        source.tick().await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(source.retry_pending());

        // a fresh request cancels the backoff
        source.request_refresh(U256::zero());
        assert!(!source.retry_pending());
        assert!(source.is_fetching());
    }

    #[tokio::test]
    async fn transport_failure_is_surfaced() {
        let ledger = Arc::new(MockLedger::default());
        ledger.push_round(Err(LedgerError::Transport("dns".into())));
        let (mut source, mut rx) = source(&ledger);

        source.request_refresh(U256::zero());
        source.tick().await;
        assert_eq!(rx.try_recv().unwrap(), SourceEvent::Error(LedgerError::Transport("dns".into())));
        assert!(!source.retry_pending());
    }

    #[tokio::test]
    async fn malformed_rounds_are_fatal() {
        let ledger = Arc::new(MockLedger::default());
        ledger.push_round(Ok(round(50, 0)));
        let (mut source, mut rx) = source(&ledger);
        source.request_refresh(U256::zero());
        source.tick().await;
        assert!(matches!(rx.try_recv(), Ok(SourceEvent::Error(LedgerError::Malformed(_)))));

        let ledger = Arc::new(MockLedger::default());
        ledger.push_round(Ok(round(50, 9)));
        ledger.push_round(Ok(round(50, 8)));
        let (mut source, mut rx) = self::source(&ledger);
        source.request_refresh(U256::zero());
        source.tick().await;
        source.request_refresh(U256::zero());
        source.tick().await;
        assert!(matches!(rx.try_recv(), Ok(SourceEvent::NewRound(_))));
        assert!(matches!(rx.try_recv(), Ok(SourceEvent::Error(LedgerError::Malformed(_)))));
    }
}
