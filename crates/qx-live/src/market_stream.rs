use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use qx_types::market::{MarketEvent, SubscriptionMode, Symbol};

use crate::errors::MarketDataError;

/// Reconnection diagnostics exposed alongside raw tick delivery, grounded in
/// `data/streaming.py` from the original implementation.
#[derive(Debug, Clone, Default)]
pub struct StreamDiagnostics {
    pub connect_count: u64,
    pub disconnect_count: u64,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
}

/// Anything capable of producing a raw tick for a subscribed symbol. Real
/// venue adapters implement this against their websocket/REST client; tests
/// and paper runs use a synthetic source.
pub trait TickSource: Send + Sync {
    fn poll(&self) -> Option<MarketEvent>;
}

struct StreamState {
    connected: bool,
    subscriptions: Vec<(Symbol, SubscriptionMode)>,
    diagnostics: StreamDiagnostics,
}

/// The Market Data Stream (C3): manages subscriptions and reconnection policy
/// around a [`TickSource`], republishing enriched events to subscribers.
pub struct MarketDataStream<S: TickSource> {
    source: S,
    state: Mutex<StreamState>,
    max_reconnect_attempts: u32,
    reconnect_delay: Duration,
    events_received: AtomicU64,
    reconnect_attempt_counter: AtomicU32,
}

impl<S: TickSource> MarketDataStream<S> {
    pub fn new(source: S, max_reconnect_attempts: u32, reconnect_delay: Duration) -> Self {
        Self {
            source,
            state: Mutex::new(StreamState {
                connected: false,
                subscriptions: Vec::new(),
                diagnostics: StreamDiagnostics::default(),
            }),
            max_reconnect_attempts,
            reconnect_delay,
            events_received: AtomicU64::new(0),
            reconnect_attempt_counter: AtomicU32::new(0),
        }
    }

    pub fn connect(&self) -> Result<(), MarketDataError> {
        let mut state = self.state.lock();
        state.connected = true;
        state.diagnostics.connect_count += 1;
        state.diagnostics.last_connected_at = Some(Utc::now());
        self.reconnect_attempt_counter.store(0, Ordering::SeqCst);
        info!("market data stream connected");
        Ok(())
    }

    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.diagnostics.disconnect_count += 1;
        state.diagnostics.last_disconnected_at = Some(Utc::now());
        info!("market data stream disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn subscribe(&self, symbol: Symbol, mode: SubscriptionMode) {
        let mut state = self.state.lock();
        state.subscriptions.push((symbol, mode));
    }

    pub fn unsubscribe(&self, symbol: &Symbol) {
        let mut state = self.state.lock();
        state.subscriptions.retain(|(s, _)| s != symbol);
    }

    pub fn diagnostics(&self) -> StreamDiagnostics {
        self.state.lock().diagnostics.clone()
    }

    /// Attempt to reconnect up to `max_reconnect_attempts` times, sleeping
    /// `reconnect_delay` between attempts. Returns an error once exhausted.
    pub fn reconnect(&self) -> Result<(), MarketDataError> {
        loop {
            let attempt = self.reconnect_attempt_counter.fetch_add(1, Ordering::SeqCst) + 1;
            {
                let mut state = self.state.lock();
                state.diagnostics.reconnect_attempts = attempt;
            }
            if attempt > self.max_reconnect_attempts {
                let err = MarketDataError::ReconnectExhausted {
                    attempts: self.max_reconnect_attempts,
                };
                self.state.lock().diagnostics.last_error = Some(err.to_string());
                error!(attempts = attempt, "market data stream exhausted reconnect attempts");
                return Err(err);
            }
            warn!(attempt, "market data stream reconnecting");
            std::thread::sleep(self.reconnect_delay);
            if self.connect().is_ok() {
                return Ok(());
            }
        }
    }

    /// Poll the underlying source once, returning the next enriched event if
    /// one is available. Callers drive this from their own loop (or the
    /// execution engine's heartbeat worker) so the stream stays cooperative.
    pub fn poll(self: &Arc<Self>) -> Option<MarketEvent> {
        if !self.is_connected() {
            return None;
        }
        let event = self.source.poll();
        if event.is_some() {
            self.events_received.fetch_add(1, Ordering::Relaxed);
        }
        event
    }

    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qx_types::market::{AssetClass, MarketEvent};
    use rust_decimal::Decimal;
    use std::sync::atomic::AtomicBool;

    struct OnceSource {
        fired: AtomicBool,
    }

    impl TickSource for OnceSource {
        fn poll(&self) -> Option<MarketEvent> {
            if self.fired.swap(true, Ordering::SeqCst) {
                None
            } else {
                Some(MarketEvent::Quote {
                    symbol: Symbol::new("AAPL", "NASDAQ", AssetClass::Equity),
                    timestamp: Utc::now(),
                    bid: Decimal::from(100),
                    ask: Decimal::from(101),
                    bid_size: Decimal::from(10),
                    ask_size: Decimal::from(10),
                })
            }
        }
    }

    #[test]
    fn poll_returns_none_when_disconnected() {
        let stream = Arc::new(MarketDataStream::new(
            OnceSource { fired: AtomicBool::new(false) },
            3,
            Duration::from_millis(1),
        ));
        assert!(stream.poll().is_none());
    }

    #[test]
    fn poll_counts_events_once_connected() {
        let stream = Arc::new(MarketDataStream::new(
            OnceSource { fired: AtomicBool::new(false) },
            3,
            Duration::from_millis(1),
        ));
        stream.connect().unwrap();
        assert!(stream.poll().is_some());
        assert_eq!(stream.events_received(), 1);
        assert!(stream.poll().is_none());
    }

    #[test]
    fn reconnect_exhausts_after_max_attempts() {
        struct NeverConnects;
        impl TickSource for NeverConnects {
            fn poll(&self) -> Option<MarketEvent> {
                None
            }
        }
        let stream = MarketDataStream::new(NeverConnects, 0, Duration::from_millis(1));
        let err = stream.reconnect();
        assert!(err.is_err());
    }
}
