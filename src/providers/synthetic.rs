// Synthetic Provider - in-process deterministic price walk
// No network; always reaches Connected immediately. Also the fallback when
// a real provider has no credential configured.

use crate::core::config::SyntheticConfig;
use crate::core::types::{now_millis, ConnectionStatus, Tick};
use crate::providers::session::ProviderSession;
use crate::providers::{
    MarketDataProvider, ProviderError, ProviderKind, StatusCallback, TickCallback,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Small deterministic PRNG so a fixed seed reproduces the exact same walk.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Deterministic geometric walk with configurable drift and noise.
///
/// Besides the base walk, the generator occasionally prints a single tick
/// well below the path without moving the path itself. Those transient dips
/// put wicks on the synthetic candles, which is what lets the pattern
/// detectors fire during offline operation.
pub struct SyntheticWalk {
    rng: XorShift64,
    base: f64,
    drift_per_tick: f64,
    noise_amplitude: f64,
    dip_probability: f64,
    dip_depth: f64,
}

impl SyntheticWalk {
    pub fn new(config: &SyntheticConfig, symbol: &str) -> Self {
        // Fold the symbol into the seed so each symbol gets its own walk
        let seed = symbol
            .bytes()
            .fold(config.seed, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        Self {
            rng: XorShift64::new(seed),
            base: config.start_price,
            drift_per_tick: config.drift_per_tick,
            noise_amplitude: config.noise_amplitude,
            dip_probability: config.dip_probability,
            dip_depth: config.dip_depth,
        }
    }

    pub fn next_tick(&mut self, symbol: &str) -> Tick {
        let noise = (self.rng.next_f64() * 2.0 - 1.0) * self.noise_amplitude;
        self.base *= 1.0 + self.drift_per_tick + noise;
        self.base = self.base.max(0.01);

        let price = if self.rng.next_f64() < self.dip_probability {
            self.base * (1.0 - self.dip_depth)
        } else {
            self.base
        };
        let volume = (100.0 + self.rng.next_f64() * 900.0).round();
        Tick::new(symbol.to_string(), price, now_millis(), volume)
    }
}

pub struct SyntheticProvider {
    session: Arc<ProviderSession>,
    config: SyntheticConfig,
    on_tick: TickCallback,
}

impl SyntheticProvider {
    pub fn new(
        symbol: &str,
        config: SyntheticConfig,
        on_tick: TickCallback,
        on_status: StatusCallback,
    ) -> Self {
        Self {
            session: ProviderSession::new(symbol, on_status),
            config,
            on_tick,
        }
    }

    fn spawn_walk(&self) {
        let session = self.session.clone();
        let config = self.config.clone();
        let on_tick = self.on_tick.clone();
        let (symbol, generation) = session.snapshot();

        tokio::spawn(async move {
            let mut walk = SyntheticWalk::new(&config, &symbol);
            let mut interval =
                tokio::time::interval(Duration::from_millis(config.tick_interval_ms.max(1)));
            debug!(symbol = %symbol, "Synthetic walk started");

            loop {
                interval.tick().await;
                if !session.is_current(generation) {
                    debug!(symbol = %symbol, "Synthetic walk stopped");
                    break;
                }
                on_tick(walk.next_tick(&symbol));
            }
        });
    }
}

impl Drop for SyntheticProvider {
    fn drop(&mut self) {
        self.session.shutdown();
    }
}

#[async_trait]
impl MarketDataProvider for SyntheticProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Synthetic
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        self.session.activate();
        self.session.set_status(ConnectionStatus::Connecting);
        info!(symbol = %self.session.symbol(), "Synthetic provider connected");
        self.session.set_status(ConnectionStatus::Connected);
        self.spawn_walk();
        Ok(())
    }

    async fn disconnect(&self) {
        self.session.shutdown();
        self.session.set_status(ConnectionStatus::Disconnected);
    }

    async fn change_symbol(&self, symbol: &str) -> Result<(), ProviderError> {
        self.session.change_symbol(symbol);
        if self.session.is_live() {
            self.spawn_walk();
        }
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        self.session.status()
    }
}
