// =============================================================================
// Candle Engine — Main Entry Point
// =============================================================================
//
// Loads stored candles per symbol, serves them through a window accessor at
// the configured interval and, in live mode, keeps each store current from
// the exchange trade feed.
// =============================================================================

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use candle_engine::market_data::{connect_trade_feed, CandleStream, KlineDump};
use candle_engine::storage::{ProviderInfo, SqliteCandleStore, SymbolInfo};
use candle_engine::{BucketStore, CandleRecord, EngineConfig, Selection, WindowAccessor};

const CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("candle engine starting up");

    let config = EngineConfig::load(CONFIG_PATH)
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            EngineConfig::default()
        })
        .with_env_overrides();

    info!(
        provider = %config.provider,
        symbols = ?config.symbols,
        source_interval = %config.source_interval,
        target_interval = ?config.target_interval.map(|iv| iv.as_str()),
        live = config.live,
        "Configured candle engine"
    );

    // ── 2. Storage & optional dump import ────────────────────────────────
    let mut repo = SqliteCandleStore::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;

    if let Some(dump_path) = &config.kline_dump {
        import_dump(&mut repo, &config, dump_path)?;
    }

    // ── 3. One window accessor per symbol ────────────────────────────────
    let mut windows = Vec::with_capacity(config.symbols.len());
    for symbol in &config.symbols {
        let store = BucketStore::load(
            &repo,
            &config.provider,
            symbol,
            config.source_interval,
            config.max_history,
        )
        .with_context(|| format!("failed to load candles for {symbol}"))?;

        let mut window = WindowAccessor::new(store);
        window.resample(config.target_period())?;
        log_window_summary(&window, config.window);
        windows.push(window);
    }

    if !config.live {
        info!("live mode disabled, exiting");
        return Ok(());
    }

    // ── 4. Live trade aggregation ────────────────────────────────────────
    let period = config.source_interval.seconds();
    let summary_width = config.window;

    for window in windows {
        tokio::spawn(run_live(window, period, summary_width));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Ctrl+C received, shutting down");

    Ok(())
}

/// Write every symbol of a kline dump into the repository under the
/// configured provider and source interval.
fn import_dump(
    repo: &mut SqliteCandleStore,
    config: &EngineConfig,
    dump_path: &std::path::Path,
) -> Result<()> {
    let dump = KlineDump::load(dump_path)?;

    let info = ProviderInfo {
        symbols: dump
            .symbols
            .iter()
            .map(|s| SymbolInfo {
                symbol: s.symbol.clone(),
                pair: s.pair.clone(),
            })
            .collect(),
    };
    repo.set_provider_info(&config.provider, &info)?;

    for (symbol, records) in dump.records() {
        let stored =
            repo.add_candlesticks(&config.provider, &symbol, config.source_interval, &records)?;
        info!(symbol = %symbol, stored, "kline dump imported");
    }
    Ok(())
}

fn log_window_summary(window: &WindowAccessor, width: usize) {
    let symbol = window.store().symbol();

    let summary = window.close(Selection::Last(width)).and_then(|closes| {
        let highs = window.high(Selection::Last(width))?;
        let lows = window.low(Selection::Last(width))?;
        Ok((closes, highs, lows))
    });

    match summary {
        Ok((closes, highs, lows)) => {
            let padding = closes.iter().filter(|c| c.is_nan()).count();
            let last_close = closes.last().copied().filter(|c| !c.is_nan());
            let high = highs.iter().copied().filter(|v| !v.is_nan()).reduce(f64::max);
            let low = lows.iter().copied().filter(|v| !v.is_nan()).reduce(f64::min);
            info!(
                symbol = %symbol,
                buckets = window.store().bucket_count(),
                width,
                padding,
                last_close = ?last_close,
                high = ?high,
                low = ?low,
                "window summary"
            );
        }
        Err(e) => error!(symbol = %symbol, error = %e, "failed to build window"),
    }
}

/// Keep one symbol's store current from its trade feed, reconnecting after
/// 5s whenever the feed drops.  The partially built candle is lost on
/// reconnect.
async fn run_live(mut window: WindowAccessor, period: i64, summary_width: usize) {
    let symbol = window.store().symbol().to_string();
    loop {
        match connect_trade_feed(&symbol).await {
            Ok(feed) => match CandleStream::new(feed, period) {
                Ok(mut candles) => {
                    while let Some(candle) = candles.next().await {
                        match candle {
                            Ok(bucket) => {
                                window.store_mut().update(CandleRecord::from(bucket));
                                info!(
                                    symbol = %symbol,
                                    start_time = bucket.start_time,
                                    opened_at = ?bucket.start_datetime(),
                                    open = bucket.open,
                                    high = bucket.high,
                                    low = bucket.low,
                                    close = bucket.close,
                                    volume = bucket.volume,
                                    gap_fill = bucket.is_gap_fill(),
                                    "candle closed"
                                );
                                log_window_summary(&window, summary_width);
                            }
                            Err(e) => {
                                error!(symbol = %symbol, error = %e, "trade feed out of order");
                                break;
                            }
                        }
                    }
                    warn!(symbol = %symbol, "trade feed ended — reconnecting in 5s");
                }
                Err(e) => {
                    error!(symbol = %symbol, error = %e, "invalid candle period");
                    return;
                }
            },
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Trade stream error — reconnecting in 5s");
            }
        }
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
    }
}
