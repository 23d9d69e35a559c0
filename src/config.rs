// src/config.rs - All tunables, loaded once from the environment at startup
use std::env;

use log::warn;

use crate::types::Timeframe;

fn env_f64(key: &str, default: f64) -> f64 {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            warn!("⚙️ [CONFIG] {} has non-numeric value '{}', using {}", key, v, default);
            default
        }),
        Err(_) => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            warn!("⚙️ [CONFIG] {} has non-numeric value '{}', using {}", key, v, default);
            default
        }),
        Err(_) => default,
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env_string(key, default)
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Geometric thresholds for the pattern detectors. Every number the
/// detectors compare against lives here so the frequency/quality
/// trade-off is tunable without touching detector code.
#[derive(Debug, Clone)]
pub struct PatternParams {
    pub sweep_lookback: usize,
    pub sweep_confirm_candles: usize,
    pub volume_surge_mult: f64,
    pub volume_avg_period: usize,
    pub order_block_body_mult: f64,
    pub order_block_lookback: usize,
    pub order_block_tolerance_pips: f64,
    pub fvg_min_gap_pips: f64,
    pub fvg_entry_tolerance_pips: f64,
    pub swing_strength: usize,
    pub structure_lookback: usize,
    pub compression_window: usize,
    pub compression_baseline_window: usize,
    pub compression_ratio: f64,
    pub level_tolerance_pips: f64,
    pub level_lookback: usize,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub base_score_liquidity_sweep: f64,
    pub base_score_order_block: f64,
    pub base_score_fvg: f64,
    pub base_score_structure: f64,
    pub base_score_compression: f64,
    pub base_score_engulfing: f64,
    pub base_score_rsi_divergence: f64,
}

impl PatternParams {
    pub fn from_env() -> Self {
        Self {
            sweep_lookback: env_u64("PATTERN_SWEEP_LOOKBACK", 20) as usize,
            sweep_confirm_candles: env_u64("PATTERN_SWEEP_CONFIRM_CANDLES", 2) as usize,
            volume_surge_mult: env_f64("PATTERN_VOLUME_SURGE_MULT", 1.3),
            volume_avg_period: env_u64("PATTERN_VOLUME_AVG_PERIOD", 20) as usize,
            order_block_body_mult: env_f64("PATTERN_ORDER_BLOCK_BODY_MULT", 2.0),
            order_block_lookback: env_u64("PATTERN_ORDER_BLOCK_LOOKBACK", 30) as usize,
            order_block_tolerance_pips: env_f64("PATTERN_ORDER_BLOCK_TOLERANCE_PIPS", 3.0),
            fvg_min_gap_pips: env_f64("PATTERN_FVG_MIN_GAP_PIPS", 5.0),
            fvg_entry_tolerance_pips: env_f64("PATTERN_FVG_ENTRY_TOLERANCE_PIPS", 2.0),
            swing_strength: env_u64("PATTERN_SWING_STRENGTH", 2) as usize,
            structure_lookback: env_u64("PATTERN_STRUCTURE_LOOKBACK", 40) as usize,
            compression_window: env_u64("PATTERN_COMPRESSION_WINDOW", 8) as usize,
            compression_baseline_window: env_u64("PATTERN_COMPRESSION_BASELINE_WINDOW", 20) as usize,
            compression_ratio: env_f64("PATTERN_COMPRESSION_RATIO", 0.6),
            level_tolerance_pips: env_f64("PATTERN_LEVEL_TOLERANCE_PIPS", 5.0),
            level_lookback: env_u64("PATTERN_LEVEL_LOOKBACK", 30) as usize,
            rsi_period: env_u64("PATTERN_RSI_PERIOD", 14) as usize,
            rsi_overbought: env_f64("PATTERN_RSI_OVERBOUGHT", 70.0),
            rsi_oversold: env_f64("PATTERN_RSI_OVERSOLD", 30.0),
            base_score_liquidity_sweep: env_f64("PATTERN_BASE_SCORE_LIQUIDITY_SWEEP", 70.0),
            base_score_order_block: env_f64("PATTERN_BASE_SCORE_ORDER_BLOCK", 65.0),
            base_score_fvg: env_f64("PATTERN_BASE_SCORE_FVG", 60.0),
            base_score_structure: env_f64("PATTERN_BASE_SCORE_STRUCTURE", 65.0),
            base_score_compression: env_f64("PATTERN_BASE_SCORE_COMPRESSION", 62.0),
            base_score_engulfing: env_f64("PATTERN_BASE_SCORE_ENGULFING", 58.0),
            base_score_rsi_divergence: env_f64("PATTERN_BASE_SCORE_RSI_DIVERGENCE", 66.0),
        }
    }
}

/// Session weights and confluence scoring knobs.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub min_confluence_score: f64,
    pub session_weight_asian: f64,
    pub session_weight_london: f64,
    pub session_weight_newyork: f64,
    pub session_weight_overlap: f64,
    pub alignment_bonus: f64,
    pub volume_term_cap: f64,
    pub volatility_term_cap: f64,
    pub ideal_atr_pips: f64,
    /// Candles back for the per-timeframe trend read used by alignment.
    pub trend_lookback: usize,
}

impl ScoringConfig {
    pub fn from_env() -> Self {
        Self {
            min_confluence_score: env_f64("SCORING_MIN_CONFLUENCE", 60.0),
            session_weight_asian: env_f64("SCORING_SESSION_ASIAN", 0.9),
            session_weight_london: env_f64("SCORING_SESSION_LONDON", 1.2),
            session_weight_newyork: env_f64("SCORING_SESSION_NEWYORK", 1.1),
            session_weight_overlap: env_f64("SCORING_SESSION_OVERLAP", 1.4),
            alignment_bonus: env_f64("SCORING_ALIGNMENT_BONUS", 20.0),
            volume_term_cap: env_f64("SCORING_VOLUME_TERM_CAP", 10.0),
            volatility_term_cap: env_f64("SCORING_VOLATILITY_TERM_CAP", 10.0),
            ideal_atr_pips: env_f64("SCORING_IDEAL_ATR_PIPS", 12.0),
            trend_lookback: env_u64("SCORING_TREND_LOOKBACK", 10) as usize,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShieldConfig {
    pub sources: Vec<String>,
    pub source_timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub min_sources: usize,
    pub max_entry_deviation_pct: f64,
    pub max_outliers: usize,
    pub min_agreement_ratio: f64,
    pub outlier_sigma: f64,
    pub score_bonus: f64,
}

impl ShieldConfig {
    pub fn from_env() -> Self {
        Self {
            sources: env_list("SHIELD_SOURCES", ""),
            source_timeout_ms: env_u64("SHIELD_SOURCE_TIMEOUT_MS", 2000),
            cache_ttl_secs: env_u64("SHIELD_CACHE_TTL_SECS", 12),
            min_sources: env_u64("SHIELD_MIN_SOURCES", 3) as usize,
            max_entry_deviation_pct: env_f64("SHIELD_MAX_ENTRY_DEVIATION_PCT", 0.5),
            max_outliers: env_u64("SHIELD_MAX_OUTLIERS", 1) as usize,
            min_agreement_ratio: env_f64("SHIELD_MIN_AGREEMENT_RATIO", 0.75),
            outlier_sigma: env_f64("SHIELD_OUTLIER_SIGMA", 2.0),
            score_bonus: env_f64("SHIELD_SCORE_BONUS", 10.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub fast_stop_atr_mult: f64,
    pub fast_reward_mult: f64,
    pub fast_validity_secs: i64,
    pub precision_stop_atr_mult: f64,
    pub precision_reward_mult: f64,
    pub precision_validity_secs: i64,
    pub precision_score_floor: f64,
    /// Cap on the PRECISION share of recently issued signals (0..1).
    pub class_mix_precision_ratio: f64,
    pub class_mix_window: usize,
    pub stop_floor_atr_mult: f64,
    pub stop_cap_atr_mult: f64,
    pub default_volume: f64,
}

impl RiskConfig {
    pub fn from_env() -> Self {
        Self {
            fast_stop_atr_mult: env_f64("RISK_FAST_STOP_ATR_MULT", 1.5),
            fast_reward_mult: env_f64("RISK_FAST_REWARD_MULT", 1.5),
            fast_validity_secs: env_u64("RISK_FAST_VALIDITY_SECS", 900) as i64,
            precision_stop_atr_mult: env_f64("RISK_PRECISION_STOP_ATR_MULT", 2.0),
            precision_reward_mult: env_f64("RISK_PRECISION_REWARD_MULT", 2.0),
            precision_validity_secs: env_u64("RISK_PRECISION_VALIDITY_SECS", 3600) as i64,
            precision_score_floor: env_f64("RISK_PRECISION_SCORE_FLOOR", 75.0),
            class_mix_precision_ratio: env_f64("RISK_CLASS_MIX_PRECISION_RATIO", 0.4),
            class_mix_window: env_u64("RISK_CLASS_MIX_WINDOW", 20) as usize,
            stop_floor_atr_mult: env_f64("RISK_STOP_FLOOR_ATR_MULT", 0.8),
            stop_cap_atr_mult: env_f64("RISK_STOP_CAP_ATR_MULT", 3.0),
            default_volume: env_f64("RISK_DEFAULT_VOLUME", 0.10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StagedConfig {
    pub enabled: bool,
    pub stage1_trigger_pips: f64,
    pub stage1_close_percent: f64,
    pub stage2_trigger_pips: f64,
    pub stage2_close_percent: f64,
    pub trail_distance_pips: f64,
}

impl StagedConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_string("STAGED_ENABLED", "true") == "true",
            stage1_trigger_pips: env_f64("STAGED_STAGE1_TRIGGER_PIPS", 10.0),
            stage1_close_percent: env_f64("STAGED_STAGE1_CLOSE_PERCENT", 25.0),
            stage2_trigger_pips: env_f64("STAGED_STAGE2_TRIGGER_PIPS", 20.0),
            stage2_close_percent: env_f64("STAGED_STAGE2_CLOSE_PERCENT", 25.0),
            trail_distance_pips: env_f64("STAGED_TRAIL_DISTANCE_PIPS", 8.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub bind_addr: String,
    pub silence_window_secs: i64,
    pub supervisor_sweep_secs: u64,
    pub channel_read_timeout_secs: u64,
    /// Terminal identity that published signals are fired at
    /// automatically; empty disables auto-fire.
    pub auto_fire_identity: String,
}

impl ExecutionConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_string("TERMINAL_BRIDGE_ADDR", "127.0.0.1:9100"),
            silence_window_secs: env_u64("TERMINAL_SILENCE_WINDOW_SECS", 120) as i64,
            supervisor_sweep_secs: env_u64("SUPERVISOR_SWEEP_SECS", 10),
            channel_read_timeout_secs: env_u64("CHANNEL_READ_TIMEOUT_SECS", 30),
            auto_fire_identity: env_string("AUTO_FIRE_IDENTITY", ""),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub instruments: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub candle_capacity: usize,
    pub atr_period: usize,
    pub scan_interval_secs: u64,
    pub scan_concurrency: usize,
    pub patterns: PatternParams,
    pub scoring: ScoringConfig,
    pub shield: ShieldConfig,
    pub risk: RiskConfig,
    pub staged: StagedConfig,
    pub execution: ExecutionConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let timeframes: Vec<Timeframe> = env_list("ENGINE_TIMEFRAMES", "5m,15m,1h")
            .iter()
            .filter_map(|l| {
                let tf = Timeframe::parse(l);
                if tf.is_none() {
                    warn!("⚙️ [CONFIG] Unknown timeframe '{}' ignored", l);
                }
                tf
            })
            .collect();

        Self {
            instruments: env_list(
                "ENGINE_INSTRUMENTS",
                "EURUSD,GBPUSD,USDJPY,AUDUSD,USDCAD,NZDUSD",
            ),
            timeframes,
            candle_capacity: env_u64("ENGINE_CANDLE_CAPACITY", 200) as usize,
            atr_period: env_u64("ENGINE_ATR_PERIOD", 14) as usize,
            scan_interval_secs: env_u64("ENGINE_SCAN_INTERVAL_SECS", 90),
            scan_concurrency: env_u64("ENGINE_SCAN_CONCURRENCY", 4) as usize,
            patterns: PatternParams::from_env(),
            scoring: ScoringConfig::from_env(),
            shield: ShieldConfig::from_env(),
            risk: RiskConfig::from_env(),
            staged: StagedConfig::from_env(),
            execution: ExecutionConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::from_env();
        assert!(cfg.scoring.min_confluence_score >= 0.0);
        assert!(cfg.shield.min_sources >= 3);
        assert!(cfg.risk.stop_floor_atr_mult < cfg.risk.stop_cap_atr_mult);
        assert!(!cfg.instruments.is_empty());
        assert!(!cfg.timeframes.is_empty());
    }
}
