//! Analytics kernel (C4): deterministic, pure functions over the fused raw
//! record and optional history (§4.4). No I/O; calling the same function
//! twice with identical inputs always returns bit-identical output (§8
//! property 8).

use statrs::statistics::Statistics;

use crate::config::defaults::{
    ANOMALY_Z_SCORE_THRESHOLD, RESILIENCE_LEVEL_HIGH, RESILIENCE_LEVEL_MEDIUM, RISK_LEVEL_HIGH,
    RISK_LEVEL_MEDIUM,
};
use crate::types::{
    AnomalyDetection, AqiPrediction, Congestion, DemandForecast, Level, ResilienceScore,
    RiskScore, TrafficSignal,
};

/// Demand history for a zone, one sample per prior processing cycle, in
/// kWh. Empty means "no history yet" - the forecast then falls back to a
/// temperature-only estimate.
pub type DemandHistory<'a> = &'a [f64];

/// Demand forecast (§4.4 "Demand forecast").
pub fn demand_forecast(temperature_c: f64, history: DemandHistory) -> DemandForecast {
    if !history.is_empty() {
        let mean = history.mean();
        let temp_factor = 1.0 + ((temperature_c - 20.0) / 20.0) * 0.3;
        DemandForecast {
            next_hour_kwh: mean * temp_factor,
            confidence: 0.75,
            model: "history_mean_temperature_adjusted".to_string(),
            factors: vec![format!("history_mean={mean:.2}"), format!("temp_factor={temp_factor:.3}")],
        }
    } else {
        let base = if temperature_c > 25.0 {
            800.0 + 20.0 * (temperature_c - 25.0)
        } else if temperature_c < 15.0 {
            800.0 + 30.0 * (15.0 - temperature_c)
        } else {
            600.0 + 10.0 * (temperature_c - 20.0)
        };
        DemandForecast {
            next_hour_kwh: base,
            confidence: 0.60,
            model: "temperature_only".to_string(),
            factors: vec![format!("temperature_c={temperature_c:.1}")],
        }
    }
}

/// Anomaly detection (§4.4 "Anomaly detection").
pub fn anomaly_detection(
    current_demand: f64,
    aqi: f64,
    congestion: Congestion,
    history: DemandHistory,
) -> AnomalyDetection {
    if history.len() >= 2 {
        let mean = history.mean();
        let std_dev = history.std_dev();
        let z = if std_dev > 0.0 {
            (current_demand - mean) / std_dev
        } else {
            0.0
        };
        AnomalyDetection {
            is_anomaly: z.abs() > ANOMALY_Z_SCORE_THRESHOLD,
            anomaly_score: z.abs(),
            current_demand,
            baseline_mean: mean,
            threshold: ANOMALY_Z_SCORE_THRESHOLD,
        }
    } else {
        let severe = congestion == Congestion::Severe;
        let is_anomaly = aqi > 150.0 || severe;
        let anomaly_score = ((aqi - 150.0) / 50.0).max(if severe { 2.5 } else { 0.0 });
        AnomalyDetection {
            is_anomaly,
            anomaly_score,
            current_demand,
            baseline_mean: current_demand,
            threshold: ANOMALY_Z_SCORE_THRESHOLD,
        }
    }
}

fn level_for_risk(score: f64) -> Level {
    if score >= RISK_LEVEL_HIGH {
        Level::High
    } else if score >= RISK_LEVEL_MEDIUM {
        Level::Medium
    } else {
        Level::Low
    }
}

fn level_for_resilience(score: f64) -> Level {
    if score >= RESILIENCE_LEVEL_HIGH {
        Level::High
    } else if score >= RESILIENCE_LEVEL_MEDIUM {
        Level::Medium
    } else {
        Level::Low
    }
}

/// Composite risk score (§4.4 "Risk score").
pub fn risk_score(
    aqi: f64,
    congestion: Congestion,
    forecast_kwh: f64,
    history: DemandHistory,
) -> RiskScore {
    let mut score = 0.0;
    let mut factors = Vec::new();

    if aqi > 150.0 {
        score += 30.0;
        factors.push("aqi>150".to_string());
    } else if aqi > 100.0 {
        score += 15.0;
        factors.push("aqi>100".to_string());
    }

    match congestion {
        Congestion::Severe => {
            score += 20.0;
            factors.push("congestion=severe".to_string());
        }
        Congestion::Heavy => {
            score += 10.0;
            factors.push("congestion=heavy".to_string());
        }
        _ => {}
    }

    let demand_spike = if history.is_empty() {
        forecast_kwh > 1200.0
    } else {
        forecast_kwh > 1.5 * history.mean()
    };
    if demand_spike {
        score += 25.0;
        factors.push("demand_spike".to_string());
    }

    let score = score.clamp(0.0, 100.0);
    RiskScore {
        score,
        level: level_for_risk(score),
        factors,
    }
}

/// Resilience score: the complement of risk (§4.4 "Resilience score").
pub fn resilience_score(risk: &RiskScore) -> ResilienceScore {
    let score = (100.0 - risk.score).clamp(0.0, 100.0);
    ResilienceScore {
        score,
        level: level_for_resilience(score),
    }
}

/// AQI projection (§4.4 "AQI projection").
pub fn aqi_projection(current_aqi: f64, wind_mps: f64, congestion: Congestion) -> AqiPrediction {
    let congestion_weight = match congestion {
        Congestion::Heavy | Congestion::Severe => 1.0,
        _ => 0.5,
    };
    let next_hour = (current_aqi * (1.0 - wind_mps * 0.05) * (1.0 + congestion_weight * 0.1))
        .clamp(0.0, 500.0);
    AqiPrediction {
        next_hour_aqi: next_hour,
        factors: vec![
            format!("wind_mps={wind_mps:.2}"),
            format!("congestion_weight={congestion_weight:.1}"),
        ],
    }
}

/// Grid priority, 1-5 (§4.4 "Grid priority").
pub fn grid_priority(
    risk: &RiskScore,
    anomaly: &AnomalyDetection,
    aqi: f64,
    forecast_kwh: f64,
) -> u8 {
    let mut value = match risk.level {
        Level::Low if risk.score < RISK_LEVEL_MEDIUM / 2.0 => 2.0,
        Level::Low => 3.0,
        Level::Medium => 4.0,
        Level::High => 5.0,
    };

    if anomaly.is_anomaly {
        value += 1.0;
    }
    if aqi > 200.0 {
        value += 1.0;
    } else if aqi > 150.0 {
        value += 0.5;
    }
    if forecast_kwh > 1000.0 {
        value += 0.5;
    }

    value.round().clamp(1.0, 5.0) as u8
}

/// A convenience struct bundling every C4 output for one zone, computed in
/// the fixed order C5 requires: demand -> anomaly -> risk -> resilience ->
/// AQI projection -> grid priority.
pub struct AnalyticsResult {
    pub demand_forecast: DemandForecast,
    pub anomaly_detection: AnomalyDetection,
    pub risk_score: RiskScore,
    pub resilience_score: ResilienceScore,
    pub aqi_prediction: AqiPrediction,
    pub grid_priority: u8,
}

pub fn analyze(
    traffic: &TrafficSignal,
    aqi: f64,
    temperature_c: f64,
    wind_mps: f64,
    history: DemandHistory,
) -> AnalyticsResult {
    let demand_forecast = demand_forecast(temperature_c, history);
    let anomaly_detection = anomaly_detection(
        demand_forecast.next_hour_kwh,
        aqi,
        traffic.congestion,
        history,
    );
    let risk_score = risk_score(aqi, traffic.congestion, demand_forecast.next_hour_kwh, history);
    let resilience_score = resilience_score(&risk_score);
    let aqi_prediction = aqi_projection(aqi, wind_mps, traffic.congestion);
    let grid_priority = grid_priority(&risk_score, &anomaly_detection, aqi, demand_forecast.next_hour_kwh);

    AnalyticsResult {
        demand_forecast,
        anomaly_detection,
        risk_score,
        resilience_score,
        aqi_prediction,
        grid_priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_and_resilience_always_sum_to_100() {
        for aqi in [0.0, 60.0, 120.0, 160.0, 400.0] {
            for forecast in [400.0, 1000.0, 1300.0] {
                let risk = risk_score(aqi, Congestion::Heavy, forecast, &[]);
                let resilience = resilience_score(&risk);
                assert_eq!(risk.score + resilience.score, 100.0);
                assert!((0.0..=100.0).contains(&risk.score));
                assert!((0.0..=100.0).contains(&resilience.score));
            }
        }
    }

    #[test]
    fn grid_priority_stays_in_bounds() {
        let risk = RiskScore { score: 90.0, level: Level::High, factors: vec![] };
        let anomaly = AnomalyDetection {
            is_anomaly: true,
            anomaly_score: 3.0,
            current_demand: 1500.0,
            baseline_mean: 600.0,
            threshold: 2.0,
        };
        let priority = grid_priority(&risk, &anomaly, 480.0, 1500.0);
        assert!((1..=5).contains(&priority));
    }

    #[test]
    fn scenario_s3_matches_expected_values() {
        // §8 S3: temperature=30, aqi=160, congestion=heavy, no history.
        let traffic = TrafficSignal {
            source: "test".into(),
            timestamp: chrono::Utc::now(),
            location: crate::types::Location { lat: 0.0, lon: 0.0 },
            current_speed_kmh: 30.0,
            free_flow_speed_kmh: 50.0,
            congestion: Congestion::Heavy,
        };
        let result = analyze(&traffic, 160.0, 30.0, 3.0, &[]);
        assert!(result.anomaly_detection.is_anomaly);
        assert_eq!(result.risk_score.score, 40.0);
        assert_eq!(result.risk_score.level, Level::Medium);
        assert_eq!(result.resilience_score.score, 60.0);
        assert_eq!(result.resilience_score.level, Level::Medium);
        assert!((1..=5).contains(&result.grid_priority));
        // next_hour = 160 * (1 - wind*0.05) * (1 + congestion_weight*0.1), wind=3.0 m/s, heavy congestion.
        assert!((result.aqi_prediction.next_hour_aqi - 149.6).abs() < 1e-9);
    }

    #[test]
    fn analytics_kernel_is_pure() {
        let traffic = TrafficSignal {
            source: "test".into(),
            timestamp: chrono::Utc::now(),
            location: crate::types::Location { lat: 0.0, lon: 0.0 },
            current_speed_kmh: 45.0,
            free_flow_speed_kmh: 50.0,
            congestion: Congestion::Moderate,
        };
        let history = [600.0, 620.0, 580.0];
        let a = analyze(&traffic, 90.0, 22.0, 2.5, &history);
        let b = analyze(&traffic, 90.0, 22.0, 2.5, &history);
        assert_eq!(a.demand_forecast.next_hour_kwh, b.demand_forecast.next_hour_kwh);
        assert_eq!(a.risk_score.score, b.risk_score.score);
        assert_eq!(a.grid_priority, b.grid_priority);
    }

    #[test]
    fn cost_scenario_s4_matches_aggregator_inputs() {
        // Sanity check of the AQI-excess term used by C8 in isolation.
        let excess_70 = (70.0_f64 - 50.0).max(0.0);
        let excess_40 = (40.0_f64 - 50.0).max(0.0);
        assert_eq!(excess_70 * 0.5 + excess_40 * 0.5, 10.0);
    }
}
