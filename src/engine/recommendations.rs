//! Threshold-derived, human-readable recommendations (§4.5 step 4).

use crate::analytics::AnalyticsResult;
use crate::types::{Congestion, Level, Recommendation, Urgency};

pub fn derive(analytics: &AnalyticsResult, aqi: f64, congestion: Congestion) -> Vec<Recommendation> {
    let mut out = Vec::new();
    let mut priority = 1u8;

    if aqi > 150.0 {
        out.push(Recommendation {
            priority,
            kind: "air_quality".to_string(),
            title: "Elevated air quality index".to_string(),
            description: format!("AQI is {aqi:.0}; consider public advisory and reduced outdoor activity."),
            urgency: if aqi > 200.0 { Urgency::High } else { Urgency::Medium },
        });
        priority += 1;
    }

    if analytics.demand_forecast.next_hour_kwh > 1000.0 {
        out.push(Recommendation {
            priority,
            kind: "demand".to_string(),
            title: "Predicted demand spike".to_string(),
            description: format!(
                "Next-hour demand forecast is {:.0} kWh; consider load shedding or demand response.",
                analytics.demand_forecast.next_hour_kwh
            ),
            urgency: Urgency::Medium,
        });
        priority += 1;
    }

    if analytics.anomaly_detection.is_anomaly {
        out.push(Recommendation {
            priority,
            kind: "anomaly".to_string(),
            title: "Anomalous conditions detected".to_string(),
            description: "Current readings deviate significantly from the zone's baseline.".to_string(),
            urgency: Urgency::High,
        });
        priority += 1;
    }

    if analytics.risk_score.level == Level::High {
        out.push(Recommendation {
            priority,
            kind: "risk".to_string(),
            title: "High composite risk".to_string(),
            description: format!("Composite risk score is {:.0}/100.", analytics.risk_score.score),
            urgency: Urgency::High,
        });
        priority += 1;
    }

    if congestion == Congestion::Severe {
        out.push(Recommendation {
            priority,
            kind: "traffic".to_string(),
            title: "Severe congestion".to_string(),
            description: "Traffic is severely congested; reroute field crews if dispatched.".to_string(),
            urgency: Urgency::Medium,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnomalyDetection, AqiPrediction, DemandForecast, ResilienceScore, RiskScore};

    fn baseline() -> AnalyticsResult {
        AnalyticsResult {
            demand_forecast: DemandForecast {
                next_hour_kwh: 500.0,
                confidence: 0.6,
                model: "test".into(),
                factors: vec![],
            },
            anomaly_detection: AnomalyDetection {
                is_anomaly: false,
                anomaly_score: 0.0,
                current_demand: 500.0,
                baseline_mean: 500.0,
                threshold: 2.0,
            },
            risk_score: RiskScore { score: 10.0, level: Level::Low, factors: vec![] },
            resilience_score: ResilienceScore { score: 90.0, level: Level::High },
            aqi_prediction: AqiPrediction { next_hour_aqi: 40.0, factors: vec![] },
            grid_priority: 2,
        }
    }

    #[test]
    fn no_recommendations_in_the_calm_case() {
        let analytics = baseline();
        let recs = derive(&analytics, 40.0, Congestion::Free);
        assert!(recs.is_empty());
    }

    #[test]
    fn high_aqi_produces_a_recommendation() {
        let analytics = baseline();
        let recs = derive(&analytics, 210.0, Congestion::Free);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].urgency, Urgency::High);
    }
}
