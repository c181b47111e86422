//! Grounding catalog (C3): read access to the asset registry, active
//! events, service outages and playbooks the scenario orchestrator cites as
//! evidence (§3, §4.3).
//!
//! Entries are created externally (by the ingestion/ops side of the real
//! deployment); the core only reads them, except for the default playbook
//! seed, which this module writes once if the playbook tree is empty - the
//! same "seed on first read if empty" contract the reference orchestrator
//! uses for its playbook catalog.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub city_id: String,
    pub zone_id: String,
    pub asset_type: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveEvent {
    pub event_id: String,
    pub city_id: String,
    pub event_type: String,
    pub zone: String,
    pub severity: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOutage {
    pub event_id: String,
    pub city_id: String,
    pub zone: String,
    pub service_type: String,
    pub pct_affected: f64,
    pub start_ts: DateTime<Utc>,
    pub eta_ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub event_type: String,
    pub action_id: String,
    pub name: String,
    pub description: String,
    pub eta_minutes: u32,
    pub cost_estimate: f64,
}

/// The default playbook set (§4.3), seeded into the catalog the first time
/// it is read empty.
fn default_playbooks() -> Vec<Playbook> {
    vec![
        Playbook {
            event_type: "outage".into(),
            action_id: "dispatch_crew".into(),
            name: "Dispatch repair crew".into(),
            description: "Send a field crew to restore service".into(),
            eta_minutes: 60,
            cost_estimate: 500.0,
        },
        Playbook {
            event_type: "outage".into(),
            action_id: "load_shed_zone".into(),
            name: "Shed load in the affected zone".into(),
            description: "Temporarily reduce demand to protect the grid".into(),
            eta_minutes: 15,
            cost_estimate: 0.0,
        },
        Playbook {
            event_type: "aqi_spike".into(),
            action_id: "notify_public".into(),
            name: "Issue a public air-quality notice".into(),
            description: "Alert residents to reduce outdoor exposure".into(),
            eta_minutes: 5,
            cost_estimate: 0.0,
        },
        Playbook {
            event_type: "aqi_spike".into(),
            action_id: "reduce_industrial".into(),
            name: "Curtail industrial emissions".into(),
            description: "Request temporary emissions reduction from large sources".into(),
            eta_minutes: 120,
            cost_estimate: 2000.0,
        },
        Playbook {
            event_type: "road_closure".into(),
            action_id: "reroute_crews".into(),
            name: "Reroute field crews".into(),
            description: "Redirect crews around the closure".into(),
            eta_minutes: 30,
            cost_estimate: 100.0,
        },
        Playbook {
            event_type: "failure".into(),
            action_id: "isolate_asset".into(),
            name: "Isolate the failed asset".into(),
            description: "Electrically isolate the asset pending repair".into(),
            eta_minutes: 45,
            cost_estimate: 300.0,
        },
    ]
}

/// Sled-backed grounding catalog. Shares the teacher's single-`Arc<sled::Db>`
/// idiom; each entity type lives in its own tree.
#[derive(Clone)]
pub struct GroundingCatalog {
    db: Arc<sled::Db>,
}

impl GroundingCatalog {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self { db }
    }

    fn tree(&self, name: &str) -> Result<sled::Tree, StoreError> {
        Ok(self.db.open_tree(name)?)
    }

    pub fn assets(&self, city_id: &str, zone_id: Option<&str>) -> Result<Vec<Asset>, CatalogError> {
        let tree = self.tree("assets")?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, value) = item.map_err(StoreError::from)?;
            let asset: Asset = serde_json::from_slice(&value).map_err(StoreError::from)?;
            if asset.city_id != city_id {
                continue;
            }
            if let Some(zone_id) = zone_id {
                if asset.zone_id != zone_id {
                    continue;
                }
            }
            out.push(asset);
        }
        Ok(out)
    }

    pub fn active_events(
        &self,
        city_id: &str,
        event_type: Option<&str>,
    ) -> Result<Vec<ActiveEvent>, CatalogError> {
        let tree = self.tree("active_events")?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, value) = item.map_err(StoreError::from)?;
            let event: ActiveEvent = serde_json::from_slice(&value).map_err(StoreError::from)?;
            if event.city_id != city_id {
                continue;
            }
            if let Some(event_type) = event_type {
                if event.event_type != event_type {
                    continue;
                }
            }
            out.push(event);
        }
        Ok(out)
    }

    pub fn service_outages(&self, city_id: &str) -> Result<Vec<ServiceOutage>, CatalogError> {
        let tree = self.tree("service_outages")?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, value) = item.map_err(StoreError::from)?;
            let outage: ServiceOutage = serde_json::from_slice(&value).map_err(StoreError::from)?;
            if outage.city_id == city_id {
                out.push(outage);
            }
        }
        Ok(out)
    }

    pub fn playbooks(&self, event_type: Option<&str>) -> Result<Vec<Playbook>, CatalogError> {
        let tree = self.tree("playbooks")?;
        if tree.is_empty() {
            for playbook in default_playbooks() {
                let key = format!("{}:{}", playbook.event_type, playbook.action_id);
                tree.insert(key.as_bytes(), serde_json::to_vec(&playbook).map_err(StoreError::from)?)
                    .map_err(StoreError::from)?;
            }
        }
        let mut out = Vec::new();
        for item in tree.iter() {
            let (_, value) = item.map_err(StoreError::from)?;
            let playbook: Playbook = serde_json::from_slice(&value).map_err(StoreError::from)?;
            if let Some(event_type) = event_type {
                if playbook.event_type != event_type {
                    continue;
                }
            }
            out.push(playbook);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> GroundingCatalog {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path()).unwrap());
        // Leak the tempdir so the db outlives the test body's scope; fine
        // for a short-lived unit test.
        std::mem::forget(dir);
        GroundingCatalog::new(db)
    }

    #[test]
    fn playbooks_seed_on_first_empty_read() {
        let catalog = catalog();
        let playbooks = catalog.playbooks(None).unwrap();
        assert_eq!(playbooks.len(), 6);
    }

    #[test]
    fn playbooks_filter_by_event_type() {
        let catalog = catalog();
        let outage_playbooks = catalog.playbooks(Some("outage")).unwrap();
        assert_eq!(outage_playbooks.len(), 2);
        assert!(outage_playbooks.iter().all(|p| p.event_type == "outage"));
    }

    #[test]
    fn seeding_is_idempotent() {
        let catalog = catalog();
        catalog.playbooks(None).unwrap();
        let second = catalog.playbooks(None).unwrap();
        assert_eq!(second.len(), 6);
    }
}
