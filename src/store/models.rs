//! Persisted records. Field names and enum spellings match the stored JSON,
//! so documents written by earlier versions keep loading.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medication {
    pub id: String,
    pub name: String,
    pub dosage: String,
    /// Scheduled time of day, `HH:MM`.
    pub time: String,
    /// Days on which the dose was marked as taken.
    #[serde(default)]
    pub history: Vec<NaiveDate>,
}

impl Medication {
    pub fn taken_on(&self, day: NaiveDate) -> bool {
        self.history.contains(&day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Urgency {
    #[serde(rename = "baixa")]
    Low,
    #[serde(rename = "media")]
    Medium,
    #[serde(rename = "alta")]
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Discomfort {
    #[serde(rename = "nenhum")]
    None,
    #[serde(rename = "leve")]
    Mild,
    #[serde(rename = "moderado")]
    Moderate,
    #[serde(rename = "intenso")]
    Intense,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymptomLog {
    pub id: String,
    pub date: NaiveDate,
    /// 0 (none) to 10 (worst).
    pub pain_level: u8,
    pub urgency: Urgency,
    pub discomfort: Discomfort,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// The regimen a fresh install starts with.
pub fn default_regimen() -> Vec<Medication> {
    vec![
        Medication {
            id: "med_prost_cap".to_string(),
            name: "Prosterite Cápsulas".to_string(),
            dosage: "1 Cápsula".to_string(),
            time: "08:00".to_string(),
            history: Vec::new(),
        },
        Medication {
            id: "med_prost_drop".to_string(),
            name: "Prosterite Gotas".to_string(),
            dosage: "12 Gotas Sublinguais".to_string(),
            time: "20:00".to_string(),
            history: Vec::new(),
        },
    ]
}
