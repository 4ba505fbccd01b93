//! # Treatment Journal
//!
//! Medication regimen and symptom diary on top of [`LocalStore`]. Every
//! mutation writes the affected collection back in full before the
//! in-memory copy changes, so memory and disk never disagree after an error.
//!
//! ## Adherence:
//! - **progress**: share of today's doses marked taken
//! - **streak**: consecutive days on which every medication was taken,
//!   counting back from today, or from yesterday while today is still open

use crate::error::{AppError, AppResult};
use crate::store::models::{default_regimen, Discomfort, Medication, SymptomLog, Urgency};
use crate::store::{LocalStore, MEDICATIONS_KEY, SYMPTOM_LOGS_KEY};
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

pub const MAX_PAIN_LEVEL: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdherenceSummary {
    pub date: NaiveDate,
    pub total: usize,
    pub taken: usize,
    /// Rounded percentage of today's doses taken.
    pub progress_percent: u8,
    pub logged_today: bool,
    pub streak_days: u32,
}

pub struct Journal {
    store: LocalStore,
    medications: Vec<Medication>,
    logs: Vec<SymptomLog>,
}

impl Journal {
    /// Read both collections. A store without a medication list starts from
    /// the default regimen.
    pub fn load(store: LocalStore) -> AppResult<Self> {
        let medications = match store.load(MEDICATIONS_KEY)? {
            Some(medications) => medications,
            None => {
                info!("No saved regimen, starting from defaults");
                default_regimen()
            }
        };
        let logs = store.load(SYMPTOM_LOGS_KEY)?.unwrap_or_default();
        Ok(Self {
            store,
            medications,
            logs,
        })
    }

    pub fn medications(&self) -> &[Medication] {
        &self.medications
    }

    pub fn symptom_logs(&self) -> &[SymptomLog] {
        &self.logs
    }

    /// Medications in order of their time of day.
    pub fn schedule(&self) -> Vec<&Medication> {
        let mut schedule: Vec<&Medication> = self.medications.iter().collect();
        schedule.sort_by(|a, b| a.time.cmp(&b.time));
        schedule
    }

    /// Add a medication. A blank name is ignored and yields `Ok(None)`.
    pub fn add_medication(
        &mut self,
        name: &str,
        dosage: &str,
        time: &str,
    ) -> AppResult<Option<&Medication>> {
        if name.trim().is_empty() {
            return Ok(None);
        }
        let time = normalize_time(time)?;

        let mut next = self.medications.clone();
        next.push(Medication {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            dosage: dosage.trim().to_string(),
            time,
            history: Vec::new(),
        });
        self.store.save(MEDICATIONS_KEY, &next)?;
        self.medications = next;

        let added = self.medications.last();
        if let Some(med) = added {
            debug!("Added medication {} at {}", med.name, med.time);
        }
        Ok(added)
    }

    pub fn remove_medication(&mut self, id: &str) -> AppResult<Medication> {
        let index = self.index_of(id)?;
        let mut next = self.medications.clone();
        let removed = next.remove(index);
        self.store.save(MEDICATIONS_KEY, &next)?;
        self.medications = next;
        Ok(removed)
    }

    /// Flip the taken mark for `day`. Returns whether the dose is now taken.
    pub fn toggle_taken(&mut self, id: &str, day: NaiveDate) -> AppResult<bool> {
        let index = self.index_of(id)?;
        let mut next = self.medications.clone();
        let history = &mut next[index].history;
        let taken = if let Some(pos) = history.iter().position(|d| *d == day) {
            history.remove(pos);
            false
        } else {
            history.push(day);
            true
        };
        self.store.save(MEDICATIONS_KEY, &next)?;
        self.medications = next;
        Ok(taken)
    }

    pub fn record_symptoms(
        &mut self,
        day: NaiveDate,
        pain_level: u8,
        urgency: Urgency,
        discomfort: Discomfort,
        notes: Option<String>,
    ) -> AppResult<&SymptomLog> {
        if pain_level > MAX_PAIN_LEVEL {
            return Err(AppError::ValidationError(format!(
                "pain level must be between 0 and {}, got {}",
                MAX_PAIN_LEVEL, pain_level
            )));
        }
        let notes = notes.filter(|n| !n.trim().is_empty());

        let mut next = self.logs.clone();
        next.push(SymptomLog {
            id: Uuid::new_v4().to_string(),
            date: day,
            pain_level,
            urgency,
            discomfort,
            notes,
        });
        self.store.save(SYMPTOM_LOGS_KEY, &next)?;
        self.logs = next;
        self.logs
            .last()
            .ok_or_else(|| AppError::Internal("symptom log vanished after insert".to_string()))
    }

    pub fn summary(&self, today: NaiveDate) -> AdherenceSummary {
        let total = self.medications.len();
        let taken = self.medications.iter().filter(|m| m.taken_on(today)).count();
        let progress_percent = if total > 0 {
            ((taken as f64 / total as f64) * 100.0).round() as u8
        } else {
            0
        };
        AdherenceSummary {
            date: today,
            total,
            taken,
            progress_percent,
            logged_today: self.logs.iter().any(|l| l.date == today),
            streak_days: self.streak(today),
        }
    }

    /// Consecutive fully-taken days ending today, or ending yesterday when
    /// today is not complete yet.
    pub fn streak(&self, today: NaiveDate) -> u32 {
        if self.medications.is_empty() {
            return 0;
        }
        let complete = |day: NaiveDate| self.medications.iter().all(|m| m.taken_on(day));

        let mut day = if complete(today) {
            today
        } else {
            match today.pred_opt() {
                Some(yesterday) => yesterday,
                None => return 0,
            }
        };
        let mut streak = 0;
        while complete(day) {
            streak += 1;
            match day.pred_opt() {
                Some(previous) => day = previous,
                None => break,
            }
        }
        streak
    }

    /// Pain levels of the last `count` diary entries, oldest first.
    pub fn pain_report(&self, count: usize) -> Vec<(NaiveDate, u8)> {
        let skip = self.logs.len().saturating_sub(count);
        self.logs
            .iter()
            .skip(skip)
            .map(|log| (log.date, log.pain_level))
            .collect()
    }

    fn index_of(&self, id: &str) -> AppResult<usize> {
        self.medications
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| AppError::NotFound(format!("medication {}", id)))
    }
}

/// Accept `HH:MM` (24h) and return it zero-padded.
fn normalize_time(time: &str) -> AppResult<String> {
    let parsed = NaiveTime::parse_from_str(time.trim(), "%H:%M").map_err(|_| {
        AppError::ValidationError(format!("time must be HH:MM, got {:?}", time))
    })?;
    Ok(parsed.format("%H:%M").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn journal(dir: &tempfile::TempDir) -> Journal {
        Journal::load(LocalStore::open(dir.path()).unwrap()).unwrap()
    }

    #[test]
    fn test_fresh_store_starts_with_default_regimen() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(&dir);
        let ids: Vec<&str> = journal.medications().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["med_prost_cap", "med_prost_drop"]);
        assert!(journal.symptom_logs().is_empty());
    }

    #[test]
    fn test_mutations_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut journal = journal(&dir);
            journal.add_medication("Vitamina D", "1 gota", "7:30").unwrap();
            assert!(journal.toggle_taken("med_prost_cap", day(14)).unwrap());
            journal
                .record_symptoms(day(14), 3, Urgency::Low, Discomfort::Mild, Some("ok".to_string()))
                .unwrap();
        }

        let journal = journal(&dir);
        assert_eq!(journal.medications().len(), 3);
        assert_eq!(journal.medications()[2].time, "07:30");
        assert!(journal.medications()[0].taken_on(day(14)));
        assert_eq!(journal.symptom_logs()[0].notes.as_deref(), Some("ok"));
    }

    #[test]
    fn test_blank_name_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = journal(&dir);
        assert!(journal.add_medication("  ", "x", "08:00").unwrap().is_none());
        assert_eq!(journal.medications().len(), 2);
    }

    #[test]
    fn test_bad_time_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = journal(&dir);
        let err = journal.add_medication("Chá", "1 xícara", "25:00").unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn test_toggle_twice_unmarks() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = journal(&dir);
        assert!(journal.toggle_taken("med_prost_drop", day(14)).unwrap());
        assert!(!journal.toggle_taken("med_prost_drop", day(14)).unwrap());
        assert!(journal.medications()[1].history.is_empty());
    }

    #[test]
    fn test_unknown_medication_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = journal(&dir);
        assert_eq!(journal.toggle_taken("nope", day(1)).unwrap_err().kind(), "not_found");
        assert_eq!(journal.remove_medication("nope").unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_remove_medication() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = journal(&dir);
        let removed = journal.remove_medication("med_prost_cap").unwrap();
        assert_eq!(removed.name, "Prosterite Cápsulas");
        assert_eq!(journal.medications().len(), 1);
    }

    #[test]
    fn test_pain_level_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = journal(&dir);
        assert!(journal
            .record_symptoms(day(1), 11, Urgency::High, Discomfort::Intense, None)
            .is_err());
        assert!(journal
            .record_symptoms(day(1), 10, Urgency::High, Discomfort::Intense, None)
            .is_ok());
    }

    #[test]
    fn test_schedule_sorted_by_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = journal(&dir);
        journal.add_medication("Noite", "", "22:15").unwrap();
        journal.add_medication("Madrugada", "", "06:00").unwrap();

        let times: Vec<&str> = journal.schedule().iter().map(|m| m.time.as_str()).collect();
        assert_eq!(times, vec!["06:00", "08:00", "20:00", "22:15"]);
    }

    #[test]
    fn test_summary_progress_and_streak() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = journal(&dir);
        for d in [11, 12, 13] {
            journal.toggle_taken("med_prost_cap", day(d)).unwrap();
            journal.toggle_taken("med_prost_drop", day(d)).unwrap();
        }
        journal.toggle_taken("med_prost_cap", day(14)).unwrap();

        let summary = journal.summary(day(14));
        assert_eq!(summary.taken, 1);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.progress_percent, 50);
        assert!(!summary.logged_today);
        // Today is still open, so the run through yesterday counts.
        assert_eq!(summary.streak_days, 3);

        journal.toggle_taken("med_prost_drop", day(14)).unwrap();
        assert_eq!(journal.streak(day(14)), 4);
        // A missed day breaks the run.
        assert_eq!(journal.streak(day(16)), 0);
    }

    #[test]
    fn test_pain_report_takes_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = journal(&dir);
        for (i, pain) in [1u8, 2, 3, 4, 5, 6, 7, 8, 9].iter().enumerate() {
            journal
                .record_symptoms(day(i as u32 + 1), *pain, Urgency::Medium, Discomfort::Mild, None)
                .unwrap();
        }
        let report = journal.pain_report(7);
        assert_eq!(report.len(), 7);
        assert_eq!(report[0], (day(3), 3));
        assert_eq!(report[6], (day(9), 9));
        assert!(journal.summary(day(9)).logged_today);
    }
}
