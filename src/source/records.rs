//! Boundary validation: loosely-typed source documents are converted into
//! strict record types here, before any migrator logic runs. Every failure
//! surfaces as a single typed `RecordError` carrying the document path and
//! offending field.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::errors::RecordError;
use crate::source::SourceDoc;

// --- field extraction helpers -------------------------------------------

fn field<'a>(doc: &'a SourceDoc, name: &str) -> Option<&'a Value> {
    doc.data.get(name).filter(|v| !v.is_null())
}

pub fn req_str(doc: &SourceDoc, name: &'static str) -> Result<String, RecordError> {
    opt_str(doc, name).ok_or_else(|| RecordError::missing(&doc.path, name))
}

pub fn opt_str(doc: &SourceDoc, name: &'static str) -> Option<String> {
    field(doc, name)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn opt_bool(doc: &SourceDoc, name: &'static str, default: bool) -> bool {
    field(doc, name).and_then(|v| v.as_bool()).unwrap_or(default)
}

/// Integers arrive either as JSON numbers or as numeric strings; both are
/// accepted everywhere an id is expected.
fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn req_i64(doc: &SourceDoc, name: &'static str) -> Result<i64, RecordError> {
    let v = field(doc, name).ok_or_else(|| RecordError::missing(&doc.path, name))?;
    value_as_i64(v).ok_or_else(|| RecordError::invalid(&doc.path, name, &v.to_string()))
}

pub fn opt_i64(doc: &SourceDoc, name: &'static str) -> Result<Option<i64>, RecordError> {
    match field(doc, name) {
        None => Ok(None),
        Some(v) => value_as_i64(v)
            .map(Some)
            .ok_or_else(|| RecordError::invalid(&doc.path, name, &v.to_string())),
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    // Plain dates or full timestamps; Firestore exports carry both.
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

pub fn req_date(doc: &SourceDoc, name: &'static str) -> Result<NaiveDate, RecordError> {
    let raw = req_str(doc, name)?;
    parse_date(&raw).ok_or_else(|| RecordError::invalid(&doc.path, name, &raw))
}

pub fn opt_date(doc: &SourceDoc, name: &'static str) -> Result<Option<NaiveDate>, RecordError> {
    match opt_str(doc, name) {
        None => Ok(None),
        Some(raw) => parse_date(&raw)
            .map(Some)
            .ok_or_else(|| RecordError::invalid(&doc.path, name, &raw)),
    }
}

fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        // Epoch milliseconds, the other shape Firestore exports produce.
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

pub fn req_ts(doc: &SourceDoc, name: &'static str) -> Result<DateTime<Utc>, RecordError> {
    let v = field(doc, name).ok_or_else(|| RecordError::missing(&doc.path, name))?;
    parse_timestamp(v).ok_or_else(|| RecordError::invalid(&doc.path, name, &v.to_string()))
}

pub fn opt_ts(doc: &SourceDoc, name: &'static str) -> Result<Option<DateTime<Utc>>, RecordError> {
    match field(doc, name) {
        None => Ok(None),
        Some(v) => parse_timestamp(v)
            .map(Some)
            .ok_or_else(|| RecordError::invalid(&doc.path, name, &v.to_string())),
    }
}

pub fn str_list(doc: &SourceDoc, name: &'static str) -> Vec<String> {
    field(doc, name)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

// --- strict record types -------------------------------------------------

#[derive(Debug, Clone)]
pub struct CountryDoc {
    pub code: String,
    pub name: String,
    pub flag: Option<String>,
    pub in_football_manager: bool,
}

impl CountryDoc {
    pub fn parse(doc: &SourceDoc) -> Result<Self, RecordError> {
        Ok(Self {
            code: doc.id.trim().to_uppercase(),
            name: req_str(doc, "name")?,
            flag: opt_str(doc, "flag"),
            in_football_manager: opt_bool(doc, "inFootballManager", false),
        })
    }
}

#[derive(Debug, Clone)]
pub struct GameDoc {
    pub name: String,
    pub short_name: Option<String>,
    pub version: Option<String>,
    pub platform: Option<String>,
    pub variant: Option<String>,
    pub is_active: bool,
    pub sort_order: i64,
}

impl GameDoc {
    pub fn parse(doc: &SourceDoc) -> Result<Self, RecordError> {
        Ok(Self {
            name: req_str(doc, "name")?,
            short_name: opt_str(doc, "shortName"),
            version: opt_str(doc, "version"),
            platform: opt_str(doc, "platform"),
            variant: opt_str(doc, "variant"),
            is_active: opt_bool(doc, "isActive", true),
            sort_order: opt_i64(doc, "sortOrder")?.unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TeamDoc {
    pub id: i64,
    pub name: String,
    pub logo: Option<String>,
    pub national: bool,
    pub country_code: Option<String>,
    pub coordinates: Option<String>,
    pub is_female: bool,
}

impl TeamDoc {
    pub fn parse(doc: &SourceDoc) -> Result<Self, RecordError> {
        let id = doc
            .id
            .trim()
            .parse::<i64>()
            .map_err(|_| RecordError::invalid(&doc.path, "id", &doc.id))?;
        Ok(Self {
            id,
            name: req_str(doc, "name")?,
            logo: opt_str(doc, "logo"),
            national: opt_bool(doc, "national", false),
            country_code: opt_str(doc, "countryCode").map(|c| c.to_uppercase()),
            coordinates: opt_str(doc, "coordinates"),
            is_female: opt_bool(doc, "isFemale", false),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SaveDoc {
    pub id: String,
    pub game: String,
    pub name: Option<String>,
    pub current_club: Option<String>,
    pub current_nt: Option<String>,
    pub current_league: Option<String>,
    pub current_date: Option<NaiveDate>,
}

impl SaveDoc {
    pub fn parse(doc: &SourceDoc) -> Result<Self, RecordError> {
        Ok(Self {
            id: doc.id.clone(),
            game: req_str(doc, "game")?,
            name: opt_str(doc, "name"),
            current_club: opt_str(doc, "currentClub"),
            current_nt: opt_str(doc, "currentNT"),
            current_league: opt_str(doc, "currentLeague"),
            current_date: opt_date(doc, "currentDate")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CareerStintDoc {
    pub team_id: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_national: bool,
}

impl CareerStintDoc {
    pub fn parse(doc: &SourceDoc) -> Result<Self, RecordError> {
        Ok(Self {
            team_id: req_str(doc, "teamId")?,
            start_date: req_date(doc, "startDate")?,
            end_date: opt_date(doc, "endDate")?,
            is_national: opt_bool(doc, "isNational", false),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LeagueResultDoc {
    pub competition_id: String,
    pub position: i64,
    pub promoted: bool,
    pub relegated: bool,
}

#[derive(Debug, Clone)]
pub struct CupResultDoc {
    pub competition_id: String,
    pub reached_round: String,
}

#[derive(Debug, Clone)]
pub struct SeasonDoc {
    pub team_id: String,
    pub season: String,
    pub league_results: Vec<LeagueResultDoc>,
    pub cup_results: Vec<CupResultDoc>,
}

impl SeasonDoc {
    pub fn parse(doc: &SourceDoc) -> Result<Self, RecordError> {
        let mut league_results = Vec::new();
        if let Some(items) = field(doc, "leagueResults").and_then(|v| v.as_array()) {
            for item in items {
                let sub = SourceDoc::new(
                    doc.id.clone(),
                    format!("{}/leagueResults", doc.path),
                    item.clone(),
                );
                league_results.push(LeagueResultDoc {
                    competition_id: comp_id_string(&sub)?,
                    position: req_i64(&sub, "position")?,
                    promoted: opt_bool(&sub, "promoted", false),
                    relegated: opt_bool(&sub, "relegated", false),
                });
            }
        }
        let mut cup_results = Vec::new();
        if let Some(items) = field(doc, "cupResults").and_then(|v| v.as_array()) {
            for item in items {
                let sub = SourceDoc::new(
                    doc.id.clone(),
                    format!("{}/cupResults", doc.path),
                    item.clone(),
                );
                cup_results.push(CupResultDoc {
                    competition_id: comp_id_string(&sub)?,
                    reached_round: req_str(&sub, "reachedRound")?,
                });
            }
        }
        Ok(Self {
            team_id: req_str(doc, "teamId")?,
            season: req_str(doc, "season")?,
            league_results,
            cup_results,
        })
    }
}

/// Competition references inside results arrive as strings or numbers; keep
/// them as strings here, numeric coercion happens in the migrator.
fn comp_id_string(doc: &SourceDoc) -> Result<String, RecordError> {
    let v = field(doc, "competitionId")
        .ok_or_else(|| RecordError::missing(&doc.path, "competitionId"))?;
    match v {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(RecordError::invalid(
            &doc.path,
            "competitionId",
            &other.to_string(),
        )),
    }
}

#[derive(Debug, Clone)]
pub struct ChallengeGoalDoc {
    pub id: String,
    pub description: String,
    pub competition_id: Option<String>,
    pub country_id: Option<String>,
    pub team_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ChallengeDoc {
    pub name: String,
    pub description: Option<String>,
    pub bonus: Option<String>,
    pub goals: Vec<ChallengeGoalDoc>,
}

impl ChallengeDoc {
    pub fn parse(doc: &SourceDoc) -> Result<Self, RecordError> {
        let mut goals = Vec::new();
        if let Some(items) = field(doc, "goals").and_then(|v| v.as_array()) {
            for (idx, item) in items.iter().enumerate() {
                let sub = SourceDoc::new(
                    doc.id.clone(),
                    format!("{}/goals[{}]", doc.path, idx),
                    item.clone(),
                );
                goals.push(ChallengeGoalDoc {
                    id: req_str(&sub, "id")?,
                    description: req_str(&sub, "description")?,
                    competition_id: opt_str(&sub, "competitionId").or_else(|| {
                        field(&sub, "competitionId")
                            .and_then(value_as_i64)
                            .map(|n| n.to_string())
                    }),
                    country_id: opt_str(&sub, "countryId").map(|c| c.to_uppercase()),
                    team_ids: str_list(&sub, "teams"),
                });
            }
        }
        Ok(Self {
            name: req_str(doc, "name")?,
            description: opt_str(doc, "description"),
            bonus: opt_str(doc, "bonus"),
            goals,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChallengeProgressDoc {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_goals: Vec<String>,
}

impl ChallengeProgressDoc {
    pub fn parse(doc: &SourceDoc) -> Result<Self, RecordError> {
        Ok(Self {
            name: req_str(doc, "name")?,
            started_at: req_ts(doc, "startedAt")?,
            completed_at: opt_ts(doc, "completedAt")?,
            completed_goals: str_list(doc, "completedGoals"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TrophyDoc {
    pub team_id: String,
    pub competition_id: String,
    pub season: String,
}

impl TrophyDoc {
    pub fn parse(doc: &SourceDoc) -> Result<Self, RecordError> {
        let sub = doc;
        Ok(Self {
            team_id: req_str(sub, "teamId")?,
            competition_id: comp_id_string(sub)?,
            season: req_str(sub, "season")?,
        })
    }
}

/// Admin-curated competition record (the subset exposed in the app).
#[derive(Debug, Clone)]
pub struct AdminCompetitionDoc {
    pub external_id: i64,
    pub name: String,
    pub country_code: String,
    pub kind: String,
    pub priority: Option<i64>,
    pub grouped: bool,
    pub group_name: Option<String>,
    pub group_order: Option<i64>,
    pub is_active: bool,
}

impl AdminCompetitionDoc {
    pub fn parse(doc: &SourceDoc) -> Result<Self, RecordError> {
        Ok(Self {
            external_id: req_i64(doc, "externalId")?,
            name: req_str(doc, "name")?,
            country_code: req_str(doc, "countryCode")?.to_uppercase(),
            kind: req_str(doc, "type")?,
            priority: opt_i64(doc, "priority")?,
            grouped: opt_bool(doc, "grouped", false),
            group_name: opt_str(doc, "groupName"),
            group_order: opt_i64(doc, "groupOrder")?,
            is_active: opt_bool(doc, "isActive", true),
        })
    }

    /// Grouping key name: explicit group name when the record is marked
    /// grouped, else the record's own name (singleton group).
    pub fn effective_name(&self) -> &str {
        if self.grouped {
            if let Some(g) = &self.group_name {
                return g.as_str();
            }
        }
        &self.name
    }
}

/// Raw provider competition, the broader catalog the gap-filler scans.
#[derive(Debug, Clone)]
pub struct RawCompetitionDoc {
    pub id: i64,
    pub name: String,
    pub country_code: String,
    pub kind: String,
    pub priority: Option<i64>,
    /// Flagged by the admin tooling as relevant to the target game.
    pub applicable: bool,
    pub is_active: bool,
}

impl RawCompetitionDoc {
    pub fn parse(doc: &SourceDoc) -> Result<Self, RecordError> {
        let id = match doc.id.trim().parse::<i64>() {
            Ok(n) => n,
            Err(_) => req_i64(doc, "id")?,
        };
        Ok(Self {
            id,
            name: req_str(doc, "name")?,
            country_code: req_str(doc, "countryCode")?.to_uppercase(),
            kind: req_str(doc, "type")?,
            priority: opt_i64(doc, "priority")?,
            applicable: opt_bool(doc, "inFootballManager", false),
            is_active: opt_bool(doc, "isActive", true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(data: serde_json::Value) -> SourceDoc {
        SourceDoc::new("42", "teams/42", data)
    }

    #[test]
    fn numeric_fields_accept_strings_and_numbers() {
        let d = doc(json!({"externalId": "907", "name": "Eredivisie", "countryCode": "nl", "type": "league"}));
        let rec = AdminCompetitionDoc::parse(&d).unwrap();
        assert_eq!(rec.external_id, 907);
        assert_eq!(rec.country_code, "NL");

        let d = doc(json!({"externalId": 907, "name": "Eredivisie", "countryCode": "NL", "type": "league"}));
        assert_eq!(AdminCompetitionDoc::parse(&d).unwrap().external_id, 907);
    }

    #[test]
    fn missing_required_field_is_a_typed_error() {
        let d = doc(json!({"countryCode": "NL", "type": "league", "externalId": 1}));
        match AdminCompetitionDoc::parse(&d) {
            Err(RecordError::MissingField { field, .. }) => assert_eq!(field, "name"),
            other => panic!("expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn effective_name_prefers_group_name_only_when_grouped() {
        let grouped = AdminCompetitionDoc {
            external_id: 1,
            name: "Premier Division".into(),
            country_code: "IE".into(),
            kind: "league".into(),
            priority: None,
            grouped: true,
            group_name: Some("League of Ireland".into()),
            group_order: Some(1),
            is_active: true,
        };
        assert_eq!(grouped.effective_name(), "League of Ireland");

        let ungrouped = AdminCompetitionDoc {
            grouped: false,
            ..grouped.clone()
        };
        assert_eq!(ungrouped.effective_name(), "Premier Division");
    }

    #[test]
    fn timestamps_accept_rfc3339_and_epoch_millis() {
        let d = SourceDoc::new(
            "p1",
            "users/u/saves/s/challenges/p1",
            json!({"name": "Treble Winner", "startedAt": "2024-05-01T10:00:00Z"}),
        );
        let rec = ChallengeProgressDoc::parse(&d).unwrap();
        assert_eq!(rec.started_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");

        let d = SourceDoc::new(
            "p1",
            "users/u/saves/s/challenges/p1",
            json!({"name": "Treble Winner", "startedAt": 1714557600000i64}),
        );
        assert!(ChallengeProgressDoc::parse(&d).is_ok());
    }

    #[test]
    fn bad_date_is_invalid_not_missing() {
        let d = SourceDoc::new(
            "c1",
            "users/u/saves/s/career/c1",
            json!({"teamId": "10", "startDate": "yesterday"}),
        );
        match CareerStintDoc::parse(&d) {
            Err(RecordError::InvalidField { field, .. }) => assert_eq!(field, "startDate"),
            other => panic!("expected InvalidField, got {:?}", other),
        }
    }
}
