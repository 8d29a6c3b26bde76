//! Conversion of raw engine output into persisted run records.

use gds_core::{
    ColumnKey, ControlCurveVariant, EngineZone, GdsError, GdsResult, Megawatts, RawResultTable,
};
use serde::{Deserialize, Serialize};

/// Variables reported in MW / Mvar by the engine and persisted in W / var.
pub const POWER_VARIABLES: [&str; 12] = [
    "m:Pgen",
    "m:Qgen",
    "m:Pload",
    "m:Qload",
    "m:P:bus2",
    "m:Q:bus2",
    "m:Psum:bushv",
    "m:Qsum:bushv",
    "m:Psum:buslv",
    "m:Qsum:buslv",
    "m:Pflow",
    "m:Qflow",
];

pub fn is_power_variable(variable: &str) -> bool {
    POWER_VARIABLES.contains(&variable)
}

const FORMAT_NOTE: &str = "comment data format: active and reactive powers in Watts";

/// Malfunction part of a run's provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalfunctionFacts {
    pub terminals: Vec<String>,
    pub curve: ControlCurveVariant,
    /// RFC3339 in the engine zone
    pub time: String,
}

/// Provenance of one run, stored one fact per row in the metainfo column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run: usize,
    pub step_minutes: u32,
    pub start: String,
    pub end: String,
    pub malfunction: Option<MalfunctionFacts>,
    pub pv_terminals: Vec<String>,
    /// Every candidate terminal (PV presence datasets only).
    pub terminals: Option<Vec<String>>,
}

impl RunMetadata {
    /// The facts in row order.
    pub fn facts(&self) -> Vec<String> {
        let mut facts = vec![
            format!("simulation#{}", self.run),
            FORMAT_NOTE.to_string(),
            format!("step time in minutes: {}", self.step_minutes),
            format!("start time: {}", self.start),
            format!("end time: {}", self.end),
        ];
        if let Some(malfunction) = &self.malfunction {
            facts.push(format!(
                "terminals with malfunction: {}",
                json_list(&malfunction.terminals)
            ));
            facts.push(format!("type of malfunction: {}", malfunction.curve.label()));
            facts.push(format!("time of malfunction: {}", malfunction.time));
        }
        facts.push(format!("terminals with PVs: {}", json_list(&self.pv_terminals)));
        if let Some(terminals) = &self.terminals {
            facts.push(format!("terminals: {}", json_list(terminals)));
        }
        facts
    }

    /// Rebuild metadata from the non-empty cells of a metainfo column.
    pub fn parse(facts: &[String]) -> GdsResult<Self> {
        let run = facts
            .iter()
            .find_map(|f| f.strip_prefix("simulation#"))
            .ok_or_else(|| GdsError::Parse("run metadata lacks the simulation number".into()))?
            .trim()
            .parse()
            .map_err(|_| GdsError::Parse("run number is not an integer".into()))?;
        let step_minutes = required(facts, "step time in minutes")?
            .parse()
            .map_err(|_| GdsError::Parse("step time is not an integer".into()))?;
        let malfunction = match lookup(facts, "terminals with malfunction") {
            Some(terminals) => {
                let label = required(facts, "type of malfunction")?;
                Some(MalfunctionFacts {
                    terminals: parse_list(terminals)?,
                    curve: ControlCurveVariant::from_label(label).ok_or_else(|| {
                        GdsError::Parse(format!("unknown malfunction type '{label}'"))
                    })?,
                    time: required(facts, "time of malfunction")?.to_string(),
                })
            }
            None => None,
        };
        Ok(Self {
            run,
            step_minutes,
            start: required(facts, "start time")?.to_string(),
            end: required(facts, "end time")?.to_string(),
            malfunction,
            pv_terminals: parse_list(required(facts, "terminals with PVs")?)?,
            terminals: lookup(facts, "terminals").map(parse_list).transpose()?,
        })
    }
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn parse_list(value: &str) -> GdsResult<Vec<String>> {
    Ok(serde_json::from_str(value)?)
}

fn lookup<'a>(facts: &'a [String], key: &str) -> Option<&'a str> {
    facts.iter().find_map(|fact| {
        fact.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix(": "))
    })
}

fn required<'a>(facts: &'a [String], key: &str) -> GdsResult<&'a str> {
    lookup(facts, key).ok_or_else(|| GdsError::Parse(format!("run metadata lacks '{key}'")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordColumn {
    pub key: ColumnKey,
    pub values: Vec<f64>,
    /// Written without decimals.
    pub integral: bool,
}

/// One persisted trial: time index, measurement columns, metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Timestamps rendered in the engine zone
    pub index: Vec<String>,
    pub columns: Vec<RecordColumn>,
    pub metadata: RunMetadata,
}

impl RunRecord {
    pub fn rows(&self) -> usize {
        self.index.len()
    }

    pub fn column(&self, key: &ColumnKey) -> Option<&RecordColumn> {
        self.columns.iter().find(|c| &c.key == key)
    }

    /// Columns of `class` carrying `variable`, in table order.
    pub fn columns_for<'a>(
        &'a self,
        class: &'a str,
        variable: &'a str,
    ) -> impl Iterator<Item = &'a RecordColumn> + 'a {
        self.columns
            .iter()
            .filter(move |c| c.key.class == class && c.key.variable == variable)
    }

    /// The metainfo column cells, one per row, blank past the last fact.
    pub fn metainfo_cells(&self) -> Vec<String> {
        let mut cells = self.metadata.facts();
        cells.resize(self.rows(), String::new());
        cells
    }
}

/// Turns a harvested table into a [`RunRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultPostProcessor {
    reduce_size: bool,
}

impl ResultPostProcessor {
    pub fn new(reduce_size: bool) -> Self {
        Self { reduce_size }
    }

    pub fn process(
        &self,
        raw: RawResultTable,
        metadata: RunMetadata,
        zone: &EngineZone,
    ) -> GdsResult<RunRecord> {
        raw.validate()?;
        let facts = metadata.facts().len();
        if facts > raw.rows() {
            return Err(GdsError::Result(format!(
                "run {} has {} rows, too few for {facts} metadata entries",
                metadata.run,
                raw.rows()
            )));
        }
        let index = raw
            .timestamps
            .iter()
            .map(|t| zone.localize(*t).to_rfc3339())
            .collect();
        let columns = raw
            .columns
            .into_iter()
            .map(|column| {
                if !is_power_variable(&column.key.variable) {
                    return RecordColumn {
                        key: column.key,
                        values: column.values,
                        integral: false,
                    };
                }
                let values = column
                    .values
                    .into_iter()
                    .map(|mw| {
                        let watts = Megawatts(mw).to_watts();
                        if self.reduce_size {
                            watts.truncated() as f64
                        } else {
                            watts.value()
                        }
                    })
                    .collect();
                RecordColumn {
                    key: column.key,
                    values,
                    integral: self.reduce_size,
                }
            })
            .collect();
        Ok(RunRecord {
            index,
            columns,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use gds_core::RawColumn;

    fn raw(rows: usize, pgen: f64) -> RawResultTable {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        RawResultTable {
            timestamps: (0..rows).map(|i| t0 + Duration::minutes(15 * i as i64)).collect(),
            columns: vec![
                RawColumn {
                    key: ColumnKey::new("T1", "ElmTerm", "m:u"),
                    values: vec![1.01; rows],
                },
                RawColumn {
                    key: ColumnKey::new("T1", "ElmTerm", "m:Pgen"),
                    values: vec![pgen; rows],
                },
            ],
        }
    }

    fn metadata(malfunction: bool) -> RunMetadata {
        RunMetadata {
            run: 3,
            step_minutes: 15,
            start: "2024-01-01T00:00:00+00:00".into(),
            end: "2024-01-02T00:00:00+00:00".into(),
            malfunction: malfunction.then(|| MalfunctionFacts {
                terminals: vec!["T1".into()],
                curve: ControlCurveVariant::BrokenFlatQP,
                time: "2024-01-01T05:00:00+00:00".into(),
            }),
            pv_terminals: vec!["T1".into(), "T2".into()],
            terminals: None,
        }
    }

    #[test]
    fn power_columns_become_truncated_watts() {
        let record = ResultPostProcessor::new(true)
            .process(raw(10, 1.9999), metadata(true), &EngineZone::utc())
            .unwrap();
        let pgen = record
            .column(&ColumnKey::new("T1", "ElmTerm", "m:Pgen"))
            .unwrap();
        assert!(pgen.integral);
        assert_eq!(pgen.values[0], 1_999_900.0);
        let u = record.column(&ColumnKey::new("T1", "ElmTerm", "m:u")).unwrap();
        assert_eq!(u.values[0], 1.01);
        assert!(!u.integral);
    }

    #[test]
    fn truncation_drops_fraction_towards_zero() {
        let record = ResultPostProcessor::new(true)
            .process(raw(10, -0.0000017), metadata(false), &EngineZone::utc())
            .unwrap();
        let pgen = record
            .column(&ColumnKey::new("T1", "ElmTerm", "m:Pgen"))
            .unwrap();
        assert_eq!(pgen.values[0], -1.0);

        let full = ResultPostProcessor::new(false)
            .process(raw(10, -0.0000017), metadata(false), &EngineZone::utc())
            .unwrap();
        let pgen = full.column(&ColumnKey::new("T1", "ElmTerm", "m:Pgen")).unwrap();
        assert!((pgen.values[0] + 1.7).abs() < 1e-9);
    }

    #[test]
    fn too_few_rows_for_metadata_is_an_error() {
        let err = ResultPostProcessor::new(true)
            .process(raw(4, 0.0), metadata(true), &EngineZone::utc())
            .unwrap_err();
        assert!(matches!(err, GdsError::Result(_)));
    }

    #[test]
    fn metadata_facts_parse_back() {
        for malfunction in [true, false] {
            let meta = metadata(malfunction);
            assert_eq!(RunMetadata::parse(&meta.facts()).unwrap(), meta);
        }
        let mut pv = metadata(false);
        pv.terminals = Some(vec!["T1".into(), "T2".into(), "T3".into()]);
        let facts = pv.facts();
        assert_eq!(facts.last().unwrap(), r#"terminals: ["T1","T2","T3"]"#);
        assert_eq!(RunMetadata::parse(&facts).unwrap(), pv);
    }

    #[test]
    fn metainfo_cells_pad_to_row_count() {
        let record = ResultPostProcessor::new(true)
            .process(raw(12, 0.0), metadata(true), &EngineZone::utc())
            .unwrap();
        let cells = record.metainfo_cells();
        assert_eq!(cells.len(), 12);
        assert_eq!(cells[0], "simulation#3");
        assert_eq!(cells[5], r#"terminals with malfunction: ["T1"]"#);
        assert!(cells[11].is_empty());
    }
}
