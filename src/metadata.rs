use std::collections::{BTreeSet, HashMap};

use calamine::{Data, Reader, open_workbook_auto};
use camino::Utf8Path;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use serde::Serialize;

use crate::error::SubmitError;
use crate::fs_util;
use crate::template::Row;

pub const SHEET_NAME: &str = "sample_submission";

const ALIAS: &str = "sample_alias";
const TITLE: &str = "sample_title";
const TAX_ID: &str = "tax_id";
const SCIENTIFIC_NAME: &str = "scientific_name";
const PROJECT_NAME: &str = "project name";
const COLLECTION_DATE: &str = "collection date";
const LATITUDE: &str = "geographic location (latitude)";
const LONGITUDE: &str = "geographic location (longitude)";
const BROAD_CONTEXT: &str = "broad-scale environmental context";
const LOCAL_CONTEXT: &str = "local environmental context";
const MEDIUM: &str = "environmental medium";
const ELEVATION: &str = "elevation";
const LOCATION: &str = "geographic location (country and/or sea)";
const REGION_LOCALITY: &str = "geographic location (region and locality)";
const DEPTH: &str = "depth";

const REQUIRED_COLUMNS: [&str; 13] = [
    ALIAS,
    TITLE,
    TAX_ID,
    SCIENTIFIC_NAME,
    PROJECT_NAME,
    COLLECTION_DATE,
    LATITUDE,
    LONGITUDE,
    BROAD_CONTEXT,
    LOCAL_CONTEXT,
    MEDIUM,
    ELEVATION,
    LOCATION,
];

const MISSING_VALUE_TERMS: [&str; 4] = [
    "not collected",
    "not provided",
    "restricted access",
    "not applicable",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleRecord {
    pub alias: String,
    pub title: String,
    pub tax_id: String,
    pub scientific_name: String,
    pub project_name: String,
    pub collection_date: String,
    pub latitude: String,
    pub longitude: String,
    pub broad_context: String,
    pub local_context: String,
    pub medium: String,
    pub elevation: String,
    pub location: String,
    pub region_locality: Option<String>,
    pub depth: Option<String>,
}

impl SampleRecord {
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        let mut put = |key: &str, value: &str| {
            row.insert(key.to_string(), value.to_string());
        };
        put("SAMPLE_TITLE", &self.title);
        put("SAMPLE_ALIAS", &self.alias);
        put("ENV_TAX_ID", &self.tax_id);
        put("ENV_SCI_NAME", &self.scientific_name);
        put("PROJECT_NAME", &self.project_name);
        put("COLLECTION_DATE", &self.collection_date);
        put("LATITUDE", &self.latitude);
        put("LONGITUDE", &self.longitude);
        put("ENV_BROAD", &self.broad_context);
        put("ENV_LOCAL", &self.local_context);
        put("ENV_MEDIUM", &self.medium);
        put("ELEVATION", &self.elevation);
        put("LOC", &self.location);
        if let Some(region) = &self.region_locality {
            put("REGLOC", region);
        }
        if let Some(depth) = &self.depth {
            put("DEPTH", depth);
        }
        row
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
}

impl Cell {
    fn render(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(text) => text.trim().to_string(),
            Cell::Number(value) => format_number(*value),
            Cell::Date(value) => value.format("%Y-%m-%d").to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

pub fn load_metadata(path: &Utf8Path) -> Result<Vec<SampleRecord>, SubmitError> {
    fs_util::require_input(path)?;
    let extension = path.extension().unwrap_or_default().to_ascii_lowercase();
    let table = match extension.as_str() {
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => read_workbook(path)?,
        "csv" => read_delimited(path, b',')?,
        "tsv" | "txt" => read_delimited(path, b'\t')?,
        other => {
            return Err(SubmitError::MetadataFormat(format!(
                "unsupported metadata file type `{other}`: {path}"
            )));
        }
    };
    records_from_table(&table)
}

pub fn read_workbook(path: &Utf8Path) -> Result<RawTable, SubmitError> {
    let mut workbook = open_workbook_auto(path.as_std_path())
        .map_err(|err| SubmitError::MetadataFormat(format!("{path}: {err}")))?;
    if !workbook.sheet_names().iter().any(|name| name == SHEET_NAME) {
        return Err(SubmitError::MetadataFormat(format!(
            "{path} has no sheet named {SHEET_NAME}"
        )));
    }
    let range = workbook
        .worksheet_range(SHEET_NAME)
        .map_err(|err| SubmitError::MetadataFormat(format!("{path}: {err}")))?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|header| header.iter().map(|cell| workbook_cell(cell).render()).collect())
        .unwrap_or_default();
    let rows = rows
        .map(|row| row.iter().map(workbook_cell).collect())
        .collect();
    Ok(RawTable { headers, rows })
}

fn workbook_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty => Cell::Empty,
        Data::String(text) | Data::DateTimeIso(text) | Data::DurationIso(text) => {
            Cell::Text(text.clone())
        }
        Data::Int(value) => Cell::Number(*value as f64),
        Data::Float(value) => Cell::Number(*value),
        Data::Bool(value) => Cell::Text(if *value { "True" } else { "False" }.to_string()),
        Data::DateTime(value) => match value.as_datetime() {
            Some(datetime) => Cell::Date(datetime),
            None => Cell::Number(value.as_f64()),
        },
        Data::Error(err) => Cell::Text(format!("{err:?}")),
    }
}

pub fn read_delimited(path: &Utf8Path, delimiter: u8) -> Result<RawTable, SubmitError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path.as_std_path())
        .map_err(|err| SubmitError::MetadataFormat(format!("{path}: {err}")))?;
    let headers = reader
        .headers()
        .map_err(|err| SubmitError::MetadataFormat(format!("{path}: {err}")))?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| SubmitError::MetadataFormat(format!("{path}: {err}")))?;
        rows.push(
            record
                .iter()
                .map(|value| {
                    if value.trim().is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(value.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(RawTable { headers, rows })
}

pub fn records_from_table(table: &RawTable) -> Result<Vec<SampleRecord>, SubmitError> {
    let columns: HashMap<&str, usize> = table
        .headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim(), idx))
        .collect();
    if let Some(missing) = REQUIRED_COLUMNS
        .iter()
        .find(|column| !columns.contains_key(**column))
    {
        return Err(SubmitError::MetadataFormat(format!(
            "missing column `{missing}` in sheet {SHEET_NAME}"
        )));
    }

    let mut seen = BTreeSet::new();
    let mut records = Vec::new();
    // Sheet row numbers: header is 1, the reserved row is 2.
    for (offset, row) in table.rows.iter().enumerate().skip(1) {
        let line = offset + 2;
        let cell = |name: &str| {
            columns
                .get(name)
                .and_then(|idx| row.get(*idx))
                .unwrap_or(&Cell::Empty)
        };
        let text = |name: &str| cell(name).render();

        let alias = text(ALIAS);
        if alias.is_empty() {
            continue;
        }
        if !seen.insert(alias.clone()) {
            return Err(SubmitError::DuplicateAlias {
                document: "metadata sheet".to_string(),
                alias,
            });
        }
        let optional = |name: &str| columns.contains_key(name).then(|| text(name));

        records.push(SampleRecord {
            title: text(TITLE),
            tax_id: text(TAX_ID),
            scientific_name: text(SCIENTIFIC_NAME),
            project_name: text(PROJECT_NAME),
            collection_date: normalize_date(cell(COLLECTION_DATE))
                .map_err(|message| SubmitError::MetadataFormat(format!("row {line}: {message}")))?,
            latitude: text(LATITUDE),
            longitude: text(LONGITUDE),
            broad_context: text(BROAD_CONTEXT),
            local_context: text(LOCAL_CONTEXT),
            medium: text(MEDIUM),
            elevation: text(ELEVATION),
            location: text(LOCATION),
            region_locality: optional(REGION_LOCALITY),
            depth: optional(DEPTH),
            alias,
        });
    }
    Ok(records)
}

fn is_missing_value_term(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    MISSING_VALUE_TERMS.contains(&lower.as_str()) || lower.starts_with("missing")
}

/// Full dates become `YYYY-MM-DD`; bare years and year-months, as well as
/// INSDC missing-value terms, are kept as written.
fn normalize_date(cell: &Cell) -> Result<String, String> {
    match cell {
        Cell::Empty => Err("empty collection date".to_string()),
        Cell::Date(value) => Ok(value.format("%Y-%m-%d").to_string()),
        Cell::Number(serial) => {
            let epoch = NaiveDate::from_ymd_opt(1899, 12, 30).ok_or("invalid epoch")?;
            TimeDelta::try_days(serial.trunc() as i64)
                .and_then(|offset| epoch.checked_add_signed(offset))
                .map(|date| date.format("%Y-%m-%d").to_string())
                .ok_or_else(|| format!("collection date serial {serial} out of range"))
        }
        Cell::Text(raw) => {
            let value = raw.trim();
            if is_missing_value_term(value) || is_partial_date(value) {
                return Ok(value.to_string());
            }
            parse_date(value)
                .map(|date| date.format("%Y-%m-%d").to_string())
                .ok_or_else(|| format!("unrecognised collection date `{value}`"))
        }
    }
}

fn is_partial_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    match bytes.len() {
        4 => bytes.iter().all(u8::is_ascii_digit),
        7 => {
            bytes[..4].iter().all(u8::is_ascii_digit)
                && bytes[4] == b'-'
                && bytes[5..].iter().all(u8::is_ascii_digit)
        }
        _ => false,
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    const ZONED_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f%z",
        "%Y-%m-%d %H:%M:%S%.f%z",
        "%Y-%m-%dT%H:%M%z",
        "%Y-%m-%d %H:%M%z",
    ];
    const DATETIME_FORMATS: [&str; 5] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d.%m.%Y"];

    // The date is kept as written, whatever the offset.
    DateTime::parse_from_rfc3339(value)
        .ok()
        .or_else(|| {
            ZONED_FORMATS
                .iter()
                .find_map(|format| DateTime::parse_from_str(value, format).ok())
        })
        .map(|datetime| datetime.naive_local())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        })
        .map(|datetime| datetime.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn table(rows: &[&[&str]]) -> RawTable {
        let mut headers: Vec<String> = REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect();
        headers.push(DEPTH.to_string());
        RawTable {
            headers,
            rows: rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|value| {
                            if value.is_empty() {
                                Cell::Empty
                            } else {
                                Cell::Text(value.to_string())
                            }
                        })
                        .collect()
                })
                .collect(),
        }
    }

    const SPACER: &[&str] = &["# reserved"];

    fn sample<'a>(alias: &'a str, date: &'a str) -> Vec<&'a str> {
        vec![
            alias, "title", "9606", "Homo sapiens", "PRJ1", date, "45.1", "9.2", "soil", "field",
            "sand", "120", "Italy", "5",
        ]
    }

    #[test]
    fn drops_spacer_and_empty_aliases() {
        let s1 = sample("S1", "2022-05-01 10:30:00");
        let empty = sample("", "2022-05-01");
        let s2 = sample("S2", "not collected");
        let records = records_from_table(&table(&[SPACER, &s1[..], &empty[..], &s2[..]])).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].alias, "S1");
        assert_eq!(records[0].collection_date, "2022-05-01");
        assert_eq!(records[0].depth.as_deref(), Some("5"));
        assert_eq!(records[0].region_locality, None);
        assert_eq!(records[1].collection_date, "not collected");
    }

    #[test]
    fn first_data_row_is_always_reserved() {
        let s1 = sample("S1", "2022-05-01");
        let records = records_from_table(&table(&[&s1[..]])).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn duplicate_alias() {
        let s1 = sample("S1", "2022-05-01");
        assert_matches!(
            records_from_table(&table(&[SPACER, &s1[..], &s1[..]])),
            Err(SubmitError::DuplicateAlias { alias, .. }) if alias == "S1"
        );
    }

    #[test]
    fn missing_column() {
        let mut raw = table(&[]);
        raw.headers.retain(|header| header != TAX_ID);
        assert_matches!(
            records_from_table(&raw),
            Err(SubmitError::MetadataFormat(message)) if message.contains("tax_id")
        );
    }

    #[test]
    fn bad_date_names_row() {
        let s1 = sample("S1", "yesterday");
        assert_matches!(
            records_from_table(&table(&[SPACER, &s1[..]])),
            Err(SubmitError::MetadataFormat(message)) if message.starts_with("row 3")
        );
    }

    #[test]
    fn time_of_day_is_dropped() {
        for raw in [
            "2021-06-01 10:30",
            "2021-06-01T10:30",
            "2021-06-01T10:30:00+02:00",
            "2021-06-01 23:30:00+0200",
            "2021-06-01T10:30:00.250Z",
        ] {
            let s1 = sample("S1", raw);
            let records = records_from_table(&table(&[SPACER, &s1[..]])).unwrap();
            assert_eq!(records[0].collection_date, "2021-06-01", "{raw}");
        }
    }

    #[test]
    fn huge_serial_is_out_of_range() {
        assert_matches!(
            normalize_date(&Cell::Number(1e12)),
            Err(message) if message.contains("out of range")
        );
        assert_matches!(normalize_date(&Cell::Number(1e300)), Err(_));
    }

    #[test]
    fn numbers_and_dates_render_plainly() {
        assert_eq!(Cell::Number(9606.0).render(), "9606");
        assert_eq!(Cell::Number(45.25).render(), "45.25");
        assert_eq!(normalize_date(&Cell::Number(44682.0)).unwrap(), "2022-05-01");
        assert_eq!(normalize_date(&Cell::Text("2021-07".to_string())).unwrap(), "2021-07");
    }

    #[test]
    fn row_has_template_fields() {
        let s1 = sample("S1", "2022-05-01");
        let records = records_from_table(&table(&[SPACER, &s1[..]])).unwrap();
        let row = records[0].to_row();
        assert_eq!(row["SAMPLE_ALIAS"], "S1");
        assert_eq!(row["ENV_TAX_ID"], "9606");
        assert_eq!(row["DEPTH"], "5");
        assert!(!row.contains_key("REGLOC"));
    }
}
