//! CSV rendering and export files.

use crate::business_store::{BusinessRecord, SubsectorEntry};
use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const BUSINESS_CSV_HEADERS: [&str; 9] = [
    "Business Name",
    "Phone Number",
    "Address",
    "Email",
    "Website",
    "Rating",
    "Number of Reviews",
    "Subsector",
    "Date Scraped",
];

const EMAIL_CSV_HEADERS: [&str; 4] = ["Business Name", "Email", "Website", "Subsector"];

const SUBSECTOR_CSV_HEADERS: [&str; 3] = ["Subsector", "Scraped Successfully", "Total Records Found"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Invalid export type")]
    InvalidType,

    #[error("Invalid export format")]
    InvalidFormat,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Businesses,
    Subsectors,
    Emails,
}

impl ExportKind {
    pub fn parse(s: &str) -> Result<Self, ExportError> {
        match s {
            "businesses" => Ok(ExportKind::Businesses),
            "subsectors" => Ok(ExportKind::Subsectors),
            "emails" => Ok(ExportKind::Emails),
            _ => Err(ExportError::InvalidType),
        }
    }

    /// Base name of the export file, without extension.
    pub fn file_stem(&self, subsector: Option<&str>) -> String {
        let scope = subsector
            .map(sanitize_file_part)
            .filter(|s| !s.is_empty());
        match (self, scope) {
            (ExportKind::Businesses, Some(s)) => format!("leeds_{}_businesses", s),
            (ExportKind::Businesses, None) => "leeds_all_businesses".to_string(),
            (ExportKind::Subsectors, _) => "leeds_subsectors".to_string(),
            (ExportKind::Emails, Some(s)) => format!("leeds_{}_emails", s),
            (ExportKind::Emails, None) => "leeds_all_emails".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Result<Self, ExportError> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(ExportError::InvalidFormat),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

fn sanitize_file_part(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn csv_writer<W: std::io::Write>(out: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, ExportError> {
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn business_row(record: &BusinessRecord) -> [String; 9] {
    [
        record.businessname.clone().unwrap_or_default(),
        record
            .phonenumber
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_default(),
        record.address.clone().unwrap_or_default(),
        record.email.join("; "),
        record.website.clone().unwrap_or_default(),
        record.stars.clone().unwrap_or_default(),
        record
            .numberofreviews
            .map(|n| n.to_string())
            .unwrap_or_default(),
        record.subsector.clone().unwrap_or_default(),
        record
            .scraped_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
    ]
}

/// Businesses as CSV with one header row and nine fields per row.
pub fn businesses_csv(records: &[BusinessRecord]) -> Result<String, ExportError> {
    let mut writer = csv_writer(Vec::new());
    writer.write_record(BUSINESS_CSV_HEADERS)?;
    for record in records {
        writer.write_record(business_row(record))?;
    }
    finish(writer)
}

pub fn emails_csv(records: &[BusinessRecord]) -> Result<String, ExportError> {
    let mut writer = csv_writer(Vec::new());
    writer.write_record(EMAIL_CSV_HEADERS)?;
    for record in records {
        writer.write_record([
            record.businessname.as_deref().unwrap_or_default(),
            record.email.join("; ").as_str(),
            record.website.as_deref().unwrap_or_default(),
            record.subsector.as_deref().unwrap_or_default(),
        ])?;
    }
    finish(writer)
}

pub fn subsectors_csv(entries: &[SubsectorEntry]) -> Result<String, ExportError> {
    let mut writer = csv_writer(Vec::new());
    writer.write_record(SUBSECTOR_CSV_HEADERS)?;
    for entry in entries {
        writer.write_record([
            entry.subsector.clone(),
            entry.scrapedsuccessfully.to_string(),
            entry.totalrecordsfound.to_string(),
        ])?;
    }
    finish(writer)
}

#[derive(Debug, Serialize)]
struct EmailExportRow<'a> {
    #[serde(rename = "_id")]
    id: &'a str,
    businessname: Option<&'a str>,
    email: &'a [String],
    website: Option<&'a str>,
    subsector: Option<&'a str>,
}

/// Rendered export ready to be written to disk.
pub enum ExportData {
    Businesses(Vec<BusinessRecord>),
    Emails(Vec<BusinessRecord>),
    Subsectors(Vec<SubsectorEntry>),
}

impl ExportData {
    pub fn len(&self) -> usize {
        match self {
            ExportData::Businesses(r) | ExportData::Emails(r) => r.len(),
            ExportData::Subsectors(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn render(&self, format: ExportFormat) -> Result<String, ExportError> {
        match (self, format) {
            (ExportData::Businesses(r), ExportFormat::Json) => Ok(serde_json::to_string_pretty(r)?),
            (ExportData::Subsectors(s), ExportFormat::Json) => Ok(serde_json::to_string_pretty(s)?),
            (ExportData::Emails(r), ExportFormat::Json) => {
                let rows: Vec<EmailExportRow> = r
                    .iter()
                    .map(|b| EmailExportRow {
                        id: &b.id,
                        businessname: b.businessname.as_deref(),
                        email: &b.email,
                        website: b.website.as_deref(),
                        subsector: b.subsector.as_deref(),
                    })
                    .collect();
                Ok(serde_json::to_string_pretty(&rows)?)
            }
            (ExportData::Businesses(r), ExportFormat::Csv) => businesses_csv(r),
            (ExportData::Emails(r), ExportFormat::Csv) => emails_csv(r),
            (ExportData::Subsectors(s), ExportFormat::Csv) => subsectors_csv(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedFile {
    pub filename: String,
    pub path: PathBuf,
    pub count: usize,
}

/// Writes export files into the exports directory, creating it on demand.
#[derive(Debug, Clone)]
pub struct ExportWriter {
    exports_dir: PathBuf,
}

impl ExportWriter {
    pub fn new(exports_dir: impl Into<PathBuf>) -> Self {
        Self {
            exports_dir: exports_dir.into(),
        }
    }

    pub fn exports_dir(&self) -> &Path {
        &self.exports_dir
    }

    pub async fn write(
        &self,
        stem: &str,
        format: ExportFormat,
        data: &ExportData,
    ) -> Result<ExportedFile, ExportError> {
        let content = data.render(format)?;
        tokio::fs::create_dir_all(&self.exports_dir).await?;
        let filename = format!("{}.{}", stem, format.extension());
        let path = self.exports_dir.join(&filename);
        tokio::fs::write(&path, content).await?;
        info!("Exported {} records to {:?}", data.len(), path);
        Ok(ExportedFile {
            filename,
            path,
            count: data.len(),
        })
    }
}

/// Download name for the restaurant CSV export.
pub fn restaurants_csv_filename(date: NaiveDate) -> String {
    format!("leeds_restaurants_{}.csv", date.format("%Y-%m-%d"))
}
