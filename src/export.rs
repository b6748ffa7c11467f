use crate::model::{InteractionKind, InteractionRecord, SubjectId};
use crate::orchestrator::Extraction;
use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const ALL_INTERACTIONS: &str = "All Interactions";

const USER_COLUMNS: [&str; 4] = ["username", "name", "user_id", "interaction_type"];
const REPLY_COLUMNS: [&str; 3] = ["reply_text", "reply_tweet_id", "created_at"];

pub trait TableExporter {
    fn export(&self, extraction: &Extraction, destination: &Path) -> anyhow::Result<()>;
}

pub struct XlsxExporter;

impl TableExporter for XlsxExporter {
    fn export(&self, extraction: &Extraction, destination: &Path) -> anyhow::Result<()> {
        let mut workbook = Workbook::new();
        let header = Format::new().set_bold();

        let all: Vec<&InteractionRecord> = extraction.all_interactions().collect();
        write_sheet(
            workbook.add_worksheet(),
            ALL_INTERACTIONS,
            &all,
            true,
            &header,
        )?;
        for kind in InteractionKind::ALL {
            let records: Vec<&InteractionRecord> = extraction.records(kind).iter().collect();
            if records.is_empty() {
                continue;
            }
            write_sheet(
                workbook.add_worksheet(),
                kind.sheet_name(),
                &records,
                kind == InteractionKind::Reply,
                &header,
            )?;
        }

        let buffer = workbook
            .save_to_buffer()
            .context("Unable to render workbook")?;
        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(parent).context("Unable to create temporary file")?;
        temp.write_all(&buffer)
            .context("Unable to write workbook")?;
        temp.persist(destination)
            .map_err(|e| e.error)
            .with_context(|| format!("Unable to save {}", destination.display()))?;
        Ok(())
    }
}

fn write_sheet(
    sheet: &mut Worksheet,
    name: &str,
    records: &[&InteractionRecord],
    with_replies: bool,
    header: &Format,
) -> anyhow::Result<()> {
    sheet.set_name(name)?;
    let reply_columns: &[&str] = if with_replies { &REPLY_COLUMNS } else { &[] };
    for (col, title) in USER_COLUMNS.iter().chain(reply_columns).enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, header)?;
    }
    sheet.set_freeze_panes(1, 0)?;

    for (index, record) in records.iter().enumerate() {
        let row = index as u32 + 1;
        sheet.write_string(row, 0, &record.username)?;
        sheet.write_string(row, 1, &record.display_name)?;
        sheet.write_string(row, 2, &record.user_id)?;
        sheet.write_string(row, 3, record.kind.to_string())?;
        if !with_replies {
            continue;
        }
        if let Some(reply) = record.reply_details() {
            sheet.write_string(row, 4, &reply.text)?;
            sheet.write_string(row, 5, &reply.source_id)?;
            if let Some(created_at) = reply.created_at {
                sheet.write_string(row, 6, created_at.format("%Y-%m-%d %H:%M:%S").to_string())?;
            }
        }
    }
    Ok(())
}

/// `twitter_data_<id>_<YYYYMMDD_HHMMSS>.xlsx` in the working directory
pub fn default_output_path(subject_id: &SubjectId, now: DateTime<Utc>) -> PathBuf {
    PathBuf::from(format!(
        "twitter_data_{}_{}.xlsx",
        subject_id,
        now.format("%Y%m%d_%H%M%S")
    ))
}
