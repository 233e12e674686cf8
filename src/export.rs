//! CSV and JSON renderings of collected records.
//!
//! Two CSV layouts exist: the API one (with `author`, commas stripped from
//! descriptions so naive spreadsheet imports keep their columns) and the batch
//! file layout (no `author`, written with a UTF-8 byte-order mark so Excel
//! picks the right encoding).

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::metadata::VideoRecord;

pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const API_HEADER: [&str; 7] = [
    "url",
    "description",
    "views",
    "likes",
    "date",
    "hashtags",
    "author",
];
const BATCH_HEADER: [&str; 6] = ["url", "description", "views", "likes", "date", "hashtags"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("writing CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("writing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvLayout {
    /// `/csv` download: includes `author`, commas in descriptions become spaces.
    Api,
    /// Batch artifact: no `author`, descriptions kept verbatim (quoted).
    Batch,
}

impl CsvLayout {
    fn header(self) -> &'static [&'static str] {
        match self {
            CsvLayout::Api => &API_HEADER,
            CsvLayout::Batch => &BATCH_HEADER,
        }
    }

    fn row(self, record: &VideoRecord) -> Vec<String> {
        let description = match self {
            CsvLayout::Api => record.description.replace(',', " "),
            CsvLayout::Batch => record.description.clone(),
        };
        let mut row = vec![
            record.url.clone(),
            description,
            record.views.to_string(),
            record.likes.to_string(),
            record.published_display.clone(),
            record.hashtags_joined(),
        ];
        if self == CsvLayout::Api {
            row.push(record.author.clone());
        }
        row
    }
}

/// Writes a header plus one row per record and returns how many rows made it.
///
/// A row the CSV writer rejects is logged and skipped; only I/O failures on
/// the underlying writer abort the export.
pub fn write_csv<W: Write>(
    writer: W,
    records: &[VideoRecord],
    layout: CsvLayout,
) -> Result<usize, ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(layout.header())?;

    let mut written = 0;
    for record in records {
        match csv_writer.write_record(layout.row(record)) {
            Ok(()) => written += 1,
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(err) => warn!(id = %record.id, error = %err, "skipping record in CSV export"),
        }
    }

    csv_writer.flush().map_err(csv::Error::from)?;
    Ok(written)
}

/// Renders the CSV in memory, optionally prefixed with a byte-order mark.
pub fn csv_bytes(
    records: &[VideoRecord],
    layout: CsvLayout,
    with_bom: bool,
) -> Result<Vec<u8>, ExportError> {
    let mut buffer = Vec::new();
    if with_bom {
        buffer.extend_from_slice(UTF8_BOM);
    }
    write_csv(&mut buffer, records, layout)?;
    Ok(buffer)
}

/// Writes the batch artifact: BOM, batch layout.
pub fn save_csv(path: &Path, records: &[VideoRecord]) -> Result<usize, ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = BufWriter::new(File::create(path).map_err(io_err)?);
    file.write_all(UTF8_BOM).map_err(io_err)?;
    let written = write_csv(&mut file, records, CsvLayout::Batch)?;
    file.flush().map_err(io_err)?;
    Ok(written)
}

/// Envelope returned by `/run` and written by the batch JSON export.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport<'a> {
    pub status: &'static str,
    pub count: usize,
    pub data: &'a [VideoRecord],
}

impl<'a> CollectionReport<'a> {
    pub fn success(data: &'a [VideoRecord]) -> Self {
        Self {
            status: "success",
            count: data.len(),
            data,
        }
    }
}

pub fn save_json(path: &Path, records: &[VideoRecord]) -> Result<usize, ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = BufWriter::new(File::create(path).map_err(io_err)?);
    serde_json::to_writer_pretty(&mut file, &CollectionReport::success(records))?;
    file.write_all(b"\n").map_err(io_err)?;
    file.flush().map_err(io_err)?;
    Ok(records.len())
}
