use harvest_core::config::Delimiter;
use harvest_core::Result;
use metrics::counter;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use crate::model::Record;

pub const HEADER: [&str; 5] = ["Id", "CreatedAt", "Body", "Sentiment", "Likes"];

/// Append-only destination for records. Callers serialize access; one call
/// to `append` carries one page.
pub trait RecordSink: Send {
    fn append(&mut self, records: &[Record]) -> Result<usize>;

    fn flush(&mut self) -> Result<()>;

    fn destination(&self) -> String;
}

/// Delimited text file. The header row is written only when the file is
/// empty, so re-runs against the same file keep appending rows.
pub struct DelimitedFileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    delimiter: char,
    rows_written: u64,
}

impl DelimitedFileSink {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, delimiter: Delimiter) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let existing = file.metadata()?.len();

        let mut sink = Self {
            writer: BufWriter::new(file),
            path,
            delimiter: delimiter.as_char(),
            rows_written: 0,
        };

        if existing == 0 {
            let header = sink.format_fields(&HEADER);
            sink.writer.write_all(header.as_bytes())?;
            sink.writer.flush()?;
            debug!("Wrote header row");
        } else {
            info!(bytes = existing, "Appending to existing output");
        }

        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn format_record(&self, record: &Record) -> String {
        let id = record.id.to_string();
        let created_at = record.created_at_rfc3339();
        let likes = record.likes.to_string();
        self.format_fields(&[
            id.as_str(),
            created_at.as_str(),
            record.body.as_str(),
            record.sentiment.label(),
            likes.as_str(),
        ])
    }

    fn format_fields(&self, fields: &[&str]) -> String {
        let mut line = String::new();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                line.push(self.delimiter);
            }
            push_field(&mut line, field, self.delimiter);
        }
        line.push('\n');
        line
    }
}

/// Quotes a field holding the delimiter, a quote, a line break, or leading
/// whitespace of any kind; inner quotes are doubled.
fn push_field(line: &mut String, field: &str, delimiter: char) {
    let needs_quotes = field.starts_with(char::is_whitespace)
        || field
            .chars()
            .any(|c| c == delimiter || c == '"' || c == '\r' || c == '\n');

    if needs_quotes {
        let _ = write!(line, "\"{}\"", field.replace('"', "\"\""));
    } else {
        line.push_str(field);
    }
}

impl RecordSink for DelimitedFileSink {
    fn append(&mut self, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut chunk = String::new();
        for record in records {
            chunk.push_str(&self.format_record(record));
        }
        self.writer.write_all(chunk.as_bytes())?;
        self.writer.flush()?;

        self.rows_written += records.len() as u64;
        counter!("harvester_messages_written_total").increment(records.len() as u64);

        debug!(
            rows = records.len(),
            total = self.rows_written,
            "Appended page"
        );

        Ok(records.len())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    fn destination(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sentiment;
    use pretty_assertions::assert_eq;

    fn record(id: u64, body: &str) -> Record {
        Record {
            id,
            created_at: "2020-01-05T10:00:00Z".parse().unwrap(),
            body: body.to_string(),
            sentiment: Sentiment::Bullish,
            likes: 2,
        }
    }

    #[test]
    fn writes_header_once_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("AAPL.csv");

        let mut sink = DelimitedFileSink::open(&path, Delimiter::Tab).unwrap();
        sink.append(&[record(2, "first")]).unwrap();
        sink.flush().unwrap();
        drop(sink);

        let mut sink = DelimitedFileSink::open(&path, Delimiter::Tab).unwrap();
        sink.append(&[record(1, "second")]).unwrap();
        sink.flush().unwrap();
        drop(sink);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "Id\tCreatedAt\tBody\tSentiment\tLikes\n\
             2\t2020-01-05T10:00:00Z\tfirst\tBullish\t2\n\
             1\t2020-01-05T10:00:00Z\tsecond\tBullish\t2\n"
        );
    }

    #[test]
    fn quotes_fields_that_would_break_the_row() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DelimitedFileSink::open(dir.path().join("q.csv"), Delimiter::Comma).unwrap();

        let line = sink.format_record(&record(9, "buy, \"now\""));
        assert_eq!(
            line,
            "9,2020-01-05T10:00:00Z,\"buy, \"\"now\"\"\",Bullish,2\n"
        );
        let line = sink.format_record(&record(9, " leading"));
        assert_eq!(line, "9,2020-01-05T10:00:00Z,\" leading\",Bullish,2\n");
        let line = sink.format_record(&record(9, "\u{a0}nbsp"));
        assert_eq!(line, "9,2020-01-05T10:00:00Z,\"\u{a0}nbsp\",Bullish,2\n");
    }

    #[test]
    fn empty_append_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DelimitedFileSink::open(dir.path().join("e.csv"), Delimiter::Tab).unwrap();
        assert_eq!(sink.append(&[]).unwrap(), 0);
        assert_eq!(sink.rows_written(), 0);
    }
}
