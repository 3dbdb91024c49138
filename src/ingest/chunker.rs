//! Format-aware document chunking.
//!
//! Splits raw uploaded bytes into ordered text spans, the atomic unit of
//! embedding and retrieval. Chunking is a pure function of (bytes, format,
//! config): re-running it on identical input yields identical spans.

use serde::{Deserialize, Serialize};

use crate::core::errors::CoreError;

/// Detected document format. Everything else is rejected at upload time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Text,
    Csv,
    Pdf,
}

impl DocumentFormat {
    /// Detect the format from a filename extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = filename.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(DocumentFormat::Text),
            "csv" => Some(DocumentFormat::Csv),
            "pdf" => Some(DocumentFormat::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Text => "text",
            DocumentFormat::Csv => "csv",
            DocumentFormat::Pdf => "pdf",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(DocumentFormat::Text),
            "csv" => Some(DocumentFormat::Csv),
            "pdf" => Some(DocumentFormat::Pdf),
            _ => None,
        }
    }

    /// Canonical file extension for stored uploads.
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Text => "txt",
            DocumentFormat::Csv => "csv",
            DocumentFormat::Pdf => "pdf",
        }
    }
}

/// Chunking configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Maximum chunk size in characters.
    pub max_chunk_chars: usize,
    /// Characters repeated at each window boundary.
    pub overlap_chars: usize,
    /// Data rows per chunk for tabular input.
    pub rows_per_chunk: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1000,
            overlap_chars: 200,
            rows_per_chunk: 20,
        }
    }
}

/// Structural origin of a span within its document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_end: Option<u32>,
}

impl SpanMeta {
    pub fn is_empty(&self) -> bool {
        self.page.is_none() && self.row_start.is_none() && self.row_end.is_none()
    }

    /// Human-readable location fragment for source labels.
    pub fn label_suffix(&self) -> Option<String> {
        if let Some(page) = self.page {
            return Some(format!("page {}", page));
        }
        if let (Some(start), Some(end)) = (self.row_start, self.row_end) {
            return Some(format!("rows {}-{}", start, end));
        }
        None
    }
}

/// A single chunk of document text, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub text: String,
    pub meta: SpanMeta,
}

/// Split document bytes into ordered chunks.
pub fn chunk(
    bytes: &[u8],
    format: DocumentFormat,
    config: &ChunkConfig,
) -> Result<Vec<ChunkSpan>, CoreError> {
    match format {
        DocumentFormat::Text => chunk_text(bytes, config),
        DocumentFormat::Csv => chunk_csv(bytes, config),
        DocumentFormat::Pdf => chunk_pdf(bytes, config),
    }
}

fn chunk_text(bytes: &[u8], config: &ChunkConfig) -> Result<Vec<ChunkSpan>, CoreError> {
    let text = decode_utf8(bytes)?;
    Ok(split_windows(&text, config)
        .into_iter()
        .map(|text| ChunkSpan {
            text,
            meta: SpanMeta::default(),
        })
        .collect())
}

fn chunk_csv(bytes: &[u8], config: &ChunkConfig) -> Result<Vec<ChunkSpan>, CoreError> {
    let text = decode_utf8(bytes)?;
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| CoreError::CorruptInput(format!("csv header: {}", e)))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| CoreError::CorruptInput(format!("csv row: {}", e)))?;
        rows.push(record);
    }

    let header_line = headers.iter().collect::<Vec<_>>().join(", ");
    let rows_per_chunk = config.rows_per_chunk.max(1);

    let mut spans = Vec::new();
    for (group_idx, group) in rows.chunks(rows_per_chunk).enumerate() {
        let row_start = group_idx * rows_per_chunk + 1;
        let row_end = row_start + group.len() - 1;

        let mut text = format!("Columns: {}\n", header_line);
        for (offset, record) in group.iter().enumerate() {
            let rendered = headers
                .iter()
                .zip(record.iter())
                .map(|(header, value)| format!("{}={}", header, value))
                .collect::<Vec<_>>()
                .join(", ");
            text.push_str(&format!("Row {}: {}\n", row_start + offset, rendered));
        }

        spans.push(ChunkSpan {
            text,
            meta: SpanMeta {
                page: None,
                row_start: Some(row_start as u32),
                row_end: Some(row_end as u32),
            },
        });
    }

    Ok(spans)
}

fn chunk_pdf(bytes: &[u8], config: &ChunkConfig) -> Result<Vec<ChunkSpan>, CoreError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| CoreError::CorruptInput(format!("pdf parse: {}", e)))?;

    let mut spans = Vec::new();
    for (page_idx, page_text) in pages.iter().enumerate() {
        if page_text.trim().is_empty() {
            continue;
        }
        for text in split_windows(page_text, config) {
            spans.push(ChunkSpan {
                text,
                meta: SpanMeta {
                    page: Some(page_idx as u32 + 1),
                    ..SpanMeta::default()
                },
            });
        }
    }

    Ok(spans)
}

fn decode_utf8(bytes: &[u8]) -> Result<String, CoreError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| CoreError::CorruptInput("not valid UTF-8".to_string()))
}

/// Fixed-step character windows with `overlap_chars` repeated at each
/// boundary. The step is exact (no boundary snapping) so the window count for
/// S chars is ceil((S - overlap) / (max - overlap)) and dropping the leading
/// overlap of every window but the first reconstructs the input.
fn split_windows(text: &str, config: &ChunkConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let max_chars = config.max_chunk_chars.max(1);
    let overlap = config.overlap_chars.min(max_chars.saturating_sub(1));
    let step = (max_chars - overlap).max(1);

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + max_chars).min(chars.len());
        windows.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize, overlap: usize) -> ChunkConfig {
        ChunkConfig {
            max_chunk_chars: max,
            overlap_chars: overlap,
            rows_per_chunk: 2,
        }
    }

    #[test]
    fn detects_format_from_extension() {
        assert_eq!(
            DocumentFormat::from_filename("Report.PDF"),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            DocumentFormat::from_filename("data.csv"),
            Some(DocumentFormat::Csv)
        );
        assert_eq!(
            DocumentFormat::from_filename("notes.txt"),
            Some(DocumentFormat::Text)
        );
        assert_eq!(DocumentFormat::from_filename("image.png"), None);
        assert_eq!(DocumentFormat::from_filename("noextension"), None);
    }

    #[test]
    fn empty_text_yields_no_spans() {
        let spans = chunk(b"", DocumentFormat::Text, &config(100, 20)).unwrap();
        assert!(spans.is_empty());
    }

    #[test]
    fn short_text_is_one_span() {
        let spans = chunk(b"hello world", DocumentFormat::Text, &config(100, 20)).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "hello world");
        assert!(spans[0].meta.is_empty());
    }

    #[test]
    fn window_count_matches_formula() {
        // S = 1000, max = 100, overlap = 20 => ceil(980 / 80) = 13
        let text = "a".repeat(1000);
        let spans = chunk(text.as_bytes(), DocumentFormat::Text, &config(100, 20)).unwrap();
        assert_eq!(spans.len(), 13);
        for span in &spans[..12] {
            assert_eq!(span.text.chars().count(), 100);
        }
    }

    #[test]
    fn overlap_reconstructs_original() {
        let text: String = (0..997).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let cfg = config(100, 20);
        let spans = chunk(text.as_bytes(), DocumentFormat::Text, &cfg).unwrap();

        let mut rebuilt = spans[0].text.clone();
        for span in &spans[1..] {
            let tail: String = span.text.chars().skip(cfg.overlap_chars).collect();
            rebuilt.push_str(&tail);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let cfg = config(120, 30);
        let a = chunk(text.as_bytes(), DocumentFormat::Text, &cfg).unwrap();
        let b = chunk(text.as_bytes(), DocumentFormat::Text, &cfg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_utf8_is_corrupt_input() {
        let err = chunk(&[0xff, 0xfe, 0x00], DocumentFormat::Text, &config(100, 20)).unwrap_err();
        assert!(matches!(err, CoreError::CorruptInput(_)));
    }

    #[test]
    fn csv_groups_rows_with_header() {
        let data = "name,age\nalice,30\nbob,25\ncarol,41\n";
        let spans = chunk(data.as_bytes(), DocumentFormat::Csv, &config(1000, 0)).unwrap();

        // rows_per_chunk = 2 => two groups: rows 1-2 and row 3
        assert_eq!(spans.len(), 2);
        assert!(spans[0].text.starts_with("Columns: name, age"));
        assert!(spans[0].text.contains("Row 1: name=alice, age=30"));
        assert!(spans[0].text.contains("Row 2: name=bob, age=25"));
        assert_eq!(spans[0].meta.row_start, Some(1));
        assert_eq!(spans[0].meta.row_end, Some(2));

        assert!(spans[1].text.starts_with("Columns: name, age"));
        assert!(spans[1].text.contains("Row 3: name=carol, age=41"));
        assert_eq!(spans[1].meta.row_start, Some(3));
        assert_eq!(spans[1].meta.row_end, Some(3));
        assert_eq!(spans[1].meta.label_suffix().as_deref(), Some("rows 3-3"));
    }

    #[test]
    fn ragged_csv_is_corrupt_input() {
        let data = "name,age\nalice,30\nbob\n";
        let err = chunk(data.as_bytes(), DocumentFormat::Csv, &config(1000, 0)).unwrap_err();
        assert!(matches!(err, CoreError::CorruptInput(_)));
    }

    #[test]
    fn corrupt_pdf_is_corrupt_input() {
        let err = chunk(b"not a pdf at all", DocumentFormat::Pdf, &config(1000, 0)).unwrap_err();
        assert!(matches!(err, CoreError::CorruptInput(_)));
    }
}
