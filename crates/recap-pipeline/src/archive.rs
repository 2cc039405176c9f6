//! Archive Extraction
//!
//! Downloads an exported chat archive and selects the one text entry that
//! holds the conversation.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{PipelineError, Result};

/// File name the chat platform gives its exported transcript
pub const CANONICAL_TRANSCRIPT: &str = "_chat.txt";

/// Source of archive bytes (Strategy pattern)
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    /// Fetch the raw archive behind `archive_ref`
    async fn fetch(&self, archive_ref: &str) -> Result<Vec<u8>>;
}

/// Fetches archives over HTTP(S), typically from a signed blob URL
pub struct HttpArchiveFetcher {
    http: reqwest::Client,
}

impl HttpArchiveFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ArchiveFetcher for HttpArchiveFetcher {
    async fn fetch(&self, archive_ref: &str) -> Result<Vec<u8>> {
        let url = reqwest::Url::parse(archive_ref)
            .map_err(|e| PipelineError::Validation(format!("archive reference is not a URL: {e}")))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Download(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Download(format!("archive server returned {status}")));
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !content_type.contains("zip") && !content_type.contains("octet-stream") {
                tracing::warn!(content_type = %content_type, "Unexpected content type for archive");
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::Download(e.to_string()))?;

        tracing::info!(size_kb = bytes.len() / 1024, "Archive downloaded");
        Ok(bytes.to_vec())
    }
}

/// In-memory archives keyed by reference (for development and tests)
#[derive(Default)]
pub struct StaticFetcher {
    archives: RwLock<HashMap<String, Vec<u8>>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, archive_ref: impl Into<String>, bytes: Vec<u8>) {
        self.archives.write().insert(archive_ref.into(), bytes);
    }

    pub fn with(self, archive_ref: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(archive_ref, bytes);
        self
    }
}

#[async_trait]
impl ArchiveFetcher for StaticFetcher {
    async fn fetch(&self, archive_ref: &str) -> Result<Vec<u8>> {
        self.archives
            .read()
            .get(archive_ref)
            .cloned()
            .ok_or_else(|| PipelineError::Download(format!("no archive at {archive_ref}")))
    }
}

/// Selected conversation text
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transcript {
    /// Archive entry the text came from
    pub entry: String,
    pub text: String,

    /// Number of `.txt` entries considered
    pub candidates: usize,
}

/// Extract the transcript from a zip archive.
///
/// Selection order: the canonical export name, then the only `.txt` entry,
/// then the largest decoded `.txt` entry (first wins on ties).
pub fn extract_transcript(bytes: &[u8]) -> Result<Transcript> {
    if bytes.is_empty() {
        return Err(PipelineError::Download("archive is empty".into()));
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| PipelineError::CorruptArchive(e.to_string()))?;

    let mut entries = Vec::with_capacity(archive.len());
    let mut candidates = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| PipelineError::CorruptArchive(e.to_string()))?;
        let name = entry.name().to_string();
        if !entry.is_dir() && name.to_lowercase().ends_with(".txt") {
            candidates.push((index, name.clone()));
        }
        entries.push(name);
    }

    if candidates.is_empty() {
        tracing::error!(entries = ?entries, "No transcript candidates in archive");
        return Err(PipelineError::NoTranscript { entries });
    }

    let canonical = candidates
        .iter()
        .find(|(_, name)| is_canonical(name))
        .cloned();

    let (entry, text) = if let Some((index, name)) = canonical {
        let text = read_entry(&mut archive, index)?;
        (name, text)
    } else if let [(index, name)] = candidates.as_slice() {
        let text = read_entry(&mut archive, *index)?;
        (name.clone(), text)
    } else {
        largest_entry(&mut archive, &candidates)?
    };

    if text.trim().is_empty() {
        return Err(PipelineError::EmptyTranscript(entry));
    }

    tracing::info!(
        entry = %entry,
        candidates = candidates.len(),
        chars = text.chars().count(),
        "Transcript extracted"
    );
    Ok(Transcript {
        entry,
        text,
        candidates: candidates.len(),
    })
}

fn is_canonical(name: &str) -> bool {
    name == CANONICAL_TRANSCRIPT || name.ends_with(&format!("/{CANONICAL_TRANSCRIPT}"))
}

fn largest_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    candidates: &[(usize, String)],
) -> Result<(String, String)> {
    let mut best: Option<(String, String)> = None;
    for (index, name) in candidates {
        match read_entry(archive, *index) {
            Ok(text) => {
                if best.as_ref().is_none_or(|(_, current)| text.len() > current.len()) {
                    best = Some((name.clone(), text));
                }
            }
            Err(e) => tracing::warn!(entry = %name, error = %e, "Skipping unreadable entry"),
        }
    }

    best.ok_or_else(|| PipelineError::CorruptArchive("no text entry could be read".into()))
}

fn read_entry(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, index: usize) -> Result<String> {
    let mut entry = archive
        .by_index(index)
        .map_err(|e| PipelineError::CorruptArchive(e.to_string()))?;

    let name = entry.name().to_string();
    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .map_err(|e| PipelineError::CorruptArchive(format!("{name}: {e}")))?;

    let text = String::from_utf8_lossy(&buf);
    Ok(text.strip_prefix('\u{feff}').unwrap_or(&text).to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub(crate) fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_largest_txt_wins_without_canonical() {
        let zip = build_zip(&[
            ("a.txt", "short"),
            ("b.txt", "much longer transcript text..."),
        ]);
        let transcript = extract_transcript(&zip).unwrap();
        assert_eq!(transcript.entry, "b.txt");
        assert_eq!(transcript.candidates, 2);
    }

    #[test]
    fn test_canonical_wins_regardless_of_size() {
        let zip = build_zip(&[
            ("notes.txt", "a very long unrelated text file, longer than the chat"),
            ("_chat.txt", "[01/01/2024 10:00] Ana: oi"),
        ]);
        let transcript = extract_transcript(&zip).unwrap();
        assert_eq!(transcript.entry, "_chat.txt");
        assert_eq!(transcript.text, "[01/01/2024 10:00] Ana: oi");
    }

    #[test]
    fn test_single_txt_and_non_text_entries() {
        let zip = build_zip(&[
            ("media/", ""),
            ("IMG-0001.jpg", "\u{1}\u{2}"),
            ("Conversa com Ana.TXT", "\u{feff}Ana: oi"),
        ]);
        let transcript = extract_transcript(&zip).unwrap();
        assert_eq!(transcript.entry, "Conversa com Ana.TXT");
        assert_eq!(transcript.text, "Ana: oi");
    }

    #[test]
    fn test_no_transcript_lists_entry_names() {
        let zip = build_zip(&[("IMG-0001.jpg", "jpeg"), ("audio.opus", "opus")]);
        match extract_transcript(&zip) {
            Err(PipelineError::NoTranscript { entries }) => {
                assert_eq!(entries, vec!["IMG-0001.jpg", "audio.opus"]);
            }
            other => panic!("expected NoTranscript, got {other:?}"),
        }
    }

    #[test]
    fn test_whitespace_transcript_is_empty() {
        let zip = build_zip(&[("_chat.txt", " \n\t \n")]);
        assert!(matches!(
            extract_transcript(&zip),
            Err(PipelineError::EmptyTranscript(entry)) if entry == "_chat.txt"
        ));
    }

    #[test]
    fn test_truncated_and_garbage_archives_are_corrupt() {
        let zip = build_zip(&[("_chat.txt", "Ana: oi\nBia: olá\n")]);
        let truncated = &zip[..zip.len() / 2];
        assert!(matches!(
            extract_transcript(truncated),
            Err(PipelineError::CorruptArchive(_))
        ));
        assert!(matches!(
            extract_transcript(b"definitely not a zip"),
            Err(PipelineError::CorruptArchive(_))
        ));
    }

    #[test]
    fn test_zero_length_is_download_error() {
        assert!(matches!(extract_transcript(&[]), Err(PipelineError::Download(_))));
    }

    #[tokio::test]
    async fn test_static_fetcher() {
        let fetcher = StaticFetcher::new().with("mem://a.zip", vec![1, 2, 3]);
        assert_eq!(fetcher.fetch("mem://a.zip").await.unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            fetcher.fetch("mem://missing.zip").await,
            Err(PipelineError::Download(_))
        ));
    }
}
