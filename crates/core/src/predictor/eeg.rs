//! EEG seizure-window predictor.
//!
//! Input is a zip archive of `.edf` recordings. Each recording is cut into
//! fixed windows (5 s by default) and every window gets a 0/1 flag, in
//! chronological order. The detector is a line-length heuristic: per signal,
//! a window's mean absolute sample-to-sample change is divided by that
//! signal's median over all windows; windows whose average ratio across
//! signals exceeds the configured threshold are flagged.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::edf::{self, EdfRecording};
use super::error::PredictionError;
use super::traits::Predictor;
use crate::config::EegConfig;
use crate::task::{Modality, PredictionValue};

/// Largest `.edf` entry read out of an archive.
pub const MAX_EDF_BYTES: u64 = 256 * 1024 * 1024;

/// Windowed EEG predictor.
#[derive(Debug, Clone)]
pub struct EegPredictor {
    config: EegConfig,
}

impl EegPredictor {
    pub fn new(config: EegConfig) -> Self {
        Self { config }
    }
}

/// Classifies every window of one recording.
pub fn classify_recording(recording: &EdfRecording, window_secs: u32, threshold: f64) -> Vec<u8> {
    let window_secs = window_secs.max(1) as f64;
    let num_windows = (recording.duration_secs() / window_secs).ceil() as usize;
    if num_windows == 0 {
        return Vec::new();
    }

    let mut ratio_sums = vec![0.0; num_windows];
    let mut contributing = 0usize;

    for signal in recording.signals.iter().filter(|s| !s.is_annotation()) {
        let window_len = (recording.sample_rate(signal) * window_secs).round() as usize;
        if window_len < 2 {
            continue;
        }

        let line_lengths: Vec<f64> = (0..num_windows)
            .map(|w| {
                let start = w.saturating_mul(window_len).min(signal.samples.len());
                let end = (w + 1).saturating_mul(window_len).min(signal.samples.len());
                mean_line_length(&signal.samples[start..end])
            })
            .collect();

        let baseline = median(&line_lengths);
        if baseline <= f64::EPSILON {
            continue;
        }

        contributing += 1;
        for (sum, ll) in ratio_sums.iter_mut().zip(&line_lengths) {
            *sum += ll / baseline;
        }
    }

    if contributing == 0 {
        return vec![0; num_windows];
    }

    ratio_sums
        .into_iter()
        .map(|sum| u8::from(sum / contributing as f64 > threshold))
        .collect()
}

fn mean_line_length(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let total: f64 = samples.windows(2).map(|pair| (pair[1] - pair[0]).abs()).sum();
    total / (samples.len() - 1) as f64
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn is_edf_entry(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".edf")
}

fn analyze_archive(path: &Path, config: &EegConfig) -> Result<PredictionValue, PredictionError> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut files = BTreeMap::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() || !is_edf_entry(entry.name()) {
            continue;
        }
        let name = entry.name().to_string();
        // The declared size comes from the sender, so only the bytes read count.
        let mut bytes = Vec::new();
        entry.by_ref().take(MAX_EDF_BYTES + 1).read_to_end(&mut bytes)?;
        if bytes.len() as u64 > MAX_EDF_BYTES {
            return Err(PredictionError::InvalidInput(format!(
                "{}: recording exceeds {} bytes",
                name, MAX_EDF_BYTES
            )));
        }

        let recording = edf::parse(&bytes)
            .map_err(|e| PredictionError::InvalidInput(format!("{}: {}", name, e)))?;
        let windows = classify_recording(&recording, config.window_secs, config.threshold);
        debug!(
            file = %name,
            start = ?recording.start,
            windows = windows.len(),
            flagged = windows.iter().filter(|w| **w == 1).count(),
            "Classified EEG recording"
        );
        files.insert(name, windows);
    }

    if files.is_empty() {
        return Err(PredictionError::InvalidInput(
            "archive contains no .edf recordings".to_string(),
        ));
    }

    let positive = files.values().any(|windows| windows.contains(&1));
    Ok(PredictionValue::Segments {
        label: if positive { "Positive" } else { "Negative" }.to_string(),
        window_secs: config.window_secs,
        files,
    })
}

#[async_trait]
impl Predictor for EegPredictor {
    fn name(&self) -> &str {
        "eeg-line-length"
    }

    fn modality(&self) -> Modality {
        Modality::Eeg
    }

    async fn predict(&self, artifact: &Path) -> Result<PredictionValue, PredictionError> {
        let path: PathBuf = artifact.to_path_buf();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || analyze_archive(&path, &config))
            .await
            .map_err(|e| PredictionError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{edf_bytes, write_zip, EdfFixtureSignal};
    use tempfile::TempDir;

    /// 4 Hz signal, 1 s records: a quiet sine-like pattern with one burst.
    fn samples_with_burst(seconds: usize, burst_window: Option<usize>) -> Vec<i16> {
        let quiet = [0i16, 10, 0, -10];
        let mut samples = Vec::new();
        for s in 0..seconds {
            let in_burst = burst_window.is_some_and(|w| s / 5 == w);
            for q in quiet {
                samples.push(if in_burst { q * 20 } else { q });
            }
        }
        samples
    }

    #[test]
    fn test_classify_flags_burst_window() {
        let bytes = edf_bytes(
            1.0,
            &[EdfFixtureSignal::new("C3", samples_with_burst(20, Some(2)))],
            20,
        );
        let recording = edf::parse(&bytes).unwrap();
        let windows = classify_recording(&recording, 5, 3.0);
        assert_eq!(windows, vec![0, 0, 1, 0]);
    }

    #[test]
    fn test_classify_partial_last_window() {
        let bytes = edf_bytes(
            1.0,
            &[EdfFixtureSignal::new("C3", samples_with_burst(12, None))],
            12,
        );
        let recording = edf::parse(&bytes).unwrap();
        // 12 s → windows [0-5), [5-10), [10-12)
        assert_eq!(classify_recording(&recording, 5, 3.0), vec![0, 0, 0]);
    }

    #[test]
    fn test_classify_flat_signal_is_negative() {
        let bytes = edf_bytes(1.0, &[EdfFixtureSignal::new("C3", vec![0; 40])], 10);
        let recording = edf::parse(&bytes).unwrap();
        assert_eq!(classify_recording(&recording, 5, 3.0), vec![0, 0]);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[tokio::test]
    async fn test_predict_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("eeg.zip");
        write_zip(
            &archive,
            &[
                (
                    "patient/rec01.edf",
                    edf_bytes(1.0, &[EdfFixtureSignal::new("C3", samples_with_burst(20, Some(1)))], 20),
                ),
                (
                    "patient/rec02.EDF",
                    edf_bytes(1.0, &[EdfFixtureSignal::new("C3", samples_with_burst(20, None))], 20),
                ),
                ("patient/notes.txt", b"ignored".to_vec()),
            ],
        );

        let predictor = EegPredictor::new(EegConfig::default());
        let value = predictor.predict(&archive).await.unwrap();

        match value {
            PredictionValue::Segments {
                label,
                window_secs,
                files,
            } => {
                assert_eq!(label, "Positive");
                assert_eq!(window_secs, 5);
                assert_eq!(files.len(), 2);
                assert_eq!(files["patient/rec01.edf"], vec![0, 1, 0, 0]);
                assert_eq!(files["patient/rec02.EDF"], vec![0, 0, 0, 0]);
            }
            other => panic!("unexpected prediction: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_predict_archive_without_edf() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("eeg.zip");
        write_zip(&archive, &[("readme.txt", b"nothing here".to_vec())]);

        let result = EegPredictor::new(EegConfig::default())
            .predict(&archive)
            .await;
        assert!(matches!(result, Err(PredictionError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_predict_rejects_absurd_record_duration() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("eeg.zip");
        let mut bytes = edf_bytes(1.0, &[EdfFixtureSignal::new("C3", vec![0, 10])], 1);
        bytes[244..252].copy_from_slice(b"1e12    ");
        write_zip(&archive, &[("rec01.edf", bytes)]);

        let result = EegPredictor::new(EegConfig::default())
            .predict(&archive)
            .await;
        assert!(matches!(result, Err(PredictionError::InvalidInput(_))));
    }

    #[test]
    fn test_classify_tiny_record_duration_does_not_overflow() {
        // A huge sampling rate saturates the window length instead of wrapping.
        let mut bytes = edf_bytes(1.0, &[EdfFixtureSignal::new("C3", vec![0, 10, 0, 10])], 1);
        bytes[244..252].copy_from_slice(b"1e-300  ");
        let recording = edf::parse(&bytes).unwrap();
        assert_eq!(classify_recording(&recording, 5, 3.0), vec![0]);
    }

    #[tokio::test]
    async fn test_predict_not_a_zip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("eeg.zip");
        std::fs::write(&path, b"definitely not a zip").unwrap();

        let result = EegPredictor::new(EegConfig::default()).predict(&path).await;
        assert!(matches!(result, Err(PredictionError::Archive(_))));
    }
}
