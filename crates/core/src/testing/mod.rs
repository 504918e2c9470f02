//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the broker, fetcher and
//! predictor traits, so the processor and consumption loop can be exercised
//! end to end without RabbitMQ or an FTP server.
//!
//! # Example
//!
//! ```rust,ignore
//! use aiep_core::testing::{fixtures, MockBroker, MockFetcher, MockPredictor};
//!
//! let broker = MockBroker::new();
//! let fetcher = MockFetcher::new();
//! let mri = MockPredictor::label(Modality::Mri, "Negative");
//!
//! broker.push_message(fixtures::request_body(Some(("/data", "scan.zip")), None));
//! ```

mod mock_broker;
mod mock_fetcher;
mod mock_predictor;

pub use mock_broker::{MockBroker, MockConnector, RecordedPublish, Settlement};
pub use mock_fetcher::{MockFetchFailure, MockFetcher, RecordedFetch};
pub use mock_predictor::{MockPredictor, RecordedPrediction};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::io::Write;
    use std::path::Path;

    /// Build an inbound request body. `None` leaves the modality unrequested.
    pub fn request_body(mri: Option<(&str, &str)>, eeg: Option<(&str, &str)>) -> Vec<u8> {
        let (mripath, mrifile) = mri.unwrap_or(("", ""));
        let (eegpath, eegfile) = eeg.unwrap_or(("", ""));
        serde_json::json!({
            "mripath": mripath,
            "mrifile": mrifile,
            "eegpath": eegpath,
            "eegfile": eegfile,
        })
        .to_string()
        .into_bytes()
    }

    /// One signal of a synthetic EDF file, in digital units.
    #[derive(Debug, Clone)]
    pub struct EdfFixtureSignal {
        pub label: String,
        pub samples: Vec<i16>,
    }

    impl EdfFixtureSignal {
        pub fn new(label: &str, samples: Vec<i16>) -> Self {
            Self {
                label: label.to_string(),
                samples,
            }
        }
    }

    fn field(out: &mut Vec<u8>, value: &str, width: usize) {
        let mut bytes: Vec<u8> = value.bytes().take(width).collect();
        bytes.resize(width, b' ');
        out.extend_from_slice(&bytes);
    }

    /// Build a minimal EDF file.
    ///
    /// Each signal's samples are split evenly across `num_records` records.
    /// Physical and digital ranges are identical, so parsed physical values
    /// equal the digital samples given here.
    pub fn edf_bytes(
        record_duration: f64,
        signals: &[EdfFixtureSignal],
        num_records: usize,
    ) -> Vec<u8> {
        let ns = signals.len();
        let mut out = Vec::new();

        field(&mut out, "0", 8);
        field(&mut out, "X X X X", 80);
        field(&mut out, "Startdate 01-JAN-2024 X X X", 80);
        field(&mut out, "01.01.24", 8);
        field(&mut out, "00.00.00", 8);
        field(&mut out, &(256 + ns * 256).to_string(), 8);
        field(&mut out, "", 44);
        field(&mut out, &num_records.to_string(), 8);
        field(&mut out, &record_duration.to_string(), 8);
        field(&mut out, &ns.to_string(), 4);

        let per_record: Vec<usize> = signals
            .iter()
            .map(|s| s.samples.len() / num_records.max(1))
            .collect();

        for s in signals {
            field(&mut out, &s.label, 16);
        }
        for _ in signals {
            field(&mut out, "AgAgCl electrode", 80);
        }
        for _ in signals {
            field(&mut out, "uV", 8);
        }
        for _ in signals {
            field(&mut out, "-32768", 8);
        }
        for _ in signals {
            field(&mut out, "32767", 8);
        }
        for _ in signals {
            field(&mut out, "-32768", 8);
        }
        for _ in signals {
            field(&mut out, "32767", 8);
        }
        for _ in signals {
            field(&mut out, "", 80);
        }
        for n in &per_record {
            field(&mut out, &n.to_string(), 8);
        }
        for _ in signals {
            field(&mut out, "", 32);
        }

        for record in 0..num_records {
            for (signal, n) in signals.iter().zip(&per_record) {
                for sample in &signal.samples[record * n..(record + 1) * n] {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
            }
        }

        out
    }

    /// Write a zip archive with the given entries.
    pub fn write_zip(path: &Path, entries: &[(&str, Vec<u8>)]) {
        let file = std::fs::File::create(path).expect("Failed to create zip file");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for (name, content) in entries {
            writer
                .start_file(*name, options)
                .expect("Failed to start zip entry");
            writer.write_all(content).expect("Failed to write zip entry");
        }
        writer.finish().expect("Failed to finish zip file");
    }

    /// A zip archive standing in for an MRI series.
    pub fn mri_archive(path: &Path) {
        write_zip(
            path,
            &[
                ("series/IM0001.dcm", vec![0u8; 64]),
                ("series/IM0002.dcm", vec![1u8; 64]),
            ],
        );
    }
}
