//! Minimal reader for EDF (European Data Format) recordings.
//!
//! Only what the window detector needs: the fixed header, per-signal scaling
//! and sampling information, and the data records converted to physical units.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use super::error::PredictionError;

const FIXED_HEADER_LEN: usize = 256;
const SIGNAL_HEADER_LEN: usize = 256;
const ANNOTATION_LABEL: &str = "EDF Annotations";

/// Longest recording accepted (seven days); bounds every per-window buffer.
pub const MAX_RECORDING_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// One signal (channel) of a recording.
#[derive(Debug, Clone)]
pub struct EdfSignal {
    pub label: String,
    pub samples_per_record: usize,
    /// Samples in physical units, concatenated across data records.
    pub samples: Vec<f64>,
}

impl EdfSignal {
    pub fn is_annotation(&self) -> bool {
        self.label.starts_with(ANNOTATION_LABEL)
    }
}

/// A parsed recording.
#[derive(Debug, Clone)]
pub struct EdfRecording {
    /// Recording start from the header; `None` when the fields are malformed.
    pub start: Option<NaiveDateTime>,
    pub num_records: usize,
    pub record_duration_secs: f64,
    pub signals: Vec<EdfSignal>,
}

impl EdfRecording {
    pub fn duration_secs(&self) -> f64 {
        self.num_records as f64 * self.record_duration_secs
    }

    /// Sampling rate of a signal in Hz.
    pub fn sample_rate(&self, signal: &EdfSignal) -> f64 {
        if self.record_duration_secs > 0.0 {
            signal.samples_per_record as f64 / self.record_duration_secs
        } else {
            0.0
        }
    }
}

struct SignalHeader {
    label: String,
    physical_min: f64,
    physical_max: f64,
    digital_min: f64,
    digital_max: f64,
    samples_per_record: usize,
}

impl SignalHeader {
    fn to_physical(&self, digital: i16) -> f64 {
        let digital_span = self.digital_max - self.digital_min;
        if digital_span == 0.0 {
            return digital as f64;
        }
        let gain = (self.physical_max - self.physical_min) / digital_span;
        (digital as f64 - self.digital_min) * gain + self.physical_min
    }
}

fn ascii_field(bytes: &[u8], offset: usize, len: usize, name: &str) -> Result<String, PredictionError> {
    let field = bytes
        .get(offset..offset + len)
        .ok_or_else(|| PredictionError::InvalidInput(format!("EDF header truncated at {}", name)))?;
    Ok(String::from_utf8_lossy(field).trim().to_string())
}

fn number_field<T: std::str::FromStr>(
    bytes: &[u8],
    offset: usize,
    len: usize,
    name: &str,
) -> Result<T, PredictionError> {
    let text = ascii_field(bytes, offset, len, name)?;
    text.parse().map_err(|_| {
        PredictionError::InvalidInput(format!("EDF field {} is not a number: {:?}", name, text))
    })
}

/// `dd.mm.yy` + `hh.mm.ss`; two-digit years 85-99 are 19xx, the rest 20xx.
fn parse_start(date: &str, time: &str) -> Option<NaiveDateTime> {
    let mut d = date.split('.').map(|p| p.parse::<u32>().ok());
    let (day, month, yy) = (d.next()??, d.next()??, d.next()??);
    let year = if yy >= 85 { 1900 + yy } else { 2000 + yy };
    let mut t = time.split('.').map(|p| p.parse::<u32>().ok());
    let (hour, minute, second) = (t.next()??, t.next()??, t.next()??);

    let date = NaiveDate::from_ymd_opt(year as i32, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    Some(date.and_time(time))
}

/// Parses a complete EDF file held in memory.
pub fn parse(bytes: &[u8]) -> Result<EdfRecording, PredictionError> {
    if bytes.len() < FIXED_HEADER_LEN {
        return Err(PredictionError::InvalidInput(format!(
            "EDF file too short: {} bytes",
            bytes.len()
        )));
    }
    if ascii_field(bytes, 0, 8, "version")? != "0" {
        return Err(PredictionError::InvalidInput(
            "not an EDF file (version field is not 0)".to_string(),
        ));
    }

    let start = parse_start(
        &ascii_field(bytes, 168, 8, "start date")?,
        &ascii_field(bytes, 176, 8, "start time")?,
    );
    let declared_records: i64 = number_field(bytes, 236, 8, "number of data records")?;
    let record_duration_secs: f64 = number_field(bytes, 244, 8, "duration of a data record")?;
    if !record_duration_secs.is_finite() || record_duration_secs <= 0.0 {
        return Err(PredictionError::InvalidInput(format!(
            "EDF record duration must be a positive number of seconds, got {}",
            record_duration_secs
        )));
    }
    let ns: usize = number_field(bytes, 252, 4, "number of signals")?;
    if ns == 0 {
        return Err(PredictionError::InvalidInput(
            "EDF file declares no signals".to_string(),
        ));
    }

    let header_len = FIXED_HEADER_LEN + ns * SIGNAL_HEADER_LEN;
    if bytes.len() < header_len {
        return Err(PredictionError::InvalidInput(format!(
            "EDF header declares {} signals but file has {} bytes",
            ns,
            bytes.len()
        )));
    }

    // Signal header fields are stored column-wise: all labels, then all
    // transducers, and so on.
    let column = |width: usize, preceding: usize, i: usize| {
        FIXED_HEADER_LEN + preceding * ns + i * width
    };
    let mut headers = Vec::with_capacity(ns);
    for i in 0..ns {
        headers.push(SignalHeader {
            label: ascii_field(bytes, column(16, 0, i), 16, "label")?,
            physical_min: number_field(bytes, column(8, 16 + 80 + 8, i), 8, "physical minimum")?,
            physical_max: number_field(bytes, column(8, 16 + 80 + 16, i), 8, "physical maximum")?,
            digital_min: number_field(bytes, column(8, 16 + 80 + 24, i), 8, "digital minimum")?,
            digital_max: number_field(bytes, column(8, 16 + 80 + 32, i), 8, "digital maximum")?,
            samples_per_record: number_field(
                bytes,
                column(8, 16 + 80 + 40 + 80, i),
                8,
                "samples per record",
            )?,
        });
    }

    let record_len: usize = headers.iter().map(|h| h.samples_per_record * 2).sum();
    if record_len == 0 {
        return Err(PredictionError::InvalidInput(
            "EDF data records are empty".to_string(),
        ));
    }

    let available = (bytes.len() - header_len) / record_len;
    // -1 means the writer did not know the count; trust the file length then.
    let num_records = if declared_records < 0 {
        available
    } else {
        (declared_records as usize).min(available)
    };

    let duration_secs = num_records as f64 * record_duration_secs;
    if duration_secs > MAX_RECORDING_SECS {
        return Err(PredictionError::InvalidInput(format!(
            "EDF recording lasts {}s, longer than the {}s limit",
            duration_secs, MAX_RECORDING_SECS
        )));
    }

    let mut signals: Vec<EdfSignal> = headers
        .iter()
        .map(|h| EdfSignal {
            label: h.label.clone(),
            samples_per_record: h.samples_per_record,
            samples: Vec::with_capacity(h.samples_per_record * num_records),
        })
        .collect();

    let mut offset = header_len;
    for _ in 0..num_records {
        for (header, signal) in headers.iter().zip(signals.iter_mut()) {
            let end = offset + header.samples_per_record * 2;
            for pair in bytes[offset..end].chunks_exact(2) {
                let digital = i16::from_le_bytes([pair[0], pair[1]]);
                signal.samples.push(header.to_physical(digital));
            }
            offset = end;
        }
    }

    Ok(EdfRecording {
        start,
        num_records,
        record_duration_secs,
        signals,
    })
}
