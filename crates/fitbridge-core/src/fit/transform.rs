//! Record-stream correction.
//!
//! Walks a decoded activity in order, drops creator and lap messages, strips
//! the temperature field from every sample and backfills missing session
//! averages from the samples seen since the previous session boundary.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::codec::{DecodeError, EncodeError, FitFile};
use super::message::{Message, Sample, SessionSummary};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to decode activity stream: {0}")]
    Decode(#[from] DecodeError),

    #[error("failed to encode corrected stream: {0}")]
    Encode(#[from] EncodeError),
}

/// Running sums for one interval between two session boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateAccumulator {
    cadence_sum: u64,
    power_sum: u64,
    heart_rate_sum: u64,
    count: u64,
}

impl AggregateAccumulator {
    pub fn record(&mut self, cadence: u8, power: u16, heart_rate: u8) {
        self.cadence_sum += u64::from(cadence);
        self.power_sum += u64::from(power);
        self.heart_rate_sum += u64::from(heart_rate);
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean_cadence(&self) -> f64 {
        self.mean(self.cadence_sum)
    }

    pub fn mean_power(&self) -> f64 {
        self.mean(self.power_sum)
    }

    pub fn mean_heart_rate(&self) -> f64 {
        self.mean(self.heart_rate_sum)
    }

    fn mean(&self, sum: u64) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            sum as f64 / self.count as f64
        }
    }
}

/// Counters describing what a transform run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformStats {
    pub samples: usize,
    pub summaries: usize,
    pub dropped: usize,
    pub temperature_stripped: usize,
    pub averages_filled: usize,
    pub passed_through: usize,
}

/// Corrected stream plus the bookkeeping the pipeline logs.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub bytes: Vec<u8>,
    pub stats: TransformStats,
}

/// Owns the open interval's accumulator for the duration of one stream walk.
#[derive(Debug, Default)]
pub struct RecordStreamTransformer {
    accumulator: AggregateAccumulator,
    stats: TransformStats,
}

impl RecordStreamTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process messages in order, returning the corrected sequence.
    pub fn run(mut self, messages: Vec<Message>) -> (Vec<Message>, TransformStats) {
        let mut output = Vec::with_capacity(messages.len());

        for message in messages {
            match message {
                Message::Creator(_) | Message::Lap(_) => {
                    self.stats.dropped += 1;
                }
                Message::Sample(sample) => {
                    output.push(Message::Sample(self.on_sample(sample)));
                }
                Message::SessionSummary(summary) => {
                    output.push(Message::SessionSummary(self.on_summary(summary)));
                }
                Message::Other(raw) => {
                    self.stats.passed_through += 1;
                    output.push(Message::Other(raw));
                }
            }
        }

        (output, self.stats)
    }

    fn on_sample(&mut self, mut sample: Sample) -> Sample {
        if sample.remove_temperature() {
            self.stats.temperature_stripped += 1;
        }
        self.accumulator.record(
            sample.cadence().unwrap_or(0),
            sample.power().unwrap_or(0),
            sample.heart_rate().unwrap_or(0),
        );
        self.stats.samples += 1;
        sample
    }

    fn on_summary(&mut self, mut summary: SessionSummary) -> SessionSummary {
        // The closed interval is moved out so nothing recorded afterwards can
        // reach this summary.
        let interval = std::mem::take(&mut self.accumulator);

        if summary.avg_cadence().unwrap_or(0) == 0 {
            summary.set_avg_cadence(round(interval.mean_cadence()));
            self.stats.averages_filled += 1;
        }
        if summary.avg_power().unwrap_or(0) == 0 {
            summary.set_avg_power(round(interval.mean_power()));
            self.stats.averages_filled += 1;
        }
        if summary.avg_heart_rate().unwrap_or(0) == 0 {
            summary.set_avg_heart_rate(round(interval.mean_heart_rate()));
            self.stats.averages_filled += 1;
        }

        debug!(
            samples = interval.count(),
            avg_cadence = ?summary.avg_cadence(),
            avg_power = ?summary.avg_power(),
            avg_heart_rate = ?summary.avg_heart_rate(),
            "closed session interval"
        );

        self.stats.summaries += 1;
        summary
    }
}

fn round(value: f64) -> i64 {
    value.round() as i64
}

/// Decode `raw`, correct its record stream and re-encode it.
///
/// Nothing is produced when decoding fails.
pub fn transform_bytes(raw: &[u8]) -> Result<TransformOutput, TransformError> {
    let file = FitFile::decode(raw)?;
    let (messages, stats) = RecordStreamTransformer::new().run(file.messages);

    let corrected = FitFile {
        protocol_version: file.protocol_version,
        profile_version: file.profile_version,
        messages,
    };
    let bytes = corrected.encode()?;

    Ok(TransformOutput { bytes, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::message::{mesg_num, RawMessage};

    fn sample(cadence: u8, power: u16, heart_rate: u8) -> Message {
        Message::Sample(
            Sample::new()
                .with_cadence(cadence)
                .with_power(power)
                .with_heart_rate(heart_rate)
                .with_temperature(22),
        )
    }

    fn empty_summary() -> Message {
        Message::SessionSummary(SessionSummary::new())
    }

    fn summaries(messages: &[Message]) -> Vec<&SessionSummary> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::SessionSummary(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn backfills_means_for_single_interval() {
        let input = vec![sample(80, 200, 0), sample(90, 210, 0), empty_summary()];
        let (output, stats) = RecordStreamTransformer::new().run(input);

        assert_eq!(output.len(), 3);
        let summary = summaries(&output)[0];
        assert_eq!(summary.avg_cadence(), Some(85));
        assert_eq!(summary.avg_power(), Some(205));
        assert_eq!(summary.avg_heart_rate(), Some(0));
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.temperature_stripped, 2);

        for message in &output {
            if let Message::Sample(s) = message {
                assert!(!s.has_temperature_field());
            }
        }
    }

    #[test]
    fn existing_averages_are_kept() {
        let summary = SessionSummary::new()
            .with_avg_cadence(70)
            .with_avg_power(150)
            .with_avg_heart_rate(130);
        let input = vec![sample(80, 200, 100), Message::SessionSummary(summary)];
        let (output, stats) = RecordStreamTransformer::new().run(input);

        let summary = summaries(&output)[0];
        assert_eq!(summary.avg_cadence(), Some(70));
        assert_eq!(summary.avg_power(), Some(150));
        assert_eq!(summary.avg_heart_rate(), Some(130));
        assert_eq!(stats.averages_filled, 0);
    }

    #[test]
    fn zero_averages_count_as_missing() {
        let summary = SessionSummary::new().with_avg_power(0).with_avg_cadence(60);
        let input = vec![sample(80, 300, 120), Message::SessionSummary(summary)];
        let (output, _) = RecordStreamTransformer::new().run(input);

        let summary = summaries(&output)[0];
        assert_eq!(summary.avg_power(), Some(300));
        assert_eq!(summary.avg_cadence(), Some(60));
        assert_eq!(summary.avg_heart_rate(), Some(120));
    }

    #[test]
    fn empty_interval_yields_zero() {
        let (output, _) = RecordStreamTransformer::new().run(vec![empty_summary()]);

        let summary = summaries(&output)[0];
        assert_eq!(summary.avg_cadence(), Some(0));
        assert_eq!(summary.avg_power(), Some(0));
        assert_eq!(summary.avg_heart_rate(), Some(0));
    }

    #[test]
    fn each_boundary_resets_the_interval() {
        let input = vec![
            sample(60, 100, 100),
            sample(80, 300, 120),
            empty_summary(),
            sample(100, 400, 150),
            empty_summary(),
            empty_summary(),
        ];
        let (output, _) = RecordStreamTransformer::new().run(input);
        let summaries = summaries(&output);

        assert_eq!(summaries[0].avg_cadence(), Some(70));
        assert_eq!(summaries[0].avg_power(), Some(200));
        assert_eq!(summaries[0].avg_heart_rate(), Some(110));

        assert_eq!(summaries[1].avg_cadence(), Some(100));
        assert_eq!(summaries[1].avg_power(), Some(400));
        assert_eq!(summaries[1].avg_heart_rate(), Some(150));

        assert_eq!(summaries[2].avg_power(), Some(0));
    }

    #[test]
    fn missing_sample_values_count_as_zero() {
        let input = vec![
            Message::Sample(Sample::new().with_power(200)),
            Message::Sample(Sample::new().with_power(100).with_cadence(90)),
            empty_summary(),
        ];
        let (output, _) = RecordStreamTransformer::new().run(input);

        let summary = summaries(&output)[0];
        assert_eq!(summary.avg_power(), Some(150));
        assert_eq!(summary.avg_cadence(), Some(45));
    }

    #[test]
    fn order_is_preserved_without_creator_and_lap() {
        let input = vec![
            Message::Creator(RawMessage::new(mesg_num::FILE_CREATOR)),
            Message::Other(RawMessage::new(0)),
            sample(80, 200, 0),
            Message::Lap(RawMessage::new(mesg_num::LAP)),
            Message::Other(RawMessage::new(21)),
            empty_summary(),
            Message::Other(RawMessage::new(34)),
        ];
        let (output, stats) = RecordStreamTransformer::new().run(input);

        let kinds: Vec<_> = output.iter().map(Message::kind).collect();
        assert_eq!(
            kinds,
            vec!["other", "sample", "other", "session_summary", "other"]
        );
        let globals: Vec<_> = output.iter().map(|m| m.as_raw().global).collect();
        assert_eq!(globals, vec![0, mesg_num::RECORD, 21, mesg_num::SESSION, 34]);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.passed_through, 3);
    }

    #[test]
    fn means_are_rounded_to_nearest() {
        let input = vec![sample(80, 200, 0), sample(81, 201, 1), empty_summary()];
        let (output, _) = RecordStreamTransformer::new().run(input);

        let summary = summaries(&output)[0];
        // 80.5 / 200.5 / 0.5 round half away from zero
        assert_eq!(summary.avg_cadence(), Some(81));
        assert_eq!(summary.avg_power(), Some(201));
        assert_eq!(summary.avg_heart_rate(), Some(1));
    }

    #[test]
    fn transform_bytes_rejects_malformed_input() {
        let err = transform_bytes(b"not a fit file at all").unwrap_err();
        assert!(matches!(err, TransformError::Decode(_)));
    }

    #[test]
    fn transform_bytes_produces_decodable_output() {
        let input = FitFile::new(vec![
            Message::Creator(RawMessage::new(mesg_num::FILE_CREATOR)),
            sample(80, 200, 0),
            sample(90, 210, 0),
            empty_summary(),
        ]);
        let output = transform_bytes(&input.encode().unwrap()).unwrap();

        let decoded = FitFile::decode(&output.bytes).unwrap();
        assert_eq!(decoded.messages.len(), 3);
        let summary = summaries(&decoded.messages)[0];
        assert_eq!(summary.avg_cadence(), Some(85));
        assert_eq!(summary.avg_power(), Some(205));
    }
}
