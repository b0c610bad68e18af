//! Dataset loading: the textual key-stream format.
//!
//! A dataset is whitespace-separated integers: a header
//! `KNOWN_COUNT NUM_PACKETS KEY_RANGE`, then `KNOWN_COUNT` known-flow keys
//! (pre-populated into the table before the run; only the first pool-area's
//! worth is retained), then `NUM_PACKETS` packet keys.
//!
//! Loading is all-or-nothing: any failure is fatal before a single packet is
//! processed, and the diagnostic names the file and the offending record
//! index.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::{DatasetEcho, FlowKey, LARGE_FLOW_SLOTS};

/// Dataset load failures.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The file could not be read at all.
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The three-integer header is missing or malformed.
    #[error("{path}: malformed header (expected `KNOWN_COUNT NUM_PACKETS KEY_RANGE`)")]
    MalformedHeader { path: String },
    /// A known-flow record is missing or not a 32-bit unsigned integer.
    #[error("{path}: bad or missing known-flow record {index}")]
    KnownFlow { path: String, index: usize },
    /// A packet record is missing or not a 32-bit unsigned integer.
    #[error("{path}: bad or missing packet record {index}")]
    Packet { path: String, index: usize },
}

/// A fully loaded dataset.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Known-flow prelude, capped at the large-flow pool area.
    pub known: Vec<FlowKey>,
    /// Known count as declared by the header (may exceed `known.len()`).
    pub declared_known: usize,
    /// The packet key stream.
    pub packets: Vec<FlowKey>,
    /// Key range declared by the header.
    pub key_range: u32,
}

impl Dataset {
    /// Header echo for the run report.
    #[must_use]
    pub fn echo(&self) -> DatasetEcho {
        DatasetEcho {
            known_count: self.declared_known,
            packet_count: self.packets.len(),
            key_range: self.key_range,
        }
    }
}

/// Load a dataset from `path`.
pub fn load_dataset(path: impl AsRef<Path>) -> Result<Dataset, DatasetError> {
    let path = path.as_ref();
    let label = path.display().to_string();
    let contents = fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: label.clone(),
        source,
    })?;
    parse(&label, &contents)
}

fn parse(path: &str, contents: &str) -> Result<Dataset, DatasetError> {
    let mut tokens = contents.split_whitespace();

    let mut header = || -> Option<u64> { tokens.next()?.parse().ok() };
    let (Some(declared_known), Some(num_packets), Some(key_range)) =
        (header(), header(), header())
    else {
        return Err(DatasetError::MalformedHeader {
            path: path.to_string(),
        });
    };
    let declared_known = declared_known as usize;
    let num_packets = num_packets as usize;
    let key_range = u32::try_from(key_range).map_err(|_| DatasetError::MalformedHeader {
        path: path.to_string(),
    })?;

    let mut known = Vec::with_capacity(declared_known.min(LARGE_FLOW_SLOTS));
    for index in 0..declared_known {
        let key: FlowKey = tokens
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| DatasetError::KnownFlow {
                path: path.to_string(),
                index,
            })?;
        // Keys beyond the retained cap are consumed and discarded.
        if index < LARGE_FLOW_SLOTS {
            known.push(key);
        }
    }

    let mut packets = Vec::with_capacity(num_packets);
    for index in 0..num_packets {
        let key: FlowKey = tokens
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| DatasetError::Packet {
                path: path.to_string(),
                index,
            })?;
        packets.push(key);
    }

    Ok(Dataset {
        known,
        declared_known,
        packets,
        key_range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_input() {
        let d = parse("test", "2 3 100\n10 20\n1 2 3\n").unwrap();
        assert_eq!(d.known, vec![10, 20]);
        assert_eq!(d.declared_known, 2);
        assert_eq!(d.packets, vec![1, 2, 3]);
        assert_eq!(d.key_range, 100);
    }

    #[test]
    fn header_and_records_may_share_lines() {
        // fscanf-style whitespace tokenisation: layout is free-form.
        let d = parse("test", "1 2 50 9 4 5").unwrap();
        assert_eq!(d.known, vec![9]);
        assert_eq!(d.packets, vec![4, 5]);
    }

    #[test]
    fn empty_input_is_a_malformed_header() {
        assert!(matches!(
            parse("test", ""),
            Err(DatasetError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn non_numeric_header_is_malformed() {
        assert!(matches!(
            parse("test", "a b c"),
            Err(DatasetError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn truncated_prelude_names_the_record() {
        let err = parse("test", "3 1 100\n1 2").unwrap_err();
        match err {
            DatasetError::KnownFlow { index, .. } => assert_eq!(index, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn truncated_stream_names_the_record() {
        let err = parse("test", "1 3 100\n7\n1 2").unwrap_err();
        match err {
            DatasetError::Packet { index, .. } => assert_eq!(index, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn negative_key_is_rejected() {
        assert!(matches!(
            parse("test", "1 1 100\n-5\n1"),
            Err(DatasetError::KnownFlow { .. })
        ));
    }

    #[test]
    fn trailing_tokens_are_ignored() {
        let d = parse("test", "1 1 100\n7\n1\n999 999").unwrap();
        assert_eq!(d.packets, vec![1]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_dataset("/nonexistent/flowmux-dataset.txt").unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
        assert!(err.to_string().contains("flowmux-dataset.txt"));
    }

    #[test]
    fn echo_reflects_header() {
        let d = parse("test", "2 1 64\n5 6\n7").unwrap();
        let e = d.echo();
        assert_eq!(e.known_count, 2);
        assert_eq!(e.packet_count, 1);
        assert_eq!(e.key_range, 64);
    }
}
