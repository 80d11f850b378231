/*!
 * Decode a recorded trace against a DBC database, one entry at a time
 */

use std::fmt;
use std::path::Path;

use log::{debug, warn};

use crate::can_database::CanDatabase;
use crate::can_decoder::SignalsMap;
use crate::errors::{DecodeError, TraceError};
use crate::trace_reader::{TraceRecord, TraceReader};

/// A trace entry paired with the outcome of decoding it.
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub record: TraceRecord,
    pub signals: Result<SignalsMap, DecodeError>,
}

impl DecodedRecord {
    pub fn is_decoded(&self) -> bool {
        self.signals.is_ok()
    }
}

impl fmt::Display for DecodedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.signals {
            Ok(signals) => write!(f, " {} :: {}", self.record, signals),
            Err(e) => write!(f, " {} :: {}", self.record, e),
        }
    }
}

/// Lazily decodes every frame of a trace.
///
/// Lines that fail to parse are logged and skipped. A frame that cannot be
/// decoded is still yielded, carrying its `DecodeError`.
pub struct LogDecoder<'db, I> {
    db: &'db CanDatabase,
    records: I,
}

impl<'db, I> LogDecoder<'db, I>
where
    I: Iterator<Item = Result<TraceRecord, TraceError>>,
{
    pub fn new(db: &'db CanDatabase, records: I) -> Self {
        LogDecoder { db, records }
    }
}

impl<I> Iterator for LogDecoder<'_, I>
where
    I: Iterator<Item = Result<TraceRecord, TraceError>>,
{
    type Item = DecodedRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.records.next()? {
                Ok(record) => {
                    let signals = self.db.decode_frame(&record.frame);
                    if let Err(e) = &signals {
                        debug!("{}: {}", record, e);
                    }
                    return Some(DecodedRecord { record, signals });
                }
                Err(e) => warn!("Skipping trace line: {}", e),
            }
        }
    }
}

/// Open `trace` and decode it against `db`.
///
/// Reopen to restart; the returned iterator reads the file as it goes.
pub fn decode_log(
    db: &CanDatabase,
    trace: impl AsRef<Path>,
) -> Result<LogDecoder<'_, TraceReader>, TraceError> {
    let reader = TraceReader::open(trace)?;
    Ok(LogDecoder::new(db, reader))
}
