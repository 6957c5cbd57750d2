//! Trial records and the record sink
//!
//! Output is one comma-delimited row per trial, preceded by a header row.
//! Field names separate words with dots (`bundle.length`, `n.cat`).
//! Records are held in memory until a flush point, so a crash loses at most
//! the trials since the last completed flush.

use crate::distribution::{DistractorCounts, Species};
use crate::error::{Result, WamError};
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const DELIMITER: char = ',';

/// Immutable snapshot of one completed trial.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrialRecord {
    pub block: usize,
    pub bundle: usize,
    /// Trial index within the session.
    pub session_trial: usize,
    /// Trial index within the block.
    pub block_trial: usize,
    /// Trial index within the bundle.
    pub bundle_trial: usize,
    /// Reaction time in milliseconds, `None` on a miss.
    pub rt_ms: Option<u64>,
    pub familiar: bool,
    /// Hole the target appeared at.
    pub position: usize,
    pub probabilities: Vec<f64>,
    pub distractors: DistractorCounts,
    /// Cumulative score after this trial.
    pub score: u64,
    pub bundle_length: usize,
    /// Trials run under this distribution so far, this one included.
    pub dist_trials: u64,
    /// Bundles installed with this distribution so far.
    pub dist_bundles: u64,
    /// Hit position relative to the target, `None` on a miss.
    pub hit_offset: Option<(f64, f64)>,
}

/// Header fields in canonical order for `holes` positions.
pub fn header_fields(holes: usize) -> Vec<String> {
    let mut fields: Vec<String> = [
        "block",
        "bundle",
        "session.trial",
        "block.trial",
        "bundle.trial",
        "rt",
        "familiar",
        "pos",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    fields.extend((0..holes).map(|i| format!("p{i}")));
    fields.extend(Species::ALL.iter().map(|s| format!("n.{}", s.label())));
    fields.extend(
        [
            "score",
            "bundle.length",
            "dist.trials",
            "dist.bundles",
            "whack.x",
            "whack.y",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    fields
}

fn opt_field<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn non_empty(raw: &str) -> Option<&str> {
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

impl TrialRecord {
    pub fn holes(&self) -> usize {
        self.probabilities.len()
    }

    /// Render as a delimited row matching [`header_fields`].
    pub fn to_row(&self) -> String {
        let mut cols: Vec<String> = vec![
            self.block.to_string(),
            self.bundle.to_string(),
            self.session_trial.to_string(),
            self.block_trial.to_string(),
            self.bundle_trial.to_string(),
            opt_field(self.rt_ms),
            self.familiar.to_string(),
            self.position.to_string(),
        ];
        cols.extend(self.probabilities.iter().map(|p| p.to_string()));
        cols.extend(self.distractors.iter().map(|(_, n)| n.to_string()));
        cols.extend([
            self.score.to_string(),
            self.bundle_length.to_string(),
            self.dist_trials.to_string(),
            self.dist_bundles.to_string(),
            opt_field(self.hit_offset.map(|(x, _)| x)),
            opt_field(self.hit_offset.map(|(_, y)| y)),
        ]);
        cols.join(&DELIMITER.to_string())
    }

    /// Parse a row produced by [`TrialRecord::to_row`].
    pub fn from_row(row: &str, holes: usize, line: usize) -> Result<Self> {
        let cols: Vec<&str> = row.split(DELIMITER).collect();
        let expected = header_fields(holes).len();
        if cols.len() != expected {
            return Err(WamError::Parse {
                line,
                reason: format!("expected {expected} fields, found {}", cols.len()),
            });
        }

        let mut it = cols.into_iter();
        let mut next = || it.next().unwrap_or_default();
        let bad = |what: &str| WamError::Parse {
            line,
            reason: format!("bad {what}"),
        };

        let block = next().parse().map_err(|_| bad("block"))?;
        let bundle = next().parse().map_err(|_| bad("bundle"))?;
        let session_trial = next().parse().map_err(|_| bad("session.trial"))?;
        let block_trial = next().parse().map_err(|_| bad("block.trial"))?;
        let bundle_trial = next().parse().map_err(|_| bad("bundle.trial"))?;
        let rt_ms = non_empty(next())
            .map(str::parse::<u64>)
            .transpose()
            .map_err(|_| bad("rt"))?;
        let familiar = next().parse().map_err(|_| bad("familiar"))?;
        let position = next().parse().map_err(|_| bad("pos"))?;
        let probabilities = (0..holes)
            .map(|_| next().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| bad("probability"))?;
        let mut pairs = Vec::with_capacity(Species::ALL.len());
        for &species in &Species::ALL {
            let n = next().parse::<u32>().map_err(|_| bad("distractor count"))?;
            pairs.push((species, n));
        }
        let score = next().parse().map_err(|_| bad("score"))?;
        let bundle_length = next().parse().map_err(|_| bad("bundle.length"))?;
        let dist_trials = next().parse().map_err(|_| bad("dist.trials"))?;
        let dist_bundles = next().parse().map_err(|_| bad("dist.bundles"))?;
        let hit_x = non_empty(next())
            .map(str::parse::<f64>)
            .transpose()
            .map_err(|_| bad("whack.x"))?;
        let hit_y = non_empty(next())
            .map(str::parse::<f64>)
            .transpose()
            .map_err(|_| bad("whack.y"))?;

        Ok(Self {
            block,
            bundle,
            session_trial,
            block_trial,
            bundle_trial,
            rt_ms,
            familiar,
            position,
            probabilities,
            distractors: DistractorCounts::from_pairs(pairs),
            score,
            bundle_length,
            dist_trials,
            dist_bundles,
            hit_offset: hit_x.zip(hit_y),
        })
    }
}

enum Output<W: Write> {
    Plain(BufWriter<W>),
    Lz4(FrameEncoder<BufWriter<W>>),
}

impl<W: Write> Output<W> {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Output::Plain(w) => w,
            Output::Lz4(w) => w,
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Output::Plain(mut w) => w.flush(),
            Output::Lz4(w) => {
                let mut inner = w.finish().map_err(io::Error::other)?;
                inner.flush()
            }
        }
    }
}

/// Append-only trial log.
pub struct RecordSink<W: Write> {
    output: Option<Output<W>>,
    pending: Vec<TrialRecord>,
    header_written: bool,
    emitted: usize,
    buffered: usize,
    flushed: usize,
    first_error: Option<io::Error>,
}

impl<W: Write> RecordSink<W> {
    /// Plain-text sink.
    pub fn new(writer: W) -> Self {
        Self::with_output(Output::Plain(BufWriter::new(writer)))
    }

    /// LZ4 frame-compressed sink.
    pub fn compressed(writer: W) -> Self {
        Self::with_output(Output::Lz4(FrameEncoder::new(BufWriter::new(writer))))
    }

    pub fn with_compression(writer: W, compress: bool) -> Self {
        if compress {
            Self::compressed(writer)
        } else {
            Self::new(writer)
        }
    }

    fn with_output(output: Output<W>) -> Self {
        Self {
            output: Some(output),
            pending: Vec::new(),
            header_written: false,
            emitted: 0,
            buffered: 0,
            flushed: 0,
            first_error: None,
        }
    }

    /// Queue a record. Nothing is written until the next flush.
    pub fn push(&mut self, record: TrialRecord) {
        self.emitted += 1;
        self.pending.push(record);
    }

    /// Write queued records. Failures are logged and the first one is kept
    /// for [`RecordSink::close`].
    pub fn flush(&mut self) {
        if let Err(err) = self.try_flush() {
            warn!(error = %err, "record flush failed");
            if self.first_error.is_none() {
                self.first_error = Some(err);
            }
        }
    }

    fn try_flush(&mut self) -> io::Result<()> {
        let Some(output) = self.output.as_mut() else {
            return Err(io::Error::other("record sink already closed"));
        };
        let out = output.writer();
        if !self.pending.is_empty() && !self.header_written {
            let holes = self.pending[0].holes();
            let header = format!("{}\n", header_fields(holes).join(&DELIMITER.to_string()));
            out.write_all(header.as_bytes())?;
            self.header_written = true;
        }

        // Each row goes in as one write so a failure never leaves half a row
        // behind. Rows the writer accepted stay in its buffer; the rest stay
        // queued for the next attempt.
        let mut accepted = 0;
        let mut result = Ok(());
        for record in &self.pending {
            let line = format!("{}\n", record.to_row());
            if let Err(err) = out.write_all(line.as_bytes()) {
                result = Err(err);
                break;
            }
            accepted += 1;
        }
        self.pending = self.pending.split_off(accepted);
        self.buffered += accepted;
        result?;

        out.flush()?;
        self.flushed = self.buffered;
        debug!(flushed = self.flushed, "records flushed");
        Ok(())
    }

    /// Final flush. Returns the first failure seen over the sink's lifetime.
    pub fn close(&mut self) -> Result<()> {
        self.flush();
        if let Some(output) = self.output.take() {
            if let Err(err) = output.finish() {
                warn!(error = %err, "record sink close failed");
                if self.first_error.is_none() {
                    self.first_error = Some(err);
                }
            }
        }
        match self.first_error.take() {
            Some(err) => Err(WamError::Io(err)),
            None => Ok(()),
        }
    }

    /// Records handed to the sink.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Records written through to the underlying writer.
    pub fn flushed(&self) -> usize {
        self.flushed
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl RecordSink<File> {
    /// Create `<dir>/<subject>_<unix seconds>.csv` (`.csv.lz4` when compressed).
    pub fn create_for_subject(
        dir: impl AsRef<Path>,
        subject: &str,
        compress: bool,
    ) -> Result<(Self, PathBuf)> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let ext = if compress { "csv.lz4" } else { "csv" };
        let path = dir.as_ref().join(format!("{subject}_{stamp}.{ext}"));
        let file = File::create(&path)?;
        Ok((Self::with_compression(file, compress), path))
    }
}

/// Reads a record stream back into [`TrialRecord`]s.
pub struct RecordReader;

impl RecordReader {
    pub fn read<R: Read>(reader: R, compressed: bool) -> Result<Vec<TrialRecord>> {
        if compressed {
            Self::read_lines(BufReader::new(FrameDecoder::new(reader)))
        } else {
            Self::read_lines(BufReader::new(reader))
        }
    }

    fn read_lines<B: BufRead>(reader: B) -> Result<Vec<TrialRecord>> {
        let mut lines = reader.lines();
        let Some(header) = lines.next().transpose()? else {
            return Ok(Vec::new());
        };
        let holes = header
            .split(DELIMITER)
            .filter(|f| f.starts_with('p') && f[1..].parse::<usize>().is_ok())
            .count();
        if header != header_fields(holes).join(&DELIMITER.to_string()) {
            return Err(WamError::Parse {
                line: 1,
                reason: "unrecognized header".to_string(),
            });
        }

        let mut records = Vec::new();
        for (i, line) in lines.enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            records.push(TrialRecord::from_row(&line, holes, i + 2)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn record(trial: usize, rt: Option<u64>) -> TrialRecord {
        TrialRecord {
            block: 0,
            bundle: 1,
            session_trial: trial,
            block_trial: trial,
            bundle_trial: trial % 4,
            rt_ms: rt,
            familiar: trial % 2 == 0,
            position: 3,
            probabilities: vec![0.1, 0.1, 0.2, 0.6],
            distractors: DistractorCounts::from_pairs([(Species::Cat, 2), (Species::Snail, 1)]),
            score: 42,
            bundle_length: 4,
            dist_trials: trial as u64 + 1,
            dist_bundles: 1,
            hit_offset: rt.map(|_| (12.5, 30.0)),
        }
    }

    /// Writer that shares its buffer and can be told to fail.
    #[derive(Clone, Default)]
    struct Shared {
        buf: Rc<RefCell<Vec<u8>>>,
        fail: Rc<RefCell<bool>>,
    }

    impl Write for Shared {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            if *self.fail.borrow() {
                return Err(io::Error::other("disk full"));
            }
            self.buf.borrow_mut().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            if *self.fail.borrow() {
                return Err(io::Error::other("disk full"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_header_order() {
        let header = header_fields(4).join(",");
        assert_eq!(
            header,
            "block,bundle,session.trial,block.trial,bundle.trial,rt,familiar,pos,p0,p1,p2,p3,\
             n.cat,n.dinosaur,n.hippo,n.rabbit,n.snail,score,bundle.length,dist.trials,dist.bundles,\
             whack.x,whack.y"
        );
        assert!(!header.contains('_'));
    }

    #[test]
    fn test_miss_leaves_rt_empty() {
        let row = record(1, None).to_row();
        let cols: Vec<&str> = row.split(',').collect();
        assert_eq!(cols[5], "");
        assert_eq!(cols[cols.len() - 1], "");
        assert_eq!(cols[cols.len() - 2], "");
    }

    #[test]
    fn test_round_trip_plain() {
        let shared = Shared::default();
        let mut sink = RecordSink::new(shared.clone());
        let written = vec![record(0, Some(431)), record(1, None), record(2, Some(1))];
        for r in &written {
            sink.push(r.clone());
        }
        sink.close().unwrap();

        let bytes = shared.buf.borrow().clone();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("block,")).count(), 1);
        let read = RecordReader::read(&bytes[..], false).unwrap();
        assert_eq!(read, written);
    }

    #[test]
    fn test_round_trip_compressed() {
        let shared = Shared::default();
        let mut sink = RecordSink::compressed(shared.clone());
        let written = vec![record(0, Some(250)), record(1, Some(900))];
        sink.push(written[0].clone());
        sink.flush();
        sink.push(written[1].clone());
        sink.close().unwrap();

        let bytes = shared.buf.borrow().clone();
        // LZ4 frame magic number, little-endian.
        assert_eq!(&bytes[..4], &[0x04, 0x22, 0x4D, 0x18]);
        let read = RecordReader::read(&bytes[..], true).unwrap();
        assert_eq!(read, written);
    }

    #[test]
    fn test_nothing_written_before_flush() {
        let shared = Shared::default();
        let mut sink = RecordSink::new(shared.clone());
        sink.push(record(0, Some(300)));
        assert!(shared.buf.borrow().is_empty());
        assert_eq!(sink.pending(), 1);
        sink.flush();
        assert_eq!(sink.flushed(), 1);
        assert_eq!(shared.buf.borrow().iter().filter(|&&b| b == b'\n').count(), 2);
    }

    #[test]
    fn test_first_flush_error_surfaces_on_close() {
        let shared = Shared::default();
        let mut sink = RecordSink::new(shared.clone());
        sink.push(record(0, Some(300)));
        *shared.fail.borrow_mut() = true;
        sink.flush();
        sink.flush();
        *shared.fail.borrow_mut() = false;

        let err = sink.close().unwrap_err();
        assert!(matches!(err, WamError::Io(e) if e.to_string() == "disk full"));
    }

    #[test]
    fn test_failed_flush_keeps_records_for_retry() {
        let shared = Shared::default();
        let mut sink = RecordSink::new(shared.clone());
        // Enough rows to overrun the write buffer mid-flush.
        let written: Vec<_> = (0..200).map(|t| record(t, Some(300 + t as u64))).collect();
        for r in &written {
            sink.push(r.clone());
        }

        *shared.fail.borrow_mut() = true;
        sink.flush();
        assert_eq!(sink.flushed(), 0);
        assert!(sink.pending() > 0);
        assert_eq!(sink.emitted(), 200);

        *shared.fail.borrow_mut() = false;
        sink.flush();
        assert_eq!(sink.pending(), 0);
        assert_eq!(sink.flushed(), 200);

        let err = sink.close().unwrap_err();
        assert!(matches!(err, WamError::Io(e) if e.to_string() == "disk full"));

        let bytes = shared.buf.borrow().clone();
        let read = RecordReader::read(&bytes[..], false).unwrap();
        assert_eq!(read, written);
    }

    #[test]
    fn test_empty_sink_writes_nothing() {
        let shared = Shared::default();
        let mut sink = RecordSink::new(shared.clone());
        sink.close().unwrap();
        assert!(shared.buf.borrow().is_empty());
        assert!(RecordReader::read(&b""[..], false).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let mut text = header_fields(4).join(",");
        text.push_str("\n1,2,3\n");
        let err = RecordReader::read(text.as_bytes(), false).unwrap_err();
        assert!(matches!(err, WamError::Parse { line: 2, .. }));
    }
}
