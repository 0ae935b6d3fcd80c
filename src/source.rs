//! Per-frame hand landmark oracles.
//!
//! The hand tracker itself lives outside this crate. A [`LandmarkSource`] is
//! asked once per camera frame for zero or one hand. [`LandmarkTrace`] reads
//! the answers from a JSON-lines stream, one line per frame, so an external
//! tracker process or a recorded session can drive a capture.

use crate::{
    capture::Frame,
    config::DEFAULT_MIN_HAND_SCORE,
    error::Error,
    landmarks::LandmarkFrame,
};
use serde::Deserialize;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};
use tracing::{debug, info};

pub trait LandmarkSource: Send {
    /// Landmarks for `frame`. Errors are per frame and do not end a session.
    fn detect(&mut self, frame: &Frame) -> Result<LandmarkFrame, Error>;
}

impl<F> LandmarkSource for F
where
    F: FnMut(&Frame) -> Result<LandmarkFrame, Error> + Send,
{
    fn detect(&mut self, frame: &Frame) -> Result<LandmarkFrame, Error> {
        self(frame)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TracePoint {
    /// `[x, y]` or `[x, y, z]`
    Seq(Vec<f32>),
    /// `{"x": .., "y": .., "z": ..}`, `z` ignored
    Object { x: f32, y: f32 },
}

impl TracePoint {
    fn xy(&self) -> Option<(f32, f32)> {
        match *self {
            Self::Seq(ref coords) => match coords.as_slice() {
                [x, y] | [x, y, _] => Some((*x, *y)),
                _ => None,
            },
            Self::Object { x, y } => Some((x, y)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TraceEntry {
    #[serde(default)]
    landmarks: Option<Vec<TracePoint>>,
    #[serde(default)]
    score: Option<f32>,
}

/// Landmarks replayed from JSON lines.
///
/// Each non-blank line is one frame: `{"landmarks": [[x, y], ...]}`. An empty
/// object, `null`, or a `null` landmark list means no hand. Entries carrying a
/// `score` below the minimum hand score are treated as no hand. Once the trace
/// is exhausted every further frame has no hand.
#[derive(Debug)]
pub struct LandmarkTrace<R> {
    reader: R,
    line: usize,
    min_score: f32,
    buf: String,
    exhausted: bool,
}

impl<R> LandmarkTrace<R>
where
    R: BufRead,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            min_score: DEFAULT_MIN_HAND_SCORE,
            buf: String::new(),
            exhausted: false,
        }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Number of lines consumed so far.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn next_frame(&mut self) -> Result<LandmarkFrame, Error> {
        let entry = loop {
            if self.exhausted {
                return Ok(LandmarkFrame::Absent);
            }
            self.buf.clear();
            if self.reader.read_line(&mut self.buf).map_err(Error::ReadTrace)? == 0 {
                debug!(message = "landmark trace exhausted", lines = self.line);
                self.exhausted = true;
                continue;
            }
            self.line += 1;
            let text = self.buf.trim();
            if text.is_empty() {
                continue;
            }
            break serde_json::from_str::<Option<TraceEntry>>(text)
                .map_err(|e| Error::ParseTrace(e, self.line))?
                .unwrap_or_default();
        };

        if let Some(score) = entry.score {
            // NaN scores never pass
            if !(score >= self.min_score) {
                debug!(message = "hand below score threshold", score, line = self.line);
                return Ok(LandmarkFrame::Absent);
            }
        }

        let points = match entry.landmarks {
            Some(points) => points,
            None => return Ok(LandmarkFrame::Absent),
        };
        match points.iter().map(TracePoint::xy).collect::<Option<Vec<_>>>() {
            Some(xys) => Ok(LandmarkFrame::from_points(Some(&xys))),
            None => {
                debug!(message = "malformed landmark point", line = self.line);
                Ok(LandmarkFrame::Absent)
            }
        }
    }
}

impl LandmarkTrace<Box<dyn BufRead + Send>> {
    /// Open a trace file, or standard input for `-`.
    pub fn open<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let reader: Box<dyn BufRead + Send> = if path == Path::new("-") {
            info!("reading landmarks from stdin");
            Box::new(BufReader::new(std::io::stdin()))
        } else {
            let file = File::open(path).map_err(|e| Error::OpenTrace(e, path.to_path_buf()))?;
            info!(message = "reading landmarks", path = ?path);
            Box::new(BufReader::new(file))
        };
        Ok(Self::new(reader))
    }
}

impl<R> LandmarkSource for LandmarkTrace<R>
where
    R: BufRead + Send,
{
    fn detect(&mut self, _frame: &Frame) -> Result<LandmarkFrame, Error> {
        self.next_frame()
    }
}
