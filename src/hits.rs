//src/hits.rs

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;

use crate::error::Result;
use crate::types::QueryGroup;

/// Column holding the bit score in BLAST tabular (m8) output.
const BIT_SCORE_FIELD: usize = 11;

/// Compression of an input file, picked from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
}

impl Compression {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => Compression::Gzip,
            Some("bz2") => Compression::Bzip2,
            _ => Compression::None,
        }
    }
}

pub fn is_stdin_path(path: &Path) -> bool {
    path == Path::new("-")
}

/// Buffers `inner`, decompressing it first when needed.
pub fn open_reader<R: Read + 'static>(inner: R, compression: Compression) -> Box<dyn BufRead> {
    match compression {
        Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(inner))),
        Compression::Bzip2 => Box::new(BufReader::new(MultiBzDecoder::new(inner))),
        Compression::None => Box::new(BufReader::new(inner)),
    }
}

/// Opens `path` for line reading. `-` means stdin, `.gz` and `.bz2` files are decompressed.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if is_stdin_path(path) {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let f = File::open(path)?;
    Ok(open_reader(f, Compression::from_path(path)))
}

/// Integer value of the leading digits of `field`; 0 if it does not start with a digit.
pub fn parse_leading_int(field: &str) -> i64 {
    let digits = field.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return 0;
    }
    field[..digits].parse().unwrap_or(i64::MAX)
}

/// Query id, subject id and bit score of one tab-delimited hit line.
/// Missing fields come back empty / zero.
pub fn parse_hit_line(line: &str) -> (&str, &str, i64) {
    let mut query_id = "";
    let mut subject_id = "";
    let mut bit_score = 0;
    for (i, field) in line.split('\t').enumerate() {
        match i {
            0 => query_id = field,
            1 => subject_id = field,
            BIT_SCORE_FIELD => {
                bit_score = parse_leading_int(field);
                break;
            }
            _ => {}
        }
    }
    (query_id, subject_id, bit_score)
}

/// Groups consecutive hit lines that share a query id.
///
/// Lines with a non-positive score or an empty query id add no hit, but still end
/// the current group when their query id differs from the previous line's.
/// Groups without any hit are never yielded. Bytes that are not UTF-8 are replaced,
/// so only a failing read ends the stream, after the group collected so far.
pub struct HitGroupReader<R> {
    reader: R,
    line: Vec<u8>,
    last_query_id: String,
    current: QueryGroup,
    pending_error: Option<io::Error>,
    done: bool,
}

impl<R: BufRead> HitGroupReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            last_query_id: String::new(),
            current: QueryGroup::default(),
            pending_error: None,
            done: false,
        }
    }

    fn take_current(&mut self, next_query_id: &str) -> Option<QueryGroup> {
        let finished = std::mem::replace(&mut self.current, QueryGroup::new(next_query_id));
        if finished.is_empty() {
            None
        } else {
            Some(finished)
        }
    }

    /// Adds one raw line to the current group, returning the group it ended, if any.
    fn push_line(&mut self, raw: &[u8]) -> Option<QueryGroup> {
        let text = String::from_utf8_lossy(raw);
        let (query_id, subject_id, bit_score) = parse_hit_line(text.trim_end_matches(['\n', '\r']));

        let mut finished = None;
        if query_id != self.last_query_id {
            finished = self.take_current(query_id);
        }
        if bit_score > 0 && !query_id.is_empty() {
            self.current.query_id = query_id.to_string();
            self.current.add_hit(subject_id, bit_score as f64);
        }
        self.last_query_id.clear();
        self.last_query_id.push_str(query_id);
        finished
    }
}

impl<R: BufRead> Iterator for HitGroupReader<R> {
    type Item = Result<QueryGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            return Some(Err(e.into()));
        }
        while !self.done {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    self.done = true;
                    return self.take_current("").map(Ok);
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return match self.take_current("") {
                        Some(group) => {
                            self.pending_error = Some(e);
                            Some(Ok(group))
                        }
                        None => Some(Err(e.into())),
                    };
                }
            }

            let line = std::mem::take(&mut self.line);
            let finished = self.push_line(&line);
            self.line = line;

            if finished.is_some() {
                return finished.map(Ok);
            }
        }
        None
    }
}

/// Reads every query group of a (possibly gzipped) hit file into memory.
pub fn read_hit_groups<P: AsRef<Path>>(path: P) -> Result<Vec<QueryGroup>> {
    HitGroupReader::new(open_input(path.as_ref())?).collect()
}
