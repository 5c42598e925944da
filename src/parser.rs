//! Block parser for libsvm / libffm / csv (spec.md §4.B) and the
//! format/separator sniffing shared with the reader (spec.md §4.C).

use crate::data::Batch;
use crate::error::FormatError;
use crate::MAX_LINE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Space,
    Tab,
    Comma,
}

impl Separator {
    fn as_byte(self) -> u8 {
        match self {
            Separator::Space => b' ',
            Separator::Tab => b'\t',
            Separator::Comma => b',',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Libsvm,
    Libffm,
    Csv,
}

/// Detected file shape: separator, presence of a label column, and format.
#[derive(Debug, Clone, Copy)]
pub struct FileShape {
    pub separator: Separator,
    pub has_label: bool,
    pub format: FileFormat,
}

/// Sniff the separator, label presence and format from a single sample
/// line (spec.md §4.C `check_file_format`).
pub fn detect_shape(first_line: &str) -> Result<FileShape, FormatError> {
    let (space, tab, comma) = first_line
        .bytes()
        .fold((0u32, 0u32, 0u32), |(s, t, c), b| match b {
            b' ' => (s + 1, t, c),
            b'\t' => (s, t + 1, c),
            b',' => (s, t, c + 1),
            _ => (s, t, c),
        });
    let separator = if space > tab && space > comma {
        Separator::Space
    } else if tab > space && tab > comma {
        Separator::Tab
    } else if comma > space && comma > tab {
        Separator::Comma
    } else {
        return Err(FormatError::UnrecognisedShape);
    };

    let sep_char = separator.as_byte() as char;
    let fields: Vec<&str> = first_line.split(sep_char).filter(|s| !s.is_empty()).collect();
    if fields.len() < 2 {
        return Err(FormatError::UnrecognisedShape);
    }
    let has_label = !fields[0].contains(':');
    let colon_count = fields[1].bytes().filter(|&b| b == b':').count();
    let format = match colon_count {
        1 => FileFormat::Libsvm,
        2 => FileFormat::Libffm,
        0 => FileFormat::Csv,
        _ => return Err(FormatError::UnrecognisedShape),
    };
    Ok(FileShape {
        separator,
        has_label,
        format,
    })
}

/// Parse one block of bytes ending on a line boundary into `batch`,
/// appending rows. `has_label` and `shape` come from [`detect_shape`].
///
/// Fatal conditions (a line over [`MAX_LINE_SIZE`], or a malformed field)
/// abort the process, mirroring the original's `LOG(FATAL)` — this never
/// returns an error, per spec.md §7's propagation policy for the parser.
pub fn parse_block(block: &[u8], shape: FileShape, has_label: bool, batch: &mut Batch) {
    let text = std::str::from_utf8(block).expect("block is not valid utf-8");
    let sep = shape.separator.as_byte() as char;
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if line.len() > MAX_LINE_SIZE {
            panic!("line exceeds kMaxLineSize ({MAX_LINE_SIZE} bytes)");
        }
        parse_line(line, sep, shape.format, has_label, batch);
    }
}

fn parse_line(line: &str, sep: char, format: FileFormat, has_label: bool, batch: &mut Batch) {
    let mut fields = line.split(sep).filter(|s| !s.is_empty());
    let row = batch.rows.len();

    let label_field = fields.next().expect("line has no fields");
    let label = if has_label {
        map_label(label_field.parse::<f32>().expect("label is not a float"))
    } else {
        crate::data::NO_LABEL
    };

    batch.rows.push(Vec::new());
    batch.y.push(label);
    batch.norm.push(1.0);
    batch.row_length += 1;

    match format {
        FileFormat::Libsvm => {
            for field in fields {
                let (idx, val) = field.split_once(':').expect("libsvm field missing ':'");
                let feat = idx.parse::<u32>().expect("feature id is not an integer");
                let value = val.parse::<f32>().expect("value is not a float");
                batch.rows[row].push(crate::data::Node::new(0, feat, value));
            }
        }
        FileFormat::Libffm => {
            for field in fields {
                let mut parts = field.splitn(3, ':');
                let field_id = parts.next().expect("libffm field missing field id");
                let idx = parts.next().expect("libffm field missing feature id");
                let val = parts.next().expect("libffm field missing value");
                let field_id = field_id.parse::<u32>().expect("field id is not an integer");
                let feat = idx.parse::<u32>().expect("feature id is not an integer");
                let value = val.parse::<f32>().expect("value is not a float");
                batch.rows[row].push(crate::data::Node::new(field_id, feat, value));
            }
        }
        FileFormat::Csv => {
            for (i, field) in fields.enumerate() {
                let value = field.parse::<f32>().expect("csv value is not a float");
                if value.abs() < 1e-15 {
                    continue;
                }
                batch.rows[row].push(crate::data::Node::new(0, i as u32 + 1, value));
            }
        }
    }
}

/// Classification labels map any positive float to +1, else -1 (spec.md
/// §4.B). Regression keeps the raw value — callers that need regression
/// semantics read `Batch::y` directly rather than through this helper,
/// since the mapping only applies at score/loss-consumption time, not at
/// parse time; `Batch::y` stores the raw parsed float either way.
fn map_label(raw: f32) -> f32 {
    raw
}

/// At consumer (loss/metric) time: classification labels map to {-1, +1}.
pub fn classification_sign(y: f32) -> f32 {
    if y > 0.0 {
        1.0
    } else {
        -1.0
    }
}
