//! Fortran-namelist reader/writer for the subset used by the beamline
//! calibration files (`transcal.nml`, `instrumentation.nml`,
//! `diffractcal.nml`) and the geometry-solver input.
//!
//! Supported: one or more `&group ... /` blocks, `key = value [value...]`
//! entries with real or quoted-string values, comma or whitespace
//! separated, continuation lines, and `!` comments. Nothing more is
//! needed by the calibration files in the field.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum NmlError {
    #[error("cannot read namelist file {path}: {source}")]
    #[diagnostic(code(gphl_workflow::nml::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("namelist group '{group}' not found in {path}")]
    #[diagnostic(code(gphl_workflow::nml::missing_group))]
    MissingGroup { group: String, path: String },

    #[error("namelist syntax error at line {line}: {detail}")]
    #[diagnostic(code(gphl_workflow::nml::syntax))]
    Syntax { line: usize, detail: String },
}

/// A single namelist value.
#[derive(Clone, Debug, PartialEq)]
pub enum NmlValue {
    Real(f64),
    Text(String),
}

/// One `&group ... /` block, entries in file order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NmlGroup {
    pub name: String,
    entries: Vec<(String, Vec<NmlValue>)>,
}

impl NmlGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&[NmlValue]> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_slice())
    }

    /// All values of `key` as reals; `None` if absent or non-numeric.
    pub fn floats(&self, key: &str) -> Option<Vec<f64>> {
        let values = self.get(key)?;
        values
            .iter()
            .map(|v| match v {
                NmlValue::Real(x) => Some(*x),
                NmlValue::Text(_) => None,
            })
            .collect()
    }

    /// Scalar real value of `key`.
    pub fn float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            [NmlValue::Real(x)] => Some(*x),
            _ => None,
        }
    }

    /// All values of `key` as strings; `None` if absent or non-string.
    pub fn strings(&self, key: &str) -> Option<Vec<String>> {
        let values = self.get(key)?;
        values
            .iter()
            .map(|v| match v {
                NmlValue::Text(s) => Some(s.clone()),
                NmlValue::Real(_) => None,
            })
            .collect()
    }

    pub fn set_floats(&mut self, key: impl Into<String>, values: impl IntoIterator<Item = f64>) {
        self.entries.push((
            key.into(),
            values.into_iter().map(NmlValue::Real).collect(),
        ));
    }

    pub fn set_float(&mut self, key: impl Into<String>, value: f64) {
        self.entries.push((key.into(), vec![NmlValue::Real(value)]));
    }

    /// Render the group in namelist syntax.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "&{}", self.name);
        for (key, values) in &self.entries {
            let rendered: Vec<String> = values
                .iter()
                .map(|v| match v {
                    NmlValue::Real(x) => format!("{x}"),
                    NmlValue::Text(s) => format!("'{s}'"),
                })
                .collect();
            let _ = writeln!(out, "    {} = {}", key, rendered.join(" "));
        }
        out.push_str("/\n");
        out
    }
}

/// Parse namelist text into its groups.
pub fn parse(text: &str) -> Result<Vec<NmlGroup>, NmlError> {
    let mut groups: Vec<NmlGroup> = Vec::new();
    let mut current: Option<NmlGroup> = None;

    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix('&') {
            if name.eq_ignore_ascii_case("end") {
                if let Some(group) = current.take() {
                    groups.push(group);
                }
            } else if current.is_some() {
                return Err(NmlError::Syntax {
                    line: line_no,
                    detail: format!("group '&{name}' opened inside another group"),
                });
            } else {
                current = Some(NmlGroup::new(name.trim()));
            }
            continue;
        }

        if line == "/" {
            match current.take() {
                Some(group) => groups.push(group),
                None => {
                    return Err(NmlError::Syntax {
                        line: line_no,
                        detail: "group terminator outside a group".to_string(),
                    });
                }
            }
            continue;
        }

        let Some(group) = current.as_mut() else {
            return Err(NmlError::Syntax {
                line: line_no,
                detail: "value entry outside a group".to_string(),
            });
        };

        if let Some(eq) = line.find('=') {
            let key = line[..eq].trim().to_string();
            if key.is_empty() {
                return Err(NmlError::Syntax {
                    line: line_no,
                    detail: "entry with empty key".to_string(),
                });
            }
            let values = parse_values(&line[eq + 1..], line_no)?;
            group.entries.push((key, values));
        } else {
            // Continuation of the previous entry's value list.
            let values = parse_values(line, line_no)?;
            match group.entries.last_mut() {
                Some((_, existing)) => existing.extend(values),
                None => {
                    return Err(NmlError::Syntax {
                        line: line_no,
                        detail: "continuation line before any entry".to_string(),
                    });
                }
            }
        }
    }

    if let Some(group) = current {
        // Tolerate a missing trailing terminator.
        groups.push(group);
    }
    Ok(groups)
}

/// Read one named group from a file.
pub fn read_group(path: &Path, group: &str) -> Result<NmlGroup, NmlError> {
    let text = fs::read_to_string(path).map_err(|source| NmlError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&text)?
        .into_iter()
        .find(|g| g.name.eq_ignore_ascii_case(group))
        .ok_or_else(|| NmlError::MissingGroup {
            group: group.to_string(),
            path: path.display().to_string(),
        })
}

fn strip_comment(line: &str) -> &str {
    // Comments never appear inside the quoted strings we care about.
    match line.find('!') {
        Some(index) => &line[..index],
        None => line,
    }
}

fn parse_values(text: &str, line_no: usize) -> Result<Vec<NmlValue>, NmlError> {
    let mut values = Vec::new();
    for token in text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        if let Some(stripped) = token
            .strip_prefix('\'')
            .and_then(|t| t.strip_suffix('\''))
            .or_else(|| token.strip_prefix('"').and_then(|t| t.strip_suffix('"')))
        {
            values.push(NmlValue::Text(stripped.to_string()));
        } else {
            let number = token.parse::<f64>().map_err(|_| NmlError::Syntax {
                line: line_no,
                detail: format!("cannot parse value '{token}'"),
            })?;
            values.push(NmlValue::Real(number));
        }
    }
    Ok(values)
}
