//! Source buffers and byte-offset locations.
//!
//! A [`Source`] is an immutable byte buffer with a display name; a
//! [`Location`] is a `(source, offset)` pair. Every AST node and diagnostic
//! carries at most one location. Line/column pairs are never stored; they are
//! recomputed from the byte offset when a diagnostic is rendered.

use std::fmt;

/// Index of a source buffer registered in the [`SourceMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u32);

impl SourceId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A byte position inside one source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub source: SourceId,
    pub offset: u32,
}

impl Location {
    pub fn new(source: SourceId, offset: usize) -> Self {
        Self {
            source,
            offset: u32::try_from(offset).unwrap_or(u32::MAX),
        }
    }
}

/// An immutable source buffer.
#[derive(Debug)]
pub struct Source {
    pub name: String,
    pub data: Vec<u8>,
}

impl Source {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One-based line and zero-based column, as displayed in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCol {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for LineCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.line, self.column)
    }
}

/// Registry of every source buffer seen during a compilation.
///
/// Sources are appended and never removed; `SourceId`s stay valid for the
/// whole compilation, which is what lets [`Location`] be a small `Copy` pair.
#[derive(Debug, Default)]
pub struct SourceMap {
    sources: Vec<Source>,
}

impl SourceMap {
    pub fn add(&mut self, name: impl Into<String>, data: Vec<u8>) -> SourceId {
        let id = SourceId(u32::try_from(self.sources.len()).expect("source table overflow"));
        self.sources.push(Source {
            name: name.into(),
            data,
        });
        id
    }

    pub fn get(&self, id: SourceId) -> &Source {
        &self.sources[id.index()]
    }

    /// Computes the displayed line/column of a location by scanning the
    /// buffer up to its offset.
    pub fn line_col(&self, location: Location) -> LineCol {
        let source = self.get(location.source);
        let end = (location.offset as usize).min(source.data.len());
        let mut line = 1u32;
        let mut column = 0u32;
        for &b in &source.data[..end] {
            if b == b'\n' {
                line += 1;
                column = 0;
            } else {
                column += 1;
            }
        }
        LineCol { line, column }
    }

    /// Renders a two-line excerpt: the source line containing `location`
    /// followed by a caret marker under the offending column.
    pub fn excerpt(&self, location: Location) -> String {
        let source = self.get(location.source);
        let offset = (location.offset as usize).min(source.data.len());
        let start = source.data[..offset]
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |p| p + 1);
        let end = source.data[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(source.data.len(), |p| offset + p);
        let line = String::from_utf8_lossy(&source.data[start..end]).into_owned();
        let mut marker = String::new();
        for _ in start..offset {
            marker.push('-');
        }
        marker.push('^');
        format!("{line}\n{marker}")
    }

    /// `file(line,col)` prefix used by every rendered diagnostic.
    pub fn describe(&self, location: Location) -> String {
        let lc = self.line_col(location);
        format!("{}({lc})", self.get(location.source).name)
    }

    /// Text between two offsets of the same source, used to echo the
    /// original expression in static-assertion failures.
    pub fn slice(&self, start: Location, end: Location) -> Option<String> {
        if start.source != end.source || start.offset > end.offset {
            return None;
        }
        let source = self.get(start.source);
        let hi = (end.offset as usize).min(source.data.len());
        Some(String::from_utf8_lossy(&source.data[start.offset as usize..hi]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_counts_from_one() {
        let mut map = SourceMap::default();
        let id = map.add("t.clay", b"ab\ncd\nef".to_vec());
        assert_eq!(map.line_col(Location::new(id, 0)), LineCol { line: 1, column: 0 });
        assert_eq!(map.line_col(Location::new(id, 4)), LineCol { line: 2, column: 1 });
        assert_eq!(map.line_col(Location::new(id, 6)), LineCol { line: 3, column: 0 });
    }

    #[test]
    fn excerpt_points_at_offset() {
        let mut map = SourceMap::default();
        let id = map.add("t.clay", b"xy\nabcd\n".to_vec());
        let rendered = map.excerpt(Location::new(id, 5));
        assert_eq!(rendered, "abcd\n--^");
    }
}
