use regex::Regex;
use std::collections::HashMap;

use crate::error::TrackError;

/// One compiled path pattern: segments separated by `/`, where `:name` or
/// `{name}` marks a variable segment matching any non-empty run of non-`/`
/// characters. Compiled once by rule validation and cached there.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    raw: String,
    segments: Vec<PatternSegment>,
    anchored: Regex,
}

#[derive(Debug, Clone, PartialEq)]
enum PatternSegment {
    Literal(String),
    Variable(Option<String>),
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

impl CompiledPattern {
    pub fn compile(pattern: &str) -> Result<Self, TrackError> {
        let mut segments = Vec::new();

        for raw_seg in split_segments(pattern) {
            if let Some(name) = raw_seg.strip_prefix(':') {
                let name = if name.is_empty() { None } else { Some(name.to_string()) };
                segments.push(PatternSegment::Variable(name));
            }
            else if raw_seg.starts_with('{') && raw_seg.ends_with('}') {
                let name = &raw_seg[1..raw_seg.len() - 1];
                let name = if name.is_empty() { None } else { Some(name.to_string()) };
                segments.push(PatternSegment::Variable(name));
            }
            else {
                segments.push(PatternSegment::Literal(raw_seg.to_string()));
            }
        }

        if segments.is_empty() {
            return Err(TrackError::new(format!("Empty path pattern: '{}'", pattern)));
        }

        let re_body = segments
            .iter()
            .map(|seg| match seg {
                PatternSegment::Literal(lit) => regex::escape(lit),
                PatternSegment::Variable(_) => "([^/]+)".to_string(),
            })
            .collect::<Vec<String>>()
            .join("/");

        let anchored = Regex::new(&format!("^/?{}/?$", re_body))?;

        Ok(CompiledPattern {
            raw: pattern.to_string(),
            segments,
            anchored,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Anchored match first, then the in-order subsequence fallback. The
    /// fallback is what lets `product/:id` match `/api/v2/product/123/details`.
    pub fn matches(&self, path: &str) -> bool {
        if self.anchored.is_match(path) {
            return true;
        }

        self.subsequence_values(path).is_some()
    }

    /// Named variable values for a matching path, empty map if nothing matched.
    pub fn extract_params(&self, path: &str) -> HashMap<String, String> {
        let mut result = HashMap::new();

        let values = if let Some(caps) = self.anchored.captures(path) {
            caps.iter()
                .skip(1)
                .filter_map(|m| m.map(|m| m.as_str().to_string()))
                .collect::<Vec<String>>()
        }
        else if let Some(values) = self.subsequence_values(path) {
            values
        }
        else {
            return result;
        };

        let mut value_iter = values.into_iter();
        for seg in self.segments.iter() {
            if let PatternSegment::Variable(name) = seg {
                let value = match value_iter.next() {
                    Some(v) => v,
                    None => break,
                };

                if let Some(name) = name {
                    result.insert(name.clone(), value);
                }
            }
        }

        result
    }

    /// Value of the Nth (zero-based) variable segment, for positional patterns.
    pub fn extract_by_index(&self, path: &str, index: usize) -> Option<String> {
        let values = if let Some(caps) = self.anchored.captures(path) {
            caps.iter()
                .skip(1)
                .filter_map(|m| m.map(|m| m.as_str().to_string()))
                .collect::<Vec<String>>()
        }
        else {
            self.subsequence_values(path)?
        };

        values.get(index).cloned()
    }

    /// Cheap pre-filter: true iff every literal segment of the pattern appears
    /// somewhere among the path's segments. Run before any body parsing.
    pub fn static_segments_present(&self, path: &str) -> bool {
        let path_segments = split_segments(path);

        self.segments.iter().all(|seg| match seg {
            PatternSegment::Literal(lit) => path_segments.iter().any(|p| p == lit),
            PatternSegment::Variable(_) => true,
        })
    }

    /// Pattern segments must appear, in order, among the path's segments.
    /// Variables bind greedily to the next unconsumed segment. Returns the
    /// variable values in pattern order.
    fn subsequence_values(&self, path: &str) -> Option<Vec<String>> {
        let path_segments = split_segments(path);
        let mut pos = 0usize;
        let mut values = Vec::new();

        for seg in self.segments.iter() {
            let mut matched_at = None;

            for (offset, candidate) in path_segments[pos..].iter().enumerate() {
                match seg {
                    PatternSegment::Literal(lit) => {
                        if candidate == lit {
                            matched_at = Some(pos + offset);
                            break;
                        }
                    }
                    PatternSegment::Variable(_) => {
                        matched_at = Some(pos + offset);
                        break;
                    }
                }
            }

            let index = matched_at?;
            if let PatternSegment::Variable(_) = seg {
                values.push(path_segments[index].to_string());
            }

            pos = index + 1;
        }

        Some(values)
    }
}
