use memchr::memchr_iter;
use rml_core::RmlError;

/// A byte pattern with wildcard positions, parsed from the usual
/// space-separated hex syntax: `"48 8B ?? 05 ? ? 00"`.
///
/// `?` and `??` both mean "any byte". Matching is anchored at the first
/// literal byte so the scan can skip with `memchr` instead of testing every
/// offset.
#[derive(Debug, Clone)]
pub struct Pattern {
    bytes: Vec<u8>,
    mask: Vec<bool>,
    /// Index and value of the first literal byte, if any.
    anchor: Option<(usize, u8)>,
}

impl Pattern {
    /// Parses a pattern string.
    pub fn parse(text: &str) -> Result<Self, RmlError> {
        let mut bytes = Vec::new();
        let mut mask = Vec::new();

        for token in text.split_ascii_whitespace() {
            match token {
                "?" | "??" => {
                    bytes.push(0);
                    mask.push(false);
                }
                _ => {
                    if token.len() != 2 {
                        return Err(RmlError::MalformedPattern(token.to_owned()));
                    }

                    let value = u8::from_str_radix(token, 16)
                        .map_err(|_| RmlError::MalformedPattern(token.to_owned()))?;

                    bytes.push(value);
                    mask.push(true);
                }
            }
        }

        if bytes.is_empty() {
            return Err(RmlError::MalformedPattern(text.to_owned()));
        }

        let anchor = mask
            .iter()
            .position(|&literal| literal)
            .map(|index| (index, bytes[index]));

        Ok(Self {
            bytes,
            mask,
            anchor,
        })
    }

    /// The pattern length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the pattern is empty. Parsed patterns never are.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn matches_at(&self, data: &[u8], offset: usize) -> bool {
        let Some(window) = data.get(offset..offset + self.bytes.len()) else {
            return false;
        };

        self.bytes
            .iter()
            .zip(&self.mask)
            .zip(window)
            .all(|((&byte, &literal), &actual)| !literal || byte == actual)
    }

    /// Finds the first match in `data`, returning its offset.
    pub fn find(&self, data: &[u8]) -> Option<usize> {
        self.find_from(data, 0)
    }

    /// Finds the first match at or after `start`.
    pub fn find_from(&self, data: &[u8], start: usize) -> Option<usize> {
        if start >= data.len() {
            return None;
        }

        match self.anchor {
            Some((anchor_index, anchor_byte)) => {
                for position in memchr_iter(anchor_byte, &data[start..]) {
                    let candidate = match (start + position).checked_sub(anchor_index) {
                        Some(candidate) if candidate >= start => candidate,
                        _ => continue,
                    };

                    if self.matches_at(data, candidate) {
                        return Some(candidate);
                    }
                }

                None
            }

            // A fully wildcarded pattern matches anywhere it fits.
            None => {
                if data.len() - start >= self.bytes.len() {
                    Some(start)
                } else {
                    None
                }
            }
        }
    }

    /// Finds every match in `data`.
    pub fn find_all(&self, data: &[u8]) -> Vec<usize> {
        let mut matches = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.find_from(data, start) {
            matches.push(offset);
            start = offset + 1;
        }

        matches
    }
}
