use super::{LandmarkSet, LandmarkSource, Observation};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Headless landmark feed reading a recorded session.
///
/// One frame per line: a JSON list of `[x, y, z]` triples for the first
/// hand, or `null` when no hand was detected. Blank lines are skipped; lines
/// that fail to parse count as frames without a hand.
pub struct ReplayFeed {
    lines: Box<dyn Iterator<Item = std::io::Result<String>>>,
    line_no: usize,
}

impl ReplayFeed {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Replaying landmarks from {}", path.display());

        let file = File::open(path)
            .with_context(|| format!("Failed to open landmark recording {}", path.display()))?;

        Ok(Self::from_reader(BufReader::new(file)))
    }

    pub fn from_reader<R: BufRead + 'static>(reader: R) -> Self {
        Self {
            lines: Box::new(reader.lines()),
            line_no: 0,
        }
    }

    fn parse_line(&self, line: &str) -> Observation {
        match serde_json::from_str::<Option<LandmarkSet>>(line) {
            Ok(hand) => hand.into(),
            Err(err) => {
                tracing::warn!("Skipping malformed frame at line {}: {}", self.line_no, err);
                Observation::NoHand
            }
        }
    }
}

impl LandmarkSource for ReplayFeed {
    fn next_frame(&mut self) -> Option<Observation> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    tracing::warn!("Landmark recording unreadable, stopping: {}", err);
                    return None;
                }
            };
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Some(self.parse_line(trimmed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_replay_frames() {
        let text = "[[0.1,0.2,0.0]]\n\nnull\n{not json\n";
        let mut feed = ReplayFeed::from_reader(Cursor::new(text.to_string()));

        match feed.next_frame() {
            Some(Observation::Hand(set)) => assert_eq!(set.len(), 1),
            other => panic!("Expected hand, got {:?}", other),
        }
        assert_eq!(feed.next_frame(), Some(Observation::NoHand));
        assert_eq!(feed.next_frame(), Some(Observation::NoHand));
        assert_eq!(feed.next_frame(), None);
    }
}
