//! Speaker scripts.

use serde::{Deserialize, Serialize};

use crate::config::SpeechStyle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechScript {
    pub plan_revision: u32,
    pub style: SpeechStyle,
    pub target_seconds: u32,
    pub segments: Vec<SpeechSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechSegment {
    pub slide_index: usize,
    pub title: String,
    pub text: String,
    pub seconds: u32,
    /// Elapsed time at the end of this segment.
    pub cumulative_seconds: u32,
}

impl SpeechScript {
    pub fn total_seconds(&self) -> u32 {
        self.segments.iter().map(|s| s.seconds).sum()
    }

    /// Human-readable script with per-slide timing.
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# Speaker script\n\nStyle: {} · Target: {}\n",
            self.style,
            clock(self.target_seconds)
        );
        for seg in &self.segments {
            out.push_str(&format!(
                "\n## Slide {}: {}\n\n_{} (at {})_\n\n{}\n",
                seg.slide_index,
                seg.title,
                clock(seg.seconds),
                clock(seg.cumulative_seconds),
                seg.text.trim()
            ));
        }
        out
    }
}

fn clock(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_lists_every_segment() {
        let script = SpeechScript {
            plan_revision: 1,
            style: SpeechStyle::Classroom,
            target_seconds: 90,
            segments: vec![
                SpeechSegment {
                    slide_index: 1,
                    title: "Intro".into(),
                    text: "Hello.".into(),
                    seconds: 30,
                    cumulative_seconds: 30,
                },
                SpeechSegment {
                    slide_index: 2,
                    title: "Method".into(),
                    text: "We do this.".into(),
                    seconds: 60,
                    cumulative_seconds: 90,
                },
            ],
        };
        let md = script.to_markdown();
        assert!(md.contains("## Slide 2: Method"));
        assert!(md.contains("1:30"));
        assert_eq!(script.total_seconds(), 90);
    }
}
