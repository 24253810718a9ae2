//! Heading scan and the running title-stack timeline shared by all three chunking
//! strategies.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingEvent {
    /// Char offset (not byte offset) into the `\n`-normalised text.
    pub offset: usize,
    pub level: u8,
    pub text: String,
}

/// Scans `text` (already `\n`-normalised) for ATX (`#{1,6} `) and Setext (`===`/`---`)
/// headings, in document order. Offsets are char offsets so they compose directly with
/// the char-indexed segments the splitter strategies produce.
pub fn find_headings(text: &str) -> Vec<HeadingEvent> {
    let mut events = Vec::new();
    let mut offset = 0usize;
    let lines: Vec<&str> = text.split('\n').collect();
    let mut line_offsets = Vec::with_capacity(lines.len());
    for line in &lines {
        line_offsets.push(offset);
        offset += line.chars().count() + 1; // account for the '\n' we split on
    }

    for (i, line) in lines.iter().enumerate() {
        if let Some((level, heading_text)) = parse_atx(line) {
            events.push(HeadingEvent { offset: line_offsets[i], level, text: heading_text });
            continue;
        }
        if let Some(level) = parse_setext_underline(line) {
            // Setext headings attribute to the previous non-blank line, which must not
            // itself be blank, an ATX heading, or a Setext underline.
            if i == 0 {
                continue;
            }
            let prev = lines[i - 1];
            if prev.trim().is_empty() || parse_atx(prev).is_some() || parse_setext_underline(prev).is_some() {
                continue;
            }
            events.push(HeadingEvent {
                offset: line_offsets[i - 1],
                level,
                text: prev.trim().to_string(),
            });
        }
    }

    events
}

fn parse_atx(line: &str) -> Option<(u8, String)> {
    let trimmed_start = line;
    let hashes = trimmed_start.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed_start[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    Some((hashes as u8, rest.trim().to_string()))
}

fn parse_setext_underline(line: &str) -> Option<u8> {
    let t = line.trim_end();
    if t.is_empty() {
        return None;
    }
    if t.chars().all(|c| c == '=') {
        Some(1)
    } else if t.chars().all(|c| c == '-') {
        Some(2)
    } else {
        None
    }
}

/// Maps any character offset in the document to the title chain in effect at that point:
/// a running title stack, snapshotted after each heading is processed.
pub struct TitleTimeline {
    checkpoints: Vec<(usize, Vec<String>)>,
}

impl TitleTimeline {
    pub fn build(headings: &[HeadingEvent]) -> Self {
        let mut stack: Vec<(u8, String)> = Vec::new();
        let mut checkpoints = vec![(0usize, Vec::new())];
        for h in headings {
            while let Some((lvl, _)) = stack.last() {
                if *lvl >= h.level {
                    stack.pop();
                } else {
                    break;
                }
            }
            stack.push((h.level, h.text.clone()));
            let chain: Vec<String> = stack.iter().map(|(_, t)| t.clone()).collect();
            checkpoints.push((h.offset, chain));
        }
        Self { checkpoints }
    }

    pub fn at(&self, offset: usize) -> Vec<String> {
        let idx = self.checkpoints.partition_point(|(o, _)| *o <= offset);
        self.checkpoints[idx - 1].1.clone()
    }
}
