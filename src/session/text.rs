pub const DEFAULT_PASSAGES: [&str; 3] = [
    "the quick brown fox jumps over the lazy dog 12345 and 67890 while jazz rhythms play softly.",
    "すばやい狐が林をかけ抜け、新月の夜には街角のミュージシャンが軽やかに演奏する。",
    "Practice steady keystrokes; focus on rhythm, reduce tension, and breathe evenly throughout the sprint.",
];

/// Supplies the practice text for each set.
pub trait PracticeText {
    fn text_for_set(&self, set_index: usize) -> &str;
}

/// Fixed passages picked by set index modulo the list length.
#[derive(Clone, Debug)]
pub struct Passages {
    passages: Vec<String>,
}

impl Passages {
    pub fn new(passages: Vec<String>) -> Self {
        Self { passages }
    }
}

impl Default for Passages {
    fn default() -> Self {
        Self::new(DEFAULT_PASSAGES.iter().map(|p| p.to_string()).collect())
    }
}

impl PracticeText for Passages {
    fn text_for_set(&self, set_index: usize) -> &str {
        if self.passages.is_empty() {
            return "";
        }
        &self.passages[set_index % self.passages.len()]
    }
}
