/// Per-set accumulator. Owned by the running set, reset when a set starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunningCounters {
    pub confirmed_chars: usize,
    pub keystrokes: usize,
    pub errors: usize,
    pub combo: usize,
    pub max_combo: usize,
    /// Confirmed chars that came out of an IME composition. Analytics only.
    pub composed_chars: usize,
}

impl RunningCounters {
    pub fn record(&mut self, correct: bool, is_composed: bool) {
        self.confirmed_chars += 1;
        self.keystrokes += 1;
        if is_composed {
            self.composed_chars += 1;
        }
        if correct {
            self.combo += 1;
            self.max_combo = self.max_combo.max(self.combo);
        } else {
            self.errors += 1;
            self.combo = 0;
        }
    }

    /// Corrections are free: only the combo is lost.
    pub fn backspace(&mut self) {
        self.combo = 0;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
