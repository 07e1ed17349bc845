//! Percentage reporting for nested update stages.

/// Progress sink mapping a stage's 0–100 % onto a sub-range of the caller's
/// scale.
pub struct Progress<'a> {
    sink: &'a mut dyn FnMut(u32, &str),
    begin: u32,
    end: u32,
}

impl<'a> Progress<'a> {
    pub fn new(sink: &'a mut dyn FnMut(u32, &str)) -> Self {
        Self {
            sink,
            begin: 0,
            end: 100,
        }
    }

    /// Report `percent` of this range, with an optional stage label (empty for none).
    pub fn report(&mut self, percent: u32, label: &str) {
        let percent = percent.min(100);
        (self.sink)(self.begin + percent * (self.end - self.begin) / 100, label);
    }

    /// Narrow to `begin..end` percent of this range; an inverted range is empty.
    pub fn sub(&mut self, begin: u32, end: u32) -> Progress<'_> {
        debug_assert!(begin <= end, "inverted progress range {begin}..{end}");
        let span = self.end.saturating_sub(self.begin);
        let begin = begin.min(100);
        let end = end.clamp(begin, 100);
        Progress {
            begin: self.begin + begin * span / 100,
            end: self.begin + end * span / 100,
            sink: &mut *self.sink,
        }
    }

    /// Range of the `index`-th of `count` equally sized steps.
    pub fn step(&mut self, index: usize, count: usize) -> Progress<'_> {
        let count = count.max(1) as u32;
        let index = index as u32;
        self.sub(index * 100 / count, (index + 1) * 100 / count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_ranges_scale_into_parent() {
        let mut seen = Vec::new();
        let mut sink = |p: u32, label: &str| seen.push((p, label.to_string()));
        let mut progress = Progress::new(&mut sink);
        progress.report(0, "start");
        {
            let mut items = progress.sub(30, 100);
            items.report(0, "");
            let mut second = items.step(1, 2);
            second.report(50, "");
            second.report(100, "");
        }
        progress.report(150, "done");
        let values: Vec<u32> = seen.iter().map(|(p, _)| *p).collect();
        assert_eq!(values, vec![0, 30, 82, 100, 100]);
        assert_eq!(seen[0].1, "start");
    }

    #[test]
    fn out_of_range_bounds_are_clamped() {
        let mut seen = Vec::new();
        let mut sink = |p: u32, _: &str| seen.push(p);
        let mut progress = Progress::new(&mut sink);
        {
            let mut tail = progress.sub(80, 250);
            tail.report(100, "");
            let mut past = tail.step(3, 2);
            past.report(100, "");
        }
        assert_eq!(seen, vec![100, 100]);
    }
}
